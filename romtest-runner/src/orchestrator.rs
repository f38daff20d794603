// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test orchestrator: builds the emulator once, then runs it against every ROM in a corpus,
//! one at a time.
//!
//! The main structure in this module is [`Orchestrator`]. Progress is reported through
//! [`TestEvent`]s passed to a callback, usually a [`TestReporter`](crate::reporter::TestReporter).

use crate::{
    build::BuildCommand,
    config::HarnessSettings,
    corpus::{Corpus, CorpusSource},
    errors::{RunError, WriteEventError},
    helpers::plural,
    signal::SignalHandler,
    supervisor::{Supervisor, TestResult, TestStatus},
};
use camino::Utf8Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// Runs a corpus of ROMs against the emulator.
#[derive(Debug)]
pub struct Orchestrator<'a> {
    settings: &'a HarnessSettings,
    signals: &'a SignalHandler,
}

impl<'a> Orchestrator<'a> {
    /// Creates a new orchestrator.
    pub fn new(settings: &'a HarnessSettings, signals: &'a SignalHandler) -> Self {
        Self { settings, signals }
    }

    /// Resolves the corpus, builds the emulator and runs every ROM, in corpus order.
    ///
    /// Accepts a callback that is called with each event. Test outcomes never abort the run; any
    /// error does, including an error returned by the callback.
    pub fn execute<F>(
        &self,
        corpus: &dyn CorpusSource,
        mut callback: F,
    ) -> Result<RunSummary, RunError>
    where
        F: FnMut(TestEvent<'_>) -> Result<(), WriteEventError>,
    {
        let start_time = Instant::now();

        let resolved = corpus.resolve()?;
        if resolved.is_empty() {
            return Err(RunError::EmptyCorpus {
                description: corpus.description(),
            });
        }
        debug!(
            "resolved {} {} from {}",
            resolved.len(),
            plural::roms_str(resolved.len()),
            corpus.description()
        );

        self.execute_resolved(&resolved, start_time, &mut callback)
    }

    fn execute_resolved<F>(
        &self,
        corpus: &Corpus,
        start_time: Instant,
        callback: &mut F,
    ) -> Result<RunSummary, RunError>
    where
        F: FnMut(TestEvent<'_>) -> Result<(), WriteEventError>,
    {
        let settings = self.settings;

        callback(TestEvent::BuildStarted {
            command: &settings.build,
        })?;
        settings.build.run()?;

        let supervisor = Supervisor::new(
            &settings.emulator,
            &settings.classifier,
            settings.supervisor,
            self.signals,
        );

        let mut stats = RunStats {
            initial_run_count: corpus.len(),
            ..RunStats::default()
        };
        callback(TestEvent::RunStarted {
            rom_count: corpus.len(),
        })?;

        let mut results = Vec::with_capacity(corpus.len());
        for rom in corpus.roms() {
            callback(TestEvent::TestStarted { rom })?;
            let result = supervisor.run(rom).map_err(|err| RunError::Supervise {
                rom: rom.clone(),
                err,
            })?;
            stats.on_test_finished(result.status);
            callback(TestEvent::TestFinished { result: &result })?;
            results.push(result);
        }

        let elapsed = start_time.elapsed();
        debug!(?stats, ?elapsed, "run finished");
        callback(TestEvent::RunFinished {
            stats,
            results: &results,
            elapsed,
        })?;

        Ok(RunSummary { stats, results })
    }
}

/// An event that occurs while running a corpus.
#[derive(Clone, Debug)]
pub enum TestEvent<'a> {
    /// The build step started.
    BuildStarted {
        /// The build command.
        command: &'a BuildCommand,
    },

    /// The build finished, and ROMs are about to be run.
    RunStarted {
        /// The number of ROMs that will be run.
        rom_count: usize,
    },

    /// A ROM started running.
    TestStarted {
        /// The ROM.
        rom: &'a Utf8Path,
    },

    /// A ROM finished running.
    TestFinished {
        /// The result of the run.
        result: &'a TestResult,
    },

    /// Every ROM has been run.
    RunFinished {
        /// Statistics for the run.
        stats: RunStats,

        /// Every result, in corpus order.
        results: &'a [TestResult],

        /// The time taken by the whole run, including the build.
        elapsed: Duration,
    },
}

/// The outcome of a completed run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Statistics for the run.
    pub stats: RunStats,

    /// Every result, in corpus order.
    pub results: Vec<TestResult>,
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of ROMs that were expected to be run at the beginning.
    pub initial_run_count: usize,

    /// The total number of ROMs that were actually run.
    pub final_run_count: usize,

    /// The number of ROMs that passed.
    pub passed: usize,

    /// The number of ROMs that failed.
    pub failed: usize,

    /// The number of ROMs that timed out.
    pub timed_out: usize,

    /// The number of ROMs whose emulator exited without printing a result.
    pub crashed: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run is a success only if every ROM that was expected to run did, and passed.
    pub fn is_success(&self) -> bool {
        self.initial_run_count == self.final_run_count && self.passed == self.final_run_count
    }

    /// Returns the number of ROMs that didn't pass.
    pub fn failure_count(&self) -> usize {
        self.failed + self.timed_out + self.crashed
    }

    fn on_test_finished(&mut self, status: TestStatus) {
        self.final_run_count += 1;
        match status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Timeout => self.timed_out += 1,
            TestStatus::Crashed => self.crashed += 1,
        }
    }
}
