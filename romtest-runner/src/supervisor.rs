// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supervision of a single emulator run.
//!
//! A run is a polling loop. Every tick, in this order:
//!
//! 1. the classifier looks for a pass or fail marker in the output read since the last tick,
//! 2. otherwise, the emulator is checked for exit (an exit without a marker is a crash),
//! 3. otherwise, the elapsed time is checked against the timeout,
//! 4. otherwise, the supervisor sleeps for the poll interval.
//!
//! Checking for a marker before checking for exit means that a ROM which prints its result and
//! immediately exits is never reported as a crash. Earlier output never carries a marker (or the
//! run would already have ended), so scanning only new lines gives the same answer as rescanning
//! everything. Each tick reads a bounded amount of output, so a flood of output can't push the
//! timeout check back.
//!
//! However the loop ends, including through an error or a panic, the emulator is terminated and
//! reaped exactly once.

use crate::{
    classifier::ResultClassifier,
    errors::SupervisorError,
    process::{EmulatorCommand, EmulatorProcess, SupervisedProcess},
    reader::{NonBlockingSource, OutputStream, ReadOutcome, StreamReader},
    signal::SignalHandler,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fmt,
    process::ExitStatus,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// The final status of a single ROM run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestStatus {
    /// The emulator printed the pass marker.
    Pass,

    /// The emulator printed the fail marker.
    Fail,

    /// Neither a marker nor an exit was observed before the timeout.
    Timeout,

    /// The emulator exited without printing a marker.
    Crashed,
}

impl TestStatus {
    /// Returns true if the test was successful.
    pub fn is_success(self) -> bool {
        match self {
            TestStatus::Pass => true,
            TestStatus::Fail | TestStatus::Timeout | TestStatus::Crashed => false,
        }
    }

    /// Returns a short description of the status, e.g. "timed out".
    pub fn description(self) -> &'static str {
        match self {
            TestStatus::Pass => "passed",
            TestStatus::Fail => "failed",
            TestStatus::Timeout => "timed out",
            TestStatus::Crashed => "crashed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => f.pad("PASS"),
            TestStatus::Fail => f.pad("FAIL"),
            TestStatus::Timeout => f.pad("TIMEOUT"),
            TestStatus::Crashed => f.pad("CRASH"),
        }
    }
}

/// The result of running the emulator against one ROM.
#[derive(Clone, Debug)]
pub struct TestResult {
    /// The ROM that was run.
    pub rom: Utf8PathBuf,

    /// The status the run resolved to.
    pub status: TestStatus,

    /// Everything the emulator wrote to stdout up to the moment the status was determined.
    pub output: String,

    /// Everything the emulator wrote to stderr up to the same moment.
    pub stderr: String,

    /// The emulator's exit status, if it had exited when the status was determined.
    pub exit_status: Option<ExitStatus>,

    /// How long the run took.
    pub time_taken: Duration,
}

/// Timing parameters for a supervised run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupervisorOpts {
    /// How long a run may take before it's considered timed out.
    pub timeout: Duration,

    /// How long to sleep between ticks.
    ///
    /// Shorter intervals notice results sooner at the cost of more CPU spent polling.
    pub poll_interval: Duration,

    /// How long the emulator gets to exit after SIGTERM before it's sent SIGKILL.
    pub grace_period: Duration,
}

impl Default for SupervisorOpts {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(50),
            poll_interval: Duration::from_millis(10),
            grace_period: Duration::from_secs(1),
        }
    }
}

/// Runs the emulator against individual ROMs.
#[derive(Clone, Debug)]
pub struct Supervisor<'a> {
    command: &'a EmulatorCommand,
    classifier: &'a ResultClassifier,
    opts: SupervisorOpts,
    signals: &'a SignalHandler,
}

impl<'a> Supervisor<'a> {
    /// Creates a new supervisor.
    pub fn new(
        command: &'a EmulatorCommand,
        classifier: &'a ResultClassifier,
        opts: SupervisorOpts,
        signals: &'a SignalHandler,
    ) -> Self {
        Self {
            command,
            classifier,
            opts,
            signals,
        }
    }

    /// Spawns the emulator for `rom` and supervises it until the run resolves.
    pub fn run(&self, rom: &Utf8Path) -> Result<TestResult, SupervisorError> {
        let process = EmulatorProcess::spawn(self.command, rom)?;
        self.supervise(rom, process)
    }

    /// Supervises an already-spawned process until the run resolves.
    pub fn supervise<P: SupervisedProcess>(
        &self,
        rom: &Utf8Path,
        process: P,
    ) -> Result<TestResult, SupervisorError> {
        // From here on, every way out of this function terminates the process.
        let mut guard = ProcessGuard::new(process, self.opts.grace_period, self.signals);

        let stdout = guard
            .process
            .take_stdout()
            .ok_or(SupervisorError::OutputHandleMissing {
                stream: OutputStream::Stdout,
            })?;
        let stderr = guard
            .process
            .take_stderr()
            .ok_or(SupervisorError::OutputHandleMissing {
                stream: OutputStream::Stderr,
            })?;
        let mut stdout = StreamReader::new(OutputStream::Stdout, stdout)?;
        let mut stderr = StreamReader::new(OutputStream::Stderr, stderr)?;
        let overlap = self.classifier.longest_marker_len().saturating_sub(1);

        let start = Instant::now();
        let (status, exit_status) = loop {
            if self.signals.is_interrupted() {
                debug!(%rom, "interrupted, abandoning run");
                return Err(SupervisorError::Interrupted);
            }

            stdout.poll_read()?;
            stderr.poll_read()?;

            if let Some(status) = self.classifier.classify(stdout.unscanned_lines(overlap)) {
                break (status, None);
            }

            if let Some(exit_status) = guard.try_wait()? {
                // Anything written between the read above and the exit is still in the pipe.
                let deadline = start + self.opts.timeout;
                drain_until(&mut stdout, deadline)?;
                drain_until(&mut stderr, deadline)?;
                let status = self
                    .classifier
                    .classify(stdout.unscanned_lines(overlap))
                    .unwrap_or(TestStatus::Crashed);
                break (status, Some(exit_status));
            }

            if start.elapsed() >= self.opts.timeout {
                break (TestStatus::Timeout, None);
            }

            thread::sleep(self.opts.poll_interval);
        };

        let time_taken = start.elapsed();
        debug!(%rom, %status, ?time_taken, "run resolved");

        Ok(TestResult {
            rom: rom.to_owned(),
            status,
            output: stdout.contents(),
            stderr: stderr.contents(),
            exit_status,
            time_taken,
        })
    }
}

/// Reads from `reader` until nothing is left or `deadline` passes.
fn drain_until<S: NonBlockingSource>(
    reader: &mut StreamReader<S>,
    deadline: Instant,
) -> Result<(), SupervisorError> {
    while let ReadOutcome::Data(_) = reader.poll_read()? {
        if Instant::now() >= deadline {
            break;
        }
    }
    Ok(())
}

/// Owns a supervised process and terminates it when dropped.
///
/// While the guard is alive, the process's group is registered with the signal handler, so that
/// a second signal can kill it.
struct ProcessGuard<'a, P: SupervisedProcess> {
    process: P,
    grace_period: Duration,
    signals: &'a SignalHandler,
}

impl<'a, P: SupervisedProcess> ProcessGuard<'a, P> {
    fn new(process: P, grace_period: Duration, signals: &'a SignalHandler) -> Self {
        if let Some(pgid) = process.process_group() {
            signals.set_child_group(pgid);
        }
        Self {
            process,
            grace_period,
            signals,
        }
    }

    fn try_wait(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        self.process
            .try_wait()
            .map_err(|err| SupervisorError::Wait { err })
    }
}

impl<P: SupervisedProcess> Drop for ProcessGuard<'_, P> {
    fn drop(&mut self) {
        match self.process.terminate(self.grace_period) {
            Ok(outcome) => debug!(?outcome, "emulator terminated"),
            Err(err) => warn!("failed to terminate emulator: {err}"),
        }
        self.signals.clear_child_group();
    }
}
