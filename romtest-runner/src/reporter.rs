// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints [`TestEvent`]s for humans.

use crate::{
    helpers::{display_exited_with, plural},
    orchestrator::{RunStats, TestEvent},
    supervisor::{TestResult, TestStatus},
};
use camino::{Utf8Path, Utf8PathBuf};
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};
use swrite::{SWrite, swrite};

const DELIMITER_WIDTH: usize = 60;

/// Reports test events to a writer, typically stderr.
#[derive(Debug)]
pub struct TestReporter {
    root: Utf8PathBuf,
    styles: Styles,
}

impl TestReporter {
    /// Creates a new reporter. ROM paths are displayed relative to `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            styles: Styles::default(),
        }
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Reports a test event.
    pub fn report_event(&mut self, event: TestEvent<'_>, mut writer: impl Write) -> io::Result<()> {
        match event {
            TestEvent::BuildStarted { command } => {
                writeln!(
                    writer,
                    "{:>12} {}",
                    "Building".style(self.styles.pass),
                    command.style(self.styles.count),
                )?;
            }
            TestEvent::RunStarted { rom_count } => {
                writeln!(
                    writer,
                    "{:>12} {} {}",
                    "Starting".style(self.styles.pass),
                    rom_count.style(self.styles.count),
                    plural::tests_str(rom_count),
                )?;
            }
            TestEvent::TestStarted { .. } => {}
            TestEvent::TestFinished { result } => {
                let status_style = self.status_style(result.status);
                writeln!(
                    writer,
                    "{:>12} [{:>8.3}s] {}",
                    result.status.style(status_style),
                    result.time_taken.as_secs_f64(),
                    self.display_rom(&result.rom),
                )?;
            }
            TestEvent::RunFinished {
                stats,
                results,
                elapsed,
            } => {
                for result in results.iter().filter(|r| !r.status.is_success()) {
                    self.write_failure(result, &mut writer)?;
                }
                self.write_summary(&stats, elapsed.as_secs_f64(), &mut writer)?;
            }
        }

        Ok(())
    }

    // ---
    // Helper methods
    // ---

    fn write_failure(&self, result: &TestResult, mut writer: impl Write) -> io::Result<()> {
        writeln!(writer)?;
        writeln!(
            writer,
            "{} {}: {}",
            "---".style(self.styles.fail),
            self.display_rom(&result.rom).style(self.styles.count),
            describe_status(result),
        )?;

        write_delimiter(&mut writer, Some("stdout"))?;
        write_output(&mut writer, &result.output)?;
        if !result.stderr.is_empty() {
            write_delimiter(&mut writer, Some("stderr"))?;
            write_output(&mut writer, &result.stderr)?;
        }
        write_delimiter(&mut writer, None)
    }

    fn write_summary(
        &self,
        stats: &RunStats,
        elapsed_secs: f64,
        mut writer: impl Write,
    ) -> io::Result<()> {
        let summary_style = if stats.is_success() {
            self.styles.pass
        } else {
            self.styles.fail
        };
        write!(
            writer,
            "{:>12} [{:>8.3}s] ",
            "Summary".style(summary_style),
            elapsed_secs,
        )?;

        write!(writer, "{}", stats.final_run_count.style(self.styles.count))?;
        if stats.final_run_count != stats.initial_run_count {
            write!(writer, "/{}", stats.initial_run_count.style(self.styles.count))?;
        }
        write!(
            writer,
            " {} run: {} {}",
            plural::tests_str(stats.initial_run_count),
            stats.passed.style(self.styles.count),
            "passed".style(self.styles.pass),
        )?;

        for (count, label, style) in [
            (stats.failed, "failed", self.styles.fail),
            (stats.timed_out, "timed out", self.styles.timeout),
            (stats.crashed, "crashed", self.styles.fail),
        ] {
            if count > 0 {
                write!(
                    writer,
                    ", {} {}",
                    count.style(self.styles.count),
                    label.style(style)
                )?;
            }
        }

        writeln!(writer)
    }

    fn status_style(&self, status: TestStatus) -> Style {
        match status {
            TestStatus::Pass => self.styles.pass,
            TestStatus::Timeout => self.styles.timeout,
            TestStatus::Fail | TestStatus::Crashed => self.styles.fail,
        }
    }

    fn display_rom<'a>(&self, rom: &'a Utf8Path) -> &'a Utf8Path {
        rom.strip_prefix(&self.root).unwrap_or(rom)
    }
}

fn describe_status(result: &TestResult) -> String {
    let mut out = result.status.description().to_owned();
    match (result.status, result.exit_status) {
        (TestStatus::Crashed, Some(exit_status)) => {
            swrite!(out, ": emulator {}", display_exited_with(exit_status));
        }
        (TestStatus::Timeout, _) => {
            swrite!(out, " after {:.3}s", result.time_taken.as_secs_f64());
        }
        _ => {}
    }
    out
}

fn write_delimiter(mut writer: impl Write, label: Option<&str>) -> io::Result<()> {
    match label {
        Some(label) => {
            let label = format!(" {label} ");
            writeln!(writer, "{:=^width$}", label, width = DELIMITER_WIDTH)
        }
        None => writeln!(writer, "{}", "=".repeat(DELIMITER_WIDTH)),
    }
}

fn write_output(mut writer: impl Write, output: &str) -> io::Result<()> {
    writer.write_all(output.as_bytes())?;
    if !output.is_empty() && !output.ends_with('\n') {
        writeln!(writer)?;
    }
    Ok(())
}

#[derive(Clone, Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    timeout: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.timeout = Style::new().yellow().bold();
    }
}
