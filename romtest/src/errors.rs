// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::NO_HEADING_TARGET;
use romtest_runner::errors::{
    BuildError, ConfigParseError, ProfileNotFound, RunError, SignalHandlerSetupError,
};
use std::{error::Error, io::Write, path::PathBuf};
use thiserror::Error;
use tracing::error;

/// Documented exit codes for `romtest` failures.
///
/// Every failure, whether it is a failing test, an empty corpus, a failed build or an environment
/// error, currently exits with [`FAILED`](Self::FAILED).
pub enum RomtestExitCode {}

impl RomtestExitCode {
    /// Every ROM in the corpus passed.
    pub const OK: i32 = 0;

    /// Something went wrong: a ROM did not pass, or the harness could not run the corpus.
    pub const FAILED: i32 = 1;
}

/// An error that romtest knows how to present to the user.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("path `{}` is not valid UTF-8", .path.display())]
    NonUtf8Path { path: PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("signal handler setup error")]
    SignalHandlerSetupError {
        #[from]
        err: SignalHandlerSetupError,
    },
    #[error("test run error")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::NonUtf8Path { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::SignalHandlerSetupError { .. }
            | Self::RunError { .. }
            | Self::TestRunFailed => RomtestExitCode::FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                error!("{self}");
                Some(err as &(dyn Error + 'static))
            }
            Self::NonUtf8Path { .. } => {
                error!("{self}");
                None
            }
            Self::ConfigParseError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                err.source()
            }
            Self::SignalHandlerSetupError { err } => {
                error!("{err}");
                err.source()
            }
            Self::RunError { err } => display_run_error(err),
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

fn display_run_error(err: &RunError) -> Option<&(dyn Error + 'static)> {
    match err {
        RunError::Build(BuildError::Failed {
            command,
            exit_code,
            stdout,
            stderr,
        }) => {
            // The build's own output is the most useful thing to show, verbatim.
            let mut out = std::io::stderr().lock();
            let _ = out.write_all(stdout);
            let _ = out.write_all(stderr);
            let _ = out.flush();
            drop(out);

            match exit_code {
                Some(code) => error!("build command `{command}` failed with exit code {code}"),
                None => error!("build command `{command}` was terminated by a signal"),
            }
            None
        }
        RunError::Build(err) => {
            error!("{err}");
            err.source()
        }
        RunError::Corpus(err) => {
            error!("{err}");
            err.source()
        }
        RunError::Supervise { rom, err } => {
            error!("error while running `{rom}`: {err}");
            err.source()
        }
        other => {
            error!("{other}");
            other.source()
        }
    }
}
