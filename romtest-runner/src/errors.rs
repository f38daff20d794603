// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by romtest.
//!
//! None of these errors represent a test outcome: a ROM that fails, times out or crashes produces
//! a [`TestResult`](crate::supervisor::TestResult). These errors indicate that the environment
//! itself is broken.

use crate::reader::OutputStream;
use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{io, path::PathBuf};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse romtest config at `{config_file}`")]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),
    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
    /// The build command was empty.
    #[error("`build.command` must contain at least the program to run")]
    EmptyBuildCommand,
}

/// An error which indicates that a profile was requested but not known to romtest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurred while resolving the ROM corpus.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CorpusError {
    /// A glob pattern in the corpus definition was invalid.
    #[error("invalid ROM pattern `{pattern}`")]
    InvalidPattern {
        /// The pattern.
        pattern: String,

        /// The underlying error.
        #[source]
        err: globset::Error,
    },

    /// A corpus directory could not be listed.
    #[error("failed to list ROM directory `{dir}`")]
    ReadDir {
        /// The directory being listed.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: walkdir::Error,
    },

    /// A ROM path was not valid UTF-8.
    #[error("ROM path `{}` is not valid UTF-8", .path.display())]
    NonUtf8Path {
        /// The path.
        path: PathBuf,
    },
}

/// An error that occurred while running the build step.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The build command could not be executed at all.
    #[error("failed to execute build command `{command}`")]
    Exec {
        /// The command, joined as a shell string.
        command: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The build command ran, but exited with a failure.
    #[error("build command `{command}` failed")]
    Failed {
        /// The command, joined as a shell string.
        command: String,

        /// The exit code, if the command exited normally.
        exit_code: Option<i32>,

        /// Captured standard output.
        stdout: Vec<u8>,

        /// Captured standard error.
        stderr: Vec<u8>,
    },
}

/// An error that occurred while supervising a single emulator run.
///
/// These are environment problems, not test outcomes, and are never folded into a
/// [`TestStatus`](crate::supervisor::TestStatus).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// The emulator could not be spawned.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command, joined as a shell string.
        command: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The spawned process did not have the expected output handle.
    #[error("emulator {stream} handle is missing")]
    OutputHandleMissing {
        /// The stream that was missing.
        stream: OutputStream,
    },

    /// An output stream could not be switched to non-blocking mode.
    #[error("failed to make emulator {stream} non-blocking")]
    SetNonBlocking {
        /// The stream.
        stream: OutputStream,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Reading from an output stream failed with something other than "would block".
    #[error("failed to read emulator {stream}")]
    ReadOutput {
        /// The stream.
        stream: OutputStream,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Checking whether the emulator exited failed.
    #[error("failed to check emulator exit status")]
    Wait {
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The harness received a termination signal while the emulator was running.
    #[error("interrupted by signal")]
    Interrupted,
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// An error that occurred while writing an event to the reporter.
#[derive(Debug, Error)]
#[error("error writing to output")]
pub struct WriteEventError(#[from] io::Error);

/// An error that aborted an entire test run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// No ROMs were found, so nothing was built or run.
    #[error("no test ROMs found in {description}")]
    EmptyCorpus {
        /// A description of where ROMs were looked for.
        description: String,
    },

    /// Resolving the corpus failed.
    #[error("failed to resolve ROM corpus")]
    Corpus(#[from] CorpusError),

    /// The build step failed.
    #[error("build step failed")]
    Build(#[from] BuildError),

    /// Supervising one ROM failed for environmental reasons.
    #[error("error while running `{rom}`")]
    Supervise {
        /// The ROM being run.
        rom: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: SupervisorError,
    },

    /// Reporting an event failed.
    #[error(transparent)]
    WriteEvent(#[from] WriteEventError),
}
