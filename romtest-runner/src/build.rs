// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The build step, run once before any ROM.

use crate::errors::BuildError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use tracing::debug;

/// The command that builds the emulator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildCommand {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
}

impl BuildCommand {
    /// Creates a new build command.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        cwd: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
        }
    }

    /// Returns the program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Returns the directory the build runs in.
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Runs the build to completion, capturing its output.
    ///
    /// Output is only surfaced if the build fails, through [`BuildError::Failed`].
    pub fn run(&self) -> Result<(), BuildError> {
        debug!(command = %self, cwd = %self.cwd, "running build");
        let output = duct::cmd(self.program.as_str(), self.args.iter().map(String::as_str))
            .dir(self.cwd.as_std_path())
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|err| BuildError::Exec {
                command: self.to_string(),
                err,
            })?;

        if output.status.success() {
            debug!(command = %self, "build succeeded");
            Ok(())
        } else {
            Err(BuildError::Failed {
                command: self.to_string(),
                exit_code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_words::join(self.argv()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_quotes_args() {
        let command = BuildCommand::new("cargo", ["build", "--features", "a b"], "/");
        assert_eq!(command.argv(), ["cargo", "build", "--features", "a b"]);
        assert_eq!(command.to_string(), "cargo build --features 'a b'");

        // `=` is quoted too, which is harmless to a shell.
        let command = BuildCommand::new("make", ["emulator", "PROFILE=release"], "/");
        assert_eq!(command.to_string(), "make emulator 'PROFILE=release'");
    }

    #[test]
    fn build_succeeds() {
        let root = camino_tempfile::tempdir().unwrap();
        let command = BuildCommand::new("sh", ["-c", "echo compiling > built.txt"], root.path());
        command.run().unwrap();
        assert_eq!(
            std::fs::read_to_string(root.path().join("built.txt")).unwrap(),
            "compiling\n"
        );
    }

    #[test]
    fn build_failure_captures_output() {
        let command = BuildCommand::new(
            "sh",
            ["-c", "echo 'Compiling gameboy-rs'; echo 'error[E0425]' >&2; exit 101"],
            "/",
        );
        match command.run() {
            Err(BuildError::Failed {
                exit_code,
                stdout,
                stderr,
                ..
            }) => {
                assert_eq!(exit_code, Some(101));
                assert_eq!(stdout, b"Compiling gameboy-rs\n");
                assert_eq!(stderr, b"error[E0425]\n");
            }
            other => panic!("expected build failure, found {other:?}"),
        }
    }

    #[test]
    fn build_exec_failure() {
        let command = BuildCommand::new("/nonexistent/cargo", ["build"], "/");
        match command.run() {
            Err(BuildError::Exec { command, .. }) => {
                assert_eq!(command, "/nonexistent/cargo build");
            }
            other => panic!("expected exec failure, found {other:?}"),
        }
    }
}
