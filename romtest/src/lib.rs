// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! The `romtest` command-line interface.
//!
//! The harness itself lives in the `romtest-runner` crate. This crate parses arguments, sets up
//! logging and turns errors into messages and exit codes.

mod dispatch;
mod errors;
mod output;

pub use dispatch::RomtestApp;
pub use errors::{ExpectedError, RomtestExitCode};
pub use output::OutputContext;
