// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for romtest: building an emulator, running it against a corpus of test
//! ROMs, and classifying each run by watching the emulator's serial output.
//!
//! The basic flow is:
//!
//! 1. [`corpus`] resolves the list of ROMs to run.
//! 2. [`build`] builds the emulator exactly once.
//! 3. [`orchestrator`] runs a [`supervisor`] per ROM, sequentially.
//! 4. The supervisor polls a [`reader`] and a [`classifier`] on every tick until the run resolves
//!    to a [`TestStatus`](supervisor::TestStatus).

#[cfg(not(unix))]
compile_error!("romtest-runner only supports Unix platforms");

pub mod build;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod errors;
mod helpers;
pub mod orchestrator;
pub mod process;
pub mod reader;
pub mod reporter;
pub mod signal;
pub mod supervisor;
#[cfg(test)]
mod test_helpers;
