// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{os::unix::process::ExitStatusExt, process::ExitStatus};

/// Utilities for pluralizing various words based on count or plurality.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "ROM" if `count` is 1, otherwise "ROMs".
    pub(crate) fn roms_str(count: usize) -> &'static str {
        if count == 1 { "ROM" } else { "ROMs" }
    }
}

/// Describes how a process exited, e.g. "exited with exit code 3" or "aborted with signal 11
/// (SIGSEGV)".
pub(crate) fn display_exited_with(exit_status: ExitStatus) -> String {
    match exit_status.signal() {
        Some(sig) => match signal_str(sig) {
            Some(s) => format!("aborted with signal {sig} (SIG{s})"),
            None => format!("aborted with signal {sig}"),
        },
        None => match exit_status.code() {
            Some(code) => format!("exited with exit code {code}"),
            None => "exited with an unknown error".to_owned(),
        },
    }
}

fn signal_str(signal: i32) -> Option<&'static str> {
    // These signal numbers are the same on at least Linux, macOS and FreeBSD.
    match signal {
        1 => Some("HUP"),
        2 => Some("INT"),
        3 => Some("QUIT"),
        4 => Some("ILL"),
        5 => Some("TRAP"),
        6 => Some("ABRT"),
        8 => Some("FPE"),
        9 => Some("KILL"),
        11 => Some("SEGV"),
        13 => Some("PIPE"),
        14 => Some("ALRM"),
        15 => Some("TERM"),
        _ => None,
    }
}
