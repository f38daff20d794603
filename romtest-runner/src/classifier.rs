// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classifies emulator output by looking for terminal markers.

use crate::supervisor::TestStatus;
use bstr::ByteSlice;

/// The default substring that marks a passing ROM.
pub const DEFAULT_PASS_MARKER: &str = "Passed";

/// The default substring that marks a failing ROM.
pub const DEFAULT_FAIL_MARKER: &str = "Failed";

/// Looks for pass and fail markers in emulator output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResultClassifier {
    pass_marker: String,
    fail_marker: String,
}

impl Default for ResultClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PASS_MARKER, DEFAULT_FAIL_MARKER)
    }
}

impl ResultClassifier {
    /// Creates a new classifier with the given markers.
    pub fn new(pass_marker: impl Into<String>, fail_marker: impl Into<String>) -> Self {
        Self {
            pass_marker: pass_marker.into(),
            fail_marker: fail_marker.into(),
        }
    }

    /// Returns the pass marker.
    pub fn pass_marker(&self) -> &str {
        &self.pass_marker
    }

    /// Returns the fail marker.
    pub fn fail_marker(&self) -> &str {
        &self.fail_marker
    }

    /// Returns the length in bytes of the longer marker.
    pub fn longest_marker_len(&self) -> usize {
        self.pass_marker.len().max(self.fail_marker.len())
    }

    /// Returns the status indicated by the most recent line carrying a marker, or `None` if no
    /// line carries one yet.
    ///
    /// Lines are scanned from last to first. If a single line carries both markers, it's treated
    /// as a pass.
    pub fn classify<I, L>(&self, lines: I) -> Option<TestStatus>
    where
        I: IntoIterator<Item = L>,
        I::IntoIter: DoubleEndedIterator,
        L: AsRef<[u8]>,
    {
        lines.into_iter().rev().find_map(|line| {
            let line = line.as_ref();
            if line.contains_str(&self.pass_marker) {
                Some(TestStatus::Pass)
            } else if line.contains_str(&self.fail_marker) {
                Some(TestStatus::Fail)
            } else {
                None
            }
        })
    }
}
