// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals in romtest.
//!
//! Signals are received on a dedicated thread. The first one sets a flag that the supervisor
//! checks once per tick. The second one kills the running emulator's process group and exits the
//! harness without waiting for the supervisor.

use crate::errors::SignalHandlerSetupError;
use nix::{
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use signal_hook::{
    consts::TERM_SIGNALS,
    iterator::{SignalsInfo, exfiltrator::SignalOnly},
    low_level::emulate_default_handler,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI32, Ordering},
};
use tracing::debug;

/// Records whether the harness has been asked to shut down.
///
/// The supervisor checks this once per tick. When set, the current run ends with
/// [`SupervisorError::Interrupted`](crate::errors::SupervisorError::Interrupted) after the
/// emulator has been terminated. A second signal kills the emulator's process group and exits the
/// harness immediately.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Creates a new handler that responds to SIGINT, SIGTERM and SIGQUIT.
    pub fn new() -> Result<Self, SignalHandlerSetupError> {
        let state = Arc::new(SignalState::default());
        let mut signals = SignalsInfo::<SignalOnly>::new(TERM_SIGNALS)?;

        let thread_state = Arc::clone(&state);
        std::thread::spawn(move || {
            for signal in &mut signals {
                debug!(signal, "received termination signal");
                if thread_state.on_signal() {
                    // Exit the way the signal would have, had it not been caught.
                    let _ = emulate_default_handler(signal);
                    std::process::exit(1);
                }
            }
        });

        Ok(Self { state })
    }

    /// Creates a handler that never reports an interruption.
    pub fn noop() -> Self {
        Self {
            state: Arc::new(SignalState::default()),
        }
    }

    /// Returns true if a termination signal has been received.
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::Acquire)
    }

    /// Records the process group of the emulator that is currently running.
    pub(crate) fn set_child_group(&self, pgid: u32) {
        let pgid = i32::try_from(pgid).unwrap_or(0);
        self.state.child_pgid.store(pgid, Ordering::Release);
    }

    /// Forgets the current emulator's process group, once it has been reaped.
    pub(crate) fn clear_child_group(&self) {
        self.state.child_pgid.store(0, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn child_group(&self) -> Option<i32> {
        match self.state.child_pgid.load(Ordering::Acquire) {
            0 => None,
            pgid => Some(pgid),
        }
    }

    #[cfg(test)]
    pub(crate) fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn deliver(&self) -> bool {
        self.state.on_signal()
    }
}

#[derive(Debug, Default)]
struct SignalState {
    interrupted: AtomicBool,
    // 0 while no emulator is running.
    child_pgid: AtomicI32,
}

impl SignalState {
    /// Handles one termination signal. Returns true if the harness must exit now.
    fn on_signal(&self) -> bool {
        if !self.interrupted.swap(true, Ordering::AcqRel) {
            return false;
        }

        let pgid = self.child_pgid.load(Ordering::Acquire);
        if pgid > 0 {
            debug!(pgid, "second signal, killing emulator process group");
            // The group may already be gone.
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        }
        true
    }
}
