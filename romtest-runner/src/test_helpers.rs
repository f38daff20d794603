// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory stand-ins for emulator processes, used by unit tests.

use crate::{
    process::{SupervisedProcess, TerminateOutcome},
    reader::NonBlockingSource,
};
use std::{
    cell::Cell,
    collections::VecDeque,
    io::{self, Read},
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    rc::Rc,
    time::Duration,
};

/// One scripted response to a `read` call.
#[derive(Debug)]
pub(crate) enum ReadStep {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
    Error(io::ErrorKind),
    Panic,
}

impl ReadStep {
    pub(crate) fn data(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }
}

/// An output stream that replays a script of read results.
///
/// Once the script runs out, every read reports "would block".
#[derive(Debug)]
pub(crate) struct ScriptedOutput {
    steps: VecDeque<ReadStep>,
    nonblocking_calls: Rc<Cell<usize>>,
}

impl ScriptedOutput {
    pub(crate) fn new(steps: impl IntoIterator<Item = ReadStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            nonblocking_calls: Rc::new(Cell::new(0)),
        }
    }

    pub(crate) fn nonblocking_calls(&self) -> Rc<Cell<usize>> {
        self.nonblocking_calls.clone()
    }
}

impl Read for ScriptedOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None | Some(ReadStep::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Data(mut data)) => {
                if data.len() > buf.len() {
                    let rest = data.split_off(buf.len());
                    self.steps.push_front(ReadStep::Data(rest));
                }
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Some(ReadStep::Eof) => {
                self.steps.push_front(ReadStep::Eof);
                Ok(0)
            }
            Some(ReadStep::Error(kind)) => Err(kind.into()),
            Some(ReadStep::Panic) => panic!("scripted read panic"),
        }
    }
}

impl NonBlockingSource for ScriptedOutput {
    fn set_nonblocking(&mut self) -> io::Result<()> {
        self.nonblocking_calls.set(self.nonblocking_calls.get() + 1);
        Ok(())
    }
}

/// A process that exits after a fixed number of exit checks (or never).
#[derive(Debug)]
pub(crate) struct MockProcess {
    stdout: Option<ScriptedOutput>,
    stderr: Option<ScriptedOutput>,
    exit_after_polls: Option<(usize, ExitStatus)>,
    polls: usize,
    process_group: Option<u32>,
    terminate_calls: Rc<Cell<usize>>,
}

impl MockProcess {
    pub(crate) fn new(stdout: ScriptedOutput) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(ScriptedOutput::new([])),
            exit_after_polls: None,
            polls: 0,
            process_group: None,
            terminate_calls: Rc::new(Cell::new(0)),
        }
    }

    pub(crate) fn without_stdout() -> Self {
        let mut this = Self::new(ScriptedOutput::new([]));
        this.stdout = None;
        this
    }

    pub(crate) fn with_stderr(mut self, stderr: ScriptedOutput) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// The process reports having exited with `code` on the `polls`-th exit check.
    pub(crate) fn exits_after(mut self, polls: usize, code: i32) -> Self {
        self.exit_after_polls = Some((polls, ExitStatus::from_raw(code << 8)));
        self
    }

    pub(crate) fn with_process_group(mut self, pgid: u32) -> Self {
        self.process_group = Some(pgid);
        self
    }

    pub(crate) fn terminate_calls(&self) -> Rc<Cell<usize>> {
        self.terminate_calls.clone()
    }
}

impl SupervisedProcess for MockProcess {
    type Stdout = ScriptedOutput;
    type Stderr = ScriptedOutput;

    fn take_stdout(&mut self) -> Option<ScriptedOutput> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<ScriptedOutput> {
        self.stderr.take()
    }

    fn process_group(&self) -> Option<u32> {
        self.process_group
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.polls += 1;
        match self.exit_after_polls {
            Some((polls, status)) if self.polls >= polls => Ok(Some(status)),
            _ => Ok(None),
        }
    }

    fn terminate(&mut self, _grace_period: Duration) -> io::Result<TerminateOutcome> {
        self.terminate_calls.set(self.terminate_calls.get() + 1);
        Ok(TerminateOutcome::Terminated)
    }
}

/// Returns true if `pid` names a live process. Zombies don't count.
pub(crate) fn process_is_running(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state follows the parenthesized command name.
        Ok(stat) => stat
            .rsplit_once(") ")
            .is_some_and(|(_, rest)| !rest.starts_with(['Z', 'X'])),
        Err(_) if std::path::Path::new("/proc/self/stat").exists() => false,
        Err(_) => nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok(),
    }
}
