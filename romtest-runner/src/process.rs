// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spawning and terminating emulator processes.

use crate::{errors::SupervisorError, reader::NonBlockingSource};
use camino::{Utf8Path, Utf8PathBuf};
use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use std::{
    io,
    os::unix::process::CommandExt,
    process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// How often a terminated child is checked for exit during its grace period.
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The emulator's serial trace channel, which is where ROMs report their results.
const TRACE_MODE: &str = "serial";

/// How to invoke the emulator for a single ROM.
///
/// The invocation is always `[runner...] <program> --rom <rom> --headless --trace-mode serial`,
/// run in the harness root.
#[derive(Clone, Debug)]
pub struct EmulatorCommand {
    runner: Vec<String>,
    program: Utf8PathBuf,
    cwd: Utf8PathBuf,
}

impl EmulatorCommand {
    /// Creates a new emulator command.
    pub fn new(program: impl Into<Utf8PathBuf>, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            runner: Vec::new(),
            program: program.into(),
            cwd: cwd.into(),
        }
    }

    /// Wraps the emulator invocation in a runner, e.g. a debugger or a shell.
    ///
    /// The runner's first element is the program that actually gets executed; the emulator path
    /// and its arguments are appended to the runner's arguments.
    pub fn with_runner(mut self, runner: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.runner = runner.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the path to the emulator binary.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Returns the working directory the emulator runs in.
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Returns the full argv for running `rom`.
    pub fn argv<'a>(&'a self, rom: &'a Utf8Path) -> Vec<&'a str> {
        let mut argv: Vec<&str> = self.runner.iter().map(String::as_str).collect();
        argv.extend([
            self.program.as_str(),
            "--rom",
            rom.as_str(),
            "--headless",
            "--trace-mode",
            TRACE_MODE,
        ]);
        argv
    }

    fn to_command(&self, rom: &Utf8Path) -> Command {
        let argv = self.argv(rom);
        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Put the emulator in its own process group so that termination reaches anything
            // it spawned.
            .process_group(0);
        cmd
    }
}

/// What happened when a process was terminated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TerminateOutcome {
    /// The process had already exited. Anything left in its process group was killed before the
    /// process was reaped.
    AlreadyExited,

    /// The process exited within its grace period after SIGTERM.
    Terminated,

    /// The process outlived its grace period and was killed with SIGKILL.
    Killed,
}

/// A running child process that can be polled and terminated.
///
/// [`EmulatorProcess`] is the real implementation; this trait exists so that the supervisor's
/// termination guarantees can be checked without real processes.
pub trait SupervisedProcess {
    /// The standard output handle.
    type Stdout: NonBlockingSource;

    /// The standard error handle.
    type Stderr: NonBlockingSource;

    /// Takes the standard output handle, if still present.
    fn take_stdout(&mut self) -> Option<Self::Stdout>;

    /// Takes the standard error handle, if still present.
    fn take_stderr(&mut self) -> Option<Self::Stderr>;

    /// Returns the process group the process leads, if it has one.
    fn process_group(&self) -> Option<u32>;

    /// Returns the exit status if the process has exited, without blocking.
    ///
    /// Where the platform allows it, the process is not reaped, so that its process group stays
    /// addressable until [`terminate`](Self::terminate).
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Terminates and reaps the process.
    ///
    /// Sends SIGTERM, waits up to `grace_period` for the process to exit, then sends SIGKILL. In
    /// every case, including a process that already exited, the rest of the process group is
    /// killed before the process is reaped.
    fn terminate(&mut self, grace_period: Duration) -> io::Result<TerminateOutcome>;
}

/// An emulator spawned for a single ROM.
#[derive(Debug)]
pub struct EmulatorProcess {
    child: Child,
    reaped: Option<ExitStatus>,
}

impl EmulatorProcess {
    /// Spawns the emulator for `rom`.
    pub fn spawn(command: &EmulatorCommand, rom: &Utf8Path) -> Result<Self, SupervisorError> {
        let child = command
            .to_command(rom)
            .spawn()
            .map_err(|err| SupervisorError::Spawn {
                command: shell_words::join(command.argv(rom)),
                err,
            })?;
        debug!(pid = child.id(), %rom, "spawned emulator");
        Ok(Self {
            child,
            reaped: None,
        })
    }

    /// Returns the OS process ID.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    fn signal_group(&self, signal: Signal) -> io::Result<()> {
        // The child is the leader of its own process group, so its pid is the group id.
        killpg(self.pid(), signal)?;
        Ok(())
    }

    /// Kills whatever is left of the process group, then reaps the leader.
    ///
    /// Must only be called once the leader has exited or been sent SIGKILL. Until it is reaped,
    /// the leader holds on to the group id, so the group can't have been recycled.
    fn kill_group_and_reap(&mut self) -> io::Result<ExitStatus> {
        match killpg(self.pid(), Signal::SIGKILL) {
            // Nothing left in the group.
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => return Err(err.into()),
        }
        let status = self.child.wait()?;
        self.reaped = Some(status);
        Ok(status)
    }
}

/// Checks whether `child` has exited, leaving it unreaped.
#[cfg(any(
    target_os = "android",
    all(target_os = "linux", not(target_env = "uclibc"))
))]
fn peek_exit_status(child: &mut Child) -> io::Result<Option<ExitStatus>> {
    use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
    use std::os::unix::process::ExitStatusExt;

    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    let status = match waitid(Id::Pid(Pid::from_raw(child.id() as i32)), flags)? {
        WaitStatus::Exited(_, code) => Some(ExitStatus::from_raw((code & 0xff) << 8)),
        WaitStatus::Signaled(_, signal, core_dumped) => Some(ExitStatus::from_raw(
            signal as i32 | if core_dumped { 0x80 } else { 0 },
        )),
        _ => None,
    };
    Ok(status)
}

/// Checks whether `child` has exited. This platform can't peek, so the child is reaped.
#[cfg(not(any(
    target_os = "android",
    all(target_os = "linux", not(target_env = "uclibc"))
)))]
fn peek_exit_status(child: &mut Child) -> io::Result<Option<ExitStatus>> {
    child.try_wait()
}

impl SupervisedProcess for EmulatorProcess {
    type Stdout = ChildStdout;
    type Stderr = ChildStderr;

    fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    fn process_group(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.reaped {
            Some(status) => Ok(Some(status)),
            None => peek_exit_status(&mut self.child),
        }
    }

    fn terminate(&mut self, grace_period: Duration) -> io::Result<TerminateOutcome> {
        if self.reaped.is_some() {
            return Ok(TerminateOutcome::AlreadyExited);
        }

        if let Some(status) = self.try_wait()? {
            debug!(pid = self.child.id(), %status, "emulator already exited");
            self.kill_group_and_reap()?;
            return Ok(TerminateOutcome::AlreadyExited);
        }

        debug!(pid = self.child.id(), "sending SIGTERM to emulator");
        self.signal_group(Signal::SIGTERM)?;

        let start = Instant::now();
        loop {
            if self.try_wait()?.is_some() {
                self.kill_group_and_reap()?;
                return Ok(TerminateOutcome::Terminated);
            }
            if start.elapsed() >= grace_period {
                break;
            }
            thread::sleep(TERMINATE_POLL_INTERVAL);
        }

        debug!(
            pid = self.child.id(),
            ?grace_period,
            "emulator outlived grace period, sending SIGKILL"
        );
        self.kill_group_and_reap()?;
        Ok(TerminateOutcome::Killed)
    }
}
