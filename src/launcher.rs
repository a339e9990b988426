use std::io::{self, Write};
use std::os::fd::RawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use crate::error::ShellError;
use crate::job_control;

/// Signals the shell relays instead of acting on. A forked branch is part of
/// a job, so it must stop and die with the rest of its group.
const RELAYED_SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTSTP, libc::SIGALRM];

/// Which process group a newly created process joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Become the leader of a fresh group.
    Own,
    /// Join an existing group (second half of a pipeline).
    Join(libc::pid_t),
    /// Stay in the creator's group (processes created inside a forked branch).
    Inherit,
}

impl Placement {
    fn target(self) -> Option<libc::pid_t> {
        match self {
            Self::Own => Some(0),
            Self::Join(pgid) => Some(pgid),
            Self::Inherit => None,
        }
    }
}

/// Descriptor plumbing applied in a forked branch before its body runs.
#[derive(Debug, Default)]
pub struct BranchIo {
    dups: Vec<(RawFd, RawFd)>,
    closes: Vec<RawFd>,
}

impl BranchIo {
    /// Make `onto` refer to whatever `from` refers to.
    pub fn dup(mut self, from: RawFd, onto: RawFd) -> Self {
        self.dups.push((from, onto));
        self
    }

    /// Close `fd` once all dups are done.
    pub fn close(mut self, fd: RawFd) -> Self {
        self.closes.push(fd);
        self
    }

    fn apply(&self) -> Result<(), ShellError> {
        for &(from, onto) in &self.dups {
            rewire(from, onto)?;
        }
        for &fd in &self.closes {
            unsafe {
                libc::close(fd);
            }
        }
        Ok(())
    }
}

/// Duplicate `from` onto `onto`, replacing whatever `onto` was.
pub fn rewire(from: RawFd, onto: RawFd) -> Result<(), ShellError> {
    loop {
        if unsafe { libc::dup2(from, onto) } >= 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(ShellError::syscall("dup2", err));
    }
}

/// Run external command text as `<interpreter> -c <text>` in a new process.
///
/// The child inherits descriptors 0/1/2 as they are right now, so callers
/// inside a forked branch get their pipe or file wiring for free. Exec
/// failures surface here as an error; the half-made child never runs any
/// shell code.
pub fn spawn_external(
    text: &str,
    interpreter: &Path,
    placement: Placement,
) -> Result<libc::pid_t, ShellError> {
    let mut command = Command::new(interpreter);
    command.arg("-c").arg(text);
    if let Some(pgid) = placement.target() {
        command.process_group(pgid);
    }

    let child = command
        .spawn()
        .map_err(|err| ShellError::syscall("execv", err))?;
    let pid = child.id() as libc::pid_t;
    tracing::debug!(pid, ?placement, text, "external command launched");
    Ok(pid)
}

/// Fork a copy of the shell that runs `body` and exits with its return
/// value. `body` never returns control to the caller's prompt loop.
pub fn fork_branch(
    placement: Placement,
    io: BranchIo,
    body: impl FnOnce() -> i32,
) -> Result<libc::pid_t, ShellError> {
    // Anything still buffered would otherwise be written twice.
    flush_std_streams();

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(ShellError::last_os_error("fork"));
    }

    if pid == 0 {
        let code = match enter_branch(placement, &io) {
            Ok(()) => body(),
            Err(err) => {
                eprintln!("smash error: {err}");
                1
            }
        };
        flush_std_streams();
        unsafe { libc::_exit(code) }
    }

    // Set the group from both sides so neither process can race ahead of it.
    if let Some(pgid) = placement.target() {
        let pgid = if pgid == 0 { pid } else { pgid };
        job_control::set_process_group(pid, pgid)
            .map_err(|err| ShellError::syscall("setpgid", err))?;
    }

    tracing::debug!(pid, ?placement, "branch forked");
    Ok(pid)
}

fn enter_branch(placement: Placement, io: &BranchIo) -> Result<(), ShellError> {
    for signal in RELAYED_SIGNALS {
        job_control::reset_signal(signal).map_err(|err| ShellError::syscall("signal", err))?;
    }
    if let Some(pgid) = placement.target() {
        job_control::set_process_group(0, pgid)
            .map_err(|err| ShellError::syscall("setpgid", err))?;
    }
    io.apply()
}

fn flush_std_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_control::GroupWaiter;
    use crate::status::WaitStatus;

    #[test]
    fn external_runs_through_interpreter_in_own_group() {
        let pid = spawn_external("exit 3", Path::new("/bin/sh"), Placement::Own).unwrap();
        assert_eq!(unsafe { libc::getpgid(pid) }, pid);
        assert_eq!(GroupWaiter::new(pid).finish().unwrap(), Some(WaitStatus::Exited(3)));
    }

    #[test]
    fn missing_interpreter_is_a_syscall_error() {
        let err = spawn_external("true", Path::new("/nonexistent/sh"), Placement::Own).unwrap_err();
        assert!(err.to_string().starts_with("execv failed: "), "got {err}");
    }

    #[test]
    fn placement_targets() {
        assert_eq!(Placement::Own.target(), Some(0));
        assert_eq!(Placement::Join(77).target(), Some(77));
        assert_eq!(Placement::Inherit.target(), None);
    }
}
