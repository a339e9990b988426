use std::io;

use crate::jobs::JobProbe;
use crate::status::WaitStatus;

/// Where a process group stands after draining its pending wait reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupState {
    Running,
    Stopped,
    /// Every member has exited; carries the leader's status when it was seen.
    Finished(Option<WaitStatus>),
}

pub(crate) fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; caller can proceed with best-effort behavior.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

/// Send `signal` to every process in group `pgid`.
pub(crate) fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    retry_eintr(|| unsafe { libc::killpg(pgid, signal) })
}

/// Send `signal` to the single process `pid`.
pub(crate) fn signal_process(pid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"));
    }

    retry_eintr(|| unsafe { libc::kill(pid, signal) })
}

fn retry_eintr(mut call: impl FnMut() -> libc::c_int) -> io::Result<()> {
    loop {
        if call() == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Non-blocking view of one process group's children, accumulated across polls.
pub(crate) struct GroupWaiter {
    pgid: libc::pid_t,
    /// The member whose status `Finished` carries.
    leader: libc::pid_t,
    leader_status: Option<WaitStatus>,
}

impl GroupWaiter {
    pub(crate) fn new(pgid: libc::pid_t) -> Self {
        Self::with_leader(pgid, pgid)
    }

    /// Wait on group `pgid` but report the status of `leader`, which need
    /// not be the group leader (a command started inside a forked branch).
    pub(crate) fn with_leader(pgid: libc::pid_t, leader: libc::pid_t) -> Self {
        Self {
            pgid,
            leader,
            leader_status: None,
        }
    }

    /// Collect every report the group has pending without blocking.
    pub(crate) fn poll(&mut self) -> io::Result<GroupState> {
        self.collect(libc::WNOHANG | libc::WUNTRACED)
    }

    /// Block until every member of the group has exited.
    pub(crate) fn finish(&mut self) -> io::Result<Option<WaitStatus>> {
        match self.collect(0)? {
            GroupState::Finished(status) => Ok(status),
            _ => unreachable!("blocking collect only returns once the group is gone"),
        }
    }

    fn collect(&mut self, options: libc::c_int) -> io::Result<GroupState> {
        let mut raw_status: libc::c_int = 0;

        loop {
            let rc = unsafe { libc::waitpid(-self.pgid, &mut raw_status, options) };
            if rc == 0 {
                return Ok(GroupState::Running);
            }

            if rc < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(code) if code == libc::EINTR => continue,
                    Some(code) if code == libc::ECHILD => {
                        return Ok(GroupState::Finished(self.leader_status));
                    }
                    _ => return Err(err),
                }
            }

            match WaitStatus::from_raw(raw_status) {
                Some(WaitStatus::Stopped(_)) => return Ok(GroupState::Stopped),
                Some(status) if rc == self.leader => self.leader_status = Some(status),
                _ => {}
            }
        }
    }
}

/// Put `signal` back to its default action.
pub(crate) fn reset_signal(signal: libc::c_int) -> io::Result<()> {
    if unsafe { libc::signal(signal, libc::SIG_DFL) } == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reap-pass probe for a background group: never blocks.
pub(crate) fn probe_group(pgid: libc::pid_t) -> JobProbe {
    match GroupWaiter::new(pgid).poll() {
        Ok(GroupState::Running) => JobProbe::Running,
        Ok(GroupState::Stopped) => JobProbe::Stopped,
        Ok(GroupState::Finished(_)) => JobProbe::Finished,
        Err(err) => {
            tracing::warn!(pgid, "waitpid failed during reap: {err}");
            JobProbe::Running
        }
    }
}
