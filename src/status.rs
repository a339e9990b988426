/// How a waited-for process changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
}

impl WaitStatus {
    /// Decode the raw status word filled in by `waitpid`.
    pub fn from_raw(raw_status: libc::c_int) -> Option<Self> {
        if unsafe { libc::WIFEXITED(raw_status) } {
            return Some(Self::Exited(unsafe { libc::WEXITSTATUS(raw_status) }));
        }

        if unsafe { libc::WIFSIGNALED(raw_status) } {
            return Some(Self::Signaled(unsafe { libc::WTERMSIG(raw_status) }));
        }

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            return Some(Self::Stopped(unsafe { libc::WSTOPSIG(raw_status) }));
        }

        None
    }

    /// Shell-style exit code: processes killed by signal map to `128 + signal`.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) | Self::Stopped(signal) => 128 + signal,
        }
    }
}
