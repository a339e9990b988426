use std::io;

use thiserror::Error;

use crate::jobs::JobId;

/// Everything a command can fail with. None of these are fatal to the shell:
/// the dispatcher reports them as `smash error: <message>` and moves on.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Malformed, missing or extra builtin arguments.
    #[error("{command}: {reason}")]
    Usage {
        command: &'static str,
        reason: &'static str,
    },

    /// A referenced job is missing or in the wrong state.
    #[error("{command}: job-id {job_id} {reason}")]
    Lookup {
        command: &'static str,
        job_id: JobId,
        reason: &'static str,
    },

    /// A POSIX call returned failure.
    #[error("{call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ShellError {
    pub fn usage(command: &'static str, reason: &'static str) -> Self {
        Self::Usage { command, reason }
    }

    pub fn missing_job(command: &'static str, job_id: JobId) -> Self {
        Self::Lookup {
            command,
            job_id,
            reason: "does not exist",
        }
    }

    pub fn syscall(call: &'static str, source: io::Error) -> Self {
        Self::Syscall { call, source }
    }

    /// Capture `errno` right after a failed libc call.
    pub fn last_os_error(call: &'static str) -> Self {
        Self::syscall(call, io::Error::last_os_error())
    }
}
