use std::os::fd::AsRawFd;

use crate::command::PipeSource;
use crate::error::ShellError;
use crate::job_control::{self, GroupWaiter};
use crate::launcher::{self, BranchIo, Placement};
use crate::shell::Shell;

/// Start `left | right` (or `left |& right`) and return the pid of the left
/// branch, which leads the pipeline's process group.
///
/// Each side is a forked copy of the shell that dispatches its text like
/// any other command line, so either side may be a builtin, an external
/// command or a further pipeline. The caller decides whether to wait.
pub(crate) fn launch(
    shell: &mut Shell,
    left: &str,
    right: &str,
    source: PipeSource,
) -> Result<libc::pid_t, ShellError> {
    let (reader, writer) = os_pipe::pipe().map_err(|err| ShellError::syscall("pipe", err))?;
    let read_fd = reader.as_raw_fd();
    let write_fd = writer.as_raw_fd();

    let feeds = match source {
        PipeSource::Stdout => libc::STDOUT_FILENO,
        PipeSource::Stderr => libc::STDERR_FILENO,
    };

    let nested = shell.placement() == Placement::Inherit;
    let left_placement = if nested { Placement::Inherit } else { Placement::Own };

    let left_io = BranchIo::default()
        .dup(write_fd, feeds)
        .close(read_fd)
        .close(write_fd);
    let left_pid = launcher::fork_branch(left_placement, left_io, || shell.run_branch(left))?;

    let right_placement = if nested {
        Placement::Inherit
    } else {
        Placement::Join(left_pid)
    };
    let right_io = BranchIo::default()
        .dup(read_fd, libc::STDIN_FILENO)
        .close(read_fd)
        .close(write_fd);
    let launched = launcher::fork_branch(right_placement, right_io, || shell.run_branch(right));

    // The parent has no I/O role in the pipeline.
    drop(reader);
    drop(writer);

    match launched {
        Ok(right_pid) => {
            tracing::debug!(left_pid, right_pid, "pipeline started");
            Ok(left_pid)
        }
        Err(err) => {
            if !nested {
                let _ = job_control::signal_group(left_pid, libc::SIGKILL);
                let _ = GroupWaiter::new(left_pid).finish();
            }
            Err(err)
        }
    }
}
