use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::command::RedirectMode;
use crate::error::ShellError;
use crate::launcher::{self, BranchIo, Placement};
use crate::shell::{Shell, report};

/// Start `inner > target` (or `>>`) in a forked branch and return its pid.
///
/// The file is opened inside the branch, so an unopenable target only
/// fails the branch. The caller decides whether to wait.
pub(crate) fn launch(
    shell: &mut Shell,
    inner: &str,
    target: &Path,
    mode: RedirectMode,
) -> Result<libc::pid_t, ShellError> {
    let placement = match shell.placement() {
        Placement::Inherit => Placement::Inherit,
        _ => Placement::Own,
    };

    launcher::fork_branch(placement, BranchIo::default(), || {
        match redirect_stdout(target, mode) {
            Ok(()) => shell.run_branch(inner),
            Err(err) => {
                report(&err);
                1
            }
        }
    })
}

fn redirect_stdout(target: &Path, mode: RedirectMode) -> Result<(), ShellError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o777);
    match mode {
        RedirectMode::Truncate => options.truncate(true),
        RedirectMode::Append => options.append(true),
    };

    let file = options
        .open(target)
        .map_err(|err| ShellError::syscall("open", err))?;
    launcher::rewire(file.as_raw_fd(), libc::STDOUT_FILENO)
}
