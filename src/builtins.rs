use std::collections::VecDeque;
use std::ffi::CString;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::command::{Builtin, CommandLine};
use crate::error::ShellError;
use crate::shell::{Flow, Shell};

const DEFAULT_TAIL_LINES: usize = 10;

/// Run a builtin inside the shell process.
pub(crate) fn run(
    shell: &mut Shell,
    builtin: Builtin,
    command: &CommandLine,
    out: &mut dyn Write,
) -> Result<Flow, ShellError> {
    let args = command.args();
    tracing::debug!(builtin = builtin.name(), ?args, "running builtin");
    match builtin {
        Builtin::Pwd => builtin_pwd(out)?,
        Builtin::ShowPid => {
            let _ = writeln!(out, "smash pid is {}", shell.pid);
        }
        Builtin::ChPrompt => {
            shell.prompt = args
                .first()
                .cloned()
                .unwrap_or_else(|| shell.config.prompt.clone());
        }
        Builtin::Cd => builtin_cd(args, &mut shell.last_dir)?,
        Builtin::Kill => shell.kill_job(args, out)?,
        Builtin::Jobs => shell.list_jobs(out),
        Builtin::Fg => shell.foreground_job(args, out)?,
        Builtin::Bg => shell.background_job(args, out)?,
        Builtin::Quit => return Ok(shell.quit(args, out)),
        Builtin::Tail => builtin_tail(args, out)?,
        Builtin::Touch => builtin_touch(args)?,
    }
    Ok(Flow::Continue)
}

fn builtin_pwd(out: &mut dyn Write) -> Result<(), ShellError> {
    let cwd = std::env::current_dir().map_err(|err| ShellError::syscall("getcwd", err))?;
    let _ = writeln!(out, "{}", cwd.display());
    Ok(())
}

/// `cd <path>` / `cd -`. Remembers where it came from for the next `cd -`.
fn builtin_cd(args: &[String], last_dir: &mut Option<PathBuf>) -> Result<(), ShellError> {
    let target = match args {
        [] => return Ok(()),
        [target] => target,
        _ => return Err(ShellError::usage("cd", "too many arguments")),
    };

    let destination = if target == "-" {
        last_dir
            .clone()
            .ok_or(ShellError::usage("cd", "OLDPWD not set"))?
    } else {
        PathBuf::from(target)
    };

    let current = std::env::current_dir().map_err(|err| ShellError::syscall("getcwd", err))?;
    std::env::set_current_dir(&destination).map_err(|err| ShellError::syscall("chdir", err))?;
    *last_dir = Some(current);
    Ok(())
}

/// `tail [-N] <path>`: the last N lines of a file.
fn builtin_tail(args: &[String], out: &mut dyn Write) -> Result<(), ShellError> {
    let invalid = || ShellError::usage("tail", "invalid arguments");

    let (count, path) = match args {
        [path] => (DEFAULT_TAIL_LINES, path),
        [flag, path] => {
            let count = flag
                .strip_prefix('-')
                .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(invalid)?;
            (count, path)
        }
        _ => return Err(invalid()),
    };

    let file = File::open(path).map_err(|err| ShellError::syscall("open", err))?;
    for line in last_lines(BufReader::new(file), count).map_err(|err| ShellError::syscall("read", err))? {
        let _ = writeln!(out, "{line}");
    }
    Ok(())
}

fn last_lines(reader: impl BufRead, count: usize) -> std::io::Result<VecDeque<String>> {
    let mut window = VecDeque::with_capacity(count);
    if count == 0 {
        return Ok(window);
    }

    for line in reader.lines() {
        if window.len() == count {
            window.pop_front();
        }
        window.push_back(line?);
    }
    Ok(window)
}

/// `touch <path> <ss:mm:hh:dd:mm:yyyy>`: set access and modification time.
fn builtin_touch(args: &[String]) -> Result<(), ShellError> {
    let invalid = || ShellError::usage("touch", "invalid arguments");

    let [path, spec] = args else {
        return Err(invalid());
    };
    let timestamp = local_timestamp(spec).ok_or_else(invalid)?;
    set_file_times(Path::new(path), timestamp)
}

/// Parse `ss:mm:hh:dd:mm:yyyy` as local time into seconds since the epoch.
fn local_timestamp(spec: &str) -> Option<libc::time_t> {
    let fields: Vec<libc::c_int> = spec
        .split(':')
        .map(|field| field.trim().parse().ok())
        .collect::<Option<_>>()?;
    let [sec, min, hour, mday, mon, year] = fields[..] else {
        return None;
    };

    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    tm.tm_sec = sec;
    tm.tm_min = min;
    tm.tm_hour = hour;
    tm.tm_mday = mday;
    tm.tm_mon = mon - 1;
    tm.tm_year = year - 1900;
    tm.tm_isdst = -1;

    let timestamp = unsafe { libc::mktime(&mut tm) };
    (timestamp != -1).then_some(timestamp)
}

fn set_file_times(path: &Path, timestamp: libc::time_t) -> Result<(), ShellError> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ShellError::usage("touch", "invalid arguments"))?;
    let times = libc::utimbuf {
        actime: timestamp,
        modtime: timestamp,
    };

    if unsafe { libc::utime(c_path.as_ptr(), &times) } != 0 {
        return Err(ShellError::last_os_error("utime"));
    }
    Ok(())
}
