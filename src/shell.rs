use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;

use crate::builtins;
use crate::command::{CommandKind, CommandLine};
use crate::config::ShellConfig;
use crate::error::ShellError;
use crate::job_control::{self, GroupState, GroupWaiter};
use crate::jobs::{JobId, JobTable};
use crate::launcher::{self, Placement};
use crate::pipeline;
use crate::redirect;
use crate::signals::{RelayEvent, SignalRelay};
use crate::status::WaitStatus;

/// What the prompt loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(i32),
}

/// The job currently awaited by the shell. It is never in the job table at
/// the same time; the command moves between the two.
#[derive(Debug)]
pub(crate) struct Foreground {
    pub(crate) pgid: libc::pid_t,
    pub(crate) command: CommandLine,
}

/// All shell state. One instance is built at startup and passed to every
/// command and every relay delivery.
pub struct Shell {
    pub(crate) config: ShellConfig,
    pub(crate) prompt: String,
    /// Target of `cd -`.
    pub(crate) last_dir: Option<PathBuf>,
    pub(crate) jobs: JobTable,
    pub(crate) foreground: Option<Foreground>,
    pub(crate) pid: libc::pid_t,
    relay: SignalRelay,
    /// Set inside forked pipeline / redirection branches.
    nested: bool,
    /// How the last awaited command ended; a branch exits with it.
    last_status: Option<WaitStatus>,
}

impl Shell {
    pub fn new(config: ShellConfig, relay: SignalRelay) -> Self {
        Self {
            prompt: config.prompt.clone(),
            config,
            last_dir: None,
            jobs: JobTable::new(),
            foreground: None,
            pid: unsafe { libc::getpid() },
            relay,
            nested: false,
            last_status: None,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Run one input line, reporting any failure. Never panics the loop.
    pub fn execute(&mut self, line: &str) -> Flow {
        let Some(command) = CommandLine::parse(line) else {
            return Flow::Continue;
        };

        let mut stdout = io::stdout();
        let flow = match self.dispatch(command, &mut stdout) {
            Ok(flow) => flow,
            Err(err) => {
                report(&err);
                Flow::Continue
            }
        };
        let _ = stdout.flush();
        flow
    }

    /// Entry point of a forked branch: dispatch `text` to completion and
    /// turn the outcome into the branch's exit code.
    pub(crate) fn run_branch(&mut self, text: &str) -> i32 {
        self.nested = true;
        self.foreground = None;
        self.last_status = None;

        let Some(command) = CommandLine::parse(text) else {
            return 0;
        };

        let mut stdout = io::stdout();
        match self.dispatch(command, &mut stdout) {
            Ok(Flow::Continue) => self.last_status.map_or(0, WaitStatus::exit_code),
            Ok(Flow::Exit(code)) => code,
            Err(err) => {
                report(&err);
                1
            }
        }
    }

    /// Where processes started from this shell go.
    pub(crate) fn placement(&self) -> Placement {
        if self.nested {
            Placement::Inherit
        } else {
            Placement::Own
        }
    }

    pub(crate) fn dispatch(
        &mut self,
        command: CommandLine,
        out: &mut dyn Write,
    ) -> Result<Flow, ShellError> {
        let pid = match command.kind() {
            CommandKind::Builtin(builtin) => {
                let builtin = *builtin;
                return builtins::run(self, builtin, &command, out);
            }
            CommandKind::External => launcher::spawn_external(
                command.body(),
                &self.config.interpreter,
                self.placement(),
            )?,
            CommandKind::Pipeline {
                left,
                right,
                source,
            } => pipeline::launch(self, left, right, *source)?,
            CommandKind::Redirect {
                inner,
                target,
                mode,
            } => redirect::launch(self, inner, target, *mode)?,
        };

        self.place(pid, command, out)?;
        Ok(Flow::Continue)
    }

    /// Decide foreground vs. background for a freshly launched process.
    fn place(
        &mut self,
        pid: libc::pid_t,
        command: CommandLine,
        out: &mut dyn Write,
    ) -> Result<(), ShellError> {
        if self.nested {
            // Children of a branch share its group; waiting on the group
            // collects exactly them.
            let pgid = unsafe { libc::getpgrp() };
            self.foreground = Some(Foreground { pgid, command });
            self.last_status = self.wait_foreground(pid, out)?;
            return Ok(());
        }

        if command.is_background() {
            self.reap();
            let id = self.jobs.add(pid, command, false);
            tracing::debug!(job = id, pid, "started in background");
            return Ok(());
        }

        self.foreground = Some(Foreground { pgid: pid, command });
        self.last_status = self.wait_foreground(pid, out)?;
        Ok(())
    }

    /// Block until the foreground job exits, stops, or is taken away by a
    /// relay delivery. The slot is always empty when this returns. Returns
    /// the exit status of `leader` when the whole group finished.
    fn wait_foreground(
        &mut self,
        leader: libc::pid_t,
        out: &mut dyn Write,
    ) -> Result<Option<WaitStatus>, ShellError> {
        let Some(pgid) = self.foreground.as_ref().map(|fg| fg.pgid) else {
            return Ok(None);
        };

        let mut waiter = GroupWaiter::with_leader(pgid, leader);
        loop {
            let state = match waiter.poll() {
                Ok(state) => state,
                Err(err) => {
                    self.foreground = None;
                    return Err(ShellError::syscall("waitpid", err));
                }
            };

            match state {
                GroupState::Finished(status) => {
                    self.foreground = None;
                    tracing::debug!(pgid, ?status, "foreground finished");
                    return Ok(status);
                }
                // Stopped without the relay's involvement, e.g. SIGTTIN or a
                // stop signal sent to the job's group from elsewhere.
                GroupState::Stopped if !self.nested => {
                    self.park_foreground(out);
                    return Ok(None);
                }
                GroupState::Stopped | GroupState::Running => {}
            }

            if !self.nested {
                self.deliver_signals(out);
                if self.foreground.is_none() {
                    return Ok(None);
                }
            }

            thread::sleep(self.config.poll_interval);
        }
    }

    /// Move the foreground job into the job table as a stopped job.
    fn park_foreground(&mut self, out: &mut dyn Write) -> Option<JobId> {
        let fg = self.foreground.take()?;
        self.reap();
        let pgid = fg.pgid;
        let id = self.jobs.add(pgid, fg.command, true);
        let _ = writeln!(out, "smash: process {pgid} was stopped");
        Some(id)
    }

    /// Act on every signal the relay has recorded since the last call.
    pub fn deliver_signals(&mut self, out: &mut dyn Write) {
        for event in self.relay.drain() {
            tracing::debug!(?event, foreground = ?self.foreground.as_ref().map(|fg| fg.pgid), "relay delivery");
            match event {
                RelayEvent::Stop => self.relay_stop(out),
                RelayEvent::Interrupt => self.relay_interrupt(out),
                RelayEvent::Alarm => {
                    let _ = writeln!(out, "smash: got an alarm");
                }
            }
        }
        let _ = out.flush();
    }

    fn relay_stop(&mut self, out: &mut dyn Write) {
        let Some(pgid) = self.foreground.as_ref().map(|fg| fg.pgid) else {
            return;
        };
        let _ = writeln!(out, "smash: got ctrl-Z");

        // Register first, so the job exists before it can report the stop.
        if let Some(fg) = self.foreground.take() {
            self.reap();
            self.jobs.add(pgid, fg.command, true);
        }
        if let Err(err) = job_control::signal_group(pgid, libc::SIGSTOP) {
            report(&ShellError::syscall("kill", err));
        }
        let _ = writeln!(out, "smash: process {pgid} was stopped");
    }

    fn relay_interrupt(&mut self, out: &mut dyn Write) {
        let Some(fg) = self.foreground.take() else {
            return;
        };
        let _ = writeln!(out, "smash: got ctrl-C");

        if let Err(err) = job_control::signal_group(fg.pgid, libc::SIGKILL) {
            report(&ShellError::syscall("kill", err));
        }
        let _ = writeln!(out, "smash: process {} was killed", fg.pgid);

        if let Err(err) = GroupWaiter::new(fg.pgid).finish() {
            tracing::warn!(pgid = fg.pgid, "waitpid after kill failed: {err}");
        }
    }

    /// Drop jobs whose processes are all gone. Only the shell process itself
    /// can reap; inside a branch the jobs are not its children.
    pub(crate) fn reap(&mut self) {
        if self.nested {
            return;
        }
        let removed = self.jobs.remove_finished(job_control::probe_group);
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "reaped finished jobs");
        }
    }

    // ── Job-control builtins ──

    /// `jobs`: reap, then list what is left.
    pub(crate) fn list_jobs(&mut self, out: &mut dyn Write) {
        self.reap();

        for job in self.jobs.iter() {
            let suffix = if job.is_stopped() { " (stopped)" } else { "" };
            let _ = writeln!(
                out,
                "[{}] {} : {} {} secs{}",
                job.id,
                job.command.text(),
                job.pgid,
                job.elapsed_secs(),
                suffix
            );
        }
    }

    /// `fg [job-id]`: move a job into the foreground slot, continue it and wait.
    pub(crate) fn foreground_job(
        &mut self,
        args: &[String],
        out: &mut dyn Write,
    ) -> Result<(), ShellError> {
        let id = match args {
            [] => self
                .jobs
                .last_id()
                .ok_or(ShellError::usage("fg", "jobs list is empty"))?,
            [raw] => parse_job_id(raw).ok_or(ShellError::usage("fg", "invalid arguments"))?,
            _ => return Err(ShellError::usage("fg", "invalid arguments")),
        };

        let job = self
            .jobs
            .remove(id)
            .ok_or(ShellError::missing_job("fg", id))?;
        let pgid = job.pgid;

        let _ = writeln!(out, "{} : {}", job.command.text(), pgid);
        let _ = out.flush();
        self.foreground = Some(Foreground {
            pgid,
            command: job.command,
        });

        if let Err(err) = job_control::signal_group(pgid, libc::SIGCONT) {
            report(&ShellError::syscall("kill", err));
        }
        self.wait_foreground(pgid, out)?;
        Ok(())
    }

    /// `bg [job-id]`: continue a stopped job and leave it in the table.
    pub(crate) fn background_job(
        &mut self,
        args: &[String],
        out: &mut dyn Write,
    ) -> Result<(), ShellError> {
        let id = match args {
            [] => self
                .jobs
                .last_stopped_id()
                .ok_or(ShellError::usage("bg", "there is no stopped jobs to resume"))?,
            [raw] => {
                let id = parse_job_id(raw).ok_or(ShellError::usage("bg", "invalid arguments"))?;
                let job = self.jobs.get(id).ok_or(ShellError::missing_job("bg", id))?;
                if !job.is_stopped() {
                    return Err(ShellError::Lookup {
                        command: "bg",
                        job_id: id,
                        reason: "is already running in the background",
                    });
                }
                id
            }
            _ => return Err(ShellError::usage("bg", "invalid arguments")),
        };

        let job = self
            .jobs
            .get_mut(id)
            .ok_or(ShellError::missing_job("bg", id))?;
        job_control::signal_group(job.pgid, libc::SIGCONT)
            .map_err(|err| ShellError::syscall("kill", err))?;
        job.stopped_at = None;

        let _ = writeln!(out, "{} : {}", job.command.text(), job.pgid);
        Ok(())
    }

    /// `kill -<signum> <job-id>`.
    pub(crate) fn kill_job(&mut self, args: &[String], out: &mut dyn Write) -> Result<(), ShellError> {
        let invalid = || ShellError::usage("kill", "invalid arguments");

        let [signal, job_id] = args else {
            return Err(invalid());
        };
        // `-N` is syntax; the signal sent is N.
        let signal = signal
            .strip_prefix('-')
            .and_then(|n| n.parse::<libc::c_int>().ok())
            .filter(|&n| n > 0)
            .ok_or_else(invalid)?;
        let id = parse_job_id(job_id).ok_or_else(invalid)?;

        let job = self
            .jobs
            .get_mut(id)
            .ok_or(ShellError::missing_job("kill", id))?;
        let pid = job.pgid;
        job_control::signal_process(pid, signal)
            .map_err(|err| ShellError::syscall("kill", err))?;

        match signal {
            libc::SIGCONT => job.stopped_at = None,
            libc::SIGSTOP | libc::SIGTSTP => job.stopped_at = Some(std::time::Instant::now()),
            _ => {}
        }
        let _ = writeln!(out, "signal number {signal} was sent to pid {pid}");

        if signal == libc::SIGKILL {
            self.jobs.retire(id);
        }
        Ok(())
    }

    /// `quit [kill]`.
    pub(crate) fn quit(&mut self, args: &[String], out: &mut dyn Write) -> Flow {
        if args.first().map(String::as_str) == Some("kill") {
            self.reap();
            let _ = writeln!(
                out,
                "smash: sending SIGKILL signal to {} jobs:",
                self.jobs.len()
            );
            for job in self.jobs.iter() {
                let _ = writeln!(out, "{}: {}", job.pgid, job.command.text());
                if let Err(err) = job_control::signal_group(job.pgid, libc::SIGKILL) {
                    report(&ShellError::syscall("kill", err));
                }
            }
        }
        Flow::Exit(0)
    }
}

fn parse_job_id(raw: &str) -> Option<JobId> {
    raw.parse::<JobId>().ok()
}

/// Print an error the way every command reports failure.
pub(crate) fn report(err: &ShellError) {
    let _ = io::stdout().flush();
    eprintln!("smash error: {err}");
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::jobs::JobProbe;

    fn test_shell() -> (Shell, SignalRelay) {
        let relay = SignalRelay::default();
        (Shell::new(ShellConfig::default(), relay.clone()), relay)
    }

    fn run(shell: &mut Shell, line: &str) -> (Result<Flow, ShellError>, String) {
        let mut out = Vec::new();
        let result = shell.dispatch(CommandLine::parse(line).unwrap(), &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    /// Put a real process in the foreground slot without waiting on it.
    fn fake_foreground(shell: &mut Shell, text: &str) -> libc::pid_t {
        let command = CommandLine::parse(text).unwrap();
        let pgid = launcher::spawn_external(command.body(), Path::new("/bin/sh"), Placement::Own)
            .unwrap();
        shell.foreground = Some(Foreground { pgid, command });
        pgid
    }

    fn kill_and_reap(pgid: libc::pid_t) {
        let _ = job_control::signal_group(pgid, libc::SIGKILL);
        let _ = GroupWaiter::new(pgid).finish();
    }

    fn assert_single_foreground(shell: &Shell) {
        if let Some(fg) = &shell.foreground {
            assert!(!shell.jobs.contains_pgid(fg.pgid), "pgid {} in both places", fg.pgid);
        }
    }

    #[test]
    fn kill_unknown_job_is_lookup_error() {
        let (mut shell, _) = test_shell();
        let (result, out) = run(&mut shell, "kill -9 999");
        assert_eq!(result.unwrap_err().to_string(), "kill: job-id 999 does not exist");
        assert!(out.is_empty());
        assert!(shell.jobs.is_empty());
    }

    #[test]
    fn kill_argument_shape_is_validated() {
        let (mut shell, _) = test_shell();
        for line in ["kill", "kill 9 1", "kill -9", "kill -x 1", "kill -9 1 2", "kill --9 1", "kill -9 one"] {
            let (result, _) = run(&mut shell, line);
            assert_eq!(result.unwrap_err().to_string(), "kill: invalid arguments", "line {line}");
        }
    }

    #[test]
    fn fg_and_bg_report_empty_tables() {
        let (mut shell, _) = test_shell();
        let (result, _) = run(&mut shell, "fg");
        assert_eq!(result.unwrap_err().to_string(), "fg: jobs list is empty");

        let (result, _) = run(&mut shell, "fg 4");
        assert_eq!(result.unwrap_err().to_string(), "fg: job-id 4 does not exist");

        let (result, _) = run(&mut shell, "fg 1 2");
        assert_eq!(result.unwrap_err().to_string(), "fg: invalid arguments");

        let (result, _) = run(&mut shell, "bg");
        assert_eq!(result.unwrap_err().to_string(), "bg: there is no stopped jobs to resume");

        let (result, _) = run(&mut shell, "bg 2");
        assert_eq!(result.unwrap_err().to_string(), "bg: job-id 2 does not exist");
    }

    #[test]
    fn background_command_is_listed_then_killed() {
        let (mut shell, _) = test_shell();
        let (result, _) = run(&mut shell, "sleep 30 &");
        assert_eq!(result.unwrap(), Flow::Continue);
        assert_eq!(shell.jobs.len(), 1);
        let pgid = shell.jobs.get(1).unwrap().pgid;

        let (_, listing) = run(&mut shell, "jobs");
        assert_eq!(listing, format!("[1] sleep 30 & : {pgid} 0 secs\n"));

        let (result, _) = run(&mut shell, "bg 1");
        assert_eq!(
            result.unwrap_err().to_string(),
            "bg: job-id 1 is already running in the background"
        );

        let (result, out) = run(&mut shell, "kill -9 1");
        result.unwrap();
        assert_eq!(out, format!("signal number 9 was sent to pid {pgid}\n"));
        assert!(shell.jobs.is_empty());

        kill_and_reap(pgid);
        shell.reap();
    }

    #[test]
    fn finished_background_job_stays_visible_until_reaped() {
        let (mut shell, _) = test_shell();
        run(&mut shell, "true &").0.unwrap();
        std::thread::sleep(Duration::from_millis(200));

        // Lookups do not reap.
        assert!(shell.jobs.get(1).is_some());

        let (_, listing) = run(&mut shell, "jobs");
        assert!(listing.is_empty(), "got {listing}");
        assert!(shell.jobs.is_empty());
    }

    #[test]
    fn fg_waits_for_job_and_empties_both_places() {
        let (mut shell, _) = test_shell();
        run(&mut shell, "sleep 0.2 &").0.unwrap();
        let pgid = shell.jobs.get(1).unwrap().pgid;

        let (result, out) = run(&mut shell, "fg");
        result.unwrap();
        assert_eq!(out, format!("sleep 0.2 & : {pgid}\n"));
        assert!(shell.jobs.is_empty());
        assert!(shell.foreground.is_none());
    }

    #[test]
    fn relay_stop_parks_foreground_job() {
        let (mut shell, relay) = test_shell();
        let pgid = fake_foreground(&mut shell, "sleep 50");

        relay.raise(RelayEvent::Stop);
        let mut out = Vec::new();
        shell.deliver_signals(&mut out);

        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("smash: got ctrl-Z\nsmash: process {pgid} was stopped\n")
        );
        assert!(shell.foreground.is_none());
        assert_single_foreground(&shell);
        let job = shell.jobs.get(1).unwrap();
        assert_eq!(job.pgid, pgid);
        assert!(job.is_stopped());

        let (result, out) = run(&mut shell, "bg");
        result.unwrap();
        assert_eq!(out, format!("sleep 50 : {pgid}\n"));
        assert!(!shell.jobs.get(1).unwrap().is_stopped());

        kill_and_reap(pgid);
    }

    #[test]
    fn relay_interrupt_kills_foreground_job() {
        let (mut shell, relay) = test_shell();
        let pgid = fake_foreground(&mut shell, "sleep 50");

        relay.raise(RelayEvent::Interrupt);
        let mut out = Vec::new();
        shell.deliver_signals(&mut out);

        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("smash: got ctrl-C\nsmash: process {pgid} was killed\n")
        );
        assert!(shell.foreground.is_none());
        assert!(shell.jobs.is_empty());
        assert_eq!(job_control::probe_group(pgid), JobProbe::Finished);
    }

    #[test]
    fn relay_without_foreground_is_a_no_op() {
        let (mut shell, relay) = test_shell();
        relay.raise(RelayEvent::Stop);
        relay.raise(RelayEvent::Interrupt);

        let mut out = Vec::new();
        shell.deliver_signals(&mut out);
        assert!(out.is_empty());
        assert!(shell.jobs.is_empty());
    }

    #[test]
    fn alarm_only_prints_a_notice() {
        let (mut shell, relay) = test_shell();
        relay.raise(RelayEvent::Alarm);

        let mut out = Vec::new();
        shell.deliver_signals(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "smash: got an alarm\n");

        // Same notice with a job in the foreground, which is left alone.
        let pgid = fake_foreground(&mut shell, "sleep 50");
        relay.raise(RelayEvent::Alarm);
        let mut out = Vec::new();
        shell.deliver_signals(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "smash: got an alarm\n");
        assert_eq!(shell.foreground.as_ref().map(|fg| fg.pgid), Some(pgid));
        assert!(shell.jobs.is_empty());

        kill_and_reap(pgid);
    }

    #[test]
    fn successive_stops_take_increasing_ids() {
        let (mut shell, relay) = test_shell();
        let first = fake_foreground(&mut shell, "sleep 50");
        relay.raise(RelayEvent::Stop);
        shell.deliver_signals(&mut Vec::new());

        let second = fake_foreground(&mut shell, "sleep 51");
        relay.raise(RelayEvent::Stop);
        shell.deliver_signals(&mut Vec::new());

        let ids: Vec<(JobId, libc::pid_t)> = shell.jobs.iter().map(|j| (j.id, j.pgid)).collect();
        assert_eq!(ids, vec![(1, first), (2, second)]);
        assert_eq!(shell.jobs.last_stopped_id(), Some(2));

        kill_and_reap(first);
        kill_and_reap(second);
    }

    #[test]
    fn quit_kill_lists_and_kills_every_job() {
        let (mut shell, _) = test_shell();
        run(&mut shell, "sleep 40 &").0.unwrap();
        run(&mut shell, "sleep 41 &").0.unwrap();
        let pgids: Vec<libc::pid_t> = shell.jobs.iter().map(|j| j.pgid).collect();

        let (result, out) = run(&mut shell, "quit kill");
        assert_eq!(result.unwrap(), Flow::Exit(0));
        assert_eq!(
            out,
            format!(
                "smash: sending SIGKILL signal to 2 jobs:\n{}: sleep 40 &\n{}: sleep 41 &\n",
                pgids[0], pgids[1]
            )
        );
        for pgid in pgids {
            assert_eq!(GroupWaiter::new(pgid).finish().unwrap(), Some(WaitStatus::Signaled(libc::SIGKILL)));
        }
    }

    #[test]
    fn plain_quit_leaves_jobs_alone() {
        let (mut shell, _) = test_shell();
        run(&mut shell, "sleep 40 &").0.unwrap();
        let pgid = shell.jobs.get(1).unwrap().pgid;

        let (result, out) = run(&mut shell, "quit");
        assert_eq!(result.unwrap(), Flow::Exit(0));
        assert!(out.is_empty());
        assert_eq!(job_control::probe_group(pgid), JobProbe::Running);

        kill_and_reap(pgid);
    }

    #[test]
    fn chprompt_sets_and_resets() {
        let (mut shell, _) = test_shell();
        run(&mut shell, "chprompt hello").0.unwrap();
        assert_eq!(shell.prompt(), "hello");
        run(&mut shell, "chprompt").0.unwrap();
        assert_eq!(shell.prompt(), "smash");
    }

    #[test]
    fn branch_exits_with_waited_command_status() {
        let (mut shell, _) = test_shell();
        let pid = launcher::fork_branch(Placement::Own, launcher::BranchIo::default(), || {
            shell.run_branch("exit 3")
        })
        .unwrap();
        assert_eq!(GroupWaiter::new(pid).finish().unwrap(), Some(WaitStatus::Exited(3)));

        let (mut shell, _) = test_shell();
        let pid = launcher::fork_branch(Placement::Own, launcher::BranchIo::default(), || {
            shell.run_branch("sh -c 'kill -9 $$'")
        })
        .unwrap();
        assert_eq!(
            GroupWaiter::new(pid).finish().unwrap(),
            Some(WaitStatus::Exited(128 + libc::SIGKILL))
        );
    }

    #[test]
    fn showpid_reports_shell_pid() {
        let (mut shell, _) = test_shell();
        let (_, out) = run(&mut shell, "showpid");
        assert_eq!(out, format!("smash pid is {}\n", std::process::id()));
    }
}
