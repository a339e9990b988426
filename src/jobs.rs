use std::collections::BTreeMap;
use std::time::Instant;

use crate::command::CommandLine;

pub type JobId = usize;

/// What a reap pass learned about one job's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProbe {
    Running,
    Stopped,
    Finished,
}

/// A single tracked background or stopped job.
#[derive(Debug)]
pub struct JobEntry {
    pub id: JobId,
    /// Leader pid of the job's process group.
    pub pgid: libc::pid_t,
    pub command: CommandLine,
    pub inserted_at: Instant,
    /// Set while the job is stopped; the time it was last stopped.
    pub stopped_at: Option<Instant>,
}

impl JobEntry {
    pub fn new(id: JobId, pgid: libc::pid_t, command: CommandLine, stopped: bool) -> Self {
        let now = Instant::now();
        Self {
            id,
            pgid,
            command,
            inserted_at: now,
            stopped_at: stopped.then_some(now),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_at.is_some()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.inserted_at.elapsed().as_secs()
    }
}

/// The shell's job table: sole owner of every background and stopped job.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<JobId, JobEntry>,
    /// Groups of jobs removed while still alive; reaped at the next reap pass.
    retired: Vec<libc::pid_t>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `max(existing ids) + 1`, or 1 when empty.
    pub fn next_id(&self) -> JobId {
        self.last_id().map_or(1, |id| id + 1)
    }

    /// Register a job under the next free id. A group that is already
    /// tracked keeps its entry; only its stopped state is refreshed.
    pub fn add(&mut self, pgid: libc::pid_t, command: CommandLine, stopped: bool) -> JobId {
        if let Some(existing) = self.jobs.values_mut().find(|job| job.pgid == pgid) {
            existing.stopped_at = stopped.then(Instant::now);
            return existing.id;
        }

        // The pid may have been recycled since a retired group exited.
        self.retired.retain(|&retired| retired != pgid);
        let id = self.next_id();
        self.insert(JobEntry::new(id, pgid, command, stopped));
        id
    }

    /// Store a fully built entry under its own id, replacing any entry with that id.
    pub fn insert(&mut self, entry: JobEntry) {
        tracing::debug!(job = entry.id, pgid = entry.pgid, stopped = entry.is_stopped(), "job registered");
        self.jobs.insert(entry.id, entry);
    }

    pub fn get(&self, id: JobId) -> Option<&JobEntry> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut JobEntry> {
        self.jobs.get_mut(&id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<JobEntry> {
        self.jobs.remove(&id)
    }

    /// Drop a job whose processes may still be exiting; the group is kept
    /// around so the next reap pass can collect it.
    pub fn retire(&mut self, id: JobId) -> Option<JobEntry> {
        let entry = self.jobs.remove(&id)?;
        self.retired.push(entry.pgid);
        Some(entry)
    }

    #[cfg(test)]
    pub fn contains_pgid(&self, pgid: libc::pid_t) -> bool {
        self.jobs.values().any(|job| job.pgid == pgid)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// All jobs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &JobEntry> {
        self.jobs.values()
    }

    /// Highest registered id; the default `fg` target.
    pub fn last_id(&self) -> Option<JobId> {
        self.jobs.keys().next_back().copied()
    }

    /// The job stopped most recently; the default `bg` target.
    pub fn last_stopped_id(&self) -> Option<JobId> {
        self.jobs
            .values()
            .filter_map(|job| job.stopped_at.map(|at| (at, job.id)))
            .max()
            .map(|(_, id)| id)
    }

    /// Ask `probe` about every job's process group, drop the finished ones
    /// and refresh the stopped flag of the rest. Returns what was dropped.
    pub fn remove_finished(
        &mut self,
        mut probe: impl FnMut(libc::pid_t) -> JobProbe,
    ) -> Vec<JobEntry> {
        self.retired.retain(|&pgid| probe(pgid) != JobProbe::Finished);

        let mut finished = Vec::new();
        for (id, job) in self.jobs.iter_mut() {
            match probe(job.pgid) {
                JobProbe::Finished => finished.push(*id),
                JobProbe::Stopped if job.stopped_at.is_none() => {
                    job.stopped_at = Some(Instant::now());
                }
                JobProbe::Stopped | JobProbe::Running => {}
            }
        }

        finished
            .into_iter()
            .filter_map(|id| self.jobs.remove(&id))
            .inspect(|job| tracing::debug!(job = job.id, pgid = job.pgid, "job reaped"))
            .collect()
    }
}
