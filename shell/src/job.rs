use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::error::{Result, ShellError};
use crate::reaper::{self, SigchldMask};
use crate::types::{JobId, Termination};

pub trait WaitStatusExt {
	fn termination(self) -> Option<Termination>;
}

impl WaitStatusExt for WaitStatus {
	fn termination(self) -> Option<Termination> {
		Termination::from_wait_status(self).map(|(_, t)| t)
	}
}

/// Forks the stages of one job. Every stage stays in the shell's process
/// group, background ones included, so a terminal interrupt reaches them too
/// and none is stopped for reading the terminal.
///
/// Dropping a builder that was not finished kills and reaps whatever it
/// already forked, so a failed launch leaves no stray processes.
#[derive(Debug)]
pub struct JobBuilder {
	pids: Vec<Pid>,
	finished: bool,
}

impl JobBuilder {
	pub fn new(size_hint: usize) -> JobBuilder {
		JobBuilder { pids: Vec::with_capacity(size_hint), finished: false }
	}

	pub fn push_fork(&mut self) -> Result<unistd::ForkResult> {
		let r = unsafe { unistd::fork() }.map_err(|e| ShellError::sys("fork", e))?;
		if let unistd::ForkResult::Parent { child } = r {
			self.pids.push(child);
		}
		Ok(r)
	}

	pub fn finish(mut self) -> Vec<Pid> {
		self.finished = true;
		std::mem::replace(&mut self.pids, vec![])
	}
}

impl Drop for JobBuilder {
	fn drop(&mut self) {
		if self.finished {
			return;
		}
		for &pid in &self.pids {
			let _ = kill(pid, Signal::SIGKILL);
			let _ = waitpid(pid, None);
		}
		if !self.pids.is_empty() {
			warn!(pids = ?self.pids, "killed partially launched job");
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
	pid: Pid,
	job: JobId,
}

#[derive(Debug, Clone, Copy)]
struct JobRecord {
	id: JobId,
	leader: Pid,
	remaining: usize,
	failure: Option<Termination>,
	unknown: bool,
}

/// A background job whose every stage has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
	pub job: JobId,
	/// Pid reported when the job was launched (the last stage).
	pub pid: Pid,
	/// First stage that neither exited 0 nor died of SIGINT.
	pub failure: Option<Termination>,
}

/// Bounded registry of background pids.
///
/// Slots are kept dense and removed by swapping with the last one, so slot
/// position means nothing; job numbers come from a separate counter. Every
/// method blocks SIGCHLD while it runs.
#[derive(Debug)]
pub struct JobTable {
	slots: Vec<Slot>,
	jobs: Vec<JobRecord>,
	capacity: usize,
	next_id: u32,
}

impl JobTable {
	pub fn new(capacity: usize) -> JobTable {
		JobTable { slots: Vec::with_capacity(capacity), jobs: vec![], capacity: capacity, next_id: 1 }
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn contains(&self, pid: Pid) -> bool {
		self.slots.iter().any(|s| s.pid == pid)
	}

	pub fn pids(&self) -> Vec<Pid> {
		self.slots.iter().map(|s| s.pid).collect()
	}

	/// Fails when `count` more pids would not fit. Callers check before
	/// creating any process.
	pub fn check_capacity(&self, count: usize) -> Result<()> {
		if self.slots.len() + count > self.capacity {
			return Err(ShellError::JobLimit { limit: self.capacity });
		}
		Ok(())
	}

	/// Registers all stages of one job under a fresh job number. The pid
	/// reported for the job is the last one.
	pub fn try_register_group(&mut self, pids: &[Pid]) -> Option<JobId> {
		let _mask = SigchldMask::block();
		let leader = match pids.last() {
			Some(&pid) => pid,
			None => { return None; },
		};
		if self.check_capacity(pids.len()).is_err() {
			return None;
		}
		let id = JobId(self.next_id);
		self.next_id += 1;
		for &pid in pids {
			self.slots.push(Slot { pid: pid, job: id });
		}
		self.jobs.push(JobRecord { id: id, leader: leader, remaining: pids.len(), failure: None, unknown: false });
		debug!(job = %id, pids = ?pids, "registered background job");
		Some(id)
	}

	pub fn try_register(&mut self, pid: Pid) -> bool {
		self.try_register_group(&[pid]).is_some()
	}

	pub fn remove_by_pid(&mut self, pid: Pid) -> Option<JobId> {
		let _mask = SigchldMask::block();
		let i = self.slots.iter().position(|s| s.pid == pid)?;
		Some(self.slots.swap_remove(i).job)
	}

	// Removes a reaped pid and returns the job's completion if it was the
	// job's last live stage.
	fn settle(&mut self, pid: Pid, status: Option<Termination>) -> Option<Completion> {
		let id = self.remove_by_pid(pid)?;
		let i = self.jobs.iter().position(|j| j.id == id)?;
		{
			let record = &mut self.jobs[i];
			record.remaining -= 1;
			match status {
				Some(t) if !t.is_success() => { record.failure = record.failure.or(Some(t)); },
				Some(_) => {},
				None => { record.unknown = true; },
			}
			if record.remaining > 0 {
				return None;
			}
		}
		let record = self.jobs.swap_remove(i);
		debug!(job = %record.id, failure = ?record.failure, unknown = record.unknown, "background job finished");
		Some(Completion { job: record.id, pid: record.leader, failure: record.failure })
	}

	/// Collects finished background jobs without blocking: first whatever the
	/// SIGCHLD handler parked, then a `WNOHANG` probe of every pid still
	/// tracked. A pid the kernel no longer knows as our child counts as done.
	pub fn poll_completed(&mut self) -> Vec<Completion> {
		let _mask = SigchldMask::block();
		let mut reaped: Vec<(Pid, Option<Termination>)> = vec![];
		reaper::drain(|pid, status| reaped.push((pid, status)));

		for pid in self.pids() {
			if reaped.iter().any(|&(p, _)| p == pid) {
				continue;
			}
			match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
				Ok(WaitStatus::StillAlive) => {},
				Ok(status) => {
					if let Some(t) = status.termination() {
						reaped.push((pid, Some(t)));
					}
				},
				Err(Errno::ECHILD) => reaped.push((pid, None)),
				Err(e) => warn!(pid = %pid, error = %e, "waitpid on background job failed"),
			}
		}

		let mut completions = vec![];
		for (pid, status) in reaped {
			if let Some(c) = self.settle(pid, status) {
				completions.push(c);
			}
		}
		completions.sort_by_key(|c| c.job);
		completions
	}

	/// SIGKILLs every tracked pid and empties the table. Returns the pids the
	/// signal was delivered to.
	///
	/// Pids the SIGCHLD handler already reaped are settled first and never
	/// signalled; the kernel may have handed their numbers to someone else.
	pub fn force_kill_all(&mut self) -> Vec<Pid> {
		let _mask = SigchldMask::block();
		let mut reaped: Vec<(Pid, Option<Termination>)> = vec![];
		reaper::drain(|pid, status| reaped.push((pid, status)));
		for (pid, status) in reaped {
			if let Some(c) = self.settle(pid, status) {
				debug!(job = %c.job, "background job finished before exit");
			}
		}

		let mut killed = vec![];
		for slot in self.slots.drain(..) {
			if kill(slot.pid, Signal::SIGKILL).is_ok() {
				let _ = waitpid(slot.pid, None);
				killed.push(slot.pid);
			}
		}
		self.jobs.clear();
		killed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serial_test::serial;

	// Far above pid_max, so waitpid always answers ECHILD.
	fn fake(n: i32) -> Pid {
		Pid::from_raw(1_900_000_000 + n)
	}

	#[test]
	fn capacity_is_enforced_before_insert() {
		let mut table = JobTable::new(3);
		assert!(table.try_register_group(&[fake(1), fake(2)]).is_some());
		assert!(table.check_capacity(1).is_ok());
		match table.check_capacity(2) {
			Err(ShellError::JobLimit { limit: 3 }) => {},
			other => panic!("unexpected {:?}", other),
		}
		assert!(table.try_register_group(&[fake(3), fake(4)]).is_none());
		assert_eq!(table.len(), 2);
		assert!(table.try_register(fake(5)));
		assert!(!table.try_register(fake(6)));
	}

	#[test]
	fn job_numbers_do_not_follow_slots() {
		let mut table = JobTable::new(4);
		let a = table.try_register_group(&[fake(1)]).unwrap();
		let b = table.try_register_group(&[fake(2)]).unwrap();
		assert_eq!(table.remove_by_pid(fake(1)), Some(a));
		let c = table.try_register_group(&[fake(3)]).unwrap();
		assert!(a < b && b < c);
		assert_eq!(table.remove_by_pid(fake(1)), None);
	}

	#[test]
	fn swap_remove_keeps_other_entries() {
		let mut table = JobTable::new(4);
		for n in 1 ..= 4 {
			assert!(table.try_register(fake(n)));
		}
		table.remove_by_pid(fake(1));
		assert_eq!(table.len(), 3);
		for n in 2 ..= 4 {
			assert!(table.contains(fake(n)));
		}
	}

	#[test]
	#[serial]
	fn vanished_pids_complete_once_per_job() {
		let mut table = JobTable::new(4);
		let pipeline = table.try_register_group(&[fake(1), fake(2), fake(3)]).unwrap();
		let single = table.try_register_group(&[fake(4)]).unwrap();
		let done = table.poll_completed();
		assert_eq!(done.len(), 2);
		assert_eq!(done[0], Completion { job: pipeline, pid: fake(3), failure: None });
		assert_eq!(done[1].job, single);
		assert!(table.is_empty());
		assert!(table.poll_completed().is_empty());
	}

	#[test]
	#[serial]
	fn parked_status_reports_first_failure() {
		let mut table = JobTable::new(4);
		let job = table.try_register_group(&[fake(7), fake(8)]).unwrap();
		reaper::record(fake(7), Termination::Exited(3));
		reaper::record(fake(8), Termination::Exited(0));
		let done = table.poll_completed();
		assert_eq!(done, vec![Completion { job: job, pid: fake(8), failure: Some(Termination::Exited(3)) }]);
	}

	#[test]
	#[serial]
	fn force_kill_skips_pids_already_reaped() {
		let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
		let pid = Pid::from_raw(child.id() as i32);
		let mut table = JobTable::new(2);
		assert!(table.try_register(pid));
		// As if the handler had reaped it and the number now belonged to
		// an unrelated process.
		reaper::record(pid, Termination::Exited(0));

		assert!(table.force_kill_all().is_empty());
		assert!(table.is_empty());
		assert!(child.try_wait().unwrap().is_none());
		child.kill().unwrap();
		child.wait().unwrap();
	}

	#[test]
	#[serial]
	fn force_kill_on_dead_pids_reports_nothing() {
		let mut table = JobTable::new(2);
		table.try_register(fake(1));
		assert!(table.force_kill_all().is_empty());
		assert!(table.is_empty());
	}
}
