use nix::unistd::Pid;

use crate::config::Config;
use crate::job::{Completion, JobTable};

/// Everything the shell owns across command lines.
pub struct State {
	pub config: Config,
	pub jobs: JobTable,
}

impl State {
	pub fn new(config: Config) -> State {
		let jobs = JobTable::new(config.max_background_jobs);
		State { config: config, jobs: jobs }
	}

	/// Background jobs that finished since the last call. Run before each
	/// prompt, so nothing is printed while the user is typing.
	pub fn poll_completed_jobs(&mut self) -> Vec<Completion> {
		self.jobs.poll_completed()
	}

	/// Kills every background job still tracked; used when the shell exits.
	pub fn force_kill_all_jobs(&mut self) -> Vec<Pid> {
		self.jobs.force_kill_all()
	}
}

impl Default for State {
	fn default() -> State {
		State::new(Config::default())
	}
}
