use std::fmt::Display;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};
use tracing::{debug, warn};

use crate::command::{self, Command};
use crate::error::{Result, ShellError};
use crate::global::State;
use crate::job::{JobBuilder, WaitStatusExt};
use crate::reaper::{self, SigchldMask};
use crate::redirect::{self, SavedStreams};
use crate::types::{Outcome, Termination, Token};

struct PipeEnds {
	read: Option<OwnedFd>,
	write: Option<OwnedFd>,
}

fn open_pipes(count: usize) -> Result<Vec<PipeEnds>> {
	let mut pipes = Vec::with_capacity(count);
	for _ in 0 .. count {
		let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| ShellError::sys("pipe", e))?;
		pipes.push(PipeEnds { read: Some(read), write: Some(write) });
	}
	Ok(pipes)
}

fn os_message(e: &io::Error) -> String {
	match e.raw_os_error() {
		Some(code) => Errno::from_raw(code).desc().to_string(),
		None => e.to_string(),
	}
}

fn exit_child<W: Display, M: Display>(what: W, message: M) -> ! {
	let _ = writeln!(io::stderr(), "{}: {}", what, message);
	unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

// Runs in the forked child and never returns.
fn exec_command(command: &Command, stdin: Option<RawFd>, stdout: Option<RawFd>,
                pipes: &mut Vec<PipeEnds>, mask: &SigchldMask) -> ! {
	let _ = unsafe { signal::signal(Signal::SIGINT, SigHandler::SigDfl) };
	mask.restore_in_child();

	if let Some(fd) = stdin {
		if let Err(e) = unistd::dup2(fd, libc::STDIN_FILENO) {
			exit_child("dup2", e.desc());
		}
	}
	if let Some(fd) = stdout {
		if let Err(e) = unistd::dup2(fd, libc::STDOUT_FILENO) {
			exit_child("dup2", e.desc());
		}
	}
	pipes.clear();

	if let Some(ref path) = command.stdin {
		if let Err(e) = redirect::redirect_input(path) {
			exit_child(path.display(), os_message(&e));
		}
	}
	if let Some(ref path) = command.stdout {
		if let Err(e) = redirect::redirect_output(path) {
			exit_child(path.display(), os_message(&e));
		}
	}

	match unistd::execvp(command.name(), &command.argv) {
		Ok(never) => match never {},
		Err(e) => exit_child(command.display_name(), e.desc()),
	}
}

/// Forks one process per command, stage i reading from pipe i-1 and writing
/// to pipe i. The parent closes each pipe end as soon as the stage that
/// needs it exists.
fn spawn_stages(commands: &[Command], mask: &SigchldMask) -> Result<Vec<Pid>> {
	let last = commands.len() - 1;
	let mut pipes = open_pipes(last)?;
	let mut job_builder = JobBuilder::new(commands.len());

	for (i, command) in commands.iter().enumerate() {
		match job_builder.push_fork()? {
			ForkResult::Child => {
				let stdin = if i > 0 { pipes[i - 1].read.as_ref().map(|fd| fd.as_raw_fd()) } else { None };
				let stdout = if i < last { pipes[i].write.as_ref().map(|fd| fd.as_raw_fd()) } else { None };
				exec_command(command, stdin, stdout, &mut pipes, mask);
			},
			ForkResult::Parent { child } => {
				debug!(stage = i, pid = %child, command = %command.display_name(), "forked");
				if i > 0 {
					pipes[i - 1].read.take();
				}
				if i < last {
					pipes[i].write.take();
				}
			},
		}
	}
	drop(pipes);
	Ok(job_builder.finish())
}

// How long a stage reaped by the handler on another thread may take to show
// up in the reaper buffer.
const TAKE_ATTEMPTS: u32 = 100;
const TAKE_INTERVAL: Duration = Duration::from_millis(1);

// The SIGCHLD handler can run on any thread that leaves the signal unblocked
// and may win the race for a stage; its status is then in the reaper buffer.
fn take_reaped(pid: Pid) -> Termination {
	for _ in 0 .. TAKE_ATTEMPTS {
		if let Some(t) = reaper::take(pid) {
			return t;
		}
		thread::sleep(TAKE_INTERVAL);
	}
	warn!(pid = %pid, "stage status lost");
	Termination::Unknown
}

/// Blocks until every pid in `pids` has been reaped. Only the stages are
/// waited for; background children stay with the SIGCHLD handler.
///
/// A stage that exits non-zero or dies of a signal other than SIGINT fails the
/// whole wait; the first such stage is reported. A stage whose status cannot
/// be recovered counts as failed.
fn wait_foreground(pids: &[Pid]) -> Outcome {
	let mut failure: Option<Termination> = None;

	for &pid in pids {
		let termination = loop {
			match waitpid(pid, None) {
				Ok(status) => {
					if let Some(t) = status.termination() {
						break t;
					}
				},
				Err(Errno::EINTR) => {
					debug!(pid = %pid, "wait interrupted");
					return Outcome::Success;
				},
				Err(Errno::ECHILD) => break take_reaped(pid),
				Err(e) => {
					warn!(pid = %pid, error = %e, "wait failed");
					break Termination::Unknown;
				},
			}
		};
		debug!(pid = %pid, %termination, "stage finished");
		if !termination.is_success() && failure.is_none() {
			failure = Some(termination);
		}
	}

	match failure {
		Some(t) => Outcome::Failure(t),
		None => Outcome::Success,
	}
}

fn launch(state: &mut State, streams: SavedStreams, commands: &[Command], background: bool) -> Result<Outcome> {
	debug!(stages = commands.len(), background, "launching");
	let mask = SigchldMask::block();
	let pids = spawn_stages(commands, &mask)?;
	drop(streams);

	let pid = match pids.last() {
		Some(&pid) => pid,
		None => { return Ok(Outcome::Success); },
	};
	if !background {
		return Ok(wait_foreground(&pids));
	}
	match state.jobs.try_register_group(&pids) {
		Some(job) => Ok(Outcome::Background { job: job, pid: pid }),
		None => {
			for &pid in &pids {
				let _ = signal::kill(pid, Signal::SIGKILL);
				let _ = waitpid(pid, None);
			}
			Err(ShellError::JobLimit { limit: state.jobs.capacity() })
		},
	}
}

/// Runs one command, waiting for it unless `background` is set.
///
/// A background request that would overflow the job table is refused before
/// anything is forked.
pub fn run_single(state: &mut State, tokens: &[Token], background: bool) -> Result<Outcome> {
	if background {
		state.jobs.check_capacity(1)?;
	}
	let streams = SavedStreams::save()?;
	let command = command::build_command(tokens, 0 .. tokens.len(), state.config.max_args)?;
	launch(state, streams, &[command], background)
}

/// Runs `pipe_count + 1` commands connected left to right by pipes. Every
/// stage is built before the first fork, so a malformed stage starts nothing.
pub fn run_pipeline(state: &mut State, pipe_count: usize, tokens: &[Token], background: bool) -> Result<Outcome> {
	if background {
		state.jobs.check_capacity(pipe_count + 1)?;
	}
	let streams = SavedStreams::save()?;
	let max_args = state.config.max_args;
	let commands = command::split_segments(tokens, pipe_count)?
		.into_iter()
		.map(|range| command::build_command(tokens, range, max_args))
		.collect::<Result<Vec<Command>>>()?;
	launch(state, streams, &commands, background)
}
