//! SIGCHLD handling.
//!
//! The handler reaps every terminated child with `waitpid(-1, WNOHANG)` and
//! parks `(pid, status)` in a fixed array of atomics. It allocates nothing,
//! takes no locks and keeps `errno` intact. Turning those records into job
//! table updates and messages happens later, on the main flow, in
//! `JobTable::poll_completed`.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::types::Termination;

const SLOTS: usize = 64;
const EMPTY: i32 = 0;
const CLAIMED: i32 = -1;

static PIDS: [AtomicI32; SLOTS] = [const { AtomicI32::new(EMPTY) }; SLOTS];
static STATUSES: [AtomicI32; SLOTS] = [const { AtomicI32::new(0) }; SLOTS];
static DROPPED: AtomicUsize = AtomicUsize::new(0);

// A slot is claimed before its status is written and only published once the
// pid is stored, so a drain never sees a half-written record.
fn record_raw(pid: i32, code: i32) {
	for i in 0 .. SLOTS {
		if PIDS[i].compare_exchange(EMPTY, CLAIMED, Ordering::Acquire, Ordering::Relaxed).is_ok() {
			STATUSES[i].store(code, Ordering::Relaxed);
			PIDS[i].store(pid, Ordering::Release);
			return;
		}
	}
	DROPPED.fetch_add(1, Ordering::Relaxed);
}

fn encode_raw(status: libc::c_int) -> i32 {
	if libc::WIFSIGNALED(status) {
		-libc::WTERMSIG(status)
	} else {
		libc::WEXITSTATUS(status)
	}
}

extern "C" fn on_sigchld(_: libc::c_int) {
	let saved = Errno::last_raw();
	loop {
		let mut status: libc::c_int = 0;
		let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
		if pid <= 0 {
			break;
		}
		record_raw(pid, encode_raw(status));
	}
	Errno::set_raw(saved);
}

/// Hands a child reaped on the main flow to the next `poll_completed`.
pub fn record(pid: Pid, status: Termination) {
	record_raw(pid.as_raw(), status.encode());
}

/// Takes every parked record. A record whose status cannot be decoded is
/// passed with `None`.
pub fn drain<F>(mut f: F) where F: FnMut(Pid, Option<Termination>) {
	for i in 0 .. SLOTS {
		let pid = PIDS[i].load(Ordering::Acquire);
		if pid > 0 {
			let code = STATUSES[i].load(Ordering::Relaxed);
			PIDS[i].store(EMPTY, Ordering::Release);
			f(Pid::from_raw(pid), Termination::decode(code));
		}
	}
	let dropped = DROPPED.swap(0, Ordering::Relaxed);
	if dropped > 0 {
		warn!(dropped, "reaper buffer overflowed");
	}
}

/// Takes the parked record for `pid`, if the handler has reaped it.
pub fn take(pid: Pid) -> Option<Termination> {
	let raw = pid.as_raw();
	for i in 0 .. SLOTS {
		if PIDS[i].compare_exchange(raw, CLAIMED, Ordering::Acquire, Ordering::Relaxed).is_ok() {
			let code = STATUSES[i].load(Ordering::Relaxed);
			PIDS[i].store(EMPTY, Ordering::Release);
			return Some(Termination::decode(code).unwrap_or(Termination::Unknown));
		}
	}
	None
}

pub fn install() -> nix::Result<()> {
	let action = SigAction::new(
		SigHandler::Handler(on_sigchld),
		SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
		SigSet::empty());
	unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
	Ok(())
}

fn sigchld_set() -> SigSet {
	let mut set = SigSet::empty();
	set.add(Signal::SIGCHLD);
	set
}

/// Keeps SIGCHLD blocked for the calling thread while alive. Nesting is fine:
/// each guard puts back exactly the mask it found.
#[derive(Debug)]
pub struct SigchldMask {
	previous: SigSet,
}

impl SigchldMask {
	pub fn block() -> SigchldMask {
		let mut previous = SigSet::empty();
		if let Err(e) = signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&sigchld_set()), Some(&mut previous)) {
			warn!(error = %e, "failed to block SIGCHLD");
		}
		SigchldMask { previous: previous }
	}

	/// For a freshly forked child: the mask from before the shell started
	/// blocking, with SIGCHLD deliverable.
	pub fn restore_in_child(&self) {
		let mut mask = self.previous;
		mask.remove(Signal::SIGCHLD);
		let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&mask), None);
	}
}

impl Drop for SigchldMask {
	fn drop(&mut self) {
		let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
	}
}
