use std::fmt;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind { Word, Pipe, RedirectIn, RedirectOut, Background }

/// One lexed unit of a command line. Only words carry text; a redirection
/// target is the word that follows the redirection token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
	pub kind: TokenKind,
	pub value: Option<String>,
}

impl Token {
	pub fn new(kind: TokenKind) -> Token {
		Token { kind: kind, value: None }
	}

	pub fn word<S: Into<String>>(s: S) -> Token {
		Token { kind: TokenKind::Word, value: Some(s.into()) }
	}

	pub fn is(&self, kind: TokenKind) -> bool {
		self.kind == kind
	}

	pub fn text(&self) -> Option<&str> {
		self.value.as_ref().map(|s| s.as_str())
	}
}

/// Monotonic background job number, independent of table slot position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

// Stands for `Termination::Unknown` in the reaper buffer; no exit code or
// negated signal number can take this value.
const UNKNOWN_CODE: i32 = i32::MIN;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
	Exited(i32),
	Signaled(Signal),
	/// The child is gone but its status was collected elsewhere and lost.
	Unknown,
}

impl Termination {
	pub fn from_wait_status(status: WaitStatus) -> Option<(Pid, Termination)> {
		match status {
			WaitStatus::Exited(pid, code) => Some((pid, Termination::Exited(code))),
			WaitStatus::Signaled(pid, sig, _) => Some((pid, Termination::Signaled(sig))),
			_ => None,
		}
	}

	/// Exit status 0, or death by SIGINT: the user asked for it.
	pub fn is_success(self) -> bool {
		match self {
			Termination::Exited(code) => code == 0,
			Termination::Signaled(sig) => sig == Signal::SIGINT,
			Termination::Unknown => false,
		}
	}

	/// Packs into one integer for the signal-safe reaper buffer:
	/// exit codes stay non-negative, signals become their negated number.
	pub fn encode(self) -> i32 {
		match self {
			Termination::Exited(code) => code,
			Termination::Signaled(sig) => -(sig as i32),
			Termination::Unknown => UNKNOWN_CODE,
		}
	}

	pub fn decode(raw: i32) -> Option<Termination> {
		if raw == UNKNOWN_CODE {
			Some(Termination::Unknown)
		} else if raw >= 0 {
			Some(Termination::Exited(raw))
		} else {
			Signal::try_from(-raw).ok().map(Termination::Signaled)
		}
	}
}

impl fmt::Display for Termination {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Termination::Exited(code) => write!(f, "exit status {}", code),
			Termination::Signaled(sig) => write!(f, "signal {}", sig as i32),
			Termination::Unknown => write!(f, "unknown status"),
		}
	}
}

/// Result of handing a command or pipeline to the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Success,
	Background { job: JobId, pid: Pid },
	Failure(Termination),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind { Exit, ChangeDirectory, NotBuiltin }

/// What the read-eval loop should do after a builtin ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow { Continue, Exit }
