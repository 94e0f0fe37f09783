use std::ffi::NulError;
use std::path::PathBuf;

use nix::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
	#[error("{context}: {}", .source.desc())]
	Sys { context: &'static str, #[source] source: Errno },

	#[error("Missing command name")]
	NoCommand,

	#[error("Command has more pipes than the {expected} given")]
	ExtraPipes { expected: usize },

	#[error("Too many arguments (limit {limit})")]
	TooManyArgs { limit: usize },

	#[error("Argument contains a NUL byte")]
	Nul(#[from] NulError),

	#[error("Total background processes exceed the limit ({limit})")]
	JobLimit { limit: usize },

	#[error("exit does not take any parameters")]
	ExitUsage,

	#[error("cd: HOME variable not set")]
	HomeNotSet,

	#[error("cd takes one parameter")]
	CdUsage,

	#[error("cd: {}: {}", .path.display(), .source.desc())]
	Chdir { path: PathBuf, #[source] source: Errno },
}

impl ShellError {
	pub fn sys(context: &'static str, source: Errno) -> ShellError {
		ShellError::Sys { context: context, source: source }
	}
}

pub type Result<T> = std::result::Result<T, ShellError>;
