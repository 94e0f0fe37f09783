use std::fs;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd;
use tracing::warn;

use crate::error::{Result, ShellError};

/// Lowest descriptor number used for the saved copies, so they stay clear of
/// the three standard streams.
const SAVE_FD_FLOOR: RawFd = 10;

fn rebind(file: fs::File, target: RawFd) -> io::Result<()> {
	unistd::dup2(file.as_raw_fd(), target).map_err(io::Error::from)?;
	Ok(())
}

/// Points stdin at `path`, opened read-only. Meant for the forked child only:
/// the caller ends the process when this fails.
pub fn redirect_input(path: &Path) -> io::Result<()> {
	let file = fs::OpenOptions::new().read(true).open(path)?;
	rebind(file, libc::STDIN_FILENO)
}

/// Points stdout at `path`, created or truncated, readable by the owner only.
pub fn redirect_output(path: &Path) -> io::Result<()> {
	let file = fs::OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.mode(0o600)
		.open(path)?;
	rebind(file, libc::STDOUT_FILENO)
}

fn dup_cloexec(fd: RawFd) -> Result<OwnedFd> {
	let copy = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(SAVE_FD_FLOOR)).map_err(|e| ShellError::sys("dup", e))?;
	Ok(unsafe { OwnedFd::from_raw_fd(copy) })
}

/// Copies of the shell's own stdin and stdout, put back when dropped.
///
/// The copies are close-on-exec, so children never see them.
#[derive(Debug)]
pub struct SavedStreams {
	stdin: OwnedFd,
	stdout: OwnedFd,
}

impl SavedStreams {
	pub fn save() -> Result<SavedStreams> {
		let stdin = dup_cloexec(libc::STDIN_FILENO)?;
		let stdout = dup_cloexec(libc::STDOUT_FILENO)?;
		Ok(SavedStreams { stdin: stdin, stdout: stdout })
	}

	pub fn restore(&self) -> Result<()> {
		unistd::dup2(self.stdin.as_raw_fd(), libc::STDIN_FILENO).map_err(|e| ShellError::sys("dup2", e))?;
		unistd::dup2(self.stdout.as_raw_fd(), libc::STDOUT_FILENO).map_err(|e| ShellError::sys("dup2", e))?;
		Ok(())
	}
}

impl Drop for SavedStreams {
	fn drop(&mut self) {
		if let Err(e) = self.restore() {
			warn!(error = %e, "failed to restore standard streams");
		}
	}
}
