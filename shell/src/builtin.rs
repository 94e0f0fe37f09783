use std::env;
use std::path::PathBuf;

use nix::unistd;
use tracing::debug;

use crate::error::{Result, ShellError};
use crate::global::State;
use crate::types::{BuiltinKind, Flow, Token, TokenKind};

pub fn check_builtin(token: &Token) -> BuiltinKind {
	if !token.is(TokenKind::Word) {
		return BuiltinKind::NotBuiltin;
	}
	match token.text() {
		Some("exit") => BuiltinKind::Exit,
		Some("cd") => BuiltinKind::ChangeDirectory,
		_ => BuiltinKind::NotBuiltin,
	}
}

fn builtin_exit(tokens: &[Token]) -> Result<Flow> {
	if tokens.len() != 1 {
		return Err(ShellError::ExitUsage);
	}
	Ok(Flow::Exit)
}

fn builtin_cd(tokens: &[Token]) -> Result<Flow> {
	let dir = match tokens.len() {
		1 => match env::var_os("HOME") {
			Some(home) => PathBuf::from(home),
			None => { return Err(ShellError::HomeNotSet); },
		},
		2 if tokens[1].is(TokenKind::Word) => PathBuf::from(tokens[1].text().unwrap_or("")),
		_ => { return Err(ShellError::CdUsage); },
	};
	debug!(dir = %dir.display(), "cd");
	unistd::chdir(dir.as_path()).map_err(|e| ShellError::Chdir { path: dir.clone(), source: e })?;
	Ok(Flow::Continue)
}

/// Runs `exit` or `cd` in the shell process itself. `exit` only reports
/// `Flow::Exit`; the caller tears down jobs and leaves.
pub fn run_builtin(_state: &mut State, tokens: &[Token], kind: BuiltinKind) -> Result<Flow> {
	match kind {
		BuiltinKind::Exit => builtin_exit(tokens),
		BuiltinKind::ChangeDirectory => builtin_cd(tokens),
		BuiltinKind::NotBuiltin => Ok(Flow::Continue),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parser::lex_line;
	use serial_test::serial;

	fn tokens(line: &str) -> Vec<Token> {
		lex_line(line, 1023).unwrap()
	}

	#[test]
	fn classifies_first_word() {
		assert_eq!(check_builtin(&Token::word("exit")), BuiltinKind::Exit);
		assert_eq!(check_builtin(&Token::word("cd")), BuiltinKind::ChangeDirectory);
		assert_eq!(check_builtin(&Token::word("ls")), BuiltinKind::NotBuiltin);
		assert_eq!(check_builtin(&Token::new(TokenKind::Pipe)), BuiltinKind::NotBuiltin);
	}

	#[test]
	fn exit_rejects_arguments() {
		let mut state = State::default();
		assert_eq!(run_builtin(&mut state, &tokens("exit"), BuiltinKind::Exit).unwrap(), Flow::Exit);
		match run_builtin(&mut state, &tokens("exit 1"), BuiltinKind::Exit) {
			Err(ShellError::ExitUsage) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	#[serial]
	fn cd_changes_directory_and_reports_errors() {
		let mut state = State::default();
		let orig = env::current_dir().unwrap();
		let dir = env::temp_dir().canonicalize().unwrap();

		let line = format!("cd {}", dir.display());
		assert_eq!(run_builtin(&mut state, &tokens(&line), BuiltinKind::ChangeDirectory).unwrap(), Flow::Continue);
		assert_eq!(env::current_dir().unwrap().canonicalize().unwrap(), dir);

		match run_builtin(&mut state, &tokens("cd /nonexistent/pipesh"), BuiltinKind::ChangeDirectory) {
			Err(ShellError::Chdir { source, .. }) => assert_eq!(source, nix::errno::Errno::ENOENT),
			other => panic!("unexpected {:?}", other),
		}
		match run_builtin(&mut state, &tokens("cd a b"), BuiltinKind::ChangeDirectory) {
			Err(ShellError::CdUsage) => {},
			other => panic!("unexpected {:?}", other),
		}
		env::set_current_dir(orig).unwrap();
	}
}
