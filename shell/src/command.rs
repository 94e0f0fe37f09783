use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::ops::Range;
use std::path::PathBuf;

use crate::error::{Result, ShellError};
use crate::types::{Token, TokenKind};

/// One pipeline stage, ready to exec. Redirections are only requests here;
/// they are carried out in the forked child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
	pub argv: Vec<CString>,
	pub stdin: Option<PathBuf>,
	pub stdout: Option<PathBuf>,
}

impl Command {
	pub fn name(&self) -> &CStr {
		&self.argv[0]
	}

	pub fn display_name(&self) -> Cow<str> {
		self.argv[0].to_string_lossy()
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pending { Nothing, Input, Output }

/// Builds the stage described by `tokens[range]`. A word following `<` or `>`
/// becomes that redirection's target instead of an argument.
pub fn build_command(tokens: &[Token], range: Range<usize>, max_args: usize) -> Result<Command> {
	let mut argv: Vec<CString> = vec![];
	let mut stdin = None;
	let mut stdout = None;
	let mut pending = Pending::Nothing;

	for token in &tokens[range] {
		match token.kind {
			TokenKind::Word => {
				let word = token.text().unwrap_or("");
				match pending {
					Pending::Input => stdin = Some(PathBuf::from(word)),
					Pending::Output => stdout = Some(PathBuf::from(word)),
					Pending::Nothing => {
						if argv.len() >= max_args {
							return Err(ShellError::TooManyArgs { limit: max_args });
						}
						argv.push(CString::new(word)?);
					},
				}
				pending = Pending::Nothing;
			},
			TokenKind::RedirectIn => { pending = Pending::Input; },
			TokenKind::RedirectOut => { pending = Pending::Output; },
			TokenKind::Pipe | TokenKind::Background => {},
		}
	}

	if argv.is_empty() {
		return Err(ShellError::NoCommand);
	}
	Ok(Command { argv: argv, stdin: stdin, stdout: stdout })
}

/// Cuts `tokens` into `pipe_count + 1` stage ranges at pipe tokens. Missing
/// pipes leave the trailing ranges empty, which the builder rejects; pipes
/// left over after the last range are an error.
pub fn split_segments(tokens: &[Token], pipe_count: usize) -> Result<Vec<Range<usize>>> {
	let mut segments = Vec::with_capacity(pipe_count + 1);
	let mut start = 0;
	for _ in 0 ..= pipe_count {
		let start_at = start.min(tokens.len());
		let end = tokens[start_at ..].iter()
			.position(|t| t.is(TokenKind::Pipe))
			.map_or(tokens.len(), |off| start_at + off);
		segments.push(start_at .. end);
		start = end + 1;
	}
	if start <= tokens.len() {
		return Err(ShellError::ExtraPipes { expected: pipe_count });
	}
	Ok(segments)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parser::lex_line;

	fn tokens(line: &str) -> Vec<Token> {
		lex_line(line, 1023).unwrap()
	}

	fn args(cmd: &Command) -> Vec<&str> {
		cmd.argv.iter().map(|a| a.to_str().unwrap()).collect()
	}

	#[test]
	fn redirect_targets_are_not_arguments() {
		let t = tokens("sort -r < in.txt > out.txt");
		let cmd = build_command(&t, 0 .. t.len(), 16).unwrap();
		assert_eq!(args(&cmd), vec!["sort", "-r"]);
		assert_eq!(cmd.stdin, Some(PathBuf::from("in.txt")));
		assert_eq!(cmd.stdout, Some(PathBuf::from("out.txt")));
	}

	#[test]
	fn trailing_directive_is_left_to_the_validator() {
		let t = tokens("ls >");
		let cmd = build_command(&t, 0 .. t.len(), 16).unwrap();
		assert_eq!(args(&cmd), vec!["ls"]);
		assert_eq!(cmd.stdout, None);
	}

	#[test]
	fn only_redirections_is_not_a_command() {
		let t = tokens("< in");
		match build_command(&t, 0 .. t.len(), 16) {
			Err(ShellError::NoCommand) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn argument_limit() {
		let t = tokens("echo a b c");
		assert!(build_command(&t, 0 .. t.len(), 4).is_ok());
		match build_command(&t, 0 .. t.len(), 3) {
			Err(ShellError::TooManyArgs { limit: 3 }) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn segments_follow_pipes() {
		let t = tokens("cat f | grep x | wc -l");
		let segs = split_segments(&t, 2).unwrap();
		assert_eq!(segs, vec![0 .. 2, 3 .. 5, 6 .. 8]);
		let last = build_command(&t, segs[2].clone(), 16).unwrap();
		assert_eq!(args(&last), vec!["wc", "-l"]);
	}

	#[test]
	fn short_pipe_count_yields_empty_segment() {
		let t = tokens("true");
		let segs = split_segments(&t, 1).unwrap();
		assert_eq!(segs, vec![0 .. 1, 1 .. 1]);
		assert!(build_command(&t, segs[1].clone(), 16).is_err());
	}

	#[test]
	fn pipes_beyond_the_count_are_rejected() {
		let t = tokens("a | b | c");
		match split_segments(&t, 1) {
			Err(ShellError::ExtraPipes { expected: 1 }) => {},
			other => panic!("unexpected {:?}", other),
		}
		assert_eq!(split_segments(&t, 2).unwrap().len(), 3);
	}
}
