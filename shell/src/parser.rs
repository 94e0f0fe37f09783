use crate::types::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
	#[error("Unmatched quote")]
	UnmatchedQuote,
	#[error("Command is too large")]
	TooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
	#[error("Missing command name")]
	NoCommand,
	#[error("Multiple redirection of standard out")]
	MultipleRedirectOut,
	#[error("Standard output redirection without file name")]
	NoDestOut,
	#[error("Multiple redirection of standard input")]
	MultipleRedirectIn,
	#[error("Standard input redirection without file name")]
	NoDestIn,
	#[error("Invalid use of background")]
	InvalidBackground,
}

struct Lexer<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Lexer<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		match c {
			b' ' | b'\t' | b'\n' | b'\r' => true,
			_ => false,
		}
	}

	fn is_letter(c: u8) -> bool {
		match c {
			b'>' | b'<' | b'&' | b'|' | b'\'' | b'"' => false,
			_ => !Lexer::is_whitespace(c),
		}
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Lexer::is_whitespace);
	}

	fn read_quoted(&mut self, quote: u8, buf: &mut Vec<u8>) -> Result<(), LexError> {
		self.i += 1;
		let orig = self.i;
		self.proceed_while(|c| c != quote);
		if self.i >= self.line.len() {
			return Err(LexError::UnmatchedQuote);
		}
		buf.extend_from_slice(&self.line[orig .. self.i]);
		self.i += 1;
		Ok(())
	}

	fn read_word(&mut self) -> Result<String, LexError> {
		let mut buf: Vec<u8> = vec![];
		loop {
			match self.line.get(self.i) {
				Some(&q) if q == b'\'' || q == b'"' => self.read_quoted(q, &mut buf)?,
				Some(&c) if Lexer::is_letter(c) => {
					let orig = self.i;
					self.proceed_while(Lexer::is_letter);
					buf.extend_from_slice(&self.line[orig .. self.i]);
				},
				_ => { break; },
			}
		}
		Ok(String::from_utf8_lossy(&buf).into_owned())
	}

	fn next_token(&mut self) -> Result<Option<Token>, LexError> {
		self.skip_whitespaces();
		let kind = match self.line.get(self.i) {
			None => { return Ok(None); },
			Some(&b'|') => TokenKind::Pipe,
			Some(&b'<') => TokenKind::RedirectIn,
			Some(&b'>') => TokenKind::RedirectOut,
			Some(&b'&') => TokenKind::Background,
			Some(_) => { return self.read_word().map(|w| Some(Token::word(w))); },
		};
		self.i += 1;
		Ok(Some(Token::new(kind)))
	}
}

/// Splits one input line into tokens. Quotes group blanks and operators into
/// a word and are removed; text adjacent to a quote joins the same word.
pub fn lex_line(line: &str, max_len: usize) -> Result<Vec<Token>, LexError> {
	if line.trim_end_matches(|c| c == '\n' || c == '\r').len() > max_len {
		return Err(LexError::TooLong);
	}
	let mut lexer = Lexer { line: line.as_bytes(), i: 0 };
	let mut tokens = vec![];
	while let Some(token) = lexer.next_token()? {
		tokens.push(token);
	}
	Ok(tokens)
}

/// Rejects token sequences the launcher cannot run. An empty sequence passes;
/// callers skip it before getting here.
pub fn syntax_check(tokens: &[Token]) -> Result<(), SyntaxError> {
	let mut segment_has_word = false;
	let mut seen_pipe = false;
	let mut redirect_in = false;
	let mut redirect_out = false;

	for (i, token) in tokens.iter().enumerate() {
		let next = tokens.get(i + 1);
		match token.kind {
			TokenKind::Word => { segment_has_word = true; },
			TokenKind::Pipe => {
				if !segment_has_word || redirect_out {
					return Err(if segment_has_word { SyntaxError::MultipleRedirectOut } else { SyntaxError::NoCommand });
				}
				match next {
					Some(t) if t.is(TokenKind::Word) => {},
					_ => { return Err(SyntaxError::NoCommand); },
				}
				seen_pipe = true;
				segment_has_word = false;
			},
			TokenKind::RedirectIn => {
				if redirect_in || seen_pipe {
					return Err(SyntaxError::MultipleRedirectIn);
				}
				match next {
					Some(t) if t.is(TokenKind::Word) => {},
					_ => { return Err(SyntaxError::NoDestIn); },
				}
				redirect_in = true;
			},
			TokenKind::RedirectOut => {
				if redirect_out {
					return Err(SyntaxError::MultipleRedirectOut);
				}
				match next {
					Some(t) if t.is(TokenKind::Word) => {},
					_ => { return Err(SyntaxError::NoDestOut); },
				}
				redirect_out = true;
			},
			TokenKind::Background => {
				if next.is_some() {
					return Err(SyntaxError::InvalidBackground);
				}
			},
		}
		if i == 0 && !token.is(TokenKind::Word) {
			return Err(SyntaxError::NoCommand);
		}
	}
	Ok(())
}

pub fn count_pipes(tokens: &[Token]) -> usize {
	tokens.iter().filter(|t| t.is(TokenKind::Pipe)).count()
}

pub fn is_background(tokens: &[Token]) -> bool {
	tokens.last().map_or(false, |t| t.is(TokenKind::Background))
}
