//! Command execution core of a small interactive shell: argument building,
//! redirection, single commands, pipelines and a bounded table of background
//! jobs fed by a SIGCHLD reaper.

pub mod builtin;
pub mod command;
pub mod config;
pub mod error;
pub mod eval;
pub mod global;
pub mod job;
pub mod parser;
pub mod reaper;
pub mod redirect;
pub mod types;

pub use builtin::{check_builtin, run_builtin};
pub use config::Config;
pub use error::{Result, ShellError};
pub use eval::{run_pipeline, run_single};
pub use global::State;
pub use job::{Completion, JobTable};
pub use parser::{count_pipes, is_background, lex_line, syntax_check, LexError, SyntaxError};
pub use types::{BuiltinKind, Flow, JobId, Outcome, Termination, Token, TokenKind};
