use std::fmt::Display;
use std::io;
use std::process;
use io::Write;
use io::BufRead;

use clap::Parser;
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pipesh::config::Cli;
use pipesh::reaper;
use pipesh::{check_builtin, count_pipes, is_background, lex_line, run_builtin, run_pipeline, run_single, syntax_check};
use pipesh::{BuiltinKind, Flow, Outcome, State, Termination, Token};

const PROGRAM: &'static str = "pipesh";

fn report<D: Display>(message: D) {
	let _ = writeln!(&mut io::stderr(), "{}: {}", PROGRAM, message);
}

fn init_logging(filter: &str) {
	let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.with_target(false)
		.init();
}

fn setup_signals() -> nix::Result<()> {
	let mut set = SigSet::empty();
	set.add(Signal::SIGINT);
	set.add(Signal::SIGCHLD);
	set.add(Signal::SIGQUIT);
	signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None)?;
	unsafe {
		signal::signal(Signal::SIGINT, SigHandler::SigIgn)?;
		signal::signal(Signal::SIGQUIT, SigHandler::SigIgn)?;
		signal::signal(Signal::SIGTSTP, SigHandler::SigIgn)?;
	}
	reaper::install()
}

fn execute(state: &mut State, tokens: &[Token]) -> Flow {
	if let Err(e) = syntax_check(tokens) {
		report(e);
		return Flow::Continue;
	}

	let kind = check_builtin(&tokens[0]);
	if kind != BuiltinKind::NotBuiltin {
		return run_builtin(state, tokens, kind).unwrap_or_else(|e| {
			report(e);
			Flow::Continue
		});
	}

	let background = is_background(tokens);
	let pipe_count = count_pipes(tokens);
	let result = if pipe_count > 0 {
		run_pipeline(state, pipe_count, tokens, background)
	} else {
		run_single(state, tokens, background)
	};
	match result {
		Ok(Outcome::Background { pid, .. }) => println!("[{}] Background process group running", pid),
		Ok(Outcome::Failure(Termination::Signaled(sig))) => println!("Process terminated by signal {}.", sig as i32),
		Ok(outcome) => debug!(?outcome, "command finished"),
		Err(e) => report(e),
	}
	Flow::Continue
}

fn handle_line(state: &mut State, line: &str) -> Flow {
	let tokens = match lex_line(line, state.config.max_line) {
		Ok(tokens) => tokens,
		Err(e) => {
			report(e);
			return Flow::Continue;
		},
	};
	if tokens.is_empty() {
		return Flow::Continue;
	}
	execute(state, &tokens)
}

fn print_completions(state: &mut State) {
	for done in state.poll_completed_jobs() {
		match done.failure {
			None => println!("[{}] Done background process group", done.pid),
			Some(t) => println!("[{}] Done background process group ({})", done.pid, t),
		}
	}
}

fn main() {
	let cli = Cli::parse();
	init_logging(&cli.log);
	let mut state = State::new(cli.config());
	if let Err(e) = setup_signals() {
		report(format!("cannot set up signal handling: {}", e.desc()));
		process::exit(1);
	}

	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		print_completions(&mut state);
		let _ = stdout.write_all(state.config.prompt.as_bytes());
		let _ = stdout.flush();

		let mut line = String::new();
		match stdin_locked.read_line(&mut line) {
			Ok(0) => {
				println!();
				break;
			},
			Ok(_) => {},
			Err(ref e) if e.kind() == io::ErrorKind::Interrupted => { continue; },
			Err(ref e) if e.kind() == io::ErrorKind::InvalidData => {
				report(e);
				continue;
			},
			Err(e) => {
				report(e);
				break;
			},
		}
		if handle_line(&mut state, &line) == Flow::Exit {
			break;
		}
	}

	for pid in state.force_kill_all_jobs() {
		println!("Forcefully terminated background process [{}].", pid);
	}
}
