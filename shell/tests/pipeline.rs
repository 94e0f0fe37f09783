use std::fs;

use serial_test::serial;

use pipesh::{count_pipes, lex_line, run_pipeline, run_single, Outcome, ShellError, State, Termination, Token};

fn tokens(line: &str) -> Vec<Token> {
	lex_line(line, 1023).unwrap()
}

fn run(state: &mut State, line: &str) -> Outcome {
	let t = tokens(line);
	run_pipeline(state, count_pipes(&t), &t, false).unwrap()
}

#[cfg(target_os = "linux")]
fn open_fds() -> usize {
	fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
#[serial]
fn zero_pipes_behaves_like_single() {
	for line in ["true", "false", "sh -c 'exit 4'", "sh -c 'kill -INT $$'"].iter() {
		let t = tokens(line);
		let single = run_single(&mut State::default(), &t, false).unwrap();
		let pipeline = run_pipeline(&mut State::default(), 0, &t, false).unwrap();
		assert_eq!(single, pipeline, "{}", line);
	}
}

#[test]
#[serial]
fn any_failing_stage_fails_the_pipeline() {
	let mut state = State::default();
	assert_eq!(run(&mut state, "false | true"), Outcome::Failure(Termination::Exited(1)));
	assert_eq!(run(&mut state, "true | false"), Outcome::Failure(Termination::Exited(1)));
	assert_eq!(run(&mut state, "true | true | true"), Outcome::Success);
}

#[test]
#[serial]
fn interrupted_stage_does_not_fail_the_pipeline() {
	let mut state = State::default();
	assert_eq!(run(&mut state, "sh -c 'kill -INT $$' | true"), Outcome::Success);
}

#[test]
#[serial]
fn data_flows_through_every_stage() {
	let mut state = State::default();
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out");

	let line = format!("printf 'pear\\napple\\nfig\\n' | sort | head -n 2 | tr a-z A-Z > '{}'", out.display());
	assert_eq!(run(&mut state, &line), Outcome::Success);
	assert_eq!(fs::read_to_string(&out).unwrap(), "APPLE\nFIG\n");
}

#[test]
#[serial]
fn input_redirection_on_first_stage() {
	let mut state = State::default();
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in");
	let out = dir.path().join("out");
	fs::write(&input, "one\ntwo\nthree\n").unwrap();

	let line = format!("cat < '{}' | wc -l > '{}'", input.display(), out.display());
	assert_eq!(run(&mut state, &line), Outcome::Success);
	assert_eq!(fs::read_to_string(&out).unwrap().trim(), "3");
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn no_pipe_descriptors_outlive_the_pipeline() {
	let mut state = State::default();
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out");

	let before = open_fds();
	let line = format!("echo a | cat | cat | cat > '{}'", out.display());
	assert_eq!(run(&mut state, &line), Outcome::Success);
	assert_eq!(open_fds(), before);
	assert_eq!(fs::read_to_string(&out).unwrap(), "a\n");
}

#[test]
#[serial]
fn missing_middle_program_does_not_hang_neighbours() {
	let mut state = State::default();
	assert_eq!(run(&mut state, "echo a | pipesh-no-such-program | cat"), Outcome::Failure(Termination::Exited(1)));
}

#[test]
#[serial]
fn empty_stage_starts_nothing() {
	let mut state = State::default();
	let t = tokens("true");
	match run_pipeline(&mut state, 1, &t, false) {
		Err(ShellError::NoCommand) => {},
		other => panic!("unexpected {:?}", other),
	}
}
