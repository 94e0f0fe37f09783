use clap::Parser;

pub const DEFAULT_MAX_BACKGROUND_JOBS: usize = 16;
pub const DEFAULT_MAX_ARGS: usize = 1024;
pub const DEFAULT_MAX_LINE: usize = 1023;
pub const DEFAULT_PROMPT: &'static str = "% ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	/// Upper bound on background pids tracked at once, summed over all jobs.
	pub max_background_jobs: usize,
	pub max_args: usize,
	pub max_line: usize,
	pub prompt: String,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			max_background_jobs: DEFAULT_MAX_BACKGROUND_JOBS,
			max_args: DEFAULT_MAX_ARGS,
			max_line: DEFAULT_MAX_LINE,
			prompt: DEFAULT_PROMPT.to_string(),
		}
	}
}

#[derive(Debug, Parser)]
#[command(name = "pipesh", version, about = "A small interactive shell with pipelines and background jobs")]
pub struct Cli {
	/// Maximum number of background processes tracked at once
	#[arg(long = "max-jobs", env = "PIPESH_MAX_JOBS", default_value_t = DEFAULT_MAX_BACKGROUND_JOBS)]
	pub max_jobs: usize,

	/// Maximum number of words in one command
	#[arg(long = "max-args", default_value_t = DEFAULT_MAX_ARGS)]
	pub max_args: usize,

	#[arg(long, env = "PIPESH_PROMPT", default_value = DEFAULT_PROMPT)]
	pub prompt: String,

	/// Log filter, e.g. `debug` or `pipesh=trace`
	#[arg(long, env = "PIPESH_LOG", default_value = "warn")]
	pub log: String,
}

impl Cli {
	pub fn config(&self) -> Config {
		Config {
			max_background_jobs: self.max_jobs,
			max_args: self.max_args,
			max_line: DEFAULT_MAX_LINE,
			prompt: self.prompt.clone(),
		}
	}
}
