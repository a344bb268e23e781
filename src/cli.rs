use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "talos",
    version,
    about = "Goal-driven coding agent over sandboxed MCP tool servers"
)]
pub struct Cli {
    /// What to run: a single goal or the benchmark suite.
    #[arg(long, value_enum, default_value_t = RunMode::Goal)]
    pub mode: RunMode,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub model: Option<String>,
    /// Override the configured model provider.
    #[arg(long, value_enum)]
    pub provider: Option<ProviderArg>,
    /// Override the provider endpoint URL.
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long)]
    pub max_iterations: Option<usize>,
    #[arg(long)]
    pub sandbox_root: Option<PathBuf>,
    /// Command whose exit code verifies the goal; success claims are
    /// rejected until it has been observed to pass.
    #[arg(long)]
    pub verify_command: Option<String>,
    /// Reuse an exact run id instead of generating one.
    #[arg(long)]
    pub run_id: Option<String>,
    #[arg(long, default_value = "run")]
    pub run_id_prefix: String,
    /// Cap on how many benchmark exercises to run.
    #[arg(long)]
    pub bench_limit: Option<usize>,
    /// The goal text, in goal mode.
    #[arg()]
    pub goal: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Goal,
    Bench,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Ollama,
    Openai,
}
