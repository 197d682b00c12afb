use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cadence")]
#[command(about = "Plan, approve and run code changes with a language model", long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        help = "Project root directory (overrides workspace.root_path)"
    )]
    pub project: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Config file [default: ~/.cadence/config.toml]"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Model to use (overrides config)")]
    pub model: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Role used to pick repair examples (reviewer, terminal)"
    )]
    pub role: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Log to stderr instead of .cadence/debug.log"
    )]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    #[arg(help = "What to change, in plain language")]
    pub request: String,

    #[arg(short, long, help = "File the request is about")]
    pub file: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Analyze a request and print the validated plan")]
    Plan {
        #[command(flatten)]
        target: RequestArgs,
    },

    #[command(about = "Plan, then execute with approval and recover from failed commands")]
    Run {
        #[command(flatten)]
        target: RequestArgs,

        #[arg(short, long, help = "Approve every command without asking")]
        yes: bool,
    },
}
