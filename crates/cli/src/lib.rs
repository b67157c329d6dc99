pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "parlor",
    about = "Parlor operator CLI",
    long_about = "Inspect parlor configuration, check runtime readiness, and chat with the agents from a terminal.",
    after_help = "Examples:\n  parlor doctor --json\n  parlor config\n  parlor chat --assistant-name Tim"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and check that the agent catalog and persona load")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the assistant name and the numbered list of agents")]
    Agents,
    #[command(about = "Start an interactive conversation on stdin/stdout")]
    Chat {
        #[arg(long, help = "Assistant name used in prompts and memory")]
        assistant_name: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Agents => commands::agents::run(),
        Command::Chat { assistant_name } => commands::chat::run(assistant_name),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
