pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Operate the Parley dialogue runtime: preflight, migrations, demo catalog, \
                  config inspection, readiness checks and a local chat channel.",
    after_help = "Examples:\n  parley doctor --json\n  parley seed\n  parley chat --catalog config/catalog.toml"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo intent catalog into the database")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model files, catalog and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Talk to the dialogue runtime from the terminal")]
    Chat {
        #[arg(long, help = "Conversation thread id (default: cli-local)")]
        thread: Option<String>,
        #[arg(long, help = "Read intents from this TOML catalog instead of the database")]
        catalog: Option<PathBuf>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Chat { thread, catalog } => commands::chat::run(thread, catalog),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
