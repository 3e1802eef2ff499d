pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "autoquery",
    about = "Autoquery operator CLI",
    long_about = "Operate the natural-language SQL agent: ask one-shot questions, seed the \
                  automotive dataset, inspect the schema, and run readiness checks.",
    after_help = "Examples:\n  autoquery ask \"How many vehicles were sold in 2024?\"\n  autoquery seed\n  autoquery doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one question through the agent and print the answer with its SQL trail")]
    Ask {
        #[arg(
            help = "Natural-language question about the automotive dataset",
            required_unless_present = "examples"
        )]
        question: Option<String>,
        #[arg(long, help = "Print sample questions instead of asking one")]
        examples: bool,
    },
    #[command(about = "Load the deterministic automotive seed dataset into the configured database")]
    Seed,
    #[command(about = "Introspect the warehouse and print the schema summary the agent sees")]
    Schema,
    #[command(about = "Inspect effective configuration values with secrets redacted")]
    Config,
    #[command(about = "Validate config, warehouse connectivity, and dataset presence")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ask { question, examples } => {
            if examples {
                commands::ask::examples()
            } else {
                commands::ask::run(question.as_deref().unwrap_or_default())
            }
        }
        Command::Seed => commands::seed::run(),
        Command::Schema => commands::schema::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
