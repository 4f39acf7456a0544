pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "nurture",
    about = "Lead nurture operator CLI",
    long_about = "Inspect configuration, check readiness, migrate and seed the database, and \
                  ingest project brochures.",
    after_help = "Examples:\n  nurture doctor --json\n  nurture seed\n  \
                  nurture ingest --project \"Altura Residences\" --source brochure-2026 brochure.txt"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic Altura Residences demo dataset")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM provider settings, and database schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Chunk a brochure text file into stored passages for a project")]
    Ingest {
        #[arg(long, help = "Project the passages belong to, e.g. \"Altura Residences\"")]
        project: String,
        #[arg(long = "source", help = "Stable source id; re-ingesting it replaces its passages")]
        source_id: String,
        #[arg(help = "Plain text file to ingest")]
        file: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Ingest { project, source_id, file } => {
            commands::ingest::run(&project, &source_id, &file)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
