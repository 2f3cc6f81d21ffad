use clap::{Parser, Subcommand};

use valentine_cli::commands;

/// Binary Valentine -- static analysis of executable images.
#[derive(Parser)]
#[command(name = "valentine", about = "Binary Valentine -- static analysis of executable images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze files and directories.
    Analyze(commands::analyze::AnalyzeArgs),
    /// List the registered rules and their reports.
    Rules(commands::rules::RulesArgs),
    /// Show or validate the effective configuration.
    Config(commands::config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze(args) => commands::analyze::execute(args),
        Commands::Rules(args) => commands::rules::execute(&args),
        Commands::Config(args) => commands::config::execute(args),
    };

    match result {
        Ok(code) => valentine_cli::terminate(code),
        Err(err) => {
            eprintln!("valentine: error: {err:#}");
            valentine_cli::terminate(valentine_cli::ExitCode::EngineError)
        }
    }
}
