use clap::Parser;
use complaint_store::StructuredError;
use complaint_store::cli::commands;
use complaint_store::cli::{Cli, Commands};
use complaint_store::config::load_config;
use complaint_store::error::Result;
use complaint_store::logging::init_logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {err}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(code = err.code().as_str(), error = %err, "Command failed");
            let structured = StructuredError::from_error(&err);
            if cli.json {
                match serde_json::to_string_pretty(&serde_json::json!({ "error": structured })) {
                    Ok(json) => eprintln!("{json}"),
                    Err(_) => eprintln!("Error: {err}"),
                }
            } else {
                eprintln!("Error: {err}");
                if let Some(hint) = structured.hint {
                    eprintln!("Hint: {hint}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.overrides())?;

    match &cli.command {
        Commands::Init => commands::init::execute(config, cli.json),
        Commands::Status => commands::status::execute(config, cli.json),
        Commands::Migrate(args) => commands::migrate::execute(args, config, cli.json),
        Commands::Settings => commands::settings::execute(config, cli.json),
    }
}
