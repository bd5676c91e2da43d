use std::process::ExitCode;

use clap::Parser;

use cidtrack_daemon::cli::Cli;
use cidtrack_daemon::logging::init_tracing;
use cidtrack_daemon::orchestrator::{EXIT_STARTUP, Orchestrator, spawn_signal_handler};
use cidtrack_daemon::settings::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("cidtrack: {:#}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    if let Err(e) = init_tracing(&settings.log_level, settings.log_format) {
        eprintln!("cidtrack: {:#}", e);
        return ExitCode::from(EXIT_STARTUP);
    }
    cidtrack_core::metrics::describe_all();

    if cli.validate {
        tracing::info!(sources = settings.pipelines.len(), "configuration is valid");
        return ExitCode::SUCCESS;
    }

    let orchestrator = match Orchestrator::build(settings) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let signals = spawn_signal_handler(orchestrator.cancellation_token());

    let code = match orchestrator.run(tokio::io::stdout()).await {
        Ok(summary) => summary.exit_code(),
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            EXIT_STARTUP
        }
    };

    signals.abort();
    ExitCode::from(code)
}
