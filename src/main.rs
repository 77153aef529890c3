//! G-Pilot CLI entry point.

use clap::Parser;
use gpilot::cli::{dispatch, Cli, EXIT_CONFIG, EXIT_FAILURE, EXIT_OK};
use gpilot::infrastructure::logging;
use gpilot::services::{Config, Runtime};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match Config::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_CONFIG;
        }
    };

    let _logging = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_CONFIG;
        }
    };

    let runtime = match Runtime::new(config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble runtime");
            return EXIT_FAILURE;
        }
    };

    match dispatch(&cli, runtime).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            EXIT_FAILURE
        }
    }
}
