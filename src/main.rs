// src/main.rs

use imgharvest::cli::CliCommand;
use imgharvest::logging;

#[tokio::main]
async fn main() {
    // Fall back to stderr when the state dir is not writable.
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("imgharvest error: {:#}", err);
        std::process::exit(1);
    }
}
