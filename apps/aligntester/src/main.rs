mod cli;
mod console;
mod error;
mod telemetry;

use clap::Parser;
use tracing::debug;

use align_sync::persist::StateFile;
use align_sync::AlignClient;

use crate::cli::Cli;
use crate::console::Console;
use crate::error::CliError;
use crate::telemetry::logging as logctl;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("aligntester: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let config = cli.client_config();
    let state_file = config
        .state_file
        .clone()
        .or_else(|| StateFile::default_path().ok());
    let log_config = cli.logging.to_config(state_file.as_deref());
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let client = AlignClient::start(config)?;
    client.switch_mode(cli.mode.into()).await;

    let client = Console::open(client).await.run().await?;
    client.shutdown().await;
    Ok(())
}
