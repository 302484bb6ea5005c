use clap::{Parser, Subcommand};
use operator::constants::LAUNCHER_LOGGER_LEVEL_ENV;
use operator::launcher::Launcher;
use operator::telemetry;
use tracing::*;

/// In-pod node agent: link emulation, pod-net repair, management proxies.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the long-lived launcher (the node pod's main container).
    Launch,
    /// Capture pre-NOS runtime state (the native-mode init container).
    Setup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_from_env(LAUNCHER_LOGGER_LEVEL_ENV);
    let args = Args::parse();

    let launcher = Launcher::from_env().await?;

    match args.command {
        Command::Setup => launcher.setup().await?,
        Command::Launch => {
            tokio::select! {
                result = launcher.launch() => {
                    // tunnel setup/reconcile errors restart the pod
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                }
            }
        }
    }

    Ok(())
}
