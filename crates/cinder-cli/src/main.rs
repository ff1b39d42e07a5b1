//! Cinder CLI entrypoint.

use clap::Parser;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "cinder")]
#[command(author, version, about = "Cinder pipeline engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { config } => handlers::validate(&config),
        Commands::Run(args) => handlers::run(args).await,
    }
}
