pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "executive-api")]
#[command(about = "Multi-tenant executive records API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Listen port (overrides API_PORT/PORT)")]
        port: Option<u16>,
    },

    #[command(about = "Reconcile the control database and every tenant database, then exit")]
    Reconcile,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => commands::serve::handle(port).await,
        Commands::Reconcile => commands::reconcile::handle().await,
    }
}
