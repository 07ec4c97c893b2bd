//! Operator CLI for pipeline management.
//!
//! Writes trigger rows and schedule configs directly; a running server
//! picks persisted triggers up at its next startup. Results are printed
//! as JSON so the commands compose with shell tooling.

mod pipeline;

use clap::{Parser, Subcommand};

use crate::pipeline::PipelineCommands;

#[derive(Debug, Parser)]
#[command(name = "commdash-cli")]
#[command(about = "Commission dashboard command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage recurring report pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = commdash_core::load_app_config()?;
    let pool_config = commdash_db::PoolConfig::from_app_config(&config);
    let pool = commdash_db::connect_pool(&config.database_url, pool_config).await?;
    commdash_db::run_migrations(&pool).await?;

    match cli.command {
        Commands::Pipeline { command } => pipeline::run(&pool, command).await,
    }
}
