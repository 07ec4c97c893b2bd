//! Pipeline command handlers for the CLI.
//!
//! All commands go through the same [`PipelineOrchestrator`] the server
//! uses, backed by the row-only trigger registry: the trigger table is
//! updated immediately, the live scheduler catches up at server startup.

use clap::Subcommand;
use sqlx::PgPool;

use commdash_pipeline::{DbTriggerRegistry, PipelineOrchestrator};

/// Sub-commands available under `pipeline`.
#[derive(Debug, Subcommand)]
pub enum PipelineCommands {
    /// Register the three stage triggers for a merchant
    Create {
        /// Merchant identifier
        #[arg(long)]
        merchant: String,
        /// Local report time, HH:MM or HH:MM:SS
        #[arg(long)]
        time: String,
        /// Merchant timezone (eastern, central, mountain, pacific, alaska, hawaii)
        #[arg(long)]
        timezone: String,
    },
    /// Replace a merchant's triggers with freshly compiled ones
    Update {
        #[arg(long)]
        merchant: String,
        /// Local report time, HH:MM or HH:MM:SS
        #[arg(long)]
        time: String,
        /// Merchant timezone (eastern, central, mountain, pacific, alaska, hawaii)
        #[arg(long)]
        timezone: String,
    },
    /// Remove all of a merchant's triggers, legacy names included
    Delete {
        #[arg(long)]
        merchant: String,
    },
    /// Show a merchant's pipeline status
    Status {
        #[arg(long)]
        merchant: String,
    },
    /// Rebuild every configured merchant's pipeline from current settings
    BulkSetup,
}

pub(crate) async fn run(pool: &PgPool, command: PipelineCommands) -> anyhow::Result<()> {
    let registry = DbTriggerRegistry::new(pool.clone());
    let orchestrator = PipelineOrchestrator::new(pool.clone(), registry);

    match command {
        PipelineCommands::Create {
            merchant,
            time,
            timezone,
        } => {
            let created = orchestrator
                .create_pipeline(&merchant, &time, &timezone)
                .await?;
            print_json(&created)
        }
        PipelineCommands::Update {
            merchant,
            time,
            timezone,
        } => {
            let created = orchestrator
                .update_pipeline(&merchant, &time, &timezone)
                .await?;
            print_json(&created)
        }
        PipelineCommands::Delete { merchant } => {
            let deleted = orchestrator.delete_pipeline(&merchant).await;
            print_json(&deleted)
        }
        PipelineCommands::Status { merchant } => {
            let status = orchestrator.status(&merchant).await;
            print_json(&status)
        }
        PipelineCommands::BulkSetup => {
            let items = orchestrator.bulk_setup().await?;
            let failures = items.iter().filter(|i| !i.success).count();
            print_json(&items)?;
            if failures > 0 {
                anyhow::bail!("{failures} merchant(s) failed during bulk setup");
            }
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
