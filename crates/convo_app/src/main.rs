mod chat;
mod commands;
mod platform;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use convo_core::{ConversationKind, InboxId, JobId};
use convo_engine::{ReqwestTransport, SyncClient};

use platform::config::{ConvoConfig, DEFAULT_CONFIG};
use platform::logging::{self, LogDestination};

#[derive(Parser)]
#[command(name = "convo")]
#[command(about = "Chat with a job on a remote node", long_about = None)]
struct Cli {
    /// RON config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Where log output goes.
    #[arg(long, global = true, value_enum, default_value = "file")]
    log: LogDestination,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the conversation of a job
    Chat {
        #[arg(long)]
        job: String,
        /// Archived conversation: never poll for new output.
        #[arg(long = "static")]
        archived: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.log);

    let config = ConvoConfig::load(&cli.config)?;
    let transport = ReqwestTransport::new(config.transport_settings()?)
        .context("failed to build the HTTP client")?;
    let client = SyncClient::new(Arc::new(transport), config.identity(), config.sync_settings());

    match cli.command {
        Commands::Chat { job, archived } => {
            let job = JobId::new(job).context("invalid job id")?;
            let kind = if archived {
                ConversationKind::Static
            } else {
                ConversationKind::ActiveJob
            };
            chat::run(client, InboxId::for_job(&job), kind).await
        }
    }
}
