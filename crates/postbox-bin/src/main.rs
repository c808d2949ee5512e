//! Postbox CLI - add, inspect and settle messages in a SQLite outbox.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use postbox_config_and_utils::{init_logging, Config, Paths};
use tracing::debug;

/// Postbox command-line interface.
#[derive(Parser)]
#[command(name = "postbox")]
#[command(about = "Transactional outbox over SQLite")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.postbox
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a message to the outbox
    Add {
        /// Destination topic
        #[arg(short, long)]
        topic: String,
        /// Message body (UTF-8 text)
        #[arg(short, long, default_value = "")]
        body: String,
        /// Message kind (command, event, document, callback, ...)
        #[arg(short = 'k', long, default_value = "event")]
        kind: String,
        /// Message id. A random id is generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Header as key=value. May be repeated
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Correlation id
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Show a stored message
    Get {
        /// Message id
        id: String,
    },
    /// List undelivered messages of a topic
    Outstanding {
        /// Topic to list
        #[arg(short, long)]
        topic: String,
        /// Only messages created at least this many seconds ago
        #[arg(long, default_value = "0")]
        older_than_secs: u64,
        /// Messages per page
        #[arg(long, default_value = "20")]
        page_size: usize,
        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: u32,
    },
    /// List delivered messages of a topic
    Dispatched {
        /// Topic to list
        #[arg(short, long)]
        topic: String,
        /// Only messages delivered within this many seconds. All when omitted
        #[arg(long)]
        since_secs: Option<u64>,
        /// Messages per page
        #[arg(long, default_value = "20")]
        page_size: usize,
        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: u32,
    },
    /// Record delivery of one or more messages
    MarkDispatched {
        /// Message ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete messages
    Delete {
        /// Message ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Remove messages whose time-to-live has passed
    PurgeExpired,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, &paths);
    debug!(base_dir = %paths.base_dir().display(), "Configuration loaded");

    let format = cli.format;
    let result = match cli.command {
        Commands::Add {
            topic,
            body,
            kind,
            id,
            headers,
            correlation_id,
        } => {
            let request = commands::AddRequest {
                topic,
                body,
                kind,
                id,
                headers,
                correlation_id,
            };
            commands::add(&config, &paths, request, &format).await
        }
        Commands::Get { id } => commands::get(&config, &paths, &id, &format).await,
        Commands::Outstanding {
            topic,
            older_than_secs,
            page_size,
            page,
        } => {
            commands::outstanding(&config, &paths, &topic, older_than_secs, page_size, page, &format)
                .await
        }
        Commands::Dispatched {
            topic,
            since_secs,
            page_size,
            page,
        } => {
            commands::dispatched(&config, &paths, &topic, since_secs, page_size, page, &format)
                .await
        }
        Commands::MarkDispatched { ids } => {
            commands::mark_dispatched(&config, &paths, &ids, &format).await
        }
        Commands::Delete { ids } => commands::delete(&config, &paths, &ids, &format).await,
        Commands::PurgeExpired => commands::purge_expired(&config, &paths, &format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e), &format);
        std::process::exit(1);
    }
    Ok(())
}
