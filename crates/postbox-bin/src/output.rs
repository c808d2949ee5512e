//! Output formatting for the CLI.

use clap::ValueEnum;
use postbox_outbox::{OutboxMessage, Page};
use serde_json::json;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => {
            println!("{}", json!({ "status": "success", "message": message }));
        }
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => {
            eprintln!("{}", json!({ "status": "error", "message": message }));
        }
    }
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}

/// Print one message in full.
pub fn print_message(message: &OutboxMessage, format: &OutputFormat) -> serde_json::Result<()> {
    match format {
        OutputFormat::Text => {
            let m = &message.message;
            print_row("ID", &m.id);
            print_row("Topic", &m.topic);
            print_row("Type", m.message_type.as_str());
            print_row("Shard", &message.shard.to_string());
            print_row("Created", &message.created_at.to_rfc3339());
            print_row(
                "Delivered",
                &message
                    .delivered_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
            );
            if let Some(correlation_id) = &m.correlation_id {
                print_row("Correlation", correlation_id);
            }
            if !m.headers.is_empty() {
                print_row("Headers", &serde_json::to_string(&m.headers)?);
            }
            let body = match m.body.as_text() {
                Some(text) => text.to_string(),
                None => format!("<{} bytes>", m.body.bytes().len()),
            };
            print_row("Body", &body);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(message)?),
    }
    Ok(())
}

/// Print a page of messages.
pub fn print_page(page: &Page<OutboxMessage>, format: &OutputFormat) -> serde_json::Result<()> {
    match format {
        OutputFormat::Text => {
            if page.is_empty() {
                println!("No messages on page {}", page.page_number);
            } else {
                println!("{:<36} {:<10} {:<6} {}", "ID", "Type", "Shard", "Created");
                println!("{}", "-".repeat(90));
                for message in &page.items {
                    println!(
                        "{:<36} {:<10} {:<6} {}",
                        message.id(),
                        message.message.message_type.as_str(),
                        message.shard,
                        message.created_at.to_rfc3339()
                    );
                }
            }
            if let Some(next) = page.next_page {
                println!("\nMore results: --page {}", next);
            }
        }
        OutputFormat::Json => {
            let value = json!({
                "page": page.page_number,
                "next_page": page.next_page,
                "items": page.items,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}
