//! Single-message commands.

use super::open_outbox;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use postbox_config_and_utils::{Config, Paths};
use postbox_outbox::{HeaderValue, InsertOutcome, Message, MessageBody, MessageType};
use serde_json::json;

/// Arguments of `postbox add`.
pub struct AddRequest {
    pub topic: String,
    pub body: String,
    pub kind: String,
    pub id: Option<String>,
    pub headers: Vec<String>,
    pub correlation_id: Option<String>,
}

impl AddRequest {
    fn into_message(self) -> Result<Message> {
        let message_type: MessageType = self.kind.parse().unwrap_or_default();
        if message_type == MessageType::Unacceptable
            && !self.kind.eq_ignore_ascii_case("unacceptable")
        {
            bail!("Unknown message kind: {}", self.kind);
        }

        let body = MessageBody::text(self.body);
        let mut message = match self.id {
            Some(id) => Message::with_id(id, self.topic, message_type, body),
            None => Message::new(self.topic, message_type, body),
        };
        for raw in &self.headers {
            let (key, value) = parse_header(raw)?;
            message.headers.insert(key, value);
        }
        if let Some(correlation_id) = self.correlation_id {
            message = message.correlation_id(correlation_id);
        }
        Ok(message)
    }
}

/// `key=value`, with booleans and numbers kept typed.
fn parse_header(raw: &str) -> Result<(String, HeaderValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Header must be key=value: {}", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Header key is empty: {}", raw);
    }

    let value = if let Ok(b) = value.parse::<bool>() {
        HeaderValue::Bool(b)
    } else if let Ok(i) = value.parse::<i64>() {
        HeaderValue::Integer(i)
    } else if let Some(f) = value.parse::<f64>().ok().filter(|f| f.is_finite()) {
        HeaderValue::Float(f)
    } else {
        HeaderValue::from(value)
    };
    Ok((key.to_string(), value))
}

/// Add a message.
pub async fn add(
    config: &Config,
    paths: &Paths,
    request: AddRequest,
    format: &OutputFormat,
) -> Result<()> {
    let message = request.into_message()?;
    let id = message.id.clone();
    let outbox = open_outbox(config, paths).await?;

    match outbox.add(message).await? {
        InsertOutcome::Inserted => match format {
            OutputFormat::Text => println!("Added {}", id),
            OutputFormat::Json => println!("{}", json!({ "id": id, "outcome": "inserted" })),
        },
        InsertOutcome::AlreadyExists => match format {
            OutputFormat::Text => println!("Already stored: {}", id),
            OutputFormat::Json => {
                println!("{}", json!({ "id": id, "outcome": "already_exists" }))
            }
        },
    }
    Ok(())
}

/// Show one message.
pub async fn get(config: &Config, paths: &Paths, id: &str, format: &OutputFormat) -> Result<()> {
    let outbox = open_outbox(config, paths).await?;
    match outbox.get(id).await? {
        Some(message) => output::print_message(&message, format)?,
        None => bail!("Message not found: {}", id),
    }
    Ok(())
}

/// Mark messages dispatched now.
pub async fn mark_dispatched(
    config: &Config,
    paths: &Paths,
    ids: &[String],
    format: &OutputFormat,
) -> Result<()> {
    let outbox = open_outbox(config, paths).await?;
    outbox.mark_dispatched_batch(ids, None).await?;
    output::print_success(&format!("Marked {} message(s) dispatched", ids.len()), format);
    Ok(())
}

/// Delete messages. Every id is attempted even when one fails.
pub async fn delete(
    config: &Config,
    paths: &Paths,
    ids: &[String],
    format: &OutputFormat,
) -> Result<()> {
    let outbox = open_outbox(config, paths).await?;
    let removed = outbox.delete(ids).await?;
    output::print_success(
        &format!("Deleted {} of {} message(s)", removed, ids.len()),
        format,
    );
    Ok(())
}

pub async fn purge_expired(config: &Config, paths: &Paths, format: &OutputFormat) -> Result<()> {
    let outbox = open_outbox(config, paths).await?;
    let removed = outbox.purge_expired().await?;
    output::print_success(&format!("Purged {} expired message(s)", removed), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, headers: &[&str]) -> AddRequest {
        AddRequest {
            topic: "orders".into(),
            body: "{}".into(),
            kind: kind.into(),
            id: Some("m-1".into()),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            correlation_id: None,
        }
    }

    #[test]
    fn test_headers_keep_their_types() {
        let headers = ["retries=3", "urgent=true", "ratio=0.5", "source=cli", "note=a=b"];
        let message = request("command", &headers).into_message().unwrap();

        assert_eq!(message.id, "m-1");
        assert_eq!(message.message_type, MessageType::Command);
        assert_eq!(message.headers["retries"], HeaderValue::Integer(3));
        assert_eq!(message.headers["urgent"], HeaderValue::Bool(true));
        assert_eq!(message.headers["ratio"], HeaderValue::Float(0.5));
        assert_eq!(message.headers["source"], HeaderValue::from("cli"));
        assert_eq!(message.headers["note"], HeaderValue::from("a=b"));
    }

    #[test]
    fn test_non_finite_numbers_stay_text() {
        let headers = ["ratio=nan", "limit=inf", "floor=-infinity"];
        let message = request("event", &headers).into_message().unwrap();

        assert_eq!(message.headers["ratio"], HeaderValue::from("nan"));
        assert_eq!(message.headers["limit"], HeaderValue::from("inf"));
        assert_eq!(message.headers["floor"], HeaderValue::from("-infinity"));
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        assert!(request("event", &["no-separator"]).into_message().is_err());
        assert!(request("event", &["=value"]).into_message().is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(request("telegram", &[]).into_message().is_err());
        assert!(request("EVENT", &[]).into_message().is_ok());
    }
}
