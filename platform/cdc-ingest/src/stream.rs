//! Transports that deliver raw change records

use crate::{CdcError, CdcResult};
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One message from the capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }
}

/// Source of change records, addressed by NATS-style subject patterns
#[async_trait]
pub trait ChangeStream: Send + Sync {
    async fn subscribe(&self, subject: &str) -> CdcResult<BoxStream<'static, RawMessage>>;
}

/// Change stream backed by a NATS connection
///
/// # Example
/// ```rust,no_run
/// use cdc_ingest::{ChangeStream, NatsChangeStream};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let stream = NatsChangeStream::new(client);
/// let _records = stream.subscribe("cdc.>").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsChangeStream {
    client: Client,
}

impl NatsChangeStream {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ChangeStream for NatsChangeStream {
    async fn subscribe(&self, subject: &str) -> CdcResult<BoxStream<'static, RawMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| CdcError::Transport(e.to_string()))?;

        let stream = subscriber
            .map(|msg| RawMessage::new(msg.subject.to_string(), msg.payload.to_vec()));

        Ok(stream.boxed())
    }
}

/// Change stream over an in-process broadcast channel, for tests and local runs.
///
/// Slow subscribers that fall more than the channel capacity behind lose the
/// oldest messages.
#[derive(Clone)]
pub struct InMemoryChangeStream {
    sender: Arc<broadcast::Sender<RawMessage>>,
}

impl InMemoryChangeStream {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Deliver a record to every current subscriber whose pattern matches.
    /// Returns false when nobody is listening.
    pub fn publish(&self, subject: impl Into<String>, payload: Vec<u8>) -> bool {
        self.sender.send(RawMessage::new(subject, payload)).is_ok()
    }

    /// NATS subject matching: `*` matches one token, `>` matches the rest
    pub fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        for (i, pattern_token) in pattern_tokens.iter().enumerate() {
            if *pattern_token == ">" {
                return subject_tokens.len() > i;
            }
            match subject_tokens.get(i) {
                Some(subject_token) if *pattern_token == "*" || pattern_token == subject_token => {}
                _ => return false,
            }
        }

        subject_tokens.len() == pattern_tokens.len()
    }
}

impl Default for InMemoryChangeStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeStream for InMemoryChangeStream {
    async fn subscribe(&self, pattern: &str) -> CdcResult<BoxStream<'static, RawMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Change stream subscriber lagged, records skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    fn test_pattern_matching() {
        let m = InMemoryChangeStream::matches_pattern;

        assert!(m("cdc.org_db.public.employees", "cdc.org_db.public.employees"));
        assert!(m("cdc.org_db.public.employees", "cdc.*.public.employees"));
        assert!(!m("cdc.org_db.public.employees", "cdc.*.employees"));

        assert!(m("cdc.org_db.public.employees", "cdc.>"));
        assert!(!m("cdc", "cdc.>"));
        assert!(!m("audit.org_db.public.employees", "cdc.>"));

        assert!(m("single", "*"));
        assert!(m("single", ">"));
        assert!(!m("one.two", "one"));
    }

    #[tokio::test]
    async fn test_subscribe_filters_by_pattern() {
        let stream = InMemoryChangeStream::new();
        let mut employees = stream.subscribe("cdc.*.public.employees").await.unwrap();

        stream.publish("cdc.org_db.public.organization_units", b"org".to_vec());
        stream.publish("cdc.org_db.public.employees", b"emp".to_vec());

        let msg = tokio::time::timeout(Duration::from_secs(1), employees.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(msg.subject, "cdc.org_db.public.employees");
        assert_eq!(msg.payload, b"emp");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let stream = InMemoryChangeStream::new();
        assert!(!stream.publish("cdc.x", vec![]));
    }

    #[tokio::test]
    #[ignore] // Requires NATS server: docker run -p 4222:4222 nats:2.10-alpine
    #[serial]
    async fn test_nats_change_stream_receives() {
        let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let client = async_nats::connect(url).await.expect("NATS server must be running");
        let stream = NatsChangeStream::new(client.clone());

        let mut records = stream.subscribe("cdc.test.>").await.unwrap();
        client
            .publish("cdc.test.employees", b"payload".to_vec().into())
            .await
            .unwrap();
        client.flush().await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), records.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");
        assert_eq!(msg.subject, "cdc.test.employees");
        assert_eq!(msg.payload, b"payload");
    }
}
