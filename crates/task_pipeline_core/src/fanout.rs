//! Fan-out of validated create requests onto a durable queue.
//!
//! Every request becomes one message. All publishes are issued at once and
//! the call waits for each of them to settle; a single failure does not stop
//! the others, but any failure fails the whole call so the caller can retry
//! the full list. Each message carries an idempotency key built from the
//! import id and row index, so redelivery or a retry of the same import stores
//! each row once while a separate import of identical rows stores new tasks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;

use crate::contract::{CreateTaskRequest, EVENT_TYPE_ATTRIBUTE, IDEMPOTENCY_KEY_ATTRIBUTE};
use crate::storage_keys::upload_item_key;

pub type MessageAttributes = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
#[error("publish failed: {message}")]
pub struct PublishError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PublishError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes one message and returns the queue-assigned message id.
    async fn publish(
        &self,
        body: String,
        attributes: MessageAttributes,
    ) -> Result<String, PublishError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPublish {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{} of {attempted} task messages could not be published", failures.len())]
pub struct FanOutError {
    pub attempted: usize,
    pub failures: Vec<FailedPublish>,
}

/// Publishes one message per request. On success the returned message ids
/// line up index-for-index with `requests`. `import_id` must identify one
/// import request; reusing it across retries of that request is what makes
/// them idempotent.
pub async fn publish_tasks(
    publisher: &dyn MessagePublisher,
    requests: &[CreateTaskRequest],
    event_type: &str,
    import_id: &str,
) -> Result<Vec<String>, FanOutError> {
    let attempts = requests.iter().enumerate().map(|(index, request)| {
        let attributes = MessageAttributes::from([
            (EVENT_TYPE_ATTRIBUTE.to_string(), event_type.to_string()),
            (
                IDEMPOTENCY_KEY_ATTRIBUTE.to_string(),
                upload_item_key(import_id, index),
            ),
        ]);
        async move {
            let body = serde_json::to_string(request)
                .map_err(|error| format!("failed to serialize task message: {error}"))?;
            publisher
                .publish(body, attributes)
                .await
                .map_err(|error| error.to_string())
        }
    });
    let settled = join_all(attempts).await;

    let mut message_ids = Vec::with_capacity(settled.len());
    let mut failures = Vec::new();
    for (index, outcome) in settled.into_iter().enumerate() {
        match outcome {
            Ok(message_id) => message_ids.push(message_id),
            Err(message) => {
                tracing::warn!(index, %message, "task message publish failed");
                failures.push(FailedPublish { index, message });
            }
        }
    }

    if failures.is_empty() {
        tracing::info!(import_id, published = message_ids.len(), "fan-out complete");
        Ok(message_ids)
    } else {
        Err(FanOutError {
            attempted: requests.len(),
            failures,
        })
    }
}
