//! Batch queue consumer with partial-failure reporting.
//!
//! Each message in a batch moves through
//! `received -> parsed -> validated -> applied` and ends either acknowledged
//! or retry-requested. Only retry-requested message ids are returned; the
//! queue treats every other message in the batch as consumed. Whenever the
//! outcome of a message is unknown (invalid envelope, panic, deadline) the
//! consumer requests redelivery rather than risk silent loss.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::contract::{
    validate_create_request, CreateTaskRequest, EVENT_TYPE_ATTRIBUTE, IDEMPOTENCY_KEY_ATTRIBUTE,
};
use crate::fanout::MessageAttributes;
use crate::store::{TaskStore, TaskStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMessage {
    pub message_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: MessageAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Partial batch response. Serializes to the
/// `{"batchItemFailures":[{"itemIdentifier":"..."}]}` shape queues expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResult {
    pub fn retry_all<'a>(message_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut result = Self::default();
        for message_id in message_ids {
            result.push(message_id);
        }
        result
    }

    pub fn failed_message_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|failure| failure.item_identifier.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.batch_item_failures.is_empty()
    }

    fn push(&mut self, message_id: &str) {
        self.batch_item_failures.push(BatchItemFailure {
            item_identifier: message_id.to_string(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("batch contains no messages")]
    Empty,
    #[error("message at position {position} has an empty messageId")]
    MissingMessageId { position: usize },
    #[error("messageId {message_id} appears more than once in the batch")]
    DuplicateMessageId { message_id: String },
}

/// Structural checks on the batch as a whole, before any message is touched.
pub fn validate_envelope(messages: &[BatchMessage]) -> Result<(), EnvelopeError> {
    if messages.is_empty() {
        return Err(EnvelopeError::Empty);
    }

    let mut seen = HashSet::with_capacity(messages.len());
    for (position, message) in messages.iter().enumerate() {
        if message.message_id.trim().is_empty() {
            return Err(EnvelopeError::MissingMessageId { position });
        }
        if !seen.insert(message.message_id.as_str()) {
            return Err(EnvelopeError::DuplicateMessageId {
                message_id: message.message_id.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    MalformedBody(String),
    InvalidPayload(String),
    EffectFailed(String),
    Panicked,
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDisposition {
    Acknowledged,
    /// Routed to a different consumer; acknowledged without an effect.
    Skipped,
    RetryRequested(RetryReason),
}

#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error(transparent)]
    Store(#[from] TaskStoreError),
    #[error("{0}")]
    Other(String),
}

/// Business effect applied to each parsed and validated message.
#[async_trait]
pub trait MessageEffect: Send + Sync {
    async fn apply(
        &self,
        message: &BatchMessage,
        request: &CreateTaskRequest,
    ) -> Result<(), EffectError>;
}

/// Creates a task per message. With idempotency enabled the task id is
/// derived from the message's idempotency key (or its message id), so a
/// redelivered message finds the record it already created.
#[derive(Clone)]
pub struct StoreCreateEffect {
    store: TaskStore,
    idempotent: bool,
}

impl StoreCreateEffect {
    pub fn new(store: TaskStore, idempotent: bool) -> Self {
        Self { store, idempotent }
    }
}

#[async_trait]
impl MessageEffect for StoreCreateEffect {
    async fn apply(
        &self,
        message: &BatchMessage,
        request: &CreateTaskRequest,
    ) -> Result<(), EffectError> {
        if !self.idempotent {
            let task = self.store.create(request).await?;
            tracing::debug!(message_id = %message.message_id, task_id = %task.id, "task created");
            return Ok(());
        }

        let idempotency_key = message
            .attributes
            .get(IDEMPOTENCY_KEY_ATTRIBUTE)
            .unwrap_or(&message.message_id);
        let outcome = self
            .store
            .create_idempotent(request, idempotency_key)
            .await?;
        tracing::debug!(
            message_id = %message.message_id,
            task_id = %outcome.task().id,
            created = outcome.is_created(),
            "task create applied"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct BatchConsumer {
    effect: Arc<dyn MessageEffect>,
    event_type: Option<String>,
}

impl BatchConsumer {
    pub fn new(effect: Arc<dyn MessageEffect>) -> Self {
        Self {
            effect,
            event_type: None,
        }
    }

    /// Messages tagged with a different event type are acknowledged without
    /// applying the effect. Untagged messages are always processed.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Processes every message concurrently and returns the ids to retry.
    /// Messages still unsettled at `deadline` are retried.
    pub async fn process(&self, messages: &[BatchMessage], deadline: Option<Instant>) -> BatchResult {
        if let Err(error) = validate_envelope(messages) {
            tracing::error!(%error, received = messages.len(), "invalid batch envelope, retrying every message");
            return BatchResult::retry_all(
                messages
                    .iter()
                    .map(|message| message.message_id.as_str())
                    .filter(|message_id| !message_id.trim().is_empty()),
            );
        }

        let mut pending: FuturesUnordered<_> = messages
            .iter()
            .map(|message| async move {
                let disposition = AssertUnwindSafe(self.process_message(message))
                    .catch_unwind()
                    .await
                    .unwrap_or(MessageDisposition::RetryRequested(RetryReason::Panicked));
                (message.message_id.as_str(), disposition)
            })
            .collect();

        let mut settled = HashMap::with_capacity(messages.len());
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(unsettled = pending.len(), "batch deadline reached");
                        break;
                    }
                },
                None => pending.next().await,
            };
            let Some((message_id, disposition)) = next else {
                break;
            };
            settled.insert(message_id, disposition);
        }
        drop(pending);

        let mut result = BatchResult::default();
        for message in messages {
            let disposition = settled
                .remove(message.message_id.as_str())
                .unwrap_or(MessageDisposition::RetryRequested(RetryReason::DeadlineExceeded));
            if let MessageDisposition::RetryRequested(reason) = disposition {
                tracing::warn!(message_id = %message.message_id, ?reason, "message will be retried");
                result.push(&message.message_id);
            }
        }

        tracing::info!(
            received = messages.len(),
            retried = result.batch_item_failures.len(),
            "batch processed"
        );
        result
    }

    async fn process_message(&self, message: &BatchMessage) -> MessageDisposition {
        if let (Some(expected), Some(actual)) = (
            self.event_type.as_deref(),
            message.attributes.get(EVENT_TYPE_ATTRIBUTE),
        ) {
            if expected != actual {
                tracing::debug!(message_id = %message.message_id, event_type = %actual, "skipping message for another event type");
                return MessageDisposition::Skipped;
            }
        }

        let request: CreateTaskRequest = match serde_json::from_str(&message.body) {
            Ok(request) => request,
            Err(error) => {
                return MessageDisposition::RetryRequested(RetryReason::MalformedBody(
                    error.to_string(),
                ))
            }
        };

        if let Err(error) = validate_create_request(&request) {
            return MessageDisposition::RetryRequested(RetryReason::InvalidPayload(
                error.to_string(),
            ));
        }

        match self.effect.apply(message, &request).await {
            Ok(()) => MessageDisposition::Acknowledged,
            Err(error) => {
                MessageDisposition::RetryRequested(RetryReason::EffectFailed(error.to_string()))
            }
        }
    }
}
