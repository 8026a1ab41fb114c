//! SQS batch framing for the queue consumer.
//!
//! Records are decoded into [`BatchMessage`]s and handed to the core
//! consumer. Anything that prevents the batch from being processed as a
//! whole (a record without a body, a panic during setup) requests
//! redelivery of every message that can be identified.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use task_pipeline_core::consumer::{BatchConsumer, BatchMessage, BatchResult};
use task_pipeline_core::fanout::MessageAttributes;

const SQS_EVENT_SOURCE: &str = "aws:sqs";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SqsDecodeError {
    pub message: String,
    /// Ids of the records that could still be identified.
    pub message_ids: Vec<String>,
}

/// True when every record of a non-empty `Records` array comes from SQS.
pub fn is_sqs_event(event: &Value) -> bool {
    let from_sqs = |record: &Value| {
        record.get("eventSource").and_then(Value::as_str) == Some(SQS_EVENT_SOURCE)
    };
    event
        .get("Records")
        .and_then(Value::as_array)
        .is_some_and(|records| !records.is_empty() && records.iter().all(from_sqs))
}

pub fn decode_sqs_batch(event: &Value) -> Result<Vec<BatchMessage>, SqsDecodeError> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| SqsDecodeError {
            message: "SQS event must include Records array".to_string(),
            message_ids: Vec::new(),
        })?;

    let message_ids: Vec<String> = records
        .iter()
        .filter_map(|record| record.get("messageId").and_then(Value::as_str))
        .filter(|message_id| !message_id.trim().is_empty())
        .map(str::to_string)
        .collect();

    let mut messages = Vec::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        let message_id = record
            .get("messageId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(body) = record.get("body").and_then(Value::as_str) else {
            return Err(SqsDecodeError {
                message: format!("SQS record at position {position} has no string body"),
                message_ids,
            });
        };

        messages.push(BatchMessage {
            message_id: message_id.to_string(),
            body: body.to_string(),
            attributes: decode_string_attributes(record),
        });
    }

    Ok(messages)
}

fn decode_string_attributes(record: &Value) -> MessageAttributes {
    record
        .get("messageAttributes")
        .and_then(Value::as_object)
        .map(|attributes| {
            attributes
                .iter()
                .filter_map(|(name, attribute)| {
                    attribute
                        .get("stringValue")
                        .and_then(Value::as_str)
                        .map(|value| (name.clone(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Time left for the batch: the invocation deadline (epoch millis) minus
/// `now` and the safety margin. A zero deadline means none was supplied.
pub fn remaining_budget(deadline_epoch_ms: u64, now_epoch_ms: i64, margin: Duration) -> Option<Duration> {
    if deadline_epoch_ms == 0 {
        return None;
    }
    let now_epoch_ms = u64::try_from(now_epoch_ms).unwrap_or(0);
    let remaining = Duration::from_millis(deadline_epoch_ms.saturating_sub(now_epoch_ms));
    Some(remaining.saturating_sub(margin))
}

pub async fn handle_sqs_event(
    event: &Value,
    consumer: &BatchConsumer,
    budget: Option<Duration>,
) -> BatchResult {
    let messages = match decode_sqs_batch(event) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(%error, "undecodable SQS batch, retrying every identifiable message");
            return BatchResult::retry_all(error.message_ids.iter().map(String::as_str));
        }
    };

    let deadline = budget.map(|budget| tokio::time::Instant::now() + budget);
    tracing::info!(received = messages.len(), ?budget, "SQS batch received");

    match AssertUnwindSafe(consumer.process(&messages, deadline))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("batch processing panicked, retrying every message");
            BatchResult::retry_all(
                messages
                    .iter()
                    .map(|message| message.message_id.as_str())
                    .filter(|message_id| !message_id.is_empty()),
            )
        }
    }
}
