use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client;
use task_pipeline_core::fanout::{MessageAttributes, MessagePublisher, PublishError};

const STRING_DATA_TYPE: &str = "String";

/// Publishes fan-out messages to a single SQS queue. Attributes travel as
/// `String` message attributes so the consumer can route without parsing
/// the body.
#[derive(Debug, Clone)]
pub struct SqsMessagePublisher {
    client: Client,
    queue_url: String,
}

impl SqsMessagePublisher {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }
}

#[async_trait]
impl MessagePublisher for SqsMessagePublisher {
    async fn publish(
        &self,
        body: String,
        attributes: MessageAttributes,
    ) -> Result<String, PublishError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body);

        for (name, value) in attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type(STRING_DATA_TYPE)
                .string_value(value)
                .build()
                .map_err(|error| {
                    PublishError::with_source(format!("invalid message attribute {name}"), error)
                })?;
            request = request.message_attributes(name, attribute);
        }

        let output = request.send().await.map_err(|error| {
            PublishError::with_source(
                format!(
                    "failed to enqueue task message: {}",
                    DisplayErrorContext(&error)
                ),
                error,
            )
        })?;

        output
            .message_id()
            .map(str::to_string)
            .ok_or_else(|| PublishError::new("queue accepted the message without an id"))
    }
}
