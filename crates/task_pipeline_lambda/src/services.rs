use std::sync::Arc;

use task_pipeline_core::consumer::{BatchConsumer, StoreCreateEffect};
use task_pipeline_core::fanout::MessagePublisher;
use task_pipeline_core::kv::KeyValueStore;
use task_pipeline_core::store::TaskStore;

use crate::adapters::dynamodb::DynamoDbKeyValueStore;
use crate::adapters::sqs::SqsMessagePublisher;
use crate::config::{ConfigError, PipelineConfig};

/// Everything a handler needs, built once per cold start and shared by
/// reference across invocations.
#[derive(Clone)]
pub struct PipelineServices {
    pub config: PipelineConfig,
    pub store: TaskStore,
    pub publisher: Option<Arc<dyn MessagePublisher>>,
    pub consumer: BatchConsumer,
}

impl PipelineServices {
    pub fn new(
        config: PipelineConfig,
        kv: Arc<dyn KeyValueStore>,
        publisher: Option<Arc<dyn MessagePublisher>>,
    ) -> Self {
        let store = TaskStore::new(kv);
        let consumer = BatchConsumer::new(Arc::new(StoreCreateEffect::new(
            store.clone(),
            config.idempotent_creates,
        )))
        .with_event_type(config.event_type.clone());

        Self {
            config,
            store,
            publisher,
            consumer,
        }
    }

    /// Loads configuration from the environment and wires the DynamoDB and
    /// SQS clients from the standard AWS config chain.
    pub async fn from_env() -> Result<Self, ConfigError> {
        let config = PipelineConfig::from_env()?;
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let kv = Arc::new(DynamoDbKeyValueStore::new(
            aws_sdk_dynamodb::Client::new(&aws_config),
            config.table_name.clone(),
        ));
        let publisher = config.queue_url.clone().map(|queue_url| {
            Arc::new(SqsMessagePublisher::new(
                aws_sdk_sqs::Client::new(&aws_config),
                queue_url,
            )) as Arc<dyn MessagePublisher>
        });

        tracing::info!(
            table = %config.table_name,
            queue_configured = publisher.is_some(),
            idempotent_creates = config.idempotent_creates,
            "pipeline services initialised"
        );
        Ok(Self::new(config, kv, publisher))
    }
}
