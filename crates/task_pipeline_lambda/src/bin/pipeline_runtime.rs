//! Single function serving both the HTTP API and the queue consumer,
//! dispatching on the shape of the incoming event.

use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use task_pipeline_lambda::handlers::api::handle_api_event;
use task_pipeline_lambda::handlers::queue_consumer::{
    handle_sqs_event, is_sqs_event, remaining_budget,
};
use task_pipeline_lambda::services::PipelineServices;
use task_pipeline_lambda::telemetry::init_tracing;

async fn handle_request(
    services: &PipelineServices,
    event: LambdaEvent<Value>,
) -> Result<Value, Error> {
    if is_sqs_event(&event.payload) {
        let budget = remaining_budget(
            event.context.deadline,
            Utc::now().timestamp_millis(),
            services.config.deadline_margin,
        );
        let result = handle_sqs_event(&event.payload, &services.consumer, budget).await;
        serde_json::to_value(result)
            .map_err(|error| Error::from(format!("failed to serialize batch response: {error}")))
    } else {
        let response = handle_api_event(event.payload, services).await;
        serde_json::to_value(response)
            .map_err(|error| Error::from(format!("failed to serialize api response: {error}")))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let services = &PipelineServices::from_env().await?;

    lambda_runtime::run(service_fn(move |event| handle_request(services, event))).await
}
