use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use task_pipeline_lambda::handlers::queue_consumer::{handle_sqs_event, remaining_budget};
use task_pipeline_lambda::runtime::consumer::BatchResult;
use task_pipeline_lambda::services::PipelineServices;
use task_pipeline_lambda::telemetry::init_tracing;

async fn handle_request(
    services: &PipelineServices,
    event: LambdaEvent<Value>,
) -> Result<BatchResult, Error> {
    let budget = remaining_budget(
        event.context.deadline,
        Utc::now().timestamp_millis(),
        services.config.deadline_margin,
    );
    Ok(handle_sqs_event(&event.payload, &services.consumer, budget).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let services = &PipelineServices::from_env().await?;

    lambda_runtime::run(service_fn(move |event| handle_request(services, event))).await
}
