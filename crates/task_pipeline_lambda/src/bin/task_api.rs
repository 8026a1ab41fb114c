use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use task_pipeline_lambda::handlers::api::handle_api_event;
use task_pipeline_lambda::handlers::response::ApiGatewayResponse;
use task_pipeline_lambda::services::PipelineServices;
use task_pipeline_lambda::telemetry::init_tracing;

async fn handle_request(
    services: &PipelineServices,
    event: LambdaEvent<Value>,
) -> Result<ApiGatewayResponse, Error> {
    Ok(handle_api_event(event.payload, services).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let services = &PipelineServices::from_env().await?;

    lambda_runtime::run(service_fn(move |event| handle_request(services, event))).await
}
