use serde::Serialize;
use serde_json::json;
use task_pipeline_core::bulk_import::{parse_task_upload, BulkImportError};
use task_pipeline_core::fanout::{publish_tasks, MessagePublisher};

use crate::config::TASKS_QUEUE_URL_VAR;
use crate::handlers::api::ApiGatewayRequest;
use crate::handlers::response::{
    bad_request_response, error_response, success_response, validation_error_response,
    ApiGatewayResponse,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkImportAccepted {
    pub accepted: usize,
    pub message_ids: Vec<String>,
}

/// Validates an uploaded CSV as a whole and, if every row passes, fans one
/// create message per row out to the queue. Nothing is published for a
/// rejected upload.
pub async fn handle_bulk_import(
    request: &ApiGatewayRequest,
    publisher: Option<&dyn MessagePublisher>,
    max_rows: usize,
    event_type: &str,
) -> ApiGatewayResponse {
    let text = match request.text_body() {
        Ok(value) => value,
        Err(message) => return bad_request_response(&message),
    };

    let requests = match parse_task_upload(text, max_rows) {
        Ok(value) => value,
        Err(BulkImportError::Rejected(error)) => return validation_error_response(&error),
        Err(error @ BulkImportError::TooManyRows { .. }) => {
            return error_response(
                413,
                json!({
                    "error": "upload_too_large",
                    "message": error.to_string(),
                }),
            );
        }
        Err(error @ BulkImportError::Parse { .. }) => {
            return error_response(
                400,
                json!({
                    "error": "parse_error",
                    "message": error.to_string(),
                }),
            );
        }
    };

    let Some(publisher) = publisher else {
        return error_response(
            500,
            json!({
                "error": "misconfiguration",
                "message": format!("{TASKS_QUEUE_URL_VAR} must be configured"),
            }),
        );
    };

    let import_id = request.import_id();
    match publish_tasks(publisher, &requests, event_type, &import_id).await {
        Ok(message_ids) => success_response(
            202,
            BulkImportAccepted {
                accepted: message_ids.len(),
                message_ids,
            },
        ),
        Err(error) => error_response(
            502,
            json!({
                "error": "dispatch_failed",
                "message": error.to_string(),
                "failures": error.failures,
            }),
        ),
    }
}
