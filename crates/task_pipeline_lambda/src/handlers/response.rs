use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use task_pipeline_core::contract::ValidationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

impl ApiGatewayResponse {
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

pub fn success_response(status_code: u16, payload: impl Serialize) -> ApiGatewayResponse {
    match serde_json::to_string(&payload) {
        Ok(body) => ApiGatewayResponse {
            status_code,
            headers: json_headers(),
            body,
        },
        Err(error) => error_response(
            500,
            json!({
                "error": "serialization_error",
                "message": error.to_string(),
            }),
        ),
    }
}

pub fn no_content_response() -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code: 204,
        headers: json!({}),
        body: String::new(),
    }
}

pub fn error_response(status_code: u16, payload: Value) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json_headers(),
        body: payload.to_string(),
    }
}

pub fn bad_request_response(message: &str) -> ApiGatewayResponse {
    error_response(
        400,
        json!({
            "error": "bad_request",
            "message": message,
        }),
    )
}

pub fn validation_error_response(error: &ValidationError) -> ApiGatewayResponse {
    error_response(
        400,
        json!({
            "error": "validation_error",
            "message": error.to_string(),
            "violations": error.violations(),
        }),
    )
}

pub fn not_found_response(task_id: &str) -> ApiGatewayResponse {
    error_response(
        404,
        json!({
            "error": "not_found",
            "message": format!("task {task_id} does not exist"),
        }),
    )
}

fn json_headers() -> Value {
    json!({"Content-Type": "application/json"})
}
