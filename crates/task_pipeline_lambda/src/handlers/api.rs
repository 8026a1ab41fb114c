//! API Gateway proxy framing and routing for the synchronous task API.
//!
//! Routing is intentionally small: the HTTP method, an optional `id` path
//! parameter and a trailing `/import` segment select the operation.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::handlers::bulk_import::handle_bulk_import;
use crate::handlers::response::{bad_request_response, error_response, ApiGatewayResponse};
use crate::handlers::tasks::handle_task_request;
use crate::services::PipelineServices;

const IMPORT_SEGMENT: &str = "/import";
const TASK_ID_PARAMETER: &str = "id";
const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayRequest {
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub path_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub request_context: Option<RequestContext>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl ApiGatewayRequest {
    pub fn task_id(&self) -> Option<&str> {
        self.path_parameters
            .as_ref()?
            .get(TASK_ID_PARAMETER)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn is_import(&self) -> bool {
        self.path.trim_end_matches('/').ends_with(IMPORT_SEGMENT)
            || self.resource.trim_end_matches('/').ends_with(IMPORT_SEGMENT)
    }

    /// Header lookup ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Identifies one import request: the client's `Idempotency-Key` header,
    /// else the gateway request id, else a fresh UUID.
    pub fn import_id(&self) -> String {
        let request_id = self
            .request_context
            .as_ref()
            .and_then(|context| context.request_id.as_deref());
        [self.header(IDEMPOTENCY_KEY_HEADER), request_id]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
    }

    /// Decodes a JSON body. A body delivered as text is parsed; an absent
    /// body decodes as an empty object.
    pub fn json_body(&self) -> Result<Value, String> {
        if self.is_base64_encoded {
            return Err("base64-encoded request bodies are not supported".to_string());
        }
        match &self.body {
            None | Some(Value::Null) => Ok(json!({})),
            Some(body @ Value::Object(_)) => Ok(body.clone()),
            Some(Value::String(text)) => {
                serde_json::from_str(text).map_err(|error| format!("Malformed JSON body: {error}"))
            }
            Some(_) => Err("Request body must be a JSON object".to_string()),
        }
    }

    pub fn text_body(&self) -> Result<&str, String> {
        if self.is_base64_encoded {
            return Err("base64-encoded request bodies are not supported".to_string());
        }
        match &self.body {
            None | Some(Value::Null) => Ok(""),
            Some(Value::String(text)) => Ok(text.as_str()),
            Some(_) => Err("Request body must be text".to_string()),
        }
    }
}

pub async fn handle_api_event(event: Value, services: &PipelineServices) -> ApiGatewayResponse {
    if !event.is_object() {
        return bad_request_response("Request payload must be a JSON object");
    }
    let request = match serde_json::from_value::<ApiGatewayRequest>(event) {
        Ok(value) => value,
        Err(error) => return bad_request_response(&format!("Malformed request: {error}")),
    };

    tracing::debug!(method = %request.http_method, path = %request.path, "api request");

    if request.is_import() {
        if request.http_method != "POST" {
            return method_not_allowed(&request);
        }
        return handle_bulk_import(
            &request,
            services.publisher.as_deref(),
            services.config.max_import_rows,
            &services.config.event_type,
        )
        .await;
    }

    handle_task_request(&request, &services.store).await
}

pub(crate) fn method_not_allowed(request: &ApiGatewayRequest) -> ApiGatewayResponse {
    error_response(
        405,
        json!({
            "error": "method_not_allowed",
            "message": format!("{} is not supported on {}", request.http_method, request.path),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use task_pipeline_core::memory::InMemoryKeyValueStore;

    use crate::config::PipelineConfig;

    use super::*;

    fn services() -> PipelineServices {
        let config = PipelineConfig::from_lookup(|name| {
            (name == "TASKS_TABLE_NAME").then(|| "tasks".to_string())
        })
        .expect("config");
        PipelineServices::new(config, Arc::new(InMemoryKeyValueStore::new()), None)
    }

    #[test]
    fn task_id_ignores_blank_path_parameter() {
        let request: ApiGatewayRequest = serde_json::from_value(json!({
            "httpMethod": "GET",
            "path": "/tasks/",
            "pathParameters": {"id": " "},
        }))
        .expect("request");
        assert_eq!(request.task_id(), None);
    }

    #[test]
    fn json_body_accepts_text_object_and_absent_body() {
        let text = ApiGatewayRequest {
            body: Some(json!("{\"title\":\"a\"}")),
            ..ApiGatewayRequest::default()
        };
        let object = ApiGatewayRequest {
            body: Some(json!({"title": "a"})),
            ..ApiGatewayRequest::default()
        };

        assert_eq!(text.json_body(), Ok(json!({"title": "a"})));
        assert_eq!(object.json_body(), Ok(json!({"title": "a"})));
        assert_eq!(ApiGatewayRequest::default().json_body(), Ok(json!({})));
    }

    #[test]
    fn import_id_prefers_client_key_then_gateway_request_id() {
        let request: ApiGatewayRequest = serde_json::from_value(json!({
            "httpMethod": "POST",
            "path": "/tasks/import",
            "headers": {"Idempotency-Key": "client-key"},
            "requestContext": {"requestId": "gateway-id"},
        }))
        .expect("request");
        assert_eq!(request.import_id(), "client-key");

        let blank_header = ApiGatewayRequest {
            headers: Some(HashMap::from([(
                "idempotency-key".to_string(),
                "  ".to_string(),
            )])),
            ..request.clone()
        };
        assert_eq!(blank_header.import_id(), "gateway-id");
    }

    #[test]
    fn import_id_without_keys_is_fresh_per_request() {
        let request = ApiGatewayRequest::default();
        let first = request.import_id();

        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, request.import_id());
    }

    #[tokio::test]
    async fn rejects_non_object_event() {
        let response = handle_api_event(json!("nope"), &services()).await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn import_route_requires_post() {
        let response = handle_api_event(
            json!({"httpMethod": "GET", "path": "/tasks/import"}),
            &services(),
        )
        .await;
        assert_eq!(response.status_code, 405);
    }

    #[tokio::test]
    async fn import_without_queue_is_a_misconfiguration() {
        let response = handle_api_event(
            json!({
                "httpMethod": "POST",
                "path": "/tasks/import",
                "body": "title\nBuy milk\n",
            }),
            &services(),
        )
        .await;

        assert_eq!(response.status_code, 500);
        assert_eq!(
            response.body_json().expect("json body")["error"],
            "misconfiguration"
        );
    }
}
