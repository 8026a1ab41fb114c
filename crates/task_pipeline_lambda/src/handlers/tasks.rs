use serde::de::DeserializeOwned;
use serde_json::json;
use task_pipeline_core::contract::{CreateTaskRequest, UpdateTaskRequest};
use task_pipeline_core::kv::KvError;
use task_pipeline_core::store::{TaskStore, TaskStoreError};

use crate::handlers::api::{method_not_allowed, ApiGatewayRequest};
use crate::handlers::response::{
    bad_request_response, error_response, no_content_response, not_found_response,
    success_response, validation_error_response, ApiGatewayResponse,
};

pub async fn handle_task_request(
    request: &ApiGatewayRequest,
    store: &TaskStore,
) -> ApiGatewayResponse {
    match (request.http_method.as_str(), request.task_id()) {
        ("GET", None) => match store.list().await {
            Ok(tasks) => success_response(200, tasks),
            Err(error) => store_error_response(error),
        },
        ("GET", Some(task_id)) => match store.get(task_id).await {
            Ok(Some(task)) => success_response(200, task),
            Ok(None) => not_found_response(task_id),
            Err(error) => store_error_response(error),
        },
        ("POST", None) => {
            let payload = match decode_body::<CreateTaskRequest>(request) {
                Ok(value) => value,
                Err(response) => return response,
            };
            match store.create(&payload).await {
                Ok(task) => success_response(201, task),
                Err(error) => store_error_response(error),
            }
        }
        ("PUT", Some(task_id)) => {
            let payload = match decode_body::<UpdateTaskRequest>(request) {
                Ok(value) => value,
                Err(response) => return response,
            };
            match store.update(task_id, &payload).await {
                Ok(Some(task)) => success_response(200, task),
                Ok(None) => not_found_response(task_id),
                Err(error) => store_error_response(error),
            }
        }
        ("DELETE", Some(task_id)) => match store.delete(task_id).await {
            Ok(true) => no_content_response(),
            Ok(false) => not_found_response(task_id),
            Err(error) => store_error_response(error),
        },
        _ => method_not_allowed(request),
    }
}

fn decode_body<T: DeserializeOwned>(request: &ApiGatewayRequest) -> Result<T, ApiGatewayResponse> {
    let payload = request
        .json_body()
        .map_err(|message| bad_request_response(&message))?;
    serde_json::from_value(payload)
        .map_err(|error| bad_request_response(&format!("Malformed request: {error}")))
}

fn store_error_response(error: TaskStoreError) -> ApiGatewayResponse {
    match error {
        TaskStoreError::Validation(error) => validation_error_response(&error),
        TaskStoreError::Storage(KvError::Throttled { message, .. }) => error_response(
            503,
            json!({
                "error": "throttled",
                "message": message,
            }),
        ),
        other => {
            tracing::error!(error = %other, "task store request failed");
            error_response(
                500,
                json!({
                    "error": "storage_error",
                    "message": other.to_string(),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use task_pipeline_core::memory::InMemoryKeyValueStore;

    use super::*;

    fn request(method: &str, task_id: Option<&str>, body: Option<Value>) -> ApiGatewayRequest {
        ApiGatewayRequest {
            http_method: method.to_string(),
            path: match task_id {
                Some(id) => format!("/tasks/{id}"),
                None => "/tasks".to_string(),
            },
            path_parameters: task_id
                .map(|id| HashMap::from([("id".to_string(), id.to_string())])),
            body,
            ..ApiGatewayRequest::default()
        }
    }

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(InMemoryKeyValueStore::new()))
    }

    async fn create(store: &TaskStore, title: &str) -> Value {
        let response = handle_task_request(
            &request(
                "POST",
                None,
                Some(Value::String(json!({"title": title}).to_string())),
            ),
            store,
        )
        .await;
        assert_eq!(response.status_code, 201);
        response.body_json().expect("json body")
    }

    #[tokio::test]
    async fn create_then_get_returns_the_same_task() {
        let store = store();
        let created = create(&store, "Buy milk").await;
        let task_id = created["id"].as_str().expect("id");

        let response = handle_task_request(&request("GET", Some(task_id), None), &store).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body_json(), Some(created));
    }

    #[tokio::test]
    async fn create_rejects_long_title_with_field_violation() {
        let store = store();
        let response = handle_task_request(
            &request("POST", None, Some(json!({"title": "x".repeat(101)}))),
            &store,
        )
        .await;

        assert_eq!(response.status_code, 400);
        let body = response.body_json().expect("json body");
        assert_eq!(body["violations"][0]["field"], "title");
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn list_returns_every_task() {
        let store = store();
        create(&store, "a").await;
        create(&store, "b").await;

        let response = handle_task_request(&request("GET", None, None), &store).await;

        assert_eq!(response.status_code, 200);
        let body = response.body_json().expect("json body");
        assert_eq!(body.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn update_replaces_fields_and_missing_task_is_not_found() {
        let store = store();
        let created = create(&store, "Buy milk").await;
        let task_id = created["id"].as_str().expect("id");

        let response = handle_task_request(
            &request(
                "PUT",
                Some(task_id),
                Some(json!({"title": "Buy oat milk", "isComplete": true})),
            ),
            &store,
        )
        .await;
        assert_eq!(response.status_code, 200);
        let body = response.body_json().expect("json body");
        assert_eq!(body["title"], "Buy oat milk");
        assert_eq!(body["isComplete"], true);

        let missing = handle_task_request(
            &request(
                "PUT",
                Some("missing"),
                Some(json!({"title": "x", "isComplete": false})),
            ),
            &store,
        )
        .await;
        assert_eq!(missing.status_code, 404);
    }

    #[tokio::test]
    async fn update_without_is_complete_is_malformed() {
        let store = store();
        let created = create(&store, "Buy milk").await;
        let task_id = created["id"].as_str().expect("id");

        let response = handle_task_request(
            &request("PUT", Some(task_id), Some(json!({"title": "x"}))),
            &store,
        )
        .await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn delete_succeeds_once() {
        let store = store();
        let created = create(&store, "Buy milk").await;
        let task_id = created["id"].as_str().expect("id");

        let first = handle_task_request(&request("DELETE", Some(task_id), None), &store).await;
        let second = handle_task_request(&request("DELETE", Some(task_id), None), &store).await;

        assert_eq!(first.status_code, 204);
        assert_eq!(second.status_code, 404);
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected() {
        let response = handle_task_request(&request("PATCH", Some("abc"), None), &store()).await;
        assert_eq!(response.status_code, 405);
    }
}
