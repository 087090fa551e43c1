//! The single-shot HTTP request path.
//!
//! One request in, one JSON response out. The engine call is awaited to
//! completion before responding; there is no per-request state to manage, so
//! everything interesting lives in content negotiation.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use graphql_engine::ExecutionRequest;
use http::{header, HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::TransportState;

#[derive(Deserialize)]
struct QueryBody {
    query: Option<String>,
    #[serde(default)]
    variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

pub(crate) async fn http_handler(
    State(state): State<TransportState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let request = if content_type.starts_with(mime::APPLICATION_JSON.essence_str()) {
        let body: QueryBody = match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(error) => {
                return (StatusCode::BAD_REQUEST, format!("Invalid JSON body: {error}"))
                    .into_response()
            }
        };
        let Some(query) = body.query else {
            return (
                StatusCode::BAD_REQUEST,
                "No GraphQL query found in the request",
            )
                .into_response();
        };
        ExecutionRequest {
            query,
            variables: body.variables,
            operation_name: body.operation_name,
        }
    } else if content_type.starts_with("application/graphql") {
        // The raw body is the query text.
        match String::from_utf8(body.to_vec()) {
            Ok(query) => ExecutionRequest::new(query),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "Query text is not valid UTF-8")
                    .into_response()
            }
        }
    } else {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type").into_response();
    };

    match state.engine.execute(request).await {
        Ok(result) => {
            let status = if result.has_errors() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            (status, Json(result)).into_response()
        }
        Err(error) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "data": null, "errors": [error.to_payload()] })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions_sorted::assert_eq;
    use serde_json::json;

    use crate::test_engine::TestEngine;
    use crate::TransportServer;

    async fn spawn_server() -> String {
        let server = TransportServer::new(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(TestEngine::default()),
        );
        let (_server_handle, addr) = server.spawn().await.unwrap();
        format!("http://{addr}/graphql")
    }

    #[tokio::test]
    async fn rejects_non_post_methods() {
        let url = spawn_server().await;

        let response = reqwest::Client::new().put(&url).send().await.unwrap();
        assert_eq!(response.status(), 405);

        let response = reqwest::Client::new().delete(&url).send().await.unwrap();
        assert_eq!(response.status(), 405);
    }

    #[tokio::test]
    async fn rejects_unrecognized_content_types() {
        let url = spawn_server().await;

        let response = reqwest::Client::new()
            .post(&url)
            .header("Content-Type", "text/plain")
            .body("{ hello }")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 415);
        assert_eq!(response.text().await.unwrap(), "Unsupported Media Type");
    }

    #[tokio::test]
    async fn missing_query_is_a_bad_request() {
        let url = spawn_server().await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&json!({"variables": {"x": 1}}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        assert_eq!(
            response.text().await.unwrap(),
            "No GraphQL query found in the request"
        );
    }

    #[tokio::test]
    async fn executes_a_json_query() {
        let url = spawn_server().await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&json!({"query": "{ hello }"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            json!({"data": {"hello": "world"}})
        );
    }

    #[tokio::test]
    async fn executes_a_raw_graphql_body() {
        let url = spawn_server().await;

        let response = reqwest::Client::new()
            .post(&url)
            .header("Content-Type", "application/graphql")
            .body("{ hello }")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            json!({"data": {"hello": "world"}})
        );
    }

    #[tokio::test]
    async fn result_errors_surface_as_bad_request() {
        let url = spawn_server().await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&json!({"query": "{ boom }"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            json!({
                "data": null,
                "errors": [{"message": "boom is not defined"}],
            })
        );
    }

    #[tokio::test]
    async fn engine_start_failure_surfaces_as_bad_request() {
        let url = spawn_server().await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&json!({"query": "nonsense"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        let body = response.json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["data"], json!(null));
        assert!(body["errors"][0]["message"].is_string());
    }
}
