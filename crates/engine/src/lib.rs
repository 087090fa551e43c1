//! The execution-engine boundary.
//!
//! The transport layer consumes the engine as an opaque capability: hand it a
//! query document plus variables and get back either a single result or a
//! lazy, possibly infinite stream of results. Schema construction, parsing
//! and resolution all live behind [`ExecutionEngine`]; nothing in this crate
//! knows about sockets or HTTP.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One query, mutation or subscription request, exactly as it arrived on the
/// wire. Variables and the operation name are passed through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl ExecutionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }
}

/// A single resolved result. Per-result errors, if the engine reports any,
/// are opaque formatted error values carried alongside the data.
///
/// Serializes as `{"data": ...}` or `{"data": ..., "errors": [...]}`, the
/// shape both transports put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
}

impl ExecutionResult {
    pub fn new(data: Value) -> Self {
        Self { data, errors: None }
    }

    pub fn with_errors(data: Value, errors: Vec<Value>) -> Self {
        Self {
            data,
            errors: Some(errors),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|errors| !errors.is_empty())
    }
}

/// A lazy sequence of results produced by a subscription.
pub type ResultStream = Pin<Box<dyn Stream<Item = ExecutionResult> + Send>>;

/// The engine failed to even start an operation, e.g. the query text did not
/// parse or validate. Operations that start successfully report per-result
/// errors through [`ExecutionResult::errors`] instead.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The opaque error value sent to clients.
    pub fn to_payload(&self) -> Value {
        json!({ "message": self.message })
    }
}

/// Resolves query documents against a schema.
///
/// `execute` drives a query or mutation to a single result. `subscribe`
/// parses and validates the document up front; an `Err` means the operation
/// never started, while a successful call yields the result stream to drive.
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync + 'static {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError>;

    async fn subscribe(&self, request: ExecutionRequest) -> Result<ResultStream, ExecutionError>;
}
