//! A scriptable stand-in for the execution engine. Queries are matched by
//! their exact text; anything unrecognized fails to start, standing in for a
//! parse or validation error.

use std::time::Duration;

use graphql_engine::{
    ExecutionEngine,
    ExecutionError,
    ExecutionRequest,
    ExecutionResult,
    ResultStream,
};
use serde_json::json;

#[derive(Default)]
pub(crate) struct TestEngine;

#[async_trait::async_trait]
impl ExecutionEngine for TestEngine {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        match request.query.as_str() {
            "{ hello }" => Ok(ExecutionResult::new(json!({"hello": "world"}))),
            "{ boom }" => Ok(ExecutionResult::with_errors(
                json!(null),
                vec![json!({"message": "boom is not defined"})],
            )),
            other => Err(ExecutionError::new(format!(
                "Syntax Error: Cannot execute {other:?}"
            ))),
        }
    }

    async fn subscribe(&self, request: ExecutionRequest) -> Result<ResultStream, ExecutionError> {
        match request.query.as_str() {
            // One item, then a clean end of stream.
            "subscription { example }" => Ok(Box::pin(futures::stream::iter([
                ExecutionResult::new(json!({"example": "Hi"})),
            ]))),
            // An infinite, gently paced stream.
            "subscription { counter }" => Ok(Box::pin(futures::stream::unfold(0u64, |n| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((ExecutionResult::new(json!({"counter": n})), n + 1))
            }))),
            // Never produces, never ends.
            "subscription { pending }" => {
                Ok(Box::pin(futures::stream::pending::<ExecutionResult>()))
            }
            other => Err(ExecutionError::new(format!(
                "Syntax Error: Cannot subscribe to {other:?}"
            ))),
        }
    }
}
