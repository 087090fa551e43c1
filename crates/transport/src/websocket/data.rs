//! Wire types for the `graphql-ws` text protocol and their JSON codec.
//!
//! Decoding is strict about the small closed set of client message kinds and
//! about `start` payloads; a message that fails here is reported back to the
//! peer and never reaches the execution engine. Encoding is total: every
//! server message always serializes.

use graphql_engine::ExecutionResult;
use serde::Deserialize;
use serde_json::{json, Value};

/// A message was not a well-formed protocol message: not JSON, no `type`
/// tag, an unrecognized `type`, or a `start` without the required fields.
/// The underlying serde error names the offending field.
#[derive(Debug, thiserror::Error)]
#[error("invalid protocol message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// The client-originated half of the protocol.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit,
    Start { id: String, payload: StartPayload },
    Stop { id: String },
    ConnectionTerminate,
}

impl ClientMessage {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// The payload of a `start` message. `query` is required; everything else is
/// passed through to the engine opaquely.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct StartPayload {
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

/// The server-originated half of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConnectionAck,
    Data { id: String, payload: Value },
    Error { id: Option<String>, payload: Value },
    Complete { id: String },
}

impl ServerMessage {
    /// A `data` message carrying one result, errors alongside if present.
    pub fn data(id: &str, result: &ExecutionResult) -> Self {
        let mut payload = json!({ "data": result.data });
        if let Some(errors) = &result.errors {
            payload["errors"] = json!(errors);
        }
        Self::Data {
            id: id.to_owned(),
            payload,
        }
    }

    /// An `error` scoped to one operation.
    pub fn operation_error(id: &str, payload: Value) -> Self {
        Self::Error {
            id: Some(id.to_owned()),
            payload,
        }
    }

    /// A connection-scoped `error`, e.g. for a message that failed to decode.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::Error {
            id: None,
            payload: json!({ "message": message.into() }),
        }
    }

    pub fn complete(id: &str) -> Self {
        Self::Complete { id: id.to_owned() }
    }

    /// The JSON envelope: `id` is emitted iff the message carries an
    /// operation id, `payload` iff it is non-null.
    pub fn to_value(&self) -> Value {
        let (kind, id, payload) = match self {
            Self::ConnectionAck => ("connection_ack", None, None),
            Self::Data { id, payload } => ("data", Some(id.as_str()), Some(payload)),
            Self::Error { id, payload } => ("error", id.as_deref(), Some(payload)),
            Self::Complete { id } => ("complete", Some(id.as_str()), None),
        };

        let mut envelope = json!({ "type": kind });
        if let Some(id) = id {
            envelope["id"] = json!(id);
        }
        if let Some(payload) = payload.filter(|payload| !payload.is_null()) {
            envelope["payload"] = payload.clone();
        }
        envelope
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub(super) fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAck => "connection_ack",
            Self::Data { .. } => "data",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}
