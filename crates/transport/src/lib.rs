//! Transport adapter exposing a query-execution engine over HTTP
//! request/response and the `graphql-ws` subscription protocol.
//!
//! Both transports hang off a single `/graphql` route: `POST` is the
//! single-shot request path, `GET` upgrades to a WebSocket carrying the
//! subscription protocol. The engine itself is an external capability
//! behind [`graphql_engine::ExecutionEngine`].

mod http;
#[cfg(test)]
mod test_engine;
mod websocket;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use graphql_engine::ExecutionEngine;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use crate::websocket::{
    ClientMessage,
    DecodeError,
    ServerMessage,
    StartPayload,
    SUBPROTOCOL,
};

const REQUEST_MAX_SIZE: usize = 10 * 1024 * 1024;

const DEFAULT_SOCKET_BUFFER_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => panic!("default capacity is non-zero"),
};

#[derive(Clone)]
pub(crate) struct TransportState {
    pub(crate) engine: Arc<dyn ExecutionEngine>,
    pub(crate) socket_buffer_capacity: NonZeroUsize,
}

pub struct TransportServer {
    addr: SocketAddr,
    engine: Arc<dyn ExecutionEngine>,
    socket_buffer_capacity: NonZeroUsize,
    cors: Option<CorsLayer>,
}

impl TransportServer {
    pub fn new(addr: SocketAddr, engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            addr,
            engine,
            socket_buffer_capacity: DEFAULT_SOCKET_BUFFER_CAPACITY,
            cors: None,
        }
    }

    /// Outbound frames buffered per connection before the writer applies
    /// backpressure to the control loop and the subscription runners.
    pub fn with_socket_buffer_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.socket_buffer_capacity = capacity;
        self
    }

    pub fn with_cors(mut self, cors: CorsLayer) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Binds the listener and starts serving both transports.
    pub async fn spawn(self) -> anyhow::Result<(JoinHandle<anyhow::Result<()>>, SocketAddr)> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Binding transport address {}", self.addr))?;
        let addr = listener
            .local_addr()
            .context("Getting local address from listener")?;

        let state = TransportState {
            engine: self.engine,
            socket_buffer_capacity: self.socket_buffer_capacity,
        };

        let middleware = tower::ServiceBuilder::new()
            .layer(DefaultBodyLimit::max(REQUEST_MAX_SIZE))
            .layer(TraceLayer::new_for_http());

        let mut router = axum::Router::new()
            .route(
                "/graphql",
                get(websocket::websocket_handler).post(http::http_handler),
            )
            .with_state(state)
            .layer(middleware);

        if let Some(cors) = self.cors {
            router = router.layer(cors);
        }

        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .map_err(Into::into)
        });

        Ok((server_handle, addr))
    }
}
