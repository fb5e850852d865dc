//! HTTP transport
//!
//! `GET /sse` opens an event stream that first announces the message
//! endpoint, then relays responses for that session. `POST /message`
//! accepts a JSON-RPC request; with a known session it pushes the response
//! onto the stream and returns 202, without one it answers inline, which
//! also makes plain request/response HTTP clients work.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};

use crate::mcp::{GatewayMcpServer, JsonRpcRequest, JsonRpcResponse};
use crate::transport::handle_request;

type SessionMap = Arc<RwLock<HashMap<String, mpsc::Sender<JsonRpcResponse>>>>;

#[derive(Clone)]
struct HttpState {
    server: Arc<GatewayMcpServer>,
    sessions: SessionMap,
    counter: Arc<AtomicU64>,
}

pub async fn run(server: GatewayMcpServer, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("HTTP transport listening on {}", bind);
    axum::serve(listener, router(server)).await?;
    Ok(())
}

fn router(server: GatewayMcpServer) -> Router {
    let state = HttpState {
        server: Arc::new(server),
        sessions: Arc::new(RwLock::new(HashMap::new())),
        counter: Arc::new(AtomicU64::new(1)),
    };

    Router::new()
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Removes the session's channel once the client goes away.
struct SessionGuard {
    sessions: SessionMap,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let sessions = Arc::clone(&self.sessions);
        let id = std::mem::take(&mut self.id);
        tokio::spawn(async move {
            sessions.write().await.remove(&id);
        });
    }
}

async fn sse_handler(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = format!("{:x}", state.counter.fetch_add(1, Ordering::Relaxed));
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(32);
    state.sessions.write().await.insert(id.clone(), tx);
    tracing::debug!("SSE session {} opened", id);

    let guard = SessionGuard {
        sessions: Arc::clone(&state.sessions),
        id: id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default()
            .event("endpoint")
            .data(format!("/message?session={}", id)));
        while let Some(response) = rx.recv().await {
            match serde_json::to_string(&response) {
                Ok(json) => yield Ok(Event::default().event("message").data(json)),
                Err(e) => tracing::warn!("failed to serialize response: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session: Option<String>,
}

async fn message_handler(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    Json(request): Json<JsonRpcRequest>,
) -> axum::response::Response {
    let response = handle_request(&state.server, request).await;

    let Some(response) = response else {
        return StatusCode::ACCEPTED.into_response();
    };

    if let Some(session) = query.session {
        let tx = state.sessions.read().await.get(&session).cloned();
        match tx {
            Some(tx) => {
                if tx.send(response).await.is_err() {
                    tracing::debug!("SSE session {} gone, dropping response", session);
                }
                return StatusCode::ACCEPTED.into_response();
            }
            None => {
                return (
                    StatusCode::NOT_FOUND,
                    format!("unknown session: {}", session),
                )
                    .into_response();
            }
        }
    }

    Json(response).into_response()
}
