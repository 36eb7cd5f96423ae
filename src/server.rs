// src/server.rs

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};

use crate::{config::NONCE_HEADER, flow::model::DocumentId, store::{MemoryBackingStore, StoreError}};

/// Mount point of the REST API, as on the host CMS.
pub const REST_ROOT: &str = "/wp-json";

#[derive(Clone)]
struct AppState {
    store: Arc<MemoryBackingStore>,
}

type HandlerResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Routes `GET`/`POST {REST_ROOT}/{namespace}/flow/:post_id` to `store`.
pub fn router(store: Arc<MemoryBackingStore>, namespace: &str) -> Router {
    let path = format!("/{}/flow/:post_id", namespace.trim_matches('/'));
    let api = Router::new()
        .route(&path, get(handle_fetch).post(handle_save))
        .with_state(AppState { store });
    Router::new().nest(REST_ROOT, api)
}

/// Bind `addr` and serve in the background. Returns the bound address, which
/// differs from `addr` when port 0 was asked for.
pub async fn spawn(
    addr: SocketAddr,
    store: Arc<MemoryBackingStore>,
    namespace: &str,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let app = router(store, namespace);
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!(error = %err, "backing store server stopped");
        }
    });
    info!("backing store listening on {local}");
    Ok((local, handle))
}

/// Serve until ctrl-c.
pub async fn serve(addr: SocketAddr, store: Arc<MemoryBackingStore>, namespace: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("backing store listening on {}{}/{}", listener.local_addr()?, REST_ROOT, namespace);
    axum::serve(listener, router(store, namespace))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn handle_fetch(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let id = parse_post_id(&post_id)?;
    state
        .store
        .read(id, nonce(&headers))
        .map(Json)
        .map_err(reject)
}

async fn handle_save(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let id = parse_post_id(&post_id)?;
    let body: Value = serde_json::from_slice(&body).map_err(|err| {
        reject(StoreError {
            status: 400,
            code: "rest_invalid_json",
            message: format!("Invalid JSON body passed: {err}"),
        })
    })?;
    state
        .store
        .write(id, nonce(&headers), &body)
        .map(Json)
        .map_err(reject)
}

fn nonce(headers: &HeaderMap) -> Option<&str> {
    headers.get(NONCE_HEADER).and_then(|v| v.to_str().ok())
}

// Non-numeric ids never match a route on the host.
fn parse_post_id(raw: &str) -> Result<DocumentId, (StatusCode, Json<Value>)> {
    raw.parse::<DocumentId>().map_err(|_| {
        reject(StoreError {
            status: 404,
            code: "rest_no_route",
            message: "No route was found matching the URL and request method".into(),
        })
    })
}

fn reject(err: StoreError) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.body()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_binds_ephemeral_port() {
        let store = MemoryBackingStore::new();
        let (addr, handle) = spawn("127.0.0.1:0".parse().unwrap(), store, "bcst-xyflow/v1")
            .await
            .unwrap();
        assert_ne!(addr.port(), 0);
        handle.abort();
    }

    #[test]
    fn test_parse_post_id() {
        assert_eq!(parse_post_id("42").unwrap().get(), 42);
        let (status, body) = parse_post_id("abc").unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0["code"], "rest_no_route");
    }
}
