//! HTTP surface for the serve path.
//!
//! - `GET /healthz` — liveness probe
//! - `GET /nodes` — refresh, then the node list
//! - `GET /edges` — refresh, then the edge list
//! - `GET /graph` — refresh, then the full graph document
//! - `GET /events` — today's event log records
//! - `GET /refresh` — force a rebuild
//!
//! All state is explicit in [`AppContext`]; handlers get it through axum's
//! `State` extractor. Refresh failures surface as 500 with the error text.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::client::ClusterApi;
use crate::events::EventLogger;
use crate::manager::TopologyManager;

#[derive(Clone)]
pub struct AppContext {
    pub client: Arc<dyn ClusterApi>,
    pub manager: Arc<TopologyManager>,
    pub events: Arc<EventLogger>,
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"status": "error", "message": err.to_string()})),
    )
        .into_response()
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn get_nodes(State(ctx): State<AppContext>) -> Response {
    if let Err(e) = ctx.manager.refresh(ctx.client.as_ref()).await {
        return internal_error(e);
    }
    Json(ctx.manager.graph_doc().nodes).into_response()
}

async fn get_edges(State(ctx): State<AppContext>) -> Response {
    if let Err(e) = ctx.manager.refresh(ctx.client.as_ref()).await {
        return internal_error(e);
    }
    Json(ctx.manager.graph_doc().edges).into_response()
}

async fn get_graph(State(ctx): State<AppContext>) -> Response {
    if let Err(e) = ctx.manager.refresh(ctx.client.as_ref()).await {
        return internal_error(e);
    }
    Json(ctx.manager.graph_doc()).into_response()
}

async fn get_events(State(ctx): State<AppContext>) -> Response {
    match ctx.events.today_records() {
        Ok(records) => Json(records).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn refresh(State(ctx): State<AppContext>) -> Response {
    match ctx.manager.refresh(ctx.client.as_ref()).await {
        Ok(()) => Json(json!({"status": "success"})).into_response(),
        Err(e) => internal_error(e),
    }
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/nodes", get(get_nodes))
        .route("/edges", get(get_edges))
        .route("/graph", get(get_graph))
        .route("/events", get(get_events))
        .route("/refresh", get(refresh))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bind and serve until the process is stopped.
pub async fn run(ctx: AppContext, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "topomap server listening");
    axum::serve(listener, router(ctx)).await
}
