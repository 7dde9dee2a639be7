use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::{
    forward::{Forwarder, ProxyError},
    selection::SelectionStrategy,
};
use crate::{
    infra::errors::{AppError, method_not_allowed},
    pool::{PoolSnapshot, PortTable},
};

pub const HEALTH: &str = "/health";
pub const API_PREFIX: &str = "/api";

/// Everything the primary's listener needs to route a request.
#[derive(Debug, Clone)]
pub struct ProxyState {
    table: Arc<PortTable>,
    strategy: Arc<dyn SelectionStrategy>,
    forwarder: Forwarder,
}

impl ProxyState {
    pub fn new(
        table: Arc<PortTable>,
        strategy: Arc<dyn SelectionStrategy>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            table,
            strategy,
            forwarder,
        }
    }

    pub fn table(&self) -> &Arc<PortTable> {
        &self.table
    }

    /// Picks a worker and forwards the request to it once.
    pub async fn proxy(&self, request: Request) -> Result<Response, ProxyError> {
        let index = self
            .strategy
            .select(&self.table)
            .ok_or(ProxyError::NoWorkerAvailable)?;
        let port = self
            .table
            .port(index)
            .ok_or(ProxyError::NoWorkerAvailable)?;

        debug!(
            worker.index = index,
            worker.port = port,
            method = %request.method(),
            uri = %request.uri(),
            "forwarding request"
        );
        self.forwarder.forward(port, request).await
    }
}

/// `true` for `/api` and anything below `/api/`.
pub fn is_proxied_path(path: &str) -> bool {
    match path.strip_prefix(API_PREFIX) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub fn create_proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route(HEALTH, get(health_handler).fallback(method_not_allowed))
        .fallback(dispatch_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch_handler(
    State(state): State<ProxyState>,
    request: Request,
) -> Response {
    if !is_proxied_path(request.uri().path()) {
        return AppError::route_not_found().into_response();
    }

    match state.proxy(request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub strategy: &'static str,
    pub pool: PoolSnapshot,
}

async fn health_handler(
    State(state): State<ProxyState>,
) -> (StatusCode, Json<HealthReport>) {
    let pool = state.table.snapshot();
    let (code, status) = match pool.alive {
        0 => (StatusCode::SERVICE_UNAVAILABLE, "down"),
        alive if alive < pool.size => (StatusCode::OK, "degraded"),
        _ => (StatusCode::OK, "ok"),
    };

    (
        code,
        Json(HealthReport {
            status,
            strategy: state.strategy.name(),
            pool,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxied_paths() {
        assert!(is_proxied_path("/api"));
        assert!(is_proxied_path("/api/"));
        assert!(is_proxied_path("/api/users"));
        assert!(is_proxied_path("/api/users/123"));
        assert!(!is_proxied_path("/apiary"));
        assert!(!is_proxied_path("/"));
        assert!(!is_proxied_path("/health"));
        assert!(!is_proxied_path("/v1/api/users"));
    }
}
