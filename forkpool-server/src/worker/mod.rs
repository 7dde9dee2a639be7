//! Worker process: serves the user API on its assigned port.

use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    routes::create_api_router,
    users::{InMemoryUserStore, SharedUserStore},
};

pub const WORKER_PORT_ENV: &str = "WORKER_PORT";
pub const WORKER_INDEX_ENV: &str = "WORKER_INDEX";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerEnvError {
    #[error("WORKER_PORT must be a port number, got '{0}'")]
    InvalidPort(String),
    #[error("WORKER_INDEX must be a non-negative integer, got '{0}'")]
    InvalidIndex(String),
}

/// Identity handed to a worker process by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub index: usize,
    pub port: u16,
}

impl WorkerIdentity {
    /// `Ok(None)` when the process was not started as a worker.
    pub fn from_env() -> Result<Option<Self>, WorkerEnvError> {
        let Some(raw_port) = std::env::var_os(WORKER_PORT_ENV) else {
            return Ok(None);
        };
        let raw_port = raw_port.to_string_lossy();
        let raw_index = std::env::var(WORKER_INDEX_ENV).ok();
        Self::parse(&raw_port, raw_index.as_deref()).map(Some)
    }

    pub fn parse(
        raw_port: &str,
        raw_index: Option<&str>,
    ) -> Result<Self, WorkerEnvError> {
        let port = raw_port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| WorkerEnvError::InvalidPort(raw_port.to_string()))?;

        let index = match raw_index {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| WorkerEnvError::InvalidIndex(raw.to_string()))?,
            None => 0,
        };

        Ok(Self { index, port })
    }

    /// Workers only accept connections from the local primary.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

pub fn build_store(seed_users: bool) -> SharedUserStore {
    if seed_users {
        Arc::new(InMemoryUserStore::seeded())
    } else {
        Arc::new(InMemoryUserStore::new())
    }
}

/// Serves the user API on an already bound listener until `shutdown`
/// resolves.
pub async fn serve_api<F>(
    listener: TcpListener,
    store: SharedUserStore,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_api_router(store);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn run_worker<F>(
    identity: WorkerIdentity,
    seed_users: bool,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = identity.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("worker failed to bind {addr}"))?;

    info!(
        worker.index = identity.index,
        worker.port = identity.port,
        pid = std::process::id(),
        "worker listening on {addr}"
    );

    serve_api(listener, build_store(seed_users), shutdown)
        .await
        .context("worker server error")?;

    info!(worker.index = identity.index, "worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_and_index() {
        let identity = WorkerIdentity::parse("4002", Some("1")).unwrap();
        assert_eq!(identity, WorkerIdentity { index: 1, port: 4002 });
        assert_eq!(identity.bind_addr().to_string(), "127.0.0.1:4002");
    }

    #[test]
    fn missing_index_defaults_to_zero() {
        let identity = WorkerIdentity::parse("4001", None).unwrap();
        assert_eq!(identity.index, 0);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            WorkerIdentity::parse("abc", None),
            Err(WorkerEnvError::InvalidPort("abc".into()))
        );
        assert_eq!(
            WorkerIdentity::parse("0", None),
            Err(WorkerEnvError::InvalidPort("0".into()))
        );
        assert_eq!(
            WorkerIdentity::parse("4001", Some("-1")),
            Err(WorkerEnvError::InvalidIndex("-1".into()))
        );
    }
}
