//! Primary process: owns the worker pool and the public listener.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Context;
use forkpool_config::Config;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    infra::shutdown::ShutdownHandle,
    pool::{RestartPolicy, Supervisor, WorkerLauncher},
    proxy::{Forwarder, ProxyState, create_proxy_router, strategy_for},
};

/// A bound primary listener with its (not yet started) supervisor.
#[derive(Debug)]
pub struct Primary {
    listener: TcpListener,
    supervisor: Supervisor,
    state: ProxyState,
}

impl Primary {
    /// Binds the public listener and prepares the pool. Nothing is spawned
    /// until [`Primary::run`].
    pub async fn bind(
        config: &Config,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> anyhow::Result<Self> {
        let supervisor = Supervisor::for_base_port(
            config.server.port,
            config.pool.workers,
            launcher,
            RestartPolicy::from_config(&config.pool.restart),
        )?;

        let forwarder = Forwarder::new(
            config.proxy.connect_timeout,
            config.proxy.response_timeout,
        )
        .context("failed to build proxy client")?;

        let state = ProxyState::new(
            Arc::clone(supervisor.table()),
            strategy_for(config.proxy.strategy),
            forwarder,
        );

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind primary listener on {addr}"))?;

        Ok(Self {
            listener,
            supervisor,
            state,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Starts the workers and serves until `signal` resolves, then stops
    /// accepting, drains in-flight requests and kills the workers.
    pub async fn run<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            supervisor,
            state,
        } = self;

        let shutdown = ShutdownHandle::new();
        let pool = supervisor.start(shutdown.clone());

        let addr = listener.local_addr().context("listener has no address")?;
        info!(
            %addr,
            workers = pool.table().len(),
            pid = std::process::id(),
            "primary listening"
        );

        let stop = shutdown.clone();
        let served = axum::serve(listener, create_proxy_router(state))
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signal => {}
                    _ = stop.wait() => {}
                }
                info!("shutting down primary");
            })
            .await;

        pool.shutdown().await;
        served.context("primary server error")
    }
}
