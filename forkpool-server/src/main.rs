//! # forkpool
//!
//! One binary, three roles:
//!
//! - **primary** (default): supervises one worker per spare core and proxies
//!   `/api` traffic to them
//! - **worker**: started by the primary with `WORKER_PORT`/`WORKER_INDEX`
//!   set; serves the user API on that port
//! - **standalone** (`--standalone`): serves the user API directly on the
//!   base port, no pool

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use forkpool_config::{
    Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions, WorkerCountSource,
};
use forkpool_server::{
    infra::shutdown::shutdown_signal,
    pool::ProcessLauncher,
    primary::Primary,
    worker::{self, WorkerIdentity},
};
use tokio::net::TcpListener;
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug, Clone)]
#[command(name = "forkpool")]
#[command(
    about = "Supervise a pool of CRUD worker processes and route HTTP requests across them"
)]
struct Cli {
    /// Base port; the primary listens here, workers on the ports above it.
    /// Overrides `PORT`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of worker processes (default: CPU cores - 1, minimum 1).
    /// Overrides `POOL_WORKERS`.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Path to a forkpool.toml configuration file
    #[arg(short, long, env = "FORKPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file (default: ./.env when present)
    #[arg(long, env = "FORKPOOL_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Serve the user API in this process instead of running a pool
    #[arg(long, default_value_t = false)]
    standalone: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing();

    let identity = WorkerIdentity::from_env()
        .context("invalid worker environment")?;

    let ConfigLoad { config, warnings } = load_config(&cli)?;

    match identity {
        Some(identity) => run_worker_process(identity, &config),
        None => {
            for warning in &warnings.items {
                match &warning.hint {
                    Some(hint) => warn!(hint = %hint, "{}", warning.message),
                    None => warn!("{}", warning.message),
                }
            }
            log_config(&config);

            if cli.standalone {
                run_standalone(&config)
            } else {
                run_primary_process(&config)
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ConfigLoad> {
    let options = ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        port: cli.port,
        workers: cli.workers,
        ..ConfigLoaderOptions::default()
    };

    ConfigLoader::with_options(options)
        .load()
        .context("failed to load configuration")
}

fn log_config(config: &Config) {
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }

    let source = match config.metadata.workers_source {
        WorkerCountSource::CoreCount => "core count",
        WorkerCountSource::File => "config file",
        WorkerCountSource::Env => "environment",
        WorkerCountSource::Override => "command line",
    };
    info!(
        workers = config.pool.workers,
        cores = config.metadata.host_cores,
        source,
        strategy = %config.proxy.strategy,
        "pool configuration"
    );
}

fn run_primary_process(config: &Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        let launcher = ProcessLauncher::current_exe()
            .context("failed to resolve current executable")?;
        let primary = Primary::bind(config, Arc::new(launcher)).await?;
        primary.run(shutdown_signal()).await
    })
}

/// Workers run a single-threaded runtime; parallelism comes from the pool.
fn run_worker_process(
    identity: WorkerIdentity,
    config: &Config,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let span = info_span!("worker", index = identity.index, port = identity.port);
    runtime.block_on(
        worker::run_worker(identity, config.store.seed_users, shutdown_signal())
            .instrument(span),
    )
}

fn run_standalone(config: &Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local: SocketAddr = listener.local_addr()?;
        info!(addr = %local, "standalone server listening");

        worker::serve_api(
            listener,
            worker::build_store(config.store.seed_users),
            shutdown_signal(),
        )
        .await
        .context("standalone server error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<OsString>,
    }

    impl EnvVarGuard {
        fn unset(key: &'static str) -> Self {
            let previous = std::env::var_os(key);
            // SAFETY: tests run in isolation and restore previous environment state on drop.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, previous }
        }

        fn set(key: &'static str, value: impl AsRef<std::ffi::OsStr>) -> Self {
            let previous = std::env::var_os(key);
            // SAFETY: tests run in isolation and restore previous environment state on drop.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: we reinstate the environment variable to its prior state.
            unsafe {
                match &self.previous {
                    Some(prev) => std::env::set_var(self.key, prev),
                    None => std::env::remove_var(self.key),
                }
            }
        }
    }

    #[test]
    fn cli_flags_parse() {
        let _lock = ENV_LOCK.lock();
        let _port = EnvVarGuard::unset("PORT");
        let _workers = EnvVarGuard::unset("POOL_WORKERS");
        let _config = EnvVarGuard::unset("FORKPOOL_CONFIG");
        let _env_file = EnvVarGuard::unset("FORKPOOL_ENV_FILE");

        let cli = Cli::try_parse_from([
            "forkpool",
            "--port",
            "5000",
            "--workers",
            "2",
            "--standalone",
        ])
        .unwrap();

        assert_eq!(cli.port, Some(5000));
        assert_eq!(cli.workers, Some(2));
        assert!(cli.standalone);
        assert!(cli.config.is_none());
    }

    #[test]
    fn environment_is_left_to_the_loader() {
        let _lock = ENV_LOCK.lock();
        let _port = EnvVarGuard::set("PORT", "abc");
        let _workers = EnvVarGuard::set("POOL_WORKERS", "3");
        let _config = EnvVarGuard::unset("FORKPOOL_CONFIG");
        let _env_file = EnvVarGuard::unset("FORKPOOL_ENV_FILE");

        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            OsString::from("forkpool"),
            OsString::from("--env-file"),
            dir.path().join("absent.env").into_os_string(),
        ])
        .unwrap();
        assert_eq!(cli.port, None);
        assert_eq!(cli.workers, None);
        assert!(!cli.standalone);

        let load = load_config(&cli).unwrap();
        assert_eq!(load.config.server.port, 4000);
        assert_eq!(load.config.pool.workers, 3);
        assert_eq!(load.config.metadata.workers_source, WorkerCountSource::Env);
    }

    #[test]
    fn cli_values_override_config_file() {
        let _lock = ENV_LOCK.lock();
        let _port = EnvVarGuard::unset("PORT");
        let _workers = EnvVarGuard::unset("POOL_WORKERS");
        let _config = EnvVarGuard::unset("FORKPOOL_CONFIG");
        let _env_file = EnvVarGuard::unset("FORKPOOL_ENV_FILE");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forkpool.toml");
        std::fs::write(&path, "[server]\nport = 5100\n[pool]\nworkers = 4\n")
            .unwrap();

        let cli = Cli::try_parse_from([
            OsString::from("forkpool"),
            OsString::from("--config"),
            path.clone().into_os_string(),
            OsString::from("--workers"),
            OsString::from("1"),
            OsString::from("--env-file"),
            dir.path().join("missing.env").into_os_string(),
        ])
        .unwrap();

        let load = load_config(&cli).unwrap();
        assert_eq!(load.config.server.port, 5100);
        assert_eq!(load.config.pool.workers, 1);
        assert_eq!(
            load.config.metadata.workers_source,
            WorkerCountSource::Override
        );
        assert_eq!(load.config.metadata.config_path, Some(path));
    }
}
