//! Configuration library for forkpool.
//!
//! Centralizes `.env` handling, `forkpool.toml` parsing, environment
//! overrides and guard rails so the primary process and every worker resolve
//! the same settings.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError,
};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    Config, ConfigMetadata, PoolConfig, ProxyConfig, RestartConfig,
    SelectionPolicy, ServerConfig, StoreConfig, WorkerCountSource,
    default_pool_size, host_core_count,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
