use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::SelectionPolicy;
use crate::util::{parse_bool_var, parse_var, string_var};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub pool: FilePoolConfig,
    #[serde(default)]
    pub proxy: FileProxyConfig,
    #[serde(default)]
    pub store: FileStoreConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePoolConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default)]
    pub restart: FileRestartConfig,
}

/// Durations are human readable strings (`"250ms"`, `"10s"`).
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRestartConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_backoff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileProxyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SelectionPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_users: Option<bool>,
}

/// Values read from the process environment.
///
/// Numeric and boolean values that fail to parse are dropped, so a garbage
/// `PORT` behaves like an unset one. Strategy and duration values are kept
/// raw and validated during composition.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub strategy: Option<String>,
    pub connect_timeout: Option<String>,
    pub response_timeout: Option<String>,
    pub restart_initial_backoff: Option<String>,
    pub restart_max_backoff: Option<String>,
    pub restart_multiplier: Option<f64>,
    pub restart_failure_threshold: Option<u32>,
    pub restart_stable_after: Option<String>,
    pub restart_cooldown: Option<String>,
    pub seed_users: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: string_var("FORKPOOL_CONFIG").map(PathBuf::from),
            host: string_var("HOST"),
            port: parse_var("PORT"),
            workers: parse_var("POOL_WORKERS"),
            strategy: string_var("SELECTION_STRATEGY"),
            connect_timeout: string_var("PROXY_CONNECT_TIMEOUT"),
            response_timeout: string_var("PROXY_RESPONSE_TIMEOUT"),
            restart_initial_backoff: string_var("RESTART_INITIAL_BACKOFF"),
            restart_max_backoff: string_var("RESTART_MAX_BACKOFF"),
            restart_multiplier: parse_var("RESTART_MULTIPLIER"),
            restart_failure_threshold: parse_var("RESTART_FAILURE_THRESHOLD"),
            restart_stable_after: string_var("RESTART_STABLE_AFTER"),
            restart_cooldown: string_var("RESTART_COOLDOWN"),
            seed_users: parse_bool_var("SEED_USERS"),
        }
    }
}
