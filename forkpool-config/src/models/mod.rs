pub mod sources;

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub proxy: ProxyConfig,
    pub store: StoreConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    /// Base port. The primary listens here, workers on `port + 1 + index`.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub workers: usize,
    pub restart: RestartConfig,
}

/// Pool size derived from the host core count: one core stays with the
/// primary, but there is always at least one worker.
pub fn default_pool_size(cores: usize) -> usize {
    cores.saturating_sub(1).max(1)
}

pub fn host_core_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Per-slot respawn policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartConfig {
    /// Delay before the first respawn after a quick crash
    pub initial_backoff: Duration,
    /// Upper bound for the exponential backoff
    pub max_backoff: Duration,
    /// Exponential backoff multiplier
    pub multiplier: f64,
    /// Consecutive quick crashes before the slot's restart circuit opens
    pub failure_threshold: u32,
    /// A worker that stays up this long is considered healthy again
    pub stable_after: Duration,
    /// How long an open circuit waits before the next attempt
    pub cooldown: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            failure_threshold: 5,
            stable_after: Duration::from_secs(10),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub strategy: SelectionPolicy,
    pub connect_timeout: Duration,
    /// Time allowed until the worker's response head arrives. The body is
    /// streamed without a deadline.
    pub response_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionPolicy::default(),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub seed_users: bool,
}

/// How the router picks a worker for each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Uniform choice over every recorded port, alive or not.
    Random,
    RoundRobin,
    /// Uniform choice over workers currently marked alive.
    #[default]
    HealthAware,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::Random => "random",
            SelectionPolicy::RoundRobin => "round_robin",
            SelectionPolicy::HealthAware => "health_aware",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random" => Ok(SelectionPolicy::Random),
            "round_robin" | "roundrobin" => Ok(SelectionPolicy::RoundRobin),
            "health_aware" | "healthy" => Ok(SelectionPolicy::HealthAware),
            other => Err(format!(
                "unknown selection strategy '{other}' (expected random, round_robin or health_aware)"
            )),
        }
    }
}

/// Where the worker count came from; used for startup logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerCountSource {
    #[default]
    CoreCount,
    File,
    Env,
    Override,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
    pub host_cores: usize,
    pub workers_source: WorkerCountSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_leaves_one_core_for_the_primary() {
        assert_eq!(default_pool_size(0), 1);
        assert_eq!(default_pool_size(1), 1);
        assert_eq!(default_pool_size(2), 1);
        assert_eq!(default_pool_size(8), 7);
    }

    #[test]
    fn selection_policy_parses_aliases() {
        assert_eq!("random".parse::<SelectionPolicy>(), Ok(SelectionPolicy::Random));
        assert_eq!("Round-Robin".parse::<SelectionPolicy>(), Ok(SelectionPolicy::RoundRobin));
        assert_eq!("health_aware".parse::<SelectionPolicy>(), Ok(SelectionPolicy::HealthAware));
        assert!("fastest".parse::<SelectionPolicy>().is_err());
    }
}
