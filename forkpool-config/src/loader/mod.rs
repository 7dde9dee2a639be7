pub mod error;

use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use self::error::ConfigLoadError;
use super::{
    models::{
        Config, ConfigMetadata, DEFAULT_HOST, DEFAULT_PORT, PoolConfig,
        ProxyConfig, RestartConfig, SelectionPolicy, ServerConfig,
        StoreConfig, WorkerCountSource, default_pool_size, host_core_count,
        sources::{EnvConfig, FileConfig},
    },
    util::parse_duration,
    validation::{self, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("forkpool.toml"),
        PathBuf::from("config/forkpool.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Do not read any `.env` file.
    pub skip_env_file: bool,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    /// Pretend the host has this many cores (tests).
    pub host_cores: Option<usize>,
}

/// Builds a [`Config`] from, in increasing precedence: built-in defaults, a
/// TOML file, the process environment (optionally seeded from `.env`) and
/// explicit overrides such as CLI flags.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.options.skip_env_file = true;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.options.port = port;
        self
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.options.workers = workers;
        self
    }

    pub fn with_host_cores(mut self, cores: usize) -> Self {
        self.options.host_cores = Some(cores);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        let env_config = EnvConfig::gather();
        let mut load = self.load_with_env(env_config)?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`ConfigLoader::load`] but with an explicit environment
    /// snapshot instead of the process environment.
    pub fn load_with_env(
        &self,
        env_config: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let (config, warnings) =
            self.compose_config(file_config, env_config, config_path)?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if self.options.skip_env_file {
            return Ok(false);
        }

        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };
        Ok(loaded)
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        }

        if source.is_empty() {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            return Ok((None, None));
        }

        let file_config = read_file_config(&path)?;
        tracing::debug!(path = %path.display(), ?provenance, "loaded config file");
        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        let FileConfig {
            server: file_server,
            pool: file_pool,
            proxy: file_proxy,
            store: file_store,
        } = file_config.unwrap_or_default();

        let server = ServerConfig {
            host: env
                .host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self
                .options
                .port
                .or(env.port)
                .or(file_server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        let host_cores = self.options.host_cores.unwrap_or_else(host_core_count);
        let (workers, workers_source) =
            match (self.options.workers, env.workers, file_pool.workers) {
                (Some(n), _, _) => (n, WorkerCountSource::Override),
                (None, Some(n), _) => (n, WorkerCountSource::Env),
                (None, None, Some(n)) => (n, WorkerCountSource::File),
                (None, None, None) => {
                    (default_pool_size(host_cores), WorkerCountSource::CoreCount)
                }
            };

        let defaults = RestartConfig::default();
        let file_restart = file_pool.restart;
        let restart = RestartConfig {
            initial_backoff: resolve_duration(
                "RESTART_INITIAL_BACKOFF",
                env.restart_initial_backoff.as_deref(),
                "pool.restart.initial_backoff",
                file_restart.initial_backoff.as_deref(),
                defaults.initial_backoff,
            )?,
            max_backoff: resolve_duration(
                "RESTART_MAX_BACKOFF",
                env.restart_max_backoff.as_deref(),
                "pool.restart.max_backoff",
                file_restart.max_backoff.as_deref(),
                defaults.max_backoff,
            )?,
            multiplier: env
                .restart_multiplier
                .or(file_restart.multiplier)
                .unwrap_or(defaults.multiplier),
            failure_threshold: env
                .restart_failure_threshold
                .or(file_restart.failure_threshold)
                .unwrap_or(defaults.failure_threshold),
            stable_after: resolve_duration(
                "RESTART_STABLE_AFTER",
                env.restart_stable_after.as_deref(),
                "pool.restart.stable_after",
                file_restart.stable_after.as_deref(),
                defaults.stable_after,
            )?,
            cooldown: resolve_duration(
                "RESTART_COOLDOWN",
                env.restart_cooldown.as_deref(),
                "pool.restart.cooldown",
                file_restart.cooldown.as_deref(),
                defaults.cooldown,
            )?,
        };

        let strategy = match env.strategy.as_deref() {
            Some(raw) => raw.parse::<SelectionPolicy>().map_err(|reason| {
                ConfigLoadError::InvalidValue {
                    key: "SELECTION_STRATEGY",
                    value: raw.to_string(),
                    reason,
                }
            })?,
            None => file_proxy.strategy.unwrap_or_default(),
        };

        let proxy_defaults = ProxyConfig::default();
        let proxy = ProxyConfig {
            strategy,
            connect_timeout: resolve_duration(
                "PROXY_CONNECT_TIMEOUT",
                env.connect_timeout.as_deref(),
                "proxy.connect_timeout",
                file_proxy.connect_timeout.as_deref(),
                proxy_defaults.connect_timeout,
            )?,
            response_timeout: resolve_duration(
                "PROXY_RESPONSE_TIMEOUT",
                env.response_timeout.as_deref(),
                "proxy.response_timeout",
                file_proxy.response_timeout.as_deref(),
                proxy_defaults.response_timeout,
            )?,
        };

        if strategy == SelectionPolicy::Random {
            warnings.push_with_hint(
                "random selection may route requests to a worker that is restarting",
                "Use SELECTION_STRATEGY=health_aware to skip workers that are down",
            );
        }

        let store = StoreConfig {
            seed_users: env
                .seed_users
                .or(file_store.seed_users)
                .unwrap_or(false),
        };

        let config = Config {
            server,
            pool: PoolConfig { workers, restart },
            proxy,
            store,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
                host_cores,
                workers_source,
            },
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok((config, warnings))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn resolve_duration(
    env_key: &'static str,
    env_value: Option<&str>,
    file_key: &'static str,
    file_value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    let (key, raw) = match (env_value, file_value) {
        (Some(raw), _) => (env_key, raw),
        (None, Some(raw)) => (file_key, raw),
        (None, None) => return Ok(default),
    };

    parse_duration(raw).map_err(|reason| ConfigLoadError::InvalidValue {
        key,
        value: raw.to_string(),
        reason,
    })
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.env.is_none() && self.default.is_none()
    }

    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
