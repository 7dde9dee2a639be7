use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigGuardRailError {
    #[error("worker pool must contain at least one worker")]
    EmptyPool,
    #[error("base port must be non-zero")]
    ZeroPort,
    #[error(
        "base port {port} leaves no room for {workers} worker ports (highest would be {highest})"
    )]
    PortRangeExhausted {
        port: u16,
        workers: usize,
        highest: usize,
    },
    #[error("restart backoff multiplier must be a finite value >= 1.0, got {0}")]
    InvalidBackoffMultiplier(f64),
    #[error("restart failure threshold must be at least 1")]
    ZeroFailureThreshold,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.pool.workers == 0 {
        return Err(ConfigGuardRailError::EmptyPool);
    }

    if config.server.port == 0 {
        return Err(ConfigGuardRailError::ZeroPort);
    }

    let highest = config.server.port as usize + config.pool.workers;
    if highest > u16::MAX as usize {
        return Err(ConfigGuardRailError::PortRangeExhausted {
            port: config.server.port,
            workers: config.pool.workers,
            highest,
        });
    }

    let restart = &config.pool.restart;
    if !restart.multiplier.is_finite() || restart.multiplier < 1.0 {
        return Err(ConfigGuardRailError::InvalidBackoffMultiplier(
            restart.multiplier,
        ));
    }

    if restart.failure_threshold == 0 {
        return Err(ConfigGuardRailError::ZeroFailureThreshold);
    }

    if restart.initial_backoff > restart.max_backoff {
        warnings.push_with_hint(
            format!(
                "restart initial backoff {:?} exceeds max backoff {:?}; every respawn will wait the max",
                restart.initial_backoff, restart.max_backoff
            ),
            "Lower RESTART_INITIAL_BACKOFF or raise RESTART_MAX_BACKOFF",
        );
    }

    let cores = config.metadata.host_cores;
    if cores > 0 && config.pool.workers > cores {
        warnings.push_with_hint(
            format!(
                "{} workers configured on a host with {} cores",
                config.pool.workers, cores
            ),
            "Workers beyond the core count compete for CPU with the primary",
        );
    }

    if config.proxy.connect_timeout.is_zero()
        || config.proxy.response_timeout.is_zero()
    {
        warnings.push(
            "a zero proxy timeout fails every proxied request immediately",
        );
    }

    Ok(warnings)
}
