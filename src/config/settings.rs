use super::BrokerConfig;
use crate::Result;
use config::{Config, Environment};

impl BrokerConfig {
    /// Load the config from `VELOXMQ_*` environment variables, falling
    /// back to the defaults for anything unset (durations in ms, e.g.
    /// `VELOXMQ_HEARTBEAT_INTERVAL_MS=5000`).
    pub fn from_env() -> Result<Self> {
        let defaults = Config::try_from(&BrokerConfig::default())
            .map_err(|e| crate::VeloxmqError::Config(e.to_string()))?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(Environment::with_prefix("VELOXMQ"))
            .build()
            .map_err(|e| crate::VeloxmqError::Config(e.to_string()))?;

        let config = settings
            .try_deserialize::<BrokerConfig>()
            .map_err(|e| crate::VeloxmqError::Config(e.to_string()))?;

        config.validate().map_err(crate::VeloxmqError::Config)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_falls_back_to_defaults() {
        let config = BrokerConfig::from_env().unwrap();
        let defaults = BrokerConfig::default();
        assert_eq!(config.concurrency, defaults.concurrency);
        assert_eq!(config.heartbeat_interval_ms, defaults.heartbeat_interval_ms);
        assert_eq!(config.connect_timeout_ms, defaults.connect_timeout_ms);
    }
}
