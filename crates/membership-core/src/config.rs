use std::time::Duration;

/// Wait between join attempts for a server that is not yet a consensus peer.
pub const DEFAULT_JOIN_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Name of this node in the LAN pool
    pub node_name: String,
    /// Datacenter this node serves
    pub datacenter: String,
    /// Fixed backoff between join attempts
    pub join_retry_interval: Duration,
}

impl ReconcilerConfig {
    /// Create a configuration with the default retry interval.
    ///
    /// Node name and datacenter must be non-empty.
    pub fn new(
        node_name: impl Into<String>,
        datacenter: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let node_name = node_name.into();
        let datacenter = datacenter.into();

        if node_name.trim().is_empty() {
            return Err(ConfigError::EmptyNodeName);
        }
        if datacenter.trim().is_empty() {
            return Err(ConfigError::EmptyDatacenter);
        }

        Ok(Self {
            node_name,
            datacenter,
            join_retry_interval: DEFAULT_JOIN_RETRY_INTERVAL,
        })
    }

    /// Override the join retry interval. Zero is rejected.
    pub fn with_join_retry_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroRetryInterval);
        }
        self.join_retry_interval = interval;
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Node name must not be empty")]
    EmptyNodeName,
    #[error("Datacenter must not be empty")]
    EmptyDatacenter,
    #[error("Join retry interval must be greater than zero")]
    ZeroRetryInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::new("node-1", "dc1").unwrap();
        assert_eq!(config.node_name, "node-1");
        assert_eq!(config.datacenter, "dc1");
        assert_eq!(config.join_retry_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_empty_fields() {
        assert_eq!(
            ReconcilerConfig::new("", "dc1").unwrap_err(),
            ConfigError::EmptyNodeName
        );
        assert_eq!(
            ReconcilerConfig::new("node-1", "  ").unwrap_err(),
            ConfigError::EmptyDatacenter
        );
    }

    #[test]
    fn test_retry_interval_override() {
        let config = ReconcilerConfig::new("node-1", "dc1")
            .unwrap()
            .with_join_retry_interval(Duration::from_millis(50))
            .unwrap();
        assert_eq!(config.join_retry_interval, Duration::from_millis(50));

        let err = ReconcilerConfig::new("node-1", "dc1")
            .unwrap()
            .with_join_retry_interval(Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroRetryInterval);
    }
}
