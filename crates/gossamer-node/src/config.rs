//! Runtime configuration.

use std::time::Duration;

/// Configuration for a node runtime.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// How long `sync_rpc` waits for a reply (in milliseconds).
    pub rpc_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 5000,
        }
    }
}

impl NodeConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn rpc_timeout(mut self, ms: u64) -> Self {
        self.config.rpc_timeout_ms = ms;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_builder() {
        let config = NodeConfigBuilder::new().rpc_timeout(250).build();
        assert_eq!(config.rpc_timeout(), Duration::from_millis(250));
        assert_eq!(NodeConfig::default().rpc_timeout(), Duration::from_secs(5));
    }
}
