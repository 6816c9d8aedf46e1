//! Configuration shared by the services.

use std::time::Duration;

/// Configuration for the services running on a node.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// How often replicated servers push their state (in milliseconds).
    pub replicate_interval_ms: u64,
    /// Name of the linearizable key-value service.
    pub kv_service: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            replicate_interval_ms: 5000,
            kv_service: "lin-kv".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn replicate_interval(&self) -> Duration {
        Duration::from_millis(self.replicate_interval_ms)
    }
}

/// Builder for service configuration.
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
        }
    }

    pub fn replicate_interval(mut self, ms: u64) -> Self {
        self.config.replicate_interval_ms = ms;
        self
    }

    pub fn kv_service(mut self, name: impl Into<String>) -> Self {
        self.config.kv_service = name.into();
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

impl Default for ServiceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_builder() {
        let config = ServiceConfigBuilder::new()
            .replicate_interval(100)
            .kv_service("kv")
            .build();

        assert_eq!(config.replicate_interval(), Duration::from_millis(100));
        assert_eq!(config.kv_service, "kv");

        let defaults = ServiceConfig::default();
        assert_eq!(defaults.replicate_interval(), Duration::from_secs(5));
        assert_eq!(defaults.kv_service, "lin-kv");
    }
}
