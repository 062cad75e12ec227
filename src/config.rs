//! Configuration for aerowire
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

/// Main configuration for a client instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Cluster Configuration
    // -------------------------------------------------------------------------
    /// Seed hosts ("host:port") for the static cluster directory
    pub hosts: Vec<String>,

    /// Idle connections kept per node; extras are closed on release
    pub max_idle_per_node: usize,

    /// Consecutive failures after which a node stops receiving requests
    pub dun_threshold: u32,

    // -------------------------------------------------------------------------
    // Request Configuration
    // -------------------------------------------------------------------------
    /// Largest response body accepted from a server (bytes)
    pub max_response_size: usize,

    /// Timeouts above this are legal but logged (milliseconds)
    pub long_timeout_warn_ms: u64,

    /// Event dispatches slower than this are logged (milliseconds)
    pub slow_event_warn_ms: u64,

    // -------------------------------------------------------------------------
    // Event Loop Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on a single reactor wait (milliseconds)
    pub poll_interval_ms: u64,

    /// How often the driver revives nodes and retries queued requests (milliseconds)
    pub tend_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:3000".to_string()],
            max_idle_per_node: 64,
            dun_threshold: 3,
            max_response_size: 128 * 1024 * 1024, // 128 MB
            long_timeout_warn_ms: 60_000,
            slow_event_warn_ms: 20,
            poll_interval_ms: 100,
            tend_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tend_interval(&self) -> Duration {
        Duration::from_millis(self.tend_interval_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Replace the seed host list
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of idle connections kept per node
    pub fn max_idle_per_node(mut self, count: usize) -> Self {
        self.config.max_idle_per_node = count;
        self
    }

    /// Set the failure count that takes a node out of rotation
    pub fn dun_threshold(mut self, count: u32) -> Self {
        self.config.dun_threshold = count;
        self
    }

    /// Set the largest accepted response body (in bytes)
    pub fn max_response_size(mut self, size: usize) -> Self {
        self.config.max_response_size = size;
        self
    }

    /// Set the slow dispatch warning threshold (in milliseconds)
    pub fn slow_event_warn_ms(mut self, ms: u64) -> Self {
        self.config.slow_event_warn_ms = ms;
        self
    }

    /// Set the long timeout warning threshold (in milliseconds)
    pub fn long_timeout_warn_ms(mut self, ms: u64) -> Self {
        self.config.long_timeout_warn_ms = ms;
        self
    }

    /// Set the reactor wait bound (in milliseconds)
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the tend interval (in milliseconds)
    pub fn tend_interval_ms(mut self, ms: u64) -> Self {
        self.config.tend_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
