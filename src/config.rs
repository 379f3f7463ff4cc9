use std::time::Duration;

use crate::collector::DEFAULT_COLLECT_TIMEOUT;
use crate::error::{BenchError, BenchResult};
use crate::scenario::Scenario;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 14869;
pub const DEFAULT_KEYS: usize = 10_000;
pub const DEFAULT_CLIENTS: usize = 10;
pub const DEFAULT_TTL_SECS: u64 = 5;
pub const DEFAULT_SETTLE_MS: u64 = 200;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(DEFAULT_SETTLE_MS);

/// One benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    // Cache host name or address.
    pub host: String,
    // Service port, shared by TCP and UDP.
    pub port: u16,
    // Total keys written (N).
    pub keys: usize,
    // Writer/subscriber connections (S).
    pub clients: usize,
    pub scenario: Scenario,
    // Expiry attached to TTL writes.
    pub ttl_secs: u64,
    // Wait after subscribing, before any write.
    pub settle_delay: Duration,
    // Ceiling for a single response collection.
    pub collect_timeout: Duration,
    // Replaces the full-feed byte length as the default collection threshold.
    pub expect_bytes: Option<usize>,
}

impl BenchConfig {
    pub fn new(scenario: Scenario) -> Self {
        BenchConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            keys: DEFAULT_KEYS,
            clients: DEFAULT_CLIENTS,
            scenario,
            ttl_secs: DEFAULT_TTL_SECS,
            settle_delay: DEFAULT_SETTLE_DELAY,
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
            expect_bytes: None,
        }
    }

    /// Rounds the key count down to a multiple of the client count so every
    /// writer gets an equal contiguous slice.
    pub fn normalized(mut self) -> BenchResult<Self> {
        if self.clients == 0 {
            return Err(BenchError::InvalidConfig("client count must be at least 1".into()));
        }
        self.keys = self.keys / self.clients * self.clients;
        if self.keys == 0 {
            return Err(BenchError::InvalidConfig(format!(
                "key count must be at least the client count ({})",
                self.clients
            )));
        }
        if self.ttl_secs == 0 {
            return Err(BenchError::InvalidConfig("ttl must be at least 1 second".into()));
        }
        Ok(self)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
