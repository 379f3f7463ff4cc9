use std::fmt;
use std::time::Duration;

use tracing::info;

use crate::codec::KeyPrefix;
use crate::config::BenchConfig;
use crate::error::BenchResult;
use crate::scenario::{Bench, Scenario};

/// Outcome of one verified run.
#[derive(Debug, Clone)]
pub struct Report {
    pub scenario: Scenario,
    pub keys: usize,
    pub clients: usize,
    pub elapsed: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} keys, {} subscribers: {:.4} sec",
            self.scenario,
            self.keys,
            self.clients,
            self.elapsed.as_secs_f64()
        )
    }
}

pub async fn run(config: BenchConfig) -> BenchResult<Report> {
    run_with_prefix(config, KeyPrefix::random()).await
}

/// Runs with a caller-chosen key prefix instead of a random one.
pub async fn run_with_prefix(config: BenchConfig, prefix: KeyPrefix) -> BenchResult<Report> {
    let config = config.normalized()?;
    let (scenario, keys, clients) = (config.scenario, config.keys, config.clients);
    let bench = Bench::new(config, prefix);

    let started = bench.run().await?;
    let elapsed = started.elapsed();
    info!(%scenario, elapsed = ?elapsed, "run complete");
    Ok(Report { scenario, keys, clients, elapsed })
}
