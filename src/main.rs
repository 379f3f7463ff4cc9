/*!
 * cachebench: correctness-checked load generator for the line-protocol cache
 *
 * Usage: cachebench [-c localhost] [-n 10000] [-s 10] <scenario>
 * Scenarios: udp single_writer multi_writer multi_writer_with_ttl ask_only ask_history ttl_expiry
 *
 * Prints one line with the elapsed time of the timed region; exits non-zero
 * if the service lost, duplicated or misreported anything.
 */

use std::time::Duration;

use anyhow::Result;
use cachebench::collector::DEFAULT_COLLECT_TIMEOUT;
use cachebench::config::{DEFAULT_CLIENTS, DEFAULT_HOST, DEFAULT_KEYS, DEFAULT_PORT, DEFAULT_SETTLE_MS, DEFAULT_TTL_SECS};
use cachebench::{BenchConfig, Scenario};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cachebench")]
#[command(about = "Load and correctness benchmark for the pub/sub cache service")]
#[command(version)]
struct Cli {
    /// Cache host
    #[arg(short = 'c', long = "host", env = "CACHEBENCH_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Number of keys (rounded down to a multiple of the client count)
    #[arg(short = 'n', long = "keys", env = "CACHEBENCH_KEYS", default_value_t = DEFAULT_KEYS)]
    keys: usize,

    /// Number of writer/subscriber clients
    #[arg(short = 's', long = "clients", env = "CACHEBENCH_CLIENTS", default_value_t = DEFAULT_CLIENTS)]
    clients: usize,

    /// Service port (TCP and UDP)
    #[arg(long, env = "CACHEBENCH_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Expiry in seconds for TTL writes
    #[arg(long, env = "CACHEBENCH_TTL", default_value_t = DEFAULT_TTL_SECS)]
    ttl: u64,

    /// Wait after subscribing before writing, in milliseconds
    #[arg(long, env = "CACHEBENCH_SETTLE_MS", default_value_t = DEFAULT_SETTLE_MS)]
    settle_ms: u64,

    /// Collection timeout in seconds [default: 10]
    #[arg(long, env = "CACHEBENCH_TIMEOUT", value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Override the byte count a collection waits for
    #[arg(long, env = "CACHEBENCH_EXPECT_BYTES")]
    expect_bytes: Option<usize>,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Scenario to run
    scenario: Scenario,
}

impl Cli {
    fn into_config(self) -> BenchConfig {
        BenchConfig {
            host: self.host,
            port: self.port,
            keys: self.keys,
            clients: self.clients,
            scenario: self.scenario,
            ttl_secs: self.ttl,
            settle_delay: Duration::from_millis(self.settle_ms),
            collect_timeout: self.timeout.unwrap_or(DEFAULT_COLLECT_TIMEOUT),
            expect_bytes: self.expect_bytes,
        }
    }
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("not a number of seconds: {e}"))?;
    if secs.is_nan() || secs <= 0.0 {
        return Err(format!("timeout must be positive, got {secs}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let report = cachebench::run(cli.into_config()).await?;
    println!("{report}");
    Ok(())
}
