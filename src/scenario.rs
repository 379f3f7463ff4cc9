//! The benchmarked workloads.
//!
//! Every driver has the same shape: untimed setup, the timed operation, then
//! verification. Each returns the instant its timed region began.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::codec::{encode_history_query, encode_wildcard_query, key_root, latest_history_line, KeyPrefix, MessageSet};
use crate::collector::Collector;
use crate::config::BenchConfig;
use crate::connection::{Connector, Topology};
use crate::error::{BenchError, BenchResult};
use crate::verify::{self, LineSet};

/// Slack after the TTL before expiry is checked.
const EXPIRY_MARGIN: Duration = Duration::from_millis(500);
/// Longest window spent listening for a post-expiry answer.
const EXPIRY_WINDOW: Duration = Duration::from_secs(1);
/// How far past "now" the history query range reaches.
const HISTORY_QUERY_HORIZON: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    Udp,
    SingleWriter,
    MultiWriter,
    MultiWriterWithTtl,
    AskOnly,
    AskHistory,
    TtlExpiry,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Scenario::Udp,
        Scenario::SingleWriter,
        Scenario::MultiWriter,
        Scenario::MultiWriterWithTtl,
        Scenario::AskOnly,
        Scenario::AskHistory,
        Scenario::TtlExpiry,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Udp => "udp",
            Scenario::SingleWriter => "single_writer",
            Scenario::MultiWriter => "multi_writer",
            Scenario::MultiWriterWithTtl => "multi_writer_with_ttl",
            Scenario::AskOnly => "ask_only",
            Scenario::AskHistory => "ask_history",
            Scenario::TtlExpiry => "ttl_expiry",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.name() == s)
            .ok_or_else(|| BenchError::UnknownScenario(s.to_string()))
    }
}

/// Everything one run needs, built before any connection opens.
pub struct Bench {
    config: BenchConfig,
    prefix: KeyPrefix,
    connector: Connector,
    collector: Collector,
    writes: MessageSet,
    expected: LineSet,
}

impl Bench {
    /// `config` must already be normalized.
    pub fn new(config: BenchConfig, prefix: KeyPrefix) -> Self {
        let writes = MessageSet::writes(&prefix, config.keys);
        let expected = writes.expected();
        let connector = Connector::new(config.addr(), prefix.clone(), config.settle_delay);
        let collector = Collector::new(config.collect_timeout, config.expect_bytes.unwrap_or_else(|| writes.byte_len()));
        Bench { config, prefix, connector, collector, writes, expected }
    }

    pub async fn run(&self) -> BenchResult<Instant> {
        info!(
            scenario = %self.config.scenario,
            addr = %self.connector.addr(),
            keys = self.config.keys,
            clients = self.config.clients,
            prefix = %self.prefix,
            "starting scenario"
        );
        let started = match self.config.scenario {
            Scenario::Udp => self.udp().await?,
            Scenario::SingleWriter => self.single_writer().await?,
            Scenario::MultiWriter => self.multi_writer(false).await?,
            Scenario::MultiWriterWithTtl => self.multi_writer(true).await?,
            Scenario::AskOnly => self.ask_only().await?,
            Scenario::AskHistory => self.ask_history().await?,
            Scenario::TtlExpiry => self.ttl_expiry().await?,
        };
        info!(scenario = %self.config.scenario, "scenario verified");
        Ok(started)
    }

    /// Datagram wildcard query against a TCP-seeded key space.
    async fn udp(&self) -> BenchResult<Instant> {
        let mut topology = self.connector.open(1, self.config.clients).await?;
        let writer = &mut topology.writers[0];
        writer.write_all(&self.writes.joined()).await?;
        self.ask_wildcard(writer, "seed query").await?;

        let started = Instant::now();
        let socket = self.connector.datagram().await?;
        socket.send(&encode_wildcard_query(&self.prefix)).await?;
        let got = self.collector.collect_datagrams(&socket, None).await?;
        verify::equal(&self.expected, &got, "datagram query")?;
        Ok(started)
    }

    /// One writer, fan-out to every subscriber, then a self-query.
    async fn single_writer(&self) -> BenchResult<Instant> {
        let mut topology = self.connector.open(1, self.config.clients).await?;
        let payload = self.writes.joined();

        let started = Instant::now();
        topology.writers[0].write_all(&payload).await?;
        self.drain_subscribers(&mut topology).await?;
        self.ask_wildcard(&mut topology.writers[0], "writer self-query").await?;
        Ok(started)
    }

    /// Every writer sends its own slice concurrently while the subscribers
    /// are drained, so the service must deliver the complete feed under any
    /// interleaving.
    async fn multi_writer(&self, with_ttl: bool) -> BenchResult<Instant> {
        let payloads = if with_ttl {
            MessageSet::writes_with_ttl(&self.prefix, self.config.keys, self.config.ttl_secs).slices(self.config.clients)
        } else {
            self.writes.slices(self.config.clients)
        };
        let Topology { writers, mut subscribers } = self.connector.open(self.config.clients, self.config.clients).await?;

        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for (mut writer, payload) in writers.into_iter().zip(payloads) {
            tasks.spawn(async move {
                writer.write_all(&payload).await?;
                Ok::<_, std::io::Error>(writer)
            });
        }

        let mut received = Vec::with_capacity(subscribers.len());
        for sub in subscribers.iter_mut() {
            received.push(self.collector.collect(sub, None).await?);
        }

        // Writers stay connected until every subscriber has been drained.
        let mut writers = Vec::with_capacity(self.config.clients);
        while let Some(joined) = tasks.join_next().await {
            writers.push(joined??);
        }
        debug!(writers = writers.len(), "writer tasks joined");

        for (i, got) in received.iter().enumerate() {
            verify::equal(&self.expected, got, &format!("subscriber {i}"))?;
        }
        Ok(started)
    }

    /// Pure read path: a warm-up query, then the timed identical query.
    async fn ask_only(&self) -> BenchResult<Instant> {
        let mut topology = self.connector.open(1, 0).await?;
        let writer = &mut topology.writers[0];
        writer.write_all(&self.writes.joined()).await?;
        self.ask_wildcard(writer, "warm-up query").await?;

        let started = Instant::now();
        self.ask_wildcard(writer, "timed query").await?;
        Ok(started)
    }

    /// Time-range retrieval of an append-only sequence under one key.
    async fn ask_history(&self) -> BenchResult<Instant> {
        let keys = self.config.keys;
        let history = MessageSet::history(&self.prefix, keys);
        let mut topology = self.connector.open(self.config.clients, 0).await?;

        let seeder = &mut topology.writers[0];
        seeder.write_all(&history.joined()).await?;
        seeder.write_all(&encode_wildcard_query(&self.prefix)).await?;
        let latest = latest_history_line(&self.prefix, keys - 1);
        let got = self.collector.collect(seeder, Some(latest.len() + 1)).await?;
        verify::equal(&LineSet::from_messages([latest]), &got, "history seed query")?;

        let started = Instant::now();
        let query = encode_history_query(&self.prefix, 0.0, unix_now() + HISTORY_QUERY_HORIZON);
        for writer in topology.writers.iter_mut() {
            writer.write_all(&query).await?;
        }
        let expected = history.expected();
        for (i, writer) in topology.writers.iter_mut().enumerate() {
            let got = self.collector.collect(writer, Some(history.byte_len())).await?;
            verify::equal(&expected, &got, &format!("history query {i}"))?;
        }
        Ok(started)
    }

    /// TTL writes are visible before expiry and gone after it.
    async fn ttl_expiry(&self) -> BenchResult<Instant> {
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let feed = MessageSet::writes_with_ttl(&self.prefix, self.config.keys, self.config.ttl_secs);
        let mut topology = self.connector.open(1, 0).await?;
        let writer = &mut topology.writers[0];
        writer.write_all(&feed.joined()).await?;
        self.ask_wildcard(writer, "pre-expiry query").await?;

        let written = tokio::time::Instant::now();
        debug!(ttl = ?ttl, "waiting for entries to expire");
        tokio::time::sleep_until(written + ttl + EXPIRY_MARGIN).await;

        let started = Instant::now();
        writer.write_all(&encode_wildcard_query(&self.prefix)).await?;
        let window = self.collector.timeout().min(EXPIRY_WINDOW);
        let got = self.collector.collect_for(writer, window).await?;
        verify::expired(key_root(&self.prefix).as_bytes(), &got, "post-expiry query")?;
        Ok(started)
    }

    async fn drain_subscribers(&self, topology: &mut Topology) -> BenchResult<()> {
        for (i, sub) in topology.subscribers.iter_mut().enumerate() {
            let got = self.collector.collect(sub, None).await?;
            verify::equal(&self.expected, &got, &format!("subscriber {i}"))?;
        }
        Ok(())
    }

    /// Wildcard query on `conn`, expecting the full write set back.
    async fn ask_wildcard(&self, conn: &mut TcpStream, context: &str) -> BenchResult<()> {
        conn.write_all(&encode_wildcard_query(&self.prefix)).await?;
        let got = self.collector.collect(conn, None).await?;
        verify::equal(&self.expected, &got, context)
    }
}

fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0.0, |d| d.as_secs_f64())
}
