//! Gathers unframed responses.
//!
//! The service streams responses without a length header, so the only
//! stopping signals are "enough bytes arrived" and "the deadline passed".
//! The deadline is a guard against hangs; a collection it cuts short is
//! flagged on [`Collected`] and fails the verification that follows.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::error::BenchResult;
use crate::verify::LineSet;

pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

const RECV_CHUNK: usize = 64 * 1024;
/// Upper bound on the buffer reserved ahead of a collection.
const MAX_PREALLOC: usize = RECV_CHUNK * 16;

/// Result of one collection.
#[derive(Debug, Clone)]
pub struct Collected {
    pub lines: LineSet,
    pub bytes: usize,
    pub timed_out: bool,
}

impl Collected {
    fn new(buf: &[u8], timed_out: bool) -> Self {
        Collected { lines: LineSet::from_bytes(buf), bytes: buf.len(), timed_out }
    }
}

#[derive(Debug, Clone)]
pub struct Collector {
    timeout: Duration,
    default_len: usize,
}

impl Collector {
    /// `default_len` is the threshold used when a caller passes no explicit
    /// length, normally the byte length of the full write feed.
    pub fn new(timeout: Duration, default_len: usize) -> Self {
        Collector { timeout, default_len }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reads until `expected_len` bytes arrived, the peer closed, or the
    /// deadline passed.
    pub async fn collect<R>(&self, reader: &mut R, expected_len: Option<usize>) -> BenchResult<Collected>
    where
        R: AsyncRead + Unpin,
    {
        let expected = expected_len.unwrap_or(self.default_len);
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::with_capacity(expected.min(MAX_PREALLOC));
        let mut chunk = vec![0u8; RECV_CHUNK];
        let mut timed_out = false;

        while buf.len() < expected {
            match time::timeout_at(deadline, reader.read(&mut chunk)).await {
                Err(_) => {
                    timed_out = true;
                    break;
                }
                Ok(Ok(0)) => {
                    debug!(got = buf.len(), expected, "peer closed during collection");
                    break;
                }
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        if timed_out {
            warn!(got = buf.len(), expected, timeout = ?self.timeout, "collection timed out");
        }
        Ok(Collected::new(&buf, timed_out))
    }

    /// Same stopping rule as [`Collector::collect`], summing datagram payloads
    /// from a connected socket.
    pub async fn collect_datagrams(&self, socket: &UdpSocket, expected_len: Option<usize>) -> BenchResult<Collected> {
        let expected = expected_len.unwrap_or(self.default_len);
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::with_capacity(expected.min(MAX_PREALLOC));
        let mut datagram = vec![0u8; RECV_CHUNK];
        let mut timed_out = false;

        while buf.len() < expected {
            match time::timeout_at(deadline, socket.recv(&mut datagram)).await {
                Err(_) => {
                    timed_out = true;
                    break;
                }
                Ok(Ok(n)) => buf.extend_from_slice(&datagram[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        if timed_out {
            warn!(got = buf.len(), expected, timeout = ?self.timeout, "datagram collection timed out");
        }
        Ok(Collected::new(&buf, timed_out))
    }

    /// Reads whatever arrives within `window`. For answers expected to be
    /// empty, where no byte threshold can end the read.
    pub async fn collect_for<R>(&self, reader: &mut R, window: Duration) -> BenchResult<Collected>
    where
        R: AsyncRead + Unpin,
    {
        let deadline = Instant::now() + window;
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; RECV_CHUNK];

        loop {
            match time::timeout_at(deadline, reader.read(&mut chunk)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        Ok(Collected::new(&buf, false))
    }
}
