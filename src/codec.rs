//! Wire forms of the cache line protocol, and the message sets a run writes.
//!
//! Every frame is a single newline-terminated line. Keys and values built
//! here never contain a newline, so splitting a response on `\n` is always
//! unambiguous.

use std::fmt;
use std::ops::Range;

use rand::Rng;

use crate::verify::LineSet;

/// Literal namespace separating benchmark keys from other service traffic.
pub const NAMESPACE: &str = "ben";

/// Key index every history write and history query targets.
const HISTORY_INDEX: usize = 0;

/// Per-run random token namespacing one run's keys from any concurrent run
/// against the same service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    pub fn new<S: Into<String>>(s: S) -> Self {
        KeyPrefix(s.into())
    }

    /// Six lower-case hex digits from 24 random bits.
    pub fn random() -> Self {
        let bits: u32 = rand::thread_rng().gen_range(0..1 << 24);
        KeyPrefix(format!("{:06x}", bits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `ben/<prefix>/k`, the part every key of a run starts with.
pub fn key_root(prefix: &KeyPrefix) -> String {
    format!("{NAMESPACE}/{prefix}/k")
}

pub fn encode_write(prefix: &KeyPrefix, index: usize, value: &str) -> Vec<u8> {
    format!("{NAMESPACE}/{prefix}/k{index:06}={value}\n").into_bytes()
}

pub fn encode_write_with_ttl(prefix: &KeyPrefix, index: usize, value: &str, ttl_secs: u64) -> Vec<u8> {
    format!("+{ttl_secs}@{NAMESPACE}/{prefix}/k{index:06}={value}\n").into_bytes()
}

/// History writes all land on the same key and differ only by timestamp.
pub fn encode_history_write(prefix: &KeyPrefix, timestamp: f64, value: usize) -> Vec<u8> {
    format!("{timestamp:.1}@{NAMESPACE}/{prefix}/k{HISTORY_INDEX:06}={value}\n").into_bytes()
}

pub fn encode_subscribe(prefix: &KeyPrefix) -> Vec<u8> {
    format!("{NAMESPACE}/{prefix}/k:\n").into_bytes()
}

pub fn encode_wildcard_query(prefix: &KeyPrefix) -> Vec<u8> {
    format!("{NAMESPACE}/{prefix}/k*\n").into_bytes()
}

pub fn encode_history_query(prefix: &KeyPrefix, start: f64, end: f64) -> Vec<u8> {
    format!("{start}-{end:.6}@{NAMESPACE}/{prefix}/k{HISTORY_INDEX:06}?\n").into_bytes()
}

/// The single current-value line a wildcard query answers with once a
/// history seed ending in `value` has been written.
pub fn latest_history_line(prefix: &KeyPrefix, value: usize) -> Vec<u8> {
    let mut line = encode_write(prefix, HISTORY_INDEX, &value.to_string());
    line.pop();
    line
}

/// Ordered, newline-terminated messages making up one run's write feed.
#[derive(Debug, Clone, Default)]
pub struct MessageSet {
    messages: Vec<Vec<u8>>,
}

impl MessageSet {
    /// `ben/<prefix>/k<i>=<prefix>` for every key index.
    pub fn writes(prefix: &KeyPrefix, keys: usize) -> Self {
        let messages = (0..keys).map(|i| encode_write(prefix, i, prefix.as_str())).collect();
        MessageSet { messages }
    }

    pub fn writes_with_ttl(prefix: &KeyPrefix, keys: usize, ttl_secs: u64) -> Self {
        let messages = (0..keys)
            .map(|i| encode_write_with_ttl(prefix, i, prefix.as_str(), ttl_secs))
            .collect();
        MessageSet { messages }
    }

    /// Timestamps `i + 0.1` with value `i`, in index order.
    pub fn history(prefix: &KeyPrefix, keys: usize) -> Self {
        let messages = (0..keys)
            .map(|i| encode_history_write(prefix, i as f64 + 0.1, i))
            .collect();
        MessageSet { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.messages.iter().map(Vec::as_slice)
    }

    /// Total bytes of the feed, newlines included.
    pub fn byte_len(&self) -> usize {
        self.messages.iter().map(Vec::len).sum()
    }

    pub fn joined(&self) -> Vec<u8> {
        self.join_range(0..self.messages.len())
    }

    /// Splits the feed into `parts` contiguous equal-sized payloads. The key
    /// count must already be a multiple of `parts`.
    pub fn slices(&self, parts: usize) -> Vec<Vec<u8>> {
        if parts == 0 {
            return Vec::new();
        }
        let per_part = self.messages.len() / parts;
        (0..parts)
            .map(|i| self.join_range(i * per_part..(i + 1) * per_part))
            .collect()
    }

    pub fn expected(&self) -> LineSet {
        LineSet::from_messages(self.iter())
    }

    fn join_range(&self, range: Range<usize>) -> Vec<u8> {
        let messages = &self.messages[range];
        let mut buf = Vec::with_capacity(messages.iter().map(Vec::len).sum());
        for m in messages {
            buf.extend_from_slice(m);
        }
        buf
    }
}
