//! In-process stand-in for the cache service, speaking the subset of the line
//! protocol the benchmark drives, on TCP and UDP sharing one port.
//!
//! Protocol (one line per frame):
//! <key>=<value>                 plain write, fanned out to subscribers
//! +<secs>@<key>=<value>         write with expiry
//! <ts>@<key>=<value>            timestamped write, appended to history
//! <key>:                        subscribe to keys containing <key>
//! <key>*                        wildcard query: key=value, or key!value once expired
//! <from>-<to>@<key>?            history query: <ts>@key=value per entry in range
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

// Largest datagram payload the stand-in sends back in one packet.
const MAX_DATAGRAM: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: String,
    pub created_at: Instant,
    pub ttl: Option<Duration>,
}

impl Entry {
    pub fn is_expired(&self) -> bool {
        if let Some(ttl) = self.ttl {
            self.created_at.elapsed() > ttl
        } else {
            false
        }
    }
}

/// Misbehaviour the stand-in can be told to show.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    // Each subscriber silently misses the first update it matches.
    pub drop_first_update: bool,
    // Expiry is never applied.
    pub ignore_ttl: bool,
    // A connection is closed with its input unread as soon as it sends a write.
    pub reset_writers: bool,
    // The first wildcard query is answered only after this long.
    pub first_query_delay: Option<Duration>,
}

struct Subscriber {
    pattern: String,
    tx: UnboundedSender<Vec<u8>>,
    dropped: bool,
}

#[derive(Debug, PartialEq)]
enum Frame<'a> {
    Tell { key: &'a str, val: &'a str, ttl: Option<f64>, time: Option<f64> },
    Subscribe { key: &'a str },
    AskWild { key: &'a str },
    AskHist { key: &'a str, from: f64, to: f64 },
}

fn parse(line: &str) -> Option<Frame<'_>> {
    let (meta, rest) = match line.split_once('@') {
        Some((meta, rest)) => (Some(meta), rest),
        None => (None, line),
    };
    let op_at = rest.find(['=', ':', '*', '?'])?;
    let key = &rest[..op_at];
    let val = &rest[op_at + 1..];
    match &rest[op_at..op_at + 1] {
        "=" => {
            let (ttl, time) = match meta {
                Some(m) if m.starts_with('+') => (m[1..].parse().ok(), None),
                Some(m) => (None, m.parse().ok()),
                None => (None, None),
            };
            Some(Frame::Tell { key, val, ttl, time })
        }
        ":" => Some(Frame::Subscribe { key }),
        "*" => Some(Frame::AskWild { key }),
        "?" => {
            let (from, to) = meta?.split_once('-')?;
            Some(Frame::AskHist { key, from: from.parse().ok()?, to: to.parse().ok()? })
        }
        _ => None,
    }
}

pub struct Cache {
    entries: DashMap<String, Entry>,
    history: DashMap<String, Vec<(f64, String)>>,
    subscribers: Mutex<Vec<Subscriber>>,
    faults: Faults,
    queried: AtomicBool,
}

impl Cache {
    pub fn new(faults: Faults) -> Self {
        Self {
            entries: DashMap::new(),
            history: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            faults,
            queried: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Applies one frame. Returns the reply for the sender, if any.
    /// `conn` is the sender's update channel; datagram clients have none.
    fn handle(&self, line: &str, conn: Option<&UnboundedSender<Vec<u8>>>) -> Option<Vec<u8>> {
        match parse(line)? {
            Frame::Tell { key, val, ttl, time } => {
                let ttl = if self.faults.ignore_ttl { None } else { ttl.map(Duration::from_secs_f64) };
                self.entries.insert(
                    key.to_string(),
                    Entry { value: val.to_string(), created_at: Instant::now(), ttl },
                );
                if let Some(ts) = time {
                    self.history.entry(key.to_string()).or_default().push((ts, val.to_string()));
                }
                self.publish(key, val);
                None
            }
            Frame::Subscribe { key } => {
                if let Some(tx) = conn {
                    self.subscribers.lock().push(Subscriber { pattern: key.to_string(), tx: tx.clone(), dropped: false });
                }
                None
            }
            Frame::AskWild { key } => {
                let mut out = Vec::new();
                for e in self.entries.iter().filter(|e| e.key().contains(key)) {
                    let op = if e.value().is_expired() { '!' } else { '=' };
                    out.extend_from_slice(format!("{}{}{}\n", e.key(), op, e.value().value).as_bytes());
                }
                Some(out)
            }
            Frame::AskHist { key, from, to } => {
                let mut out = Vec::new();
                if let Some(hist) = self.history.get(key) {
                    for (ts, val) in hist.iter().filter(|(ts, _)| from <= *ts && *ts <= to) {
                        out.extend_from_slice(format!("{ts}@{key}={val}\n").as_bytes());
                    }
                }
                Some(out)
            }
        }
    }

    /// How long to hold back the answer to `line`.
    fn reply_delay(&self, line: &str) -> Option<Duration> {
        let delay = self.faults.first_query_delay?;
        if !matches!(parse(line), Some(Frame::AskWild { .. })) || self.queried.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(delay)
    }

    fn hangs_up_on(&self, line: &str) -> bool {
        self.faults.reset_writers && matches!(parse(line), Some(Frame::Tell { .. }))
    }

    fn unsubscribe(&self, conn: &UnboundedSender<Vec<u8>>) {
        self.subscribers.lock().retain(|s| !s.tx.same_channel(conn));
    }

    fn publish(&self, key: &str, val: &str) {
        let update = format!("{key}={val}\n").into_bytes();
        let mut subs = self.subscribers.lock();
        subs.retain(|s| !s.tx.is_closed());
        for sub in subs.iter_mut().filter(|s| key.contains(&s.pattern)) {
            if self.faults.drop_first_update && !sub.dropped {
                sub.dropped = true;
                continue;
            }
            let _ = sub.tx.send(update.clone());
        }
    }
}

async fn handle_tcp_client(cache: Arc<Cache>, stream: TcpStream) {
    let (r, mut w) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    // replies and subscription updates share one ordered writer
    let writer = tokio::spawn(async move {
        while let Some(buf) = rx.recv().await {
            if w.write_all(&buf).await.is_err() {
                break;
            }
        }
        let _ = w.shutdown().await;
    });

    let mut reader = BufReader::new(r);
    let mut line = String::new();
    while let Ok(n) = reader.read_line(&mut line).await {
        if n == 0 {
            break;
        }
        while line.ends_with(['\n', '\r']) {
            line.pop();
        }
        if !line.is_empty() {
            if let Some(delay) = cache.reply_delay(&line) {
                tokio::time::sleep(delay).await;
            }
            if let Some(reply) = cache.handle(&line, Some(&tx)) {
                let _ = tx.send(reply);
            }
            if cache.hangs_up_on(&line) {
                break;
            }
        }
        line.clear();
    }
    cache.unsubscribe(&tx);
    drop(tx);
    let _ = writer.await;
}

async fn run_tcp_server(cache: Arc<Cache>, listener: TcpListener) {
    while let Ok((sock, _)) = listener.accept().await {
        let c = cache.clone();
        tokio::spawn(async move { handle_tcp_client(c, sock).await });
    }
}

async fn run_udp_server(cache: Arc<Cache>, socket: UdpSocket) {
    let mut buf = vec![0u8; 64 * 1024];
    while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(reply) = cache.handle(line, None) {
                if send_datagrams(&socket, peer, &reply).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Sends `reply` in packets of whole lines no larger than `MAX_DATAGRAM`.
async fn send_datagrams(socket: &UdpSocket, peer: SocketAddr, reply: &[u8]) -> std::io::Result<()> {
    let mut start = 0;
    while start < reply.len() {
        let mut end = (start + MAX_DATAGRAM).min(reply.len());
        if end < reply.len() {
            if let Some(nl) = reply[start..end].iter().rposition(|&b| b == b'\n') {
                end = start + nl + 1;
            }
        }
        socket.send_to(&reply[start..end], peer).await?;
        start = end;
    }
    Ok(())
}

/// A running stand-in. Tasks are aborted on drop.
pub struct MockCache {
    pub addr: SocketAddr,
    pub cache: Arc<Cache>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockCache {
    pub async fn start() -> Self {
        Self::start_with(Faults::default()).await
    }

    pub async fn start_with(faults: Faults) -> Self {
        let (listener, socket) = bind_pair().await;
        let addr = listener.local_addr().expect("listener address");
        let cache = Arc::new(Cache::new(faults));
        let tasks = vec![
            tokio::spawn(run_tcp_server(cache.clone(), listener)),
            tokio::spawn(run_udp_server(cache.clone(), socket)),
        ];
        MockCache { addr, cache, tasks }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for MockCache {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

// TCP and UDP on the same port number, as the real service listens.
async fn bind_pair() -> (TcpListener, UdpSocket) {
    for _ in 0..32 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind tcp");
        let addr = listener.local_addr().expect("listener address");
        if let Ok(socket) = UdpSocket::bind(addr).await {
            return (listener, socket);
        }
    }
    panic!("no port free for both tcp and udp");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_subset() {
        assert_eq!(
            parse("ben/p/k000001=p"),
            Some(Frame::Tell { key: "ben/p/k000001", val: "p", ttl: None, time: None })
        );
        assert_eq!(
            parse("+5@ben/p/k000001=p"),
            Some(Frame::Tell { key: "ben/p/k000001", val: "p", ttl: Some(5.0), time: None })
        );
        assert_eq!(
            parse("3.1@ben/p/k000000=3"),
            Some(Frame::Tell { key: "ben/p/k000000", val: "3", ttl: None, time: Some(3.1) })
        );
        assert_eq!(parse("ben/p/k:"), Some(Frame::Subscribe { key: "ben/p/k" }));
        assert_eq!(parse("ben/p/k*"), Some(Frame::AskWild { key: "ben/p/k" }));
        assert_eq!(
            parse("0-17.500000@ben/p/k000000?"),
            Some(Frame::AskHist { key: "ben/p/k000000", from: 0.0, to: 17.5 })
        );
        assert_eq!(parse("garbage"), None);
    }
}
