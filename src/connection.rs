//! Connection topology for a scenario.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::debug;

use crate::codec::{encode_subscribe, KeyPrefix};
use crate::error::{BenchError, BenchResult};

/// Writer and subscriber streams, each owned by the scenario for its whole run.
#[derive(Debug, Default)]
pub struct Topology {
    pub writers: Vec<TcpStream>,
    pub subscribers: Vec<TcpStream>,
}

#[derive(Debug, Clone)]
pub struct Connector {
    addr: String,
    prefix: KeyPrefix,
    settle_delay: Duration,
}

impl Connector {
    pub fn new(addr: String, prefix: KeyPrefix, settle_delay: Duration) -> Self {
        Connector { addr, prefix, settle_delay }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn stream(&self) -> BenchResult<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| self.connect_error(e))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Opens the writers and the subscribers, subscribes each subscriber to
    /// the run's keys, then waits out the settle delay so the service has
    /// registered every subscription before the first write. The delay
    /// applies even without subscribers.
    pub async fn open(&self, writers: usize, subscribers: usize) -> BenchResult<Topology> {
        let mut topology = Topology {
            writers: Vec::with_capacity(writers),
            subscribers: Vec::with_capacity(subscribers),
        };
        for _ in 0..writers {
            topology.writers.push(self.stream().await?);
        }
        let subscribe = encode_subscribe(&self.prefix);
        for _ in 0..subscribers {
            let mut sub = self.stream().await?;
            sub.write_all(&subscribe).await?;
            topology.subscribers.push(sub);
        }
        debug!(addr = %self.addr, writers, subscribers, "connections open");

        tokio::time::sleep(self.settle_delay).await;
        Ok(topology)
    }

    /// A connected datagram socket for connectionless queries.
    pub async fn datagram(&self) -> BenchResult<UdpSocket> {
        let target = self.resolve().await?;
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await.map_err(|e| self.connect_error(e))?;
        Ok(socket)
    }

    async fn resolve(&self) -> BenchResult<SocketAddr> {
        let mut addrs = lookup_host(&self.addr).await.map_err(|e| self.connect_error(e))?;
        addrs.next().ok_or_else(|| {
            self.connect_error(io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"))
        })
    }

    fn connect_error(&self, source: io::Error) -> BenchError {
        BenchError::Connect { addr: self.addr.clone(), source }
    }
}
