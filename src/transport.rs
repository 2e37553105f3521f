//! One-shot UDP exchange with a single name server.

use crate::error::TransportError;
use crate::types::QType;
use crate::wire::encode_query;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

/// Receive buffer for a single reply datagram.
pub const MAX_UDP_RESPONSE_SIZE: usize = 4096;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `query` to `server:port` and waits for exactly one reply datagram.
    async fn exchange(&self, query: &[u8], server: &str, port: u16) -> Result<Vec<u8>, TransportError>;
}

pub struct UdpTransport {
    recv_timeout: Duration,
}

impl UdpTransport {
    pub fn new(recv_timeout: Duration) -> Self {
        Self { recv_timeout }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn exchange(&self, query: &[u8], server: &str, port: u16) -> Result<Vec<u8>, TransportError> {
        let ip: IpAddr = server.parse().map_err(|_| TransportError::InvalidAddress(server.to_string()))?;
        let target = SocketAddr::new(ip, port);
        let io = |source: std::io::Error| TransportError::Io { server: target.to_string(), source };

        // An IPv6 wildcard bind is dual-stack on the platforms we run on.
        let bind_addr = if ip.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(io)?;
        socket.connect(target).await.map_err(io)?;
        socket.send(query).await.map_err(io)?;

        let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
        let len = timeout(self.recv_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout { server: target.to_string(), millis: self.recv_timeout.as_millis() })?
            .map_err(io)?;
        buf.truncate(len);

        tracing::trace!("{} bytes from {}", len, target);
        Ok(buf)
    }
}

/// Checks whether this host can reach the IPv6 internet by asking `server` for an AAAA record.
pub async fn probe_ipv6<T: Transport + ?Sized>(transport: &T, server: &str, probe_name: &str, port: u16) -> bool {
    let query = match encode_query(probe_name, QType::AAAA) {
        Ok(q) => q,
        Err(e) => {
            tracing::error!("Cannot build IPv6 probe query for '{}': {}", probe_name, e);
            return false;
        }
    };
    match transport.exchange(&query, server, port).await {
        Ok(_) => true,
        Err(e) => {
            tracing::info!("IPv6 probe to {} failed, continuing with IPv4 only: {}", server, e);
            false
        }
    }
}
