//! UDP transport backed by tokio sockets.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::config::DEFAULT_SEND_TIMEOUT;
use crate::error::{CacheError, Result};
use crate::transport::{DatagramReceiver, Transport, MAX_DATAGRAM_SIZE};

// == UDP Transport ==
/// Sends through a short-lived socket per datagram and listens on a bound one.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    send_timeout: Duration,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self { send_timeout }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Ephemeral local address in the same family as `destination`.
fn local_bind_address(destination: &SocketAddr) -> SocketAddr {
    match destination {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn bind(&self, address: &str) -> Result<Box<dyn DatagramReceiver>> {
        let socket = UdpSocket::bind(address).await?;
        debug!("UDP listener bound to {}", socket.local_addr()?);
        Ok(Box::new(UdpReceiver {
            socket: Some(socket),
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        }))
    }

    async fn send_datagram(&self, destination: &str, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(CacheError::DatagramTooLarge(payload.len()));
        }

        // Socket lives for this call only and is dropped on every return path.
        let send = async {
            let target = lookup_host(destination).await?.next().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address for {destination}"),
                )
            })?;
            let socket = UdpSocket::bind(local_bind_address(&target)).await?;
            if target.is_ipv4() {
                socket.set_broadcast(true)?;
            }
            socket.send_to(payload, target).await?;
            Ok::<(), CacheError>(())
        };

        tokio::time::timeout(self.send_timeout, send)
            .await
            .map_err(|_| CacheError::SendTimeout(self.send_timeout))?
    }
}

// == UDP Receiver ==
struct UdpReceiver {
    socket: Option<UdpSocket>,
    buffer: Vec<u8>,
}

#[async_trait]
impl DatagramReceiver for UdpReceiver {
    async fn receive_datagram(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| CacheError::TransportClosed("udp listener closed".to_string()))?;

        match tokio::time::timeout(timeout, socket.recv_from(&mut self.buffer)).await {
            Ok(Ok((len, _from))) => Ok(Some(self.buffer[..len].to_vec())),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.socket.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_loopback_delivery() {
        let transport = UdpTransport::new();
        let mut receiver = transport.bind("127.0.0.1:47311").await.unwrap();

        transport
            .send_datagram("127.0.0.1:47311", b"hello")
            .await
            .unwrap();

        let received = receiver
            .receive_datagram(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_udp_receive_times_out() {
        let transport = UdpTransport::new();
        let mut receiver = transport.bind("127.0.0.1:0").await.unwrap();

        let received = receiver
            .receive_datagram(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_udp_closed_receiver_errors() {
        let transport = UdpTransport::new();
        let mut receiver = transport.bind("127.0.0.1:0").await.unwrap();

        receiver.close().await.unwrap();

        let result = receiver.receive_datagram(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(CacheError::TransportClosed(_))));
    }

    #[tokio::test]
    async fn test_udp_custom_send_timeout_delivers() {
        let transport = UdpTransport::with_send_timeout(Duration::from_secs(1));
        let mut receiver = transport.bind("127.0.0.1:47312").await.unwrap();

        transport
            .send_datagram("127.0.0.1:47312", b"bounded")
            .await
            .unwrap();

        let received = receiver
            .receive_datagram(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(received.as_deref(), Some(&b"bounded"[..]));
    }

    #[test]
    fn test_local_bind_address_follows_destination_family() {
        let v4: SocketAddr = "255.255.255.255:12345".parse().unwrap();
        let v6: SocketAddr = "[ff02::1]:12345".parse().unwrap();

        assert_eq!(local_bind_address(&v4), "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(local_bind_address(&v6), "[::]:0".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_udp_unresolvable_destination_errors() {
        let transport = UdpTransport::new();

        let result = transport.send_datagram("not an address", b"x").await;
        assert!(matches!(result, Err(CacheError::Transport(_))));
    }

    #[tokio::test]
    async fn test_udp_rejects_oversized_payload() {
        let transport = UdpTransport::new();
        let payload = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        let result = transport.send_datagram("127.0.0.1:9", &payload).await;
        assert!(matches!(result, Err(CacheError::DatagramTooLarge(_))));
    }
}
