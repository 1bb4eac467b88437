use std::net::SocketAddr;

use snex_core::{DeviceError, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// One connected UDP socket per device. RetroArch multiplexes requests and
/// responses on this socket with no request ids, so the caller must hold the
/// per-device lock across a whole exchange.
pub(crate) struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    pub(crate) async fn connect(peer: SocketAddr) -> std::io::Result<UdpTransport> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().expect("ipv4 wildcard")
        } else {
            "[::]:0".parse().expect("ipv6 wildcard")
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;
        Ok(UdpTransport { socket, peer })
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) async fn send(&self, payload: &[u8], deadline: Instant) -> Result<()> {
        match tokio::time::timeout_at(deadline, self.socket.send(payload)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(DeviceError::Transport(err)),
            Err(_) => Err(DeviceError::DeadlineExceeded),
        }
    }

    pub(crate) async fn recv(&self, deadline: Instant) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 65536];
        match tokio::time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(err)) => Err(DeviceError::Transport(err)),
            Err(_) => Err(DeviceError::DeadlineExceeded),
        }
    }

    pub(crate) async fn send_then_recv(&self, payload: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        self.send(payload, deadline).await?;
        self.recv(deadline).await
    }
}
