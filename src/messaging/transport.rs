use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::dis::pdu_error::EncodeError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("error reading from datagram socket: {0}")]
    ReadFailed(#[source] io::Error),
    #[error("error sending datagram to {to}: {source}")]
    SendFailed {
        to: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("chat message could not be encoded: {0}")]
    Encode(#[from] EncodeError),
    /// The encoder produced a frame whose size disagrees with its own header. This is a bug,
    ///  and the send worker stops rather than put the frame on the wire.
    #[error("encoded frame is {actual} bytes, but its header declares {declared:?}")]
    MalformedFrame {
        actual: usize,
        declared: Option<u16>,
    },
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::MalformedFrame { .. })
    }
}

/// This is an abstraction for a datagram socket, introduced to allow replacing real UDP I/O with
///  an in-memory network in tests.
///
/// [DatagramSocket::close] must wake up a pending [DatagramSocket::recv_from] with an error: the
///  receive worker relies on this to shut down.
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize>;

    fn close(&self);

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Opens the socket for a multicast group (or for a unicast / broadcast address, which is
///  handled the same way except that there is no group to join).
#[async_trait]
pub trait SocketOpener: Send + Sync + 'static {
    async fn open(&self, group_addr: SocketAddr) -> anyhow::Result<Arc<dyn DatagramSocket>>;
}

fn socket_closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket was closed")
}

pub struct UdpDatagramSocket {
    socket: UdpSocket,
    closed: watch::Sender<bool>,
}

impl UdpDatagramSocket {
    pub fn new(socket: UdpSocket) -> UdpDatagramSocket {
        UdpDatagramSocket {
            socket,
            closed: watch::Sender::new(false),
        }
    }
}

#[async_trait]
impl DatagramSocket for UdpDatagramSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(socket_closed_error());
        }

        tokio::select! {
            r = self.socket.recv_from(buf) => r,
            _ = closed.wait_for(|&c| c) => Err(socket_closed_error()),
        }
    }

    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        if *self.closed.borrow() {
            return Err(socket_closed_error());
        }
        self.socket.send_to(buf, to).await
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

pub struct UdpSocketOpener {
    pub multicast_ttl: u32,
    pub multicast_loop: bool,
}

impl UdpSocketOpener {
    fn bind_reusable(group_addr: SocketAddr) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(group_addr), Type::DGRAM, Some(Protocol::UDP))?;
        // several chat instances on the same host share the port
        socket.set_reuse_address(true)?;

        let bind_addr: SocketAddr = match group_addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, group_addr.port()).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, group_addr.port()).into(),
        };
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;

        UdpSocket::from_std(socket.into())
    }
}

#[async_trait]
impl SocketOpener for UdpSocketOpener {
    async fn open(&self, group_addr: SocketAddr) -> anyhow::Result<Arc<dyn DatagramSocket>> {
        let socket = Self::bind_reusable(group_addr)?;

        match group_addr {
            SocketAddr::V4(addr) if addr.ip().is_multicast() => {
                socket.join_multicast_v4(*addr.ip(), Ipv4Addr::UNSPECIFIED)?;
                socket.set_multicast_ttl_v4(self.multicast_ttl)?;
                socket.set_multicast_loop_v4(self.multicast_loop)?;
                info!("joined multicast group {}", addr.ip());
            }
            SocketAddr::V6(addr) if addr.ip().is_multicast() => {
                socket.join_multicast_v6(addr.ip(), 0)?;
                socket.set_multicast_loop_v6(self.multicast_loop)?;
                info!("joined multicast group {}", addr.ip());
            }
            SocketAddr::V4(addr) if addr.ip().is_broadcast() => {
                socket.set_broadcast(true)?;
            }
            _ => {
                debug!("{} is not a multicast address, using plain UDP", group_addr);
            }
        }

        Ok(Arc::new(UdpDatagramSocket::new(socket)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_wakes_pending_receive() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(UdpDatagramSocket::new(socket));

        let cloned = socket.clone();
        let receiver = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            cloned.recv_from(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.close();

        let result = tokio::time::timeout(Duration::from_secs(1), receiver).await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let socket = UdpDatagramSocket::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let to = socket.local_addr().unwrap();
        socket.close();
        assert!(socket.send_to(b"x", to).await.is_err());
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let a = UdpDatagramSocket::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = UdpDatagramSocket::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());

        a.send_to(b"hello", b.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[rstest]
    #[case::malformed(TransportError::MalformedFrame { actual: 40, declared: Some(48) }, true)]
    #[case::too_large(TransportError::Encode(EncodeError::TooLarge { len: 70000, max: 65535 }), false)]
    #[case::send(TransportError::SendFailed { to: "127.0.0.1:3000".parse().unwrap(), source: io::Error::other("x") }, false)]
    #[case::read(TransportError::ReadFailed(io::Error::other("x")), false)]
    fn test_is_fatal(#[case] error: TransportError, #[case] expected: bool) {
        assert_eq!(error.is_fatal(), expected);
    }
}
