use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::trace;

use crate::messaging::transport::{DatagramSocket, SocketOpener};

#[derive(Debug)]
enum Delivery {
    Datagram(Bytes, SocketAddr),
    Error(io::ErrorKind),
}

/// An in-memory multicast group: every datagram sent by a member is delivered to all members,
///  including the sender itself.
pub struct LoopbackNetwork {
    members: RwLock<Vec<mpsc::UnboundedSender<Delivery>>>,
    next_port: AtomicU16,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<LoopbackNetwork> {
        Arc::new(LoopbackNetwork {
            members: Default::default(),
            next_port: AtomicU16::new(40000),
        })
    }

    pub async fn join(self: &Arc<Self>) -> Arc<LoopbackSocket> {
        let local_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.next_port.fetch_add(1, Ordering::Relaxed)));
        let (inbox_sender, inbox) = mpsc::unbounded_channel();

        self.members.write().await
            .push(inbox_sender.clone());

        Arc::new(LoopbackSocket {
            network: self.clone(),
            local_addr,
            inbox_sender,
            inbox: Mutex::new(inbox),
            closed: watch::Sender::new(false),
            fail_sends: AtomicBool::new(false),
            sent: Default::default(),
        })
    }

    /// delivers a datagram from some peer outside the test's control
    pub async fn inject(&self, datagram: &[u8], from: SocketAddr) {
        self.deliver(Bytes::copy_from_slice(datagram), from).await;
    }

    async fn deliver(&self, datagram: Bytes, from: SocketAddr) {
        self.members.write().await
            .retain(|member| member.send(Delivery::Datagram(datagram.clone(), from)).is_ok());
    }
}

pub struct LoopbackSocket {
    network: Arc<LoopbackNetwork>,
    local_addr: SocketAddr,
    inbox_sender: mpsc::UnboundedSender<Delivery>,
    inbox: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    closed: watch::Sender<bool>,
    fail_sends: AtomicBool,
    sent: RwLock<Vec<(Bytes, SocketAddr)>>,
}

impl LoopbackSocket {
    /// makes the next pending or future receive fail with an error of the given kind
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        let _ = self.inbox_sender.send(Delivery::Error(kind));
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// all datagrams successfully sent through this socket, with their destination
    pub async fn sent_datagrams(&self) -> Vec<(Bytes, SocketAddr)> {
        self.sent.read().await.clone()
    }
}

fn socket_closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "loopback socket was closed")
}

#[async_trait]
impl DatagramSocket for LoopbackSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(socket_closed_error());
        }

        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            delivery = inbox.recv() => {
                match delivery {
                    Some(Delivery::Datagram(datagram, from)) => {
                        // like UDP, excess bytes are silently cut off
                        let len = datagram.len().min(buf.len());
                        buf[..len].copy_from_slice(&datagram[..len]);
                        Ok((len, from))
                    }
                    Some(Delivery::Error(kind)) => Err(io::Error::new(kind, "injected read error")),
                    None => Err(socket_closed_error()),
                }
            }
            _ = closed.wait_for(|&c| c) => Err(socket_closed_error()),
        }
    }

    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        if self.is_closed() {
            return Err(socket_closed_error());
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(io::Error::other("injected send error"));
        }

        trace!("loopback: {} bytes from {:?} to {:?}", buf.len(), self.local_addr, to);
        let datagram = Bytes::copy_from_slice(buf);
        self.sent.write().await
            .push((datagram.clone(), to));
        self.network.deliver(datagram, self.local_addr).await;
        Ok(buf.len())
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Opens [LoopbackSocket]s on a shared [LoopbackNetwork], ignoring the group address
pub struct LoopbackOpener {
    network: Arc<LoopbackNetwork>,
    opened: RwLock<Vec<Arc<LoopbackSocket>>>,
    fail: AtomicBool,
}

impl LoopbackOpener {
    pub fn new(network: Arc<LoopbackNetwork>) -> LoopbackOpener {
        LoopbackOpener {
            network,
            opened: Default::default(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub async fn opened_sockets(&self) -> Vec<Arc<LoopbackSocket>> {
        self.opened.read().await.clone()
    }
}

#[async_trait]
impl SocketOpener for LoopbackOpener {
    async fn open(&self, group_addr: SocketAddr) -> anyhow::Result<Arc<dyn DatagramSocket>> {
        if self.fail.load(Ordering::Relaxed) {
            bail!("cannot open socket for {:?}", group_addr);
        }

        let socket = self.network.join().await;
        self.opened.write().await
            .push(socket.clone());
        Ok(socket)
    }
}
