use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::dis::comment_pdu::DecodedPdu;
use crate::dis::dis_time::DisTimestamp;
use crate::messaging::transport::{DatagramSocket, TransportError};

/// The receive buffer size. Peers are expected to send nothing bigger.
pub const MAX_PDU_SIZE: usize = 8192;

pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 1024;

/// A decoded PDU together with the context of its arrival
#[derive(Debug, Clone)]
pub struct ReceivedPdu {
    pub pdu: DecodedPdu,
    pub source: SocketAddr,
    pub received_at: DateTime<Utc>,
    /// the sender's clock reading, interpreted relative to the hour of arrival
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Default, Debug)]
pub struct ReceiveStats {
    datagrams: AtomicU64,
    comment_pdus: AtomicU64,
    ignored_pdus: AtomicU64,
    bad_datagrams: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReceiveStatsSnapshot {
    pub datagrams: u64,
    pub comment_pdus: u64,
    pub ignored_pdus: u64,
    pub bad_datagrams: u64,
}

impl ReceiveStats {
    pub fn snapshot(&self) -> ReceiveStatsSnapshot {
        ReceiveStatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            comment_pdus: self.comment_pdus.load(Ordering::Relaxed),
            ignored_pdus: self.ignored_pdus.load(Ordering::Relaxed),
            bad_datagrams: self.bad_datagrams.load(Ordering::Relaxed),
        }
    }
}

/// Reads datagrams from the socket, decodes them and hands them to a bounded queue. The queue
///  applies backpressure: when it is full, the worker stops reading until there is room again.
pub struct ReceivePipeline {
    socket: Arc<dyn DatagramSocket>,
    queue: mpsc::Sender<ReceivedPdu>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<ReceiveStats>,
    max_pdu_size: usize,
}

impl ReceivePipeline {
    pub fn new(
        socket: Arc<dyn DatagramSocket>,
        queue: mpsc::Sender<ReceivedPdu>,
        shutdown: watch::Receiver<bool>,
        stats: Arc<ReceiveStats>,
        max_pdu_size: usize,
    ) -> ReceivePipeline {
        ReceivePipeline {
            socket,
            queue,
            shutdown,
            stats,
            max_pdu_size,
        }
    }

    /// Runs until shutdown is requested, the queue's consumer goes away, or reading from the
    ///  socket fails. Only the last case is reported as an error.
    #[tracing::instrument(name = "receive", skip_all)]
    pub async fn run(mut self) -> Result<(), TransportError> {
        let mut buf = vec![0u8; self.max_pdu_size];

        debug!("starting receive loop");

        let result = loop {
            let (len, from) = tokio::select! {
                r = self.socket.recv_from(&mut buf) => {
                    match r {
                        Ok(x) => x,
                        Err(e) => {
                            if *self.shutdown.borrow() {
                                debug!("socket closed during shutdown");
                                break Ok(());
                            }
                            error!(error = ?e, "error receiving from datagram socket - receive loop terminating");
                            break Err(TransportError::ReadFailed(e));
                        }
                    }
                }
                _ = async { let _ = self.shutdown.wait_for(|&stop| stop).await; } => {
                    debug!("shutdown requested");
                    break Ok(());
                }
            };

            if !self.on_datagram(&buf[..len], from).await {
                debug!("inbound queue was closed");
                break Ok(());
            }
        };

        let stats = self.stats.snapshot();
        info!(
            datagrams = stats.datagrams,
            comment_pdus = stats.comment_pdus,
            ignored_pdus = stats.ignored_pdus,
            bad_datagrams = stats.bad_datagrams,
            "receive loop finished"
        );
        result
    }

    /// returns `false` if the queue is closed
    async fn on_datagram(&self, datagram: &[u8], from: SocketAddr) -> bool {
        self.stats.datagrams.fetch_add(1, Ordering::Relaxed);
        trace!("received {} bytes from {:?}", datagram.len(), from);

        if datagram.len() >= self.max_pdu_size {
            warn!("datagram from {:?} filled the receive buffer of {} bytes, it may have been truncated", from, self.max_pdu_size);
        }

        let received_at = Utc::now();
        let pdu = match DecodedPdu::decode(datagram) {
            Ok(pdu) => pdu,
            Err(e) => {
                self.stats.bad_datagrams.fetch_add(1, Ordering::Relaxed);
                warn!("received a datagram from {:?} that is not a valid PDU - discarding: {}", from, e);
                return true;
            }
        };

        match &pdu {
            DecodedPdu::Comment(_) => self.stats.comment_pdus.fetch_add(1, Ordering::Relaxed),
            DecodedPdu::Ignored(_) => self.stats.ignored_pdus.fetch_add(1, Ordering::Relaxed),
        };

        let sent_at = DisTimestamp::decode(pdu.header().timestamp)
            .to_approximate_instant(&received_at);

        self.queue.send(ReceivedPdu {
            pdu,
            source: from,
            received_at,
            sent_at,
        }).await
            .is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dis::pdu_header::PduType;
    use crate::test_util::loopback::LoopbackNetwork;
    use crate::test_util::pdus::{entity_state_pdu, hello_world_comment};
    use std::time::Duration;

    struct Fixture {
        stats: Arc<ReceiveStats>,
        shutdown: watch::Sender<bool>,
        inbound: mpsc::Receiver<ReceivedPdu>,
        worker: tokio::task::JoinHandle<Result<(), TransportError>>,
    }

    fn start(socket: Arc<dyn DatagramSocket>, capacity: usize) -> Fixture {
        let stats = Arc::new(ReceiveStats::default());
        let (shutdown, shutdown_receiver) = watch::channel(false);
        let (queue, inbound) = mpsc::channel(capacity);
        let pipeline = ReceivePipeline::new(socket, queue, shutdown_receiver, stats.clone(), MAX_PDU_SIZE);
        let worker = tokio::spawn(pipeline.run());
        Fixture { stats, shutdown, inbound, worker }
    }

    async fn next(inbound: &mut mpsc::Receiver<ReceivedPdu>) -> ReceivedPdu {
        tokio::time::timeout(Duration::from_secs(1), inbound.recv()).await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_forwards_decoded_pdus() {
        let network = LoopbackNetwork::new();
        let socket = network.join().await;
        let mut fixture = start(socket, 16);

        let peer: SocketAddr = "10.0.0.7:3000".parse().unwrap();
        network.inject(&hello_world_comment(), peer).await;
        network.inject(&entity_state_pdu(), peer).await;

        let first = next(&mut fixture.inbound).await;
        assert!(matches!(first.pdu, DecodedPdu::Comment(_)));
        assert_eq!(first.source, peer);
        assert!(first.sent_at.is_some());

        let second = next(&mut fixture.inbound).await;
        match second.pdu {
            DecodedPdu::Ignored(header) => assert_eq!(header.known_pdu_type(), Some(PduType::EntityState)),
            other => panic!("{:?}", other),
        }

        let stats = fixture.stats.snapshot();
        assert_eq!(stats, ReceiveStatsSnapshot { datagrams: 2, comment_pdus: 1, ignored_pdus: 1, bad_datagrams: 0 });

        fixture.shutdown.send_replace(true);
        assert!(fixture.worker.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_survives_garbage() {
        let network = LoopbackNetwork::new();
        let socket = network.join().await;
        let mut fixture = start(socket, 16);

        let peer: SocketAddr = "10.0.0.7:3000".parse().unwrap();
        network.inject(&[1, 2, 3], peer).await;
        network.inject(&hello_world_comment()[..20], peer).await;
        network.inject(&hello_world_comment(), peer).await;

        let received = next(&mut fixture.inbound).await;
        assert!(matches!(received.pdu, DecodedPdu::Comment(_)));
        assert_eq!(fixture.stats.snapshot().bad_datagrams, 2);

        fixture.shutdown.send_replace(true);
        assert!(fixture.worker.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_close_during_shutdown_is_not_an_error() {
        let network = LoopbackNetwork::new();
        let socket = network.join().await;
        let fixture = start(socket.clone(), 16);

        fixture.shutdown.send_replace(true);
        socket.close();

        let result = tokio::time::timeout(Duration::from_secs(1), fixture.worker).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_error_terminates_worker() {
        let network = LoopbackNetwork::new();
        let socket = network.join().await;
        let fixture = start(socket.clone(), 16);

        socket.inject_read_error(std::io::ErrorKind::ConnectionReset);

        let result = tokio::time::timeout(Duration::from_secs(1), fixture.worker).await.unwrap();
        match result.unwrap() {
            Err(TransportError::ReadFailed(e)) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
            other => panic!("{:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stops_when_queue_is_closed() {
        let network = LoopbackNetwork::new();
        let socket = network.join().await;
        let fixture = start(socket, 1);
        drop(fixture.inbound);

        network.inject(&hello_world_comment(), "10.0.0.7:3000".parse().unwrap()).await;

        let result = tokio::time::timeout(Duration::from_secs(1), fixture.worker).await.unwrap();
        assert!(result.unwrap().is_ok());
    }
}
