use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::chat::chat_message::ChatMessage;
use crate::dis::dis_time::DisTimestamp;
use crate::dis::pdu_header::PduHeader;
use crate::messaging::receive_pipeline::MAX_PDU_SIZE;
use crate::messaging::transport::{DatagramSocket, TransportError};

/// Turns chat messages into Comment PDUs and sends them to the group address, one datagram per
///  message.
pub struct SendPipeline {
    socket: Arc<dyn DatagramSocket>,
    destination: SocketAddr,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn DatagramSocket>, destination: SocketAddr) -> SendPipeline {
        SendPipeline { socket, destination }
    }

    pub async fn send_message(&self, message: &ChatMessage, now: &DateTime<Utc>) -> Result<(), TransportError> {
        let frame = message.to_comment_pdu(DisTimestamp::encode(now, true))
            .encode()?;

        let declared = PduHeader::declared_length(&frame);
        if declared.map(usize::from) != Some(frame.len()) {
            return Err(TransportError::MalformedFrame { actual: frame.len(), declared });
        }

        if frame.len() > MAX_PDU_SIZE {
            warn!("sending a {} byte PDU - receivers with a {} byte buffer will drop it", frame.len(), MAX_PDU_SIZE);
        }

        trace!("sending {} byte comment PDU to {:?}", frame.len(), self.destination);
        self.socket.send_to(&frame, self.destination).await
            .map_err(|source| TransportError::SendFailed { to: self.destination, source })?;
        Ok(())
    }

    /// Sends messages from the queue until shutdown is requested. Failures to send a message are
    ///  passed to `on_error` and the message is dropped; a malformed frame stops the worker.
    ///
    /// The queue is borrowed rather than owned so that messages submitted while there is no
    ///  connection are kept for the next one.
    #[tracing::instrument(name = "send", skip_all)]
    pub async fn run(
        self,
        queue: &mut mpsc::UnboundedReceiver<ChatMessage>,
        mut shutdown: watch::Receiver<bool>,
        on_error: impl Fn(&TransportError) + Send,
    ) -> Result<(), TransportError> {
        debug!("starting send loop");

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.wait_for(|&stop| stop) => {
                    debug!("shutdown requested");
                    return Ok(());
                }
                message = queue.recv() => {
                    match message {
                        Some(m) => m,
                        None => {
                            debug!("outbound queue was closed");
                            return Ok(());
                        }
                    }
                }
            };

            match self.send_message(&message, &Utc::now()).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!("send loop terminating: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("dropping chat message: {}", e);
                    on_error(&e);
                }
            }
        }
    }
}
