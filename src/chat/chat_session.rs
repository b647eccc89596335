use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chat::chat_config::{parse_exercise_id, parse_id_component, ChatConfig, ConfigError, IdComponent};
use crate::chat::chat_extractor::{run_extractor, ChatMessageHandler};
use crate::chat::chat_listener::ChatListener;
use crate::chat::chat_message::{trim_text, ChatMessage};
use crate::chat::user_roster::{RosterChangeKind, UserRecord, UserRoster};
use crate::dis::entity_id::EntityId;
use crate::messaging::receive_pipeline::{ReceivePipeline, ReceiveStats, ReceiveStatsSnapshot};
use crate::messaging::send_pipeline::SendPipeline;
use crate::messaging::transport::{DatagramSocket, SocketOpener};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SubmitResult {
    Accepted,
    RejectedEmpty,
}

/// Who this session speaks as. Changes take effect for messages submitted afterwards.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChatIdentity {
    pub sender_id: EntityId,
    pub receiver_id: EntityId,
    pub exercise_id: u8,
    pub username: String,
}

struct Connection {
    socket: Arc<dyn DatagramSocket>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// Everything the inbound path needs, shared with the extractor task
struct InboundHandler {
    identity: Arc<RwLock<ChatIdentity>>,
    roster: Arc<UserRoster>,
    listener: Arc<dyn ChatListener>,
}

#[async_trait]
impl ChatMessageHandler for InboundHandler {
    async fn on_chat_message(&self, message: ChatMessage) {
        if self.roster.observe(&message).await == RosterChangeKind::NewUser {
            info!("{} ({}) joined the chat", message.sender_id, message.sender_name);
        }
        self.listener.on_roster_changed(&self.roster.snapshot().await);

        // multicast reflects our own traffic back to us
        if message.sender_id == self.identity.read().await.sender_id {
            debug!("filtering out message from myself - {} ({})", message.sender_id, message.text);
            return;
        }
        self.listener.on_message_received(&message);
    }
}

/// A participant in a DIS chat. The session is created disconnected; [ChatSession::connect]
///  opens the socket and starts the workers:
///
/// * a receive worker reading datagrams and decoding them into PDUs
/// * an extractor turning Comment PDUs into chat messages, updating the roster and notifying the
///   listener
/// * a send worker draining the outbound queue
///
/// Messages submitted while disconnected are queued and sent on the next connect.
pub struct ChatSession {
    config: ChatConfig,
    identity: Arc<RwLock<ChatIdentity>>,
    roster: Arc<UserRoster>,
    listener: Arc<dyn ChatListener>,
    socket_opener: Arc<dyn SocketOpener>,
    receive_stats: Arc<ReceiveStats>,
    send_queue: mpsc::UnboundedSender<ChatMessage>,
    send_queue_receiver: Arc<Mutex<mpsc::UnboundedReceiver<ChatMessage>>>,
    connection: Mutex<Option<Connection>>,
}

impl ChatSession {
    pub fn new(config: ChatConfig, listener: Arc<dyn ChatListener>, socket_opener: Arc<dyn SocketOpener>) -> Result<ChatSession, ConfigError> {
        config.validate()?;

        let identity = ChatIdentity {
            sender_id: config.sender_id,
            receiver_id: config.receiver_id,
            exercise_id: config.exercise_id,
            username: config.username.clone(),
        };
        let (send_queue, send_queue_receiver) = mpsc::unbounded_channel();

        Ok(ChatSession {
            config,
            identity: Arc::new(RwLock::new(identity)),
            roster: Default::default(),
            listener,
            socket_opener,
            receive_stats: Default::default(),
            send_queue,
            send_queue_receiver: Arc::new(Mutex::new(send_queue_receiver)),
            connection: Default::default(),
        })
    }

    /// Opens the socket and starts the workers. Calling this on a connected session does nothing.
    pub async fn connect(&self) -> anyhow::Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            warn!("connect called, but the session is already connected");
            return Ok(());
        }

        let group_addr = self.config.group_addr;
        let socket = self.socket_opener.open(group_addr).await
            .with_context(|| format!("cannot open socket for {}", group_addr))?;

        let (shutdown, shutdown_receiver) = watch::channel(false);
        let (inbound_queue, inbound) = mpsc::channel(self.config.inbound_queue_capacity);

        let receive_pipeline = ReceivePipeline::new(
            socket.clone(),
            inbound_queue,
            shutdown_receiver.clone(),
            self.receive_stats.clone(),
            self.config.max_pdu_size,
        );
        let listener = self.listener.clone();
        let receive_worker = tokio::spawn(async move {
            if let Err(e) = receive_pipeline.run().await {
                listener.on_transport_error(&e);
            }
        });

        let handler = Arc::new(InboundHandler {
            identity: self.identity.clone(),
            roster: self.roster.clone(),
            listener: self.listener.clone(),
        });
        let extractor = tokio::spawn(run_extractor(inbound, handler));

        let send_pipeline = SendPipeline::new(socket.clone(), group_addr);
        let send_queue_receiver = self.send_queue_receiver.clone();
        let listener = self.listener.clone();
        let send_worker = tokio::spawn(async move {
            let mut queue = send_queue_receiver.lock().await;
            let result = send_pipeline.run(&mut queue, shutdown_receiver, |e| listener.on_transport_error(e)).await;
            if let Err(e) = result {
                listener.on_transport_error(&e);
            }
        });

        *connection = Some(Connection {
            socket,
            shutdown,
            workers: vec![receive_worker, extractor, send_worker],
        });
        info!("connected to {}", group_addr);
        Ok(())
    }

    /// Stops the workers and closes the socket, waiting for the workers to finish. Calling this on
    ///  a disconnected session does nothing.
    pub async fn disconnect(&self) {
        let connection = match self.connection.lock().await.take() {
            Some(c) => c,
            None => {
                warn!("disconnect called, but the session is not connected");
                return;
            }
        };

        debug!("shutting down the receive and send workers");
        connection.shutdown.send_replace(true);
        connection.socket.close();

        for worker in connection.workers {
            if let Err(e) = worker.await {
                error!("chat worker terminated abnormally: {}", e);
            }
        }
        info!("disconnected from {}", self.config.group_addr);
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Queues a chat message for sending. Our own message is added to the roster right away.
    pub async fn submit_outgoing(&self, text: &str) -> SubmitResult {
        let text = trim_text(text);
        if text.is_empty() {
            warn!("not sending blank chat message");
            return SubmitResult::RejectedEmpty;
        }

        let message = {
            let identity = self.identity.read().await;
            ChatMessage::new(text, &identity.username, identity.sender_id, identity.receiver_id, identity.exercise_id)
        };

        self.roster.observe(&message).await;
        self.listener.on_roster_changed(&self.roster.snapshot().await);

        if self.send_queue.send(message).is_err() {
            // the receiver lives as long as the session
            error!("outbound queue is closed - dropping chat message");
        }
        SubmitResult::Accepted
    }

    pub async fn roster(&self) -> Vec<UserRecord> {
        self.roster.snapshot().await
    }

    pub fn receive_stats(&self) -> ReceiveStatsSnapshot {
        self.receive_stats.snapshot()
    }

    pub fn group_addr(&self) -> std::net::SocketAddr {
        self.config.group_addr
    }

    pub async fn identity(&self) -> ChatIdentity {
        self.identity.read().await.clone()
    }

    pub async fn set_sender_id(&self, sender_id: EntityId) {
        debug!("sender id set to {}", sender_id);
        self.identity.write().await.sender_id = sender_id;
    }

    pub async fn set_receiver_id(&self, receiver_id: EntityId) {
        debug!("receiver id set to {}", receiver_id);
        self.identity.write().await.receiver_id = receiver_id;
    }

    /// sets a single component of the sender id from user input
    pub async fn set_sender_component(&self, component: IdComponent, text: &str) -> Result<(), ConfigError> {
        let value = parse_id_component(component.name(), text)?;
        let mut identity = self.identity.write().await;
        identity.sender_id = component.apply(identity.sender_id, value);
        debug!("sender {} set to {}, sender id is now {}", component.name(), value, identity.sender_id);
        Ok(())
    }

    /// sets a single component of the receiver id from user input
    pub async fn set_receiver_component(&self, component: IdComponent, text: &str) -> Result<(), ConfigError> {
        let value = parse_id_component(component.name(), text)?;
        let mut identity = self.identity.write().await;
        identity.receiver_id = component.apply(identity.receiver_id, value);
        debug!("receiver {} set to {}, receiver id is now {}", component.name(), value, identity.receiver_id);
        Ok(())
    }

    pub async fn set_exercise_id(&self, text: &str) -> Result<(), ConfigError> {
        let exercise_id = parse_exercise_id(text)?;
        self.identity.write().await.exercise_id = exercise_id;
        Ok(())
    }

    pub async fn set_username(&self, username: &str) {
        self.identity.write().await.username = trim_text(username).to_string();
    }
}
