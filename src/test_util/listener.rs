use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::chat::chat_listener::ChatListener;
use crate::chat::chat_message::ChatMessage;
use crate::chat::user_roster::UserRecord;
use crate::messaging::transport::TransportError;

#[derive(Debug, Clone)]
pub enum ListenerEvent {
    Message(ChatMessage),
    RosterChanged(Vec<UserRecord>),
    /// the error's `Display` text, and whether it is fatal
    TransportError(String, bool),
}

/// A [ChatListener] that forwards every callback to a channel, so tests can wait for events
///  from a session's worker tasks
pub struct RecordingListener {
    events: mpsc::UnboundedSender<ListenerEvent>,
}

impl RecordingListener {
    pub fn new() -> (Arc<RecordingListener>, ListenerEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Arc::new(RecordingListener { events }), ListenerEvents { receiver, skipped: VecDeque::new() })
    }

    fn record(&self, event: ListenerEvent) {
        // the test may have stopped listening
        let _ = self.events.send(event);
    }
}

impl ChatListener for RecordingListener {
    fn on_message_received(&self, message: &ChatMessage) {
        self.record(ListenerEvent::Message(message.clone()));
    }

    fn on_roster_changed(&self, users: &[UserRecord]) {
        self.record(ListenerEvent::RosterChanged(users.to_vec()));
    }

    fn on_transport_error(&self, error: &TransportError) {
        self.record(ListenerEvent::TransportError(error.to_string(), error.is_fatal()));
    }
}

/// The receiving end of a [RecordingListener]. Events that one of the `next_*` lookups skips
///  are kept, in order, for later lookups.
pub struct ListenerEvents {
    receiver: mpsc::UnboundedReceiver<ListenerEvent>,
    skipped: VecDeque<ListenerEvent>,
}

impl ListenerEvents {
    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn receive(&mut self) -> Option<ListenerEvent> {
        tokio::time::timeout(Self::TIMEOUT, self.receiver.recv()).await
            .ok()
            .flatten()
    }

    /// waits for the next event; `None` if there is none within a couple of seconds
    pub async fn next(&mut self) -> Option<ListenerEvent> {
        match self.skipped.pop_front() {
            Some(event) => Some(event),
            None => self.receive().await,
        }
    }

    async fn next_matching<T>(&mut self, mut pick: impl FnMut(ListenerEvent) -> Result<T, ListenerEvent>) -> Option<T> {
        let mut idx = 0;
        while let Some(event) = self.skipped.remove(idx) {
            match pick(event) {
                Ok(found) => return Some(found),
                Err(event) => {
                    self.skipped.insert(idx, event);
                    idx += 1;
                }
            }
        }

        loop {
            match pick(self.receive().await?) {
                Ok(found) => return Some(found),
                Err(event) => self.skipped.push_back(event),
            }
        }
    }

    /// waits for the next chat message
    pub async fn next_message(&mut self) -> Option<ChatMessage> {
        self.next_matching(|event| match event {
            ListenerEvent::Message(m) => Ok(m),
            other => Err(other),
        }).await
    }

    /// waits for the next transport error
    pub async fn next_transport_error(&mut self) -> Option<(String, bool)> {
        self.next_matching(|event| match event {
            ListenerEvent::TransportError(msg, fatal) => Ok((msg, fatal)),
            other => Err(other),
        }).await
    }

    /// waits for a roster update satisfying the predicate
    pub async fn roster_matching(&mut self, predicate: impl Fn(&[UserRecord]) -> bool) -> Option<Vec<UserRecord>> {
        self.next_matching(|event| match event {
            ListenerEvent::RosterChanged(users) if predicate(&users) => Ok(users),
            other => Err(other),
        }).await
    }

    /// all events that have arrived so far, without waiting
    pub fn drain(&mut self) -> Vec<ListenerEvent> {
        let mut result = self.skipped.drain(..).collect::<Vec<_>>();
        while let Ok(event) = self.receiver.try_recv() {
            result.push(event);
        }
        result
    }
}
