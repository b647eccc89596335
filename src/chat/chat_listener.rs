#[cfg(test)] use mockall::automock;

use crate::chat::chat_message::ChatMessage;
use crate::chat::user_roster::UserRecord;
use crate::messaging::transport::TransportError;

/// The application's view of a chat session. Callbacks are invoked from the session's worker
///  tasks and must not block.
#[cfg_attr(test, automock)]
pub trait ChatListener: Send + Sync + 'static {
    /// a chat message from someone else - echoes of this session's own messages are not reported
    fn on_message_received(&self, message: &ChatMessage);

    /// the complete roster, after every change
    fn on_roster_changed(&self, users: &[UserRecord]);

    fn on_transport_error(&self, error: &TransportError) {
        let _ = error;
    }
}
