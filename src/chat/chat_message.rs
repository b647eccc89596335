use std::fmt::{Display, Formatter};
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use crate::dis::comment_pdu::CommentPdu;
use crate::dis::entity_id::EntityId;
use crate::dis::variable_datum::{VariableDatum, DATUM_ID_DISPLAY_NAME, DATUM_ID_MESSAGE_TEXT};

/// A chat line, either typed locally or extracted from a Comment PDU. Text and sender name are
///  always stored trimmed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChatMessage {
    pub text: String,
    pub sender_name: String,
    pub sender_id: EntityId,
    pub receiver_id: EntityId,
    pub exercise_id: u8,
    /// where the message came from; `None` for messages created locally
    pub origin: Option<SocketAddr>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Surrounding whitespace and NULs are not part of a name or a message. Receivers treat trailing
///  NULs in a text datum as a length mismatch, so they are never sent.
pub fn trim_text(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

impl ChatMessage {
    pub fn new(text: &str, sender_name: &str, sender_id: EntityId, receiver_id: EntityId, exercise_id: u8) -> ChatMessage {
        ChatMessage {
            text: trim_text(text).to_string(),
            sender_name: trim_text(sender_name).to_string(),
            sender_id,
            receiver_id,
            exercise_id,
            origin: None,
            sent_at: None,
        }
    }

    /// The wire representation: exactly two variable datums, display name first
    pub fn to_comment_pdu(&self, timestamp: u32) -> CommentPdu {
        CommentPdu {
            exercise_id: self.exercise_id,
            timestamp,
            originating_id: self.sender_id,
            receiving_id: self.receiver_id,
            variable_datums: vec![
                VariableDatum::from_text(DATUM_ID_DISPLAY_NAME, &self.sender_name),
                VariableDatum::from_text(DATUM_ID_MESSAGE_TEXT, &self.text),
            ],
        }
    }
}

impl Display for ChatMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.sender_id, self.sender_name, self.text)
    }
}
