use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::chat::chat_message::ChatMessage;
use crate::dis::comment_pdu::DecodedPdu;
use crate::dis::variable_datum::{VariableDatum, DATUM_ID_DISPLAY_NAME, DATUM_ID_MESSAGE_TEXT};
use crate::messaging::receive_pipeline::ReceivedPdu;

/// Decouples extraction from what happens to a chat message afterwards
#[async_trait]
pub trait ChatMessageHandler: Send + Sync {
    async fn on_chat_message(&self, message: ChatMessage);
}

/// Turns a received PDU into a chat message if it is a Comment PDU that carries both a display
///  name and a message text. Anything else is not chat traffic, and that is not an error.
pub fn extract_chat_message(received: &ReceivedPdu) -> Option<ChatMessage> {
    let comment = match &received.pdu {
        DecodedPdu::Comment(c) => &c.pdu,
        DecodedPdu::Ignored(_) => return None,
    };

    let (name, text) = match (comment.datum(DATUM_ID_DISPLAY_NAME), comment.datum(DATUM_ID_MESSAGE_TEXT)) {
        (Some(name), Some(text)) => (name, text),
        (name, text) => {
            debug!(from = %comment.originating_id, has_name = name.is_some(), has_text = text.is_some(),
                "comment PDU without a complete chat payload - skipping");
            return None;
        }
    };

    Some(ChatMessage {
        text: decode_text(text).trim().to_string(),
        sender_name: decode_text(name).trim().to_string(),
        sender_id: comment.originating_id,
        receiver_id: comment.receiving_id,
        exercise_id: comment.exercise_id,
        origin: Some(received.source),
        sent_at: received.sent_at,
    })
}

fn decode_text(datum: &VariableDatum) -> String {
    String::from_utf8_lossy(&datum.payload).into_owned()
}

/// Pulls received PDUs from the queue until it is closed, passing chat messages on in the order
///  they were received
#[tracing::instrument(name = "extract", skip_all)]
pub async fn run_extractor(mut inbound: mpsc::Receiver<ReceivedPdu>, handler: Arc<dyn ChatMessageHandler>) {
    debug!("starting chat extractor");

    while let Some(received) = inbound.recv().await {
        match extract_chat_message(&received) {
            Some(message) => {
                trace!("chat message from {:?}: {}", received.source, message);
                handler.on_chat_message(message).await;
            }
            None => {
                trace!("no chat message in PDU from {:?}", received.source);
            }
        }
    }

    debug!("inbound queue closed - chat extractor finished");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dis::comment_pdu::CommentPdu;
    use crate::dis::entity_id::EntityId;
    use crate::dis::pdu_header::PduHeader;
    use crate::test_util::pdus::{comment_with_datums, entity_state_pdu, hello_world_comment, ALICE};
    use bytes::Bytes;
    use chrono::Utc;
    use rstest::rstest;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn source() -> SocketAddr {
        "10.0.0.7:3000".parse().unwrap()
    }

    fn received(frame: &[u8]) -> ReceivedPdu {
        ReceivedPdu {
            pdu: DecodedPdu::decode(frame).unwrap(),
            source: source(),
            received_at: Utc::now(),
            sent_at: None,
        }
    }

    fn name(s: &str) -> VariableDatum {
        VariableDatum::from_text(DATUM_ID_DISPLAY_NAME, s)
    }

    fn text(s: &str) -> VariableDatum {
        VariableDatum::from_text(DATUM_ID_MESSAGE_TEXT, s)
    }

    #[test]
    fn test_extract_hello_world() {
        let message = extract_chat_message(&received(&hello_world_comment())).unwrap();
        assert_eq!(message.text, "hello world");
        assert_eq!(message.sender_name, "alice");
        assert_eq!(message.sender_id, ALICE);
        assert_eq!(message.receiver_id, EntityId::NONE);
        assert_eq!(message.exercise_id, 5);
        assert_eq!(message.origin, Some(source()));
    }

    #[rstest]
    #[case::name_only(vec![name("alice")])]
    #[case::text_only(vec![text("hello")])]
    #[case::neither(vec![])]
    #[case::other_datums(vec![VariableDatum::new(17, Bytes::from_static(b"x")), VariableDatum::new(600_003, Bytes::from_static(b"y"))])]
    fn test_extract_incomplete(#[case] datums: Vec<VariableDatum>) {
        assert_eq!(extract_chat_message(&received(&comment_with_datums(ALICE, datums))), None);
    }

    #[test]
    fn test_extract_ignored_kind() {
        assert_eq!(extract_chat_message(&received(&entity_state_pdu())), None);
    }

    #[rstest]
    #[case::text_first(vec![text("hello"), name("alice")])]
    #[case::name_first(vec![name("alice"), text("hello")])]
    #[case::with_noise(vec![VariableDatum::new(1, Bytes::from_static(b"\0")), text("hello"), VariableDatum::new(2, Bytes::new()), name("alice")])]
    fn test_extract_order_does_not_matter(#[case] datums: Vec<VariableDatum>) {
        let message = extract_chat_message(&received(&comment_with_datums(ALICE, datums))).unwrap();
        assert_eq!(message.text, "hello");
        assert_eq!(message.sender_name, "alice");
    }

    #[test]
    fn test_extract_last_occurrence_wins() {
        let datums = vec![name("first"), text("one"), name("second"), text("two")];
        let message = extract_chat_message(&received(&comment_with_datums(ALICE, datums))).unwrap();
        assert_eq!(message.sender_name, "second");
        assert_eq!(message.text, "two");
    }

    #[test]
    fn test_extract_trims() {
        let datums = vec![name("  alice\t"), text("\n hello world  ")];
        let message = extract_chat_message(&received(&comment_with_datums(ALICE, datums))).unwrap();
        assert_eq!(message.sender_name, "alice");
        assert_eq!(message.text, "hello world");
    }

    #[test]
    fn test_extract_invalid_utf8() {
        let datums = vec![name("alice"), VariableDatum::new(DATUM_ID_MESSAGE_TEXT, Bytes::from_static(b"caf\xe9"))];
        let message = extract_chat_message(&received(&comment_with_datums(ALICE, datums))).unwrap();
        assert_eq!(message.text, "caf\u{fffd}");
    }

    #[test]
    fn test_extract_keeps_timestamps() {
        let comment = CommentPdu {
            exercise_id: 3,
            timestamp: 0,
            originating_id: ALICE,
            receiving_id: EntityId::new(1, 1, 200),
            variable_datums: vec![name("alice"), text("hi")],
        };
        let frame = comment.encode().unwrap();
        let sent_at = Utc::now();
        let pdu = ReceivedPdu {
            pdu: DecodedPdu::decode(&frame).unwrap(),
            source: source(),
            received_at: sent_at,
            sent_at: Some(sent_at),
        };

        let message = extract_chat_message(&pdu).unwrap();
        assert_eq!(message.sent_at, Some(sent_at));
        assert_eq!(message.receiver_id, EntityId::new(1, 1, 200));
        assert_eq!(message.exercise_id, 3);
        assert_eq!(PduHeader::declared_length(&frame), Some(frame.len() as u16));
    }

    struct CollectingHandler {
        messages: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatMessageHandler for CollectingHandler {
        async fn on_chat_message(&self, message: ChatMessage) {
            self.messages.lock().await.push(message);
        }
    }

    #[tokio::test]
    async fn test_run_extractor() {
        let handler = Arc::new(CollectingHandler { messages: Default::default() });
        let (queue, inbound) = mpsc::channel(16);
        let worker = tokio::spawn(run_extractor(inbound, handler.clone()));

        queue.send(received(&comment_with_datums(ALICE, vec![name("alice"), text("one")]))).await.unwrap();
        queue.send(received(&entity_state_pdu())).await.unwrap();
        queue.send(received(&comment_with_datums(ALICE, vec![name("alice")]))).await.unwrap();
        queue.send(received(&comment_with_datums(ALICE, vec![name("alice"), text("two")]))).await.unwrap();
        drop(queue);

        tokio::time::timeout(Duration::from_secs(1), worker).await
            .unwrap()
            .unwrap();

        let texts = handler.messages.lock().await.iter()
            .map(|m| m.text.clone())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["one", "two"]);
    }
}
