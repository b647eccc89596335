use bytes::BufMut;
use chrono::Utc;

use crate::chat::chat_message::ChatMessage;
use crate::dis::comment_pdu::CommentPdu;
use crate::dis::dis_time::DisTimestamp;
use crate::dis::entity_id::EntityId;
use crate::dis::pdu_header::{PduHeader, PduType, ProtocolFamily, PROTOCOL_VERSION_DIS_6};
use crate::dis::variable_datum::VariableDatum;

pub const ALICE: EntityId = EntityId::new(1, 1, 100);
pub const BOB: EntityId = EntityId::new(1, 1, 200);

pub const TEST_EXERCISE_ID: u8 = 5;

pub fn hello_world_message() -> ChatMessage {
    ChatMessage::new("hello world", "alice", ALICE, EntityId::NONE, TEST_EXERCISE_ID)
}

/// a Comment PDU as a peer would send it: `alice` (1:1:100) saying `hello world`
pub fn hello_world_comment() -> Vec<u8> {
    comment_with_datums(ALICE, hello_world_message().to_comment_pdu(0).variable_datums)
}

/// a Comment PDU with arbitrary variable datums, time stamped with the current time
pub fn comment_with_datums(sender_id: EntityId, variable_datums: Vec<VariableDatum>) -> Vec<u8> {
    CommentPdu {
        exercise_id: TEST_EXERCISE_ID,
        timestamp: DisTimestamp::encode(&Utc::now(), true),
        originating_id: sender_id,
        receiving_id: EntityId::NONE,
        variable_datums,
    }
        .encode()
        .expect("test PDUs are small enough to be encoded")
        .to_vec()
}

/// an Entity State PDU, i.e. regular simulation traffic that has nothing to do with chat
pub fn entity_state_pdu() -> Vec<u8> {
    const LEN: u16 = 144;

    let mut buf = Vec::with_capacity(LEN as usize);
    PduHeader {
        protocol_version: PROTOCOL_VERSION_DIS_6,
        exercise_id: TEST_EXERCISE_ID,
        pdu_type: PduType::EntityState.into(),
        protocol_family: ProtocolFamily::EntityInformation.into(),
        timestamp: DisTimestamp::encode(&Utc::now(), true),
        length: LEN,
        status: 0,
    }
        .ser(&mut buf);
    buf.put_bytes(0, LEN as usize - PduHeader::SERIALIZED_LEN);
    buf
}
