//! The subset of the DIS wire protocol (IEEE 1278.1) needed to carry chat: the PDU header,
//!  entity ids, the Comment PDU with its variable datum records, and DIS timestamps.
//!
//! All numbers on the wire are network byte order (BE).

pub mod comment_pdu;
pub mod dis_time;
pub mod entity_id;
pub mod pdu_error;
pub mod pdu_header;
pub mod variable_datum;
