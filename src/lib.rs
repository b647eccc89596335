//! Chat over DIS (Distributed Interactive Simulation) Comment PDUs on a shared UDP multicast
//!  group. Every participant receives every PDU, including the echoes of its own traffic.
//!
//! * [dis] is the wire level: entity ids, the Comment PDU, variable datum records and the DIS
//!    timestamp encoding
//! * [messaging] moves datagrams between a socket and the application: one receive worker, one
//!    send worker
//! * [chat] turns Comment PDUs into chat messages, tracks who is around, and wires everything
//!    together in a [chat::chat_session::ChatSession]

pub mod dis;
pub mod messaging;
pub mod chat;
pub mod util;
pub mod test_util;

