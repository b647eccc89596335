//! Datagram I/O: the socket abstraction and the workers that connect it to the chat layer.

pub mod receive_pipeline;
pub mod send_pipeline;
pub mod transport;
