//! Utilities for testing code that talks to a DIS network: an in-memory multicast network,
//!  canned PDUs and a listener that records what a session reports. They are part of the
//!  regular (non-#[cfg(test)]) code so applications built on top of this crate can use them too.

pub mod listener;
pub mod loopback;
pub mod pdus;
