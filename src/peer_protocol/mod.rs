//! Peer wire protocol: the fixed handshake and the length prefixed message frames
//! that follow it.

pub mod codec;
pub mod handshake;
