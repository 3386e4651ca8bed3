use std::net::SocketAddr;

pub mod connection;
pub mod download_worker;
pub mod progress;

pub type PeerAddr = SocketAddr;
pub type PieceIndex = usize;
pub type PieceLength = u32;
pub type BlockLength = u32;
pub type BlockOffset = u32;
