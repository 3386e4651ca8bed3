mod piece_picker;
mod work_queue;

use crate::{
    metainfo::PieceHash,
    peers::{PeerAddr, PieceIndex, PieceLength},
};

pub use piece_picker::{download, PiecePicker};
pub use work_queue::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceInfo {
    pub piece_id: PieceIndex,
    pub hash: PieceHash,
    pub length: PieceLength,
}

/// A verified piece on its way from a worker to the piece picker.
#[derive(Debug)]
pub struct PieceDone {
    pub piece_id: PieceIndex,
    pub piece: Vec<u8>,
    pub peer_addr: PeerAddr,
}
