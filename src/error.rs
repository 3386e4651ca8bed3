use std::io;

use thiserror::Error;

use crate::peers::PieceIndex;
use crate::torrent::InfoHash;

/// Errors produced while talking to a single peer.
///
/// Everything except [`PeerError::Integrity`] means the connection is no longer
/// trusted and the worker owning it should stop.
#[derive(Debug, Error)]
pub enum PeerError {
    /// transport failure: dial, read, write, timeout or an early EOF.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("handshake error: expected info hash {expected}, peer sent {received}")]
    Handshake {
        expected: InfoHash,
        received: InfoHash,
    },

    #[error("piece {index} failed integrity check")]
    Integrity { index: PieceIndex },

    /// a piece payload that would land outside the buffer it was meant for.
    #[error("invalid piece payload: {0}")]
    Validation(String),
}

impl PeerError {
    pub(crate) fn timed_out(what: &str) -> Self {
        PeerError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out while {what}"),
        ))
    }

    pub(crate) fn connection_closed() -> Self {
        PeerError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed the connection",
        ))
    }
}

/// Fatal conditions for a whole download.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no peers to download from")]
    NoPeers,

    #[error("invalid torrent layout: {0}")]
    InvalidLayout(String),

    #[error("every peer worker exited with {remaining} pieces still missing")]
    Stalled { remaining: usize },
}
