use tokio::time::timeout;

use crate::config::DownloadConfig;
use crate::error::PeerError;
use crate::peer_protocol::codec::{Message, MessageKind, PeerStream};
use crate::piece_picker::PieceInfo;
use crate::prelude::*;

use super::connection::PeerConnection;
use super::{BlockLength, BlockOffset, PieceIndex, PieceLength};

/// State of one attempt at one piece. Created fresh per attempt and thrown away
/// afterwards, whatever the outcome.
#[derive(Debug)]
pub struct PieceDownloadProgress {
    piece_id: PieceIndex,
    piece: Vec<u8>,
    downloaded: usize,
    requested: PieceLength,
    backlog: u32,
    max_backlog: u32,
    block_size: BlockLength,
}

impl PieceDownloadProgress {
    pub fn new(piece_id: PieceIndex, length: PieceLength, config: &DownloadConfig) -> Self {
        Self {
            piece_id,
            piece: vec![0; length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
            max_backlog: config.max_backlog,
            block_size: config.block_size,
        }
    }

    fn length(&self) -> PieceLength {
        // constructed from a PieceLength
        self.piece.len() as PieceLength
    }

    pub fn is_done(&self) -> bool {
        self.downloaded >= self.piece.len()
    }

    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    /// Offset and length of the next block to request, if the backlog has room and
    /// part of the piece is still unrequested. Counts the block as in flight.
    pub fn next_block_info(&mut self) -> Option<(BlockOffset, BlockLength)> {
        if self.backlog >= self.max_backlog || self.requested >= self.length() {
            return None;
        }

        let begin = self.requested;
        let length = self.block_size.min(self.length() - self.requested);
        self.requested += length;
        self.backlog += 1;
        Some((begin, length))
    }

    /// Applies a piece message to the buffer and releases one backlog slot.
    pub fn receive_block(&mut self, message: &Message) -> Result<usize, PeerError> {
        let written = message.parse_piece(self.piece_id, &mut self.piece)?;
        self.downloaded += written;
        self.backlog = self.backlog.saturating_sub(1);
        Ok(written)
    }

    pub fn into_piece(self) -> Vec<u8> {
        self.piece
    }

    fn handle_message<T: PeerStream>(
        &mut self,
        connection: &mut PeerConnection<T>,
        message: Option<Message>,
    ) -> Result<(), PeerError> {
        let Some(message) = message else {
            trace!("keep-alive received");
            return Ok(());
        };

        match message.kind {
            MessageKind::Unchoke => {
                debug!("peer unchoked");
                connection.set_choked(false);
            }
            MessageKind::Choke => {
                debug!("peer choked");
                connection.set_choked(true);
            }
            MessageKind::Have => {
                let index = message.parse_have()?;
                trace!(index, "peer announced piece");
                connection.bitfield_mut().set_piece(index);
            }
            MessageKind::Piece => {
                let written = self.receive_block(&message)?;
                trace!(
                    written,
                    downloaded = self.downloaded,
                    backlog = self.backlog,
                    "block received"
                );
            }
            kind => trace!(?kind, "ignoring message"),
        }
        Ok(())
    }

    async fn run<T: PeerStream>(
        mut self,
        connection: &mut PeerConnection<T>,
    ) -> Result<Vec<u8>, PeerError> {
        while !self.is_done() {
            if !connection.is_choked() {
                while let Some((begin, length)) = self.next_block_info() {
                    trace!(begin, length, "requesting block");
                    connection.send_request(self.piece_id, begin, length).await?;
                }
            }

            let message = connection.read_message().await?;
            self.handle_message(connection, message)?;
        }

        Ok(self.into_piece())
    }
}

/// Downloads every block of `piece` from `connection`, keeping at most
/// `max_backlog` requests in flight and pausing requests while choked. The whole
/// attempt is bounded by `piece_timeout`. The returned bytes are not verified.
#[instrument(level = "debug", name = "attempt piece", skip_all, fields(piece_id = piece.piece_id))]
pub async fn attempt_download_piece<T: PeerStream>(
    connection: &mut PeerConnection<T>,
    piece: &PieceInfo,
    config: &DownloadConfig,
) -> Result<Vec<u8>, PeerError> {
    let progress = PieceDownloadProgress::new(piece.piece_id, piece.length, config);

    timeout(config.piece_timeout, progress.run(connection))
        .await
        .map_err(|_| PeerError::timed_out("downloading a piece"))?
}
