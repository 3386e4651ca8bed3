use std::collections::HashSet;
use std::sync::Arc;

use sha1_smol::Sha1;
use tokio::sync::mpsc;

use crate::config::DownloadConfig;
use crate::error::PeerError;
use crate::peer_protocol::codec::PeerStream;
use crate::piece_picker::{PieceDone, PieceInfo, WorkQueue};
use crate::prelude::*;

use super::connection::PeerConnection;
use super::progress::attempt_download_piece;
use super::PieceIndex;

/// Pulls pieces off the shared queue and downloads the ones its peer has, for as
/// long as the connection holds up.
pub struct PeerDownloadWorker<T: PeerStream> {
    connection: PeerConnection<T>,
    queue: Arc<WorkQueue>,
    piece_tx: mpsc::Sender<PieceDone>,
    config: Arc<DownloadConfig>,
}

impl<T: PeerStream> PeerDownloadWorker<T> {
    pub fn new(
        connection: PeerConnection<T>,
        queue: Arc<WorkQueue>,
        piece_tx: mpsc::Sender<PieceDone>,
        config: Arc<DownloadConfig>,
    ) -> Self {
        Self {
            connection,
            queue,
            piece_tx,
            config,
        }
    }

    /// Runs until the queue is closed, the piece picker goes away, or an attempt
    /// fails. A failed attempt puts its piece back and ends the worker. A piece
    /// that fails verification is put back and passed over by this worker until
    /// it next backs off, so other workers get to it first.
    #[instrument(level = "debug", name = "worker loop", skip_all)]
    pub async fn run(mut self) -> Result<(), PeerError> {
        debug!("sending unchoke and interested");
        self.connection.send_unchoke().await?;
        self.connection.send_interested().await?;

        // pieces in a row this peer could not serve
        let mut skipped = 0;
        // pieces this peer sent corrupt since the last back off
        let mut rejected: HashSet<PieceIndex> = HashSet::new();

        while let Some(piece) = self.queue.pop().await {
            if !self.connection.bitfield().has_piece(piece.piece_id)
                || rejected.contains(&piece.piece_id)
            {
                self.queue.push(piece);
                skipped += 1;
                if skipped >= self.queue.len() {
                    trace!("nothing queued this peer can serve, backing off");
                    tokio::time::sleep(self.config.idle_wait).await;
                    skipped = 0;
                    rejected.clear();
                } else {
                    tokio::task::yield_now().await;
                }
                continue;
            }
            skipped = 0;

            debug!("downloading piece {}", piece.piece_id);
            let buf = match attempt_download_piece(&mut self.connection, &piece, &self.config).await
            {
                Ok(buf) => buf,
                Err(err) => {
                    warn!(piece_id = piece.piece_id, %err, "piece download failed, dropping peer");
                    self.queue.push(piece);
                    return Err(err);
                }
            };

            if let Err(err) = verify_piece(&piece, &buf) {
                warn!(piece_id = piece.piece_id, %err, "discarding piece");
                rejected.insert(piece.piece_id);
                self.queue.push(piece);
                continue;
            }

            // a failed `have` ends the worker after the piece is handed over
            let announced = self.connection.send_have(piece.piece_id).await;

            info!("download complete, submitting piece {}", piece.piece_id);
            let done = PieceDone {
                piece_id: piece.piece_id,
                piece: buf,
                peer_addr: self.connection.peer_addr(),
            };
            if self.piece_tx.send(done).await.is_err() {
                debug!("piece picker is gone, stopping worker");
                return Ok(());
            }

            announced?;
        }

        debug!("work queue closed, worker exiting");
        Ok(())
    }
}

/// Checks downloaded bytes against the piece's SHA-1 hash.
pub fn verify_piece(piece: &PieceInfo, buf: &[u8]) -> Result<(), PeerError> {
    let hash = Sha1::from(buf).digest().bytes();
    if hash != piece.hash {
        return Err(PeerError::Integrity {
            index: piece.piece_id,
        });
    }

    trace!("piece hash check succeeded");
    Ok(())
}
