use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::peers::connection::PeerConnection;
use crate::peers::download_worker::PeerDownloadWorker;
use crate::peers::PeerAddr;
use crate::prelude::*;
use crate::torrent::{InfoHash, PeerId, Torrent};

use super::{PieceDone, PieceInfo, WorkQueue};

/// Owns the download as a whole: fills the work queue, runs one worker per peer
/// and copies verified pieces into the output buffer at their offsets. It is the
/// only writer of that buffer.
pub struct PiecePicker {
    name: String,
    info_hash: InfoHash,
    piece_infos: Vec<PieceInfo>,
    piece_length: usize,
    length: usize,
    queue: Arc<WorkQueue>,
    config: Arc<DownloadConfig>,
    active_peers: Arc<AtomicUsize>,
}

/// What every peer worker gets a handle to.
#[derive(Clone)]
struct WorkerShared {
    info_hash: InfoHash,
    peer_id: PeerId,
    queue: Arc<WorkQueue>,
    piece_tx: mpsc::Sender<PieceDone>,
    config: Arc<DownloadConfig>,
    active_peers: Arc<AtomicUsize>,
}

impl PiecePicker {
    const PIECE_BUFFER_SIZE: usize = 50;

    pub fn new(torrent: &Torrent, config: DownloadConfig) -> Result<Self, DownloadError> {
        let piece_infos = torrent.piece_infos()?;
        let queue = Arc::new(WorkQueue::new(piece_infos.clone()));

        Ok(Self {
            name: torrent.name.clone(),
            info_hash: torrent.info_hash,
            piece_infos,
            piece_length: torrent.piece_length as usize,
            length: torrent.length,
            queue,
            config: Arc::new(config),
            active_peers: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Downloads every piece from `peers` and returns the assembled content.
    /// Fails only if there is nobody to ask, or if every worker has given up
    /// while pieces are still missing.
    #[instrument(name = "piece picker", level = "info", skip_all, fields(name = %self.name))]
    pub async fn run(self, peers: &[PeerAddr], peer_id: PeerId) -> Result<Vec<u8>, DownloadError> {
        if peers.is_empty() {
            return Err(DownloadError::NoPeers);
        }

        let total = self.piece_infos.len();
        info!(pieces = total, peers = peers.len(), "starting download");

        let (piece_tx, mut piece_rx) = mpsc::channel(Self::PIECE_BUFFER_SIZE);
        let shared = WorkerShared {
            info_hash: self.info_hash,
            peer_id,
            queue: Arc::clone(&self.queue),
            piece_tx,
            config: Arc::clone(&self.config),
            active_peers: Arc::clone(&self.active_peers),
        };

        let mut workers = JoinSet::new();
        for &peer_addr in peers {
            workers.spawn(spawn_peer(peer_addr, shared.clone()));
        }
        // the channel closes once the last worker is gone
        drop(shared);

        let mut output = vec![0; self.length];
        let mut received = vec![false; total];
        let mut n_received = 0;

        while n_received < total {
            let Some(PieceDone {
                piece_id,
                piece,
                peer_addr,
            }) = piece_rx.recv().await
            else {
                let remaining = total - n_received;
                error!(remaining, "all peer workers exited before the download finished");
                self.shutdown(workers).await;
                return Err(DownloadError::Stalled { remaining });
            };

            if received.get(piece_id) != Some(&false) {
                warn!(piece_id, "piece received more than once, ignoring");
                continue;
            }

            let begin = piece_id * self.piece_length;
            output[begin..begin + piece.len()].copy_from_slice(&piece);
            received[piece_id] = true;
            n_received += 1;

            let percent = n_received as f64 / total as f64 * 100.0;
            let active_peers = self.active_peers.load(Ordering::Relaxed);
            info!(
                piece_id,
                peer = %peer_addr,
                active_peers,
                "({percent:.2}%) downloaded piece #{piece_id} from {active_peers} peers"
            );
        }

        info!("received all pieces, shutting down piece picker");
        self.shutdown(workers).await;
        Ok(output)
    }

    async fn shutdown(&self, mut workers: JoinSet<()>) {
        self.queue.close();
        workers.shutdown().await;
    }
}

/// Entry point for the core: fetch all of `torrent` from `peers`.
pub async fn download(
    torrent: &Torrent,
    peers: &[PeerAddr],
    peer_id: PeerId,
    config: DownloadConfig,
) -> Result<Vec<u8>, DownloadError> {
    PiecePicker::new(torrent, config)?.run(peers, peer_id).await
}

/// Counts a worker as active for as long as it is alive past the handshake.
struct ActivePeer(Arc<AtomicUsize>);

impl ActivePeer {
    fn enter(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self(count)
    }
}

impl Drop for ActivePeer {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[instrument(level = "info", name = "peer worker", fields(peer = %peer_addr), skip_all)]
async fn spawn_peer(peer_addr: PeerAddr, shared: WorkerShared) {
    let WorkerShared {
        info_hash,
        peer_id,
        queue,
        piece_tx,
        config,
        active_peers,
    } = shared;

    let connection = match PeerConnection::connect(peer_addr, peer_id, info_hash, &config).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(%err, "could not handshake with peer, disconnecting");
            return;
        }
    };
    info!(remote_peer_id = %connection.remote_peer_id(), "completed handshake with peer");

    let _active = ActivePeer::enter(active_peers);
    match PeerDownloadWorker::new(connection, queue, piece_tx, config)
        .run()
        .await
    {
        Ok(()) => debug!("peer worker finished"),
        Err(err) => warn!(%err, "disconnecting from peer"),
    }
}
