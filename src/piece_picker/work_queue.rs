use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::PieceInfo;

/// Pieces waiting for a worker. Shared by every worker and the piece picker:
/// pushing never blocks, popping waits until a piece is queued or the queue is
/// closed. Once closed, pops drain what is left and then return `None`.
#[derive(Debug, Default)]
pub struct WorkQueue {
    pieces: Mutex<VecDeque<PieceInfo>>,
    available: Notify,
    closed: CancellationToken,
}

impl WorkQueue {
    pub fn new(pieces: Vec<PieceInfo>) -> Self {
        Self {
            pieces: Mutex::new(pieces.into()),
            available: Notify::new(),
            closed: CancellationToken::new(),
        }
    }

    fn pieces(&self) -> MutexGuard<'_, VecDeque<PieceInfo>> {
        // a panic while holding the lock cannot leave the deque half updated
        self.pieces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, piece: PieceInfo) {
        self.pieces().push_back(piece);
        self.available.notify_one();
    }

    pub async fn pop(&self) -> Option<PieceInfo> {
        loop {
            // register interest before looking, so a push in between is not missed
            let available = self.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            let next = self.pieces().pop_front();
            if let Some(piece) = next {
                return Some(piece);
            }
            if self.closed.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = &mut available => {}
                _ = self.closed.cancelled() => {}
            }
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub(crate) fn len(&self) -> usize {
        self.pieces().len()
    }
}
