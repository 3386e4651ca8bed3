use std::time::Duration;

/// Tunables for a download. The defaults are the values peers expect from a
/// well behaved client; tests shrink the timeouts.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// bound on the TCP dial.
    pub connect_timeout: Duration,
    /// applies separately to sending our handshake, reading theirs and reading the
    /// first bitfield.
    pub handshake_timeout: Duration,
    /// bound on one whole piece attempt.
    pub piece_timeout: Duration,
    /// block requests allowed in flight at once.
    pub max_backlog: u32,
    pub block_size: u32,
    /// how long a worker sleeps after cycling through queued pieces its peer
    /// does not have.
    pub idle_wait: Duration,
}

impl DownloadConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
    pub const PIECE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_BACKLOG: u32 = 5;
    pub const BLOCK_SIZE: u32 = 16384;
    pub const IDLE_WAIT: Duration = Duration::from_millis(20);
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Self::CONNECT_TIMEOUT,
            handshake_timeout: Self::HANDSHAKE_TIMEOUT,
            piece_timeout: Self::PIECE_TIMEOUT,
            max_backlog: Self::MAX_BACKLOG,
            block_size: Self::BLOCK_SIZE,
            idle_wait: Self::IDLE_WAIT,
        }
    }
}
