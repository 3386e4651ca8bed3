use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::PeerError;
use crate::torrent::{InfoHash, PeerId};

/// `<pstrlen><pstr><reserved><info_hash><peer_id>`, sent once in each direction
/// before any framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandshake {
    pub protocol: Vec<u8>,
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl PeerHandshake {
    pub const PROTOCOL: &'static [u8] = b"BitTorrent protocol";
    const RESERVED_LEN: usize = 8;
    // reserved + info hash + peer id
    const TAIL_LEN: usize = Self::RESERVED_LEN + 20 + 20;

    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: Self::PROTOCOL.to_vec(),
            info_hash,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.protocol.len() + Self::TAIL_LEN);
        // the protocol id is at most 255 bytes for anything we construct or decode
        bytes.push(self.protocol.len() as u8);
        bytes.extend_from_slice(&self.protocol);
        bytes.extend_from_slice(&[0; Self::RESERVED_LEN]);
        bytes.extend_from_slice(self.info_hash.as_bytes());
        bytes.extend_from_slice(self.peer_id.as_bytes());
        bytes
    }

    /// Reads exactly one handshake off `reader`, consuming nothing past it. The
    /// reserved bytes are skipped.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, PeerError>
    where
        R: AsyncRead + Unpin,
    {
        let pstrlen = reader.read_u8().await? as usize;
        if pstrlen == 0 {
            return Err(PeerError::Protocol(
                "handshake protocol identifier length is zero".to_string(),
            ));
        }

        let mut buf = vec![0; pstrlen + Self::TAIL_LEN];
        reader.read_exact(&mut buf).await?;

        let (protocol, rest) = buf.split_at(pstrlen);
        let rest = &rest[Self::RESERVED_LEN..];

        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&rest[..20]);
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&rest[20..]);

        Ok(Self {
            protocol: protocol.to_vec(),
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        })
    }
}
