use std::fmt;

use bitvec::{order::Msb0, vec::BitVec};
use rand::Rng;

use crate::error::DownloadError;
use crate::metainfo::PieceHash;
use crate::peers::PieceIndex;
use crate::piece_picker::PieceInfo;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl InfoHash {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl PeerId {
    const CLIENT_PREFIX: &'static [u8; 8] = b"-SF0100-";

    /// azureus style id: client prefix followed by random bytes.
    pub fn random() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(Self::CLIENT_PREFIX);
        rand::thread_rng().fill(&mut id[8..]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({self})")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}

/// Which pieces a peer claims to have, one bit per piece, high bit of the first
/// byte is piece 0. The bit range is whatever the peer sent us, so indices past
/// the stored bytes read as missing and are never written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield(BitVec<u8, Msb0>);

impl Bitfield {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(BitVec::from_slice(bytes))
    }

    /// empty bitfield wide enough for `piece_count` pieces.
    pub fn with_piece_count(piece_count: usize) -> Self {
        Self(BitVec::repeat(false, piece_count.div_ceil(8) * 8))
    }

    pub fn has_piece(&self, index: PieceIndex) -> bool {
        self.0.get(index).is_some_and(|bit| *bit)
    }

    pub fn set_piece(&mut self, index: PieceIndex) {
        if index < self.0.len() {
            self.0.set(index, true);
        }
    }

    pub fn count_pieces(&self) -> usize {
        self.0.count_ones()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_raw_slice()
    }
}

/// Everything the core needs to know about the content being fetched.
#[derive(Debug, Clone)]
pub struct Torrent {
    pub name: String,
    pub info_hash: InfoHash,
    pub piece_length: u32,
    pub length: usize,
    pub piece_hashes: Vec<PieceHash>,
}

impl Torrent {
    /// Splits the content into pieces. Every piece has the nominal length except
    /// the last one, which holds whatever remains.
    pub fn piece_infos(&self) -> Result<Vec<PieceInfo>, DownloadError> {
        if self.piece_length == 0 {
            return Err(DownloadError::InvalidLayout(
                "piece length is zero".to_string(),
            ));
        }

        let piece_length = self.piece_length as usize;
        let expected = self.length.div_ceil(piece_length);
        if expected != self.piece_hashes.len() {
            return Err(DownloadError::InvalidLayout(format!(
                "{} bytes in pieces of {} need {} hashes, got {}",
                self.length,
                piece_length,
                expected,
                self.piece_hashes.len()
            )));
        }

        let piece_infos = self
            .piece_hashes
            .iter()
            .enumerate()
            .map(|(piece_id, hash)| {
                let begin = piece_id * piece_length;
                let length = piece_length.min(self.length - begin);
                PieceInfo {
                    piece_id,
                    hash: *hash,
                    // bounded by piece_length, which is a u32
                    length: length as u32,
                }
            })
            .collect();

        Ok(piece_infos)
    }
}
