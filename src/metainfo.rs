//! Single-file `.torrent` decoding.

use std::path::Path;

use serde::Deserialize;
use serde_bencode::value::Value;
use sha1_smol::Sha1;

use crate::prelude::*;
use crate::torrent::{InfoHash, Torrent};

pub type PieceHash = [u8; 20];

#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub info_hash: InfoHash,
    pub name: String,
    pub length: usize,
    pub piece_length: u32,
    pub pieces: Vec<PieceHash>,
}

#[derive(Deserialize)]
struct RawMetainfo {
    announce: String,
    info: Value,
}

#[derive(Deserialize)]
struct RawInfo {
    name: String,
    length: usize,
    #[serde(rename = "piece length")]
    piece_length: u32,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
}

impl Metainfo {
    pub async fn from_bencode_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("could not read torrent file {}", path.display()))?;
        Self::from_bytes(&bytes)
    }

    /// The info hash is taken over the whole `info` dictionary re-encoded, so keys
    /// this client does not use still count.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let raw: RawMetainfo =
            serde_bencode::from_bytes(bytes).context("malformed torrent metainfo")?;

        let info_bytes =
            serde_bencode::to_bytes(&raw.info).context("could not re-encode info dictionary")?;
        let info_hash = InfoHash(Sha1::from(&info_bytes).digest().bytes());

        let info: RawInfo = serde_bencode::from_bytes(&info_bytes)
            .context("info dictionary is not a single-file torrent")?;

        if info.pieces.len() % 20 != 0 {
            anyhow::bail!(
                "received malformed pieces of length {}",
                info.pieces.len()
            );
        }
        let pieces = info
            .pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        debug!(%info_hash, name = %info.name, "decoded metainfo");
        Ok(Self {
            announce: raw.announce,
            info_hash,
            name: info.name,
            length: info.length,
            piece_length: info.piece_length,
            pieces,
        })
    }

    pub fn torrent(&self) -> Torrent {
        Torrent {
            name: self.name.clone(),
            info_hash: self.info_hash,
            piece_length: self.piece_length,
            length: self.length,
            piece_hashes: self.pieces.clone(),
        }
    }
}
