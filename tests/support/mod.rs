//! In-process peers that speak just enough of the wire protocol to serve pieces.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Buf;
use futures::{SinkExt, StreamExt};
use sha1_smol::Sha1;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use swarm_fetch::peer_protocol::codec::{upgrade_stream, Message, MessageKind, PeerFrame};
use swarm_fetch::peer_protocol::handshake::PeerHandshake;
use swarm_fetch::{Bitfield, InfoHash, PeerError, PeerId, Torrent};

pub const INFO_HASH: InfoHash = InfoHash([0x42; 20]);

/// The four pieces from the 30 byte layout: three of 8 bytes and one of 6.
pub fn sample_pieces() -> Vec<Vec<u8>> {
    vec![
        b"abcdefgh".to_vec(),
        b"ijklmnop".to_vec(),
        b"qrstuvwx".to_vec(),
        b"yz0123".to_vec(),
    ]
}

pub fn torrent_for(pieces: &[Vec<u8>], piece_length: u32) -> Torrent {
    Torrent {
        name: "sample.bin".to_string(),
        info_hash: INFO_HASH,
        piece_length,
        length: pieces.iter().map(Vec::len).sum(),
        piece_hashes: pieces
            .iter()
            .map(|piece| Sha1::from(piece).digest().bytes())
            .collect(),
    }
}

#[derive(Clone)]
pub struct MockPeerConfig {
    pub info_hash: InfoHash,
    pub piece_data: HashMap<u32, Vec<u8>>,
    pub piece_count: usize,
    /// pieces always served with every byte flipped
    pub corrupt: Vec<u32>,
    /// unchoke but never answer requests
    pub silent: bool,
}

impl MockPeerConfig {
    pub fn new(piece_count: usize) -> Self {
        Self {
            info_hash: INFO_HASH,
            piece_data: HashMap::new(),
            piece_count,
            corrupt: Vec::new(),
            silent: false,
        }
    }

    pub fn with_pieces(mut self, pieces: &[Vec<u8>], indices: impl IntoIterator<Item = usize>) -> Self {
        for index in indices {
            self.piece_data.insert(index as u32, pieces[index].clone());
        }
        self
    }

    pub fn with_all_pieces(self, pieces: &[Vec<u8>]) -> Self {
        self.with_pieces(pieces, 0..pieces.len())
    }

    pub fn corrupting(mut self, index: u32) -> Self {
        self.corrupt.push(index);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_info_hash(mut self, info_hash: InfoHash) -> Self {
        self.info_hash = info_hash;
        self
    }
}

/// Starts accepting connections in the background and returns the address.
pub async fn spawn_mock_peer(config: MockPeerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Arc::new(config);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, &config).await {
                    tracing::debug!("mock peer connection error: {}", err);
                }
            });
        }
    });

    addr
}

async fn handle_connection(mut stream: TcpStream, config: &MockPeerConfig) -> Result<(), PeerError> {
    PeerHandshake::read_from(&mut stream).await?;
    let reply = PeerHandshake::new(config.info_hash, PeerId(*b"-MK0001-mockpeer0000"));
    stream.write_all(&reply.to_bytes()).await?;

    let mut frames = upgrade_stream(stream);

    let mut bitfield = Bitfield::with_piece_count(config.piece_count);
    for &index in config.piece_data.keys() {
        bitfield.set_piece(index as usize);
    }
    frames.send(Message::bitfield(bitfield.as_bytes()).into()).await?;

    while let Some(frame) = frames.next().await {
        let PeerFrame::Message(message) = frame? else {
            continue;
        };

        match message.kind {
            MessageKind::Interested => frames.send(Message::unchoke().into()).await?,
            MessageKind::Request if !config.silent => {
                let mut payload = &message.payload[..];
                let (index, begin, length) =
                    (payload.get_u32(), payload.get_u32(), payload.get_u32());

                let Some(data) = config.piece_data.get(&index) else {
                    continue;
                };
                let mut block = data[begin as usize..(begin + length) as usize].to_vec();
                if config.corrupt.contains(&index) {
                    block.iter_mut().for_each(|byte| *byte ^= 0xff);
                }
                frames.send(Message::piece(index, begin, &block).into()).await?;
            }
            _ => {}
        }
    }

    Ok(())
}
