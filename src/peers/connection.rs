use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::DownloadConfig;
use crate::error::PeerError;
use crate::peer_protocol::codec::{
    upgrade_stream, Message, MessageKind, PeerFrame, PeerFrames, PeerStream,
};
use crate::peer_protocol::handshake::PeerHandshake;
use crate::prelude::*;
use crate::torrent::{Bitfield, InfoHash, PeerId};

use super::{BlockLength, BlockOffset, PeerAddr, PieceIndex};

/// One handshaken connection to one peer, owned by a single worker. Tracks whether
/// the peer is choking us and which pieces it has announced.
#[derive(Debug)]
pub struct PeerConnection<T: PeerStream> {
    stream: T,
    choked: bool,
    bitfield: Bitfield,
    peer_addr: PeerAddr,
    remote_peer_id: PeerId,
}

impl PeerConnection<PeerFrames<TcpStream>> {
    #[instrument(level = "debug", name = "connect", skip_all, fields(peer = %peer_addr))]
    pub async fn connect(
        peer_addr: PeerAddr,
        peer_id: PeerId,
        info_hash: InfoHash,
        config: &DownloadConfig,
    ) -> Result<Self, PeerError> {
        debug!("connecting to peer");
        let stream = timeout(config.connect_timeout, TcpStream::connect(peer_addr))
            .await
            .map_err(|_| PeerError::timed_out("connecting"))??;

        Self::establish(stream, peer_addr, peer_id, info_hash, config).await
    }
}

impl<S> PeerConnection<PeerFrames<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Runs the handshake over an already open stream and waits for the peer's
    /// bitfield, which must be the first message. On error the stream is dropped,
    /// closing it.
    pub async fn establish(
        mut stream: S,
        peer_addr: PeerAddr,
        peer_id: PeerId,
        info_hash: InfoHash,
        config: &DownloadConfig,
    ) -> Result<Self, PeerError> {
        let handshake = PeerHandshake::new(info_hash, peer_id);

        debug!("sending handshake to peer");
        timeout(
            config.handshake_timeout,
            stream.write_all(&handshake.to_bytes()),
        )
        .await
        .map_err(|_| PeerError::timed_out("sending the handshake"))??;

        debug!("waiting for peer handshake");
        let reply = timeout(
            config.handshake_timeout,
            PeerHandshake::read_from(&mut stream),
        )
        .await
        .map_err(|_| PeerError::timed_out("reading the handshake"))??;

        if reply.info_hash != info_hash {
            return Err(PeerError::Handshake {
                expected: info_hash,
                received: reply.info_hash,
            });
        }
        debug!(remote_peer_id = ?reply.peer_id, "peer handshake received");

        let mut stream = upgrade_stream(stream);
        let bitfield = timeout(config.handshake_timeout, recv_bitfield(&mut stream))
            .await
            .map_err(|_| PeerError::timed_out("waiting for the bitfield"))??;
        debug!(pieces = bitfield.count_pieces(), "bitfield received");

        Ok(Self {
            stream,
            choked: true,
            bitfield,
            peer_addr,
            remote_peer_id: reply.peer_id,
        })
    }
}

// Peers that open with `have` instead of `bitfield` are turned away here.
async fn recv_bitfield<T: PeerStream>(stream: &mut T) -> Result<Bitfield, PeerError> {
    let frame = stream
        .next()
        .await
        .ok_or_else(PeerError::connection_closed)??;

    match frame {
        PeerFrame::Message(Message {
            kind: MessageKind::Bitfield,
            payload,
        }) => Ok(Bitfield::from_bytes(&payload)),
        PeerFrame::Message(message) => Err(PeerError::Protocol(format!(
            "expected bitfield as first message, got {:?}",
            message.kind
        ))),
        PeerFrame::KeepAlive => Err(PeerError::Protocol(
            "expected bitfield as first message, got keep-alive".to_string(),
        )),
    }
}

impl<T: PeerStream> PeerConnection<T> {
    async fn send(&mut self, message: Message) -> Result<(), PeerError> {
        trace!(kind = ?message.kind, "sending message");
        self.stream.send(PeerFrame::Message(message)).await
    }

    pub async fn send_unchoke(&mut self) -> Result<(), PeerError> {
        self.send(Message::unchoke()).await
    }

    pub async fn send_interested(&mut self) -> Result<(), PeerError> {
        self.send(Message::interested()).await
    }

    pub async fn send_have(&mut self, index: PieceIndex) -> Result<(), PeerError> {
        self.send(Message::have(index as u32)).await
    }

    pub async fn send_request(
        &mut self,
        index: PieceIndex,
        begin: BlockOffset,
        length: BlockLength,
    ) -> Result<(), PeerError> {
        self.send(Message::request(index as u32, begin, length)).await
    }

    /// Next message from the peer, `None` for a keep-alive.
    pub async fn read_message(&mut self) -> Result<Option<Message>, PeerError> {
        let frame = self
            .stream
            .next()
            .await
            .ok_or_else(PeerError::connection_closed)??;
        Ok(frame.into_message())
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn bitfield_mut(&mut self) -> &mut Bitfield {
        &mut self.bitfield
    }

    pub fn peer_addr(&self) -> PeerAddr {
        self.peer_addr
    }

    pub fn remote_peer_id(&self) -> PeerId {
        self.remote_peer_id
    }
}
