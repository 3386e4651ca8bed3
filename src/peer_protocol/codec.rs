//! Length prefixed message framing.
//!
//! ```text
//! <length: u32 big endian><kind: u8><payload: length - 1 bytes>
//! ```
//!
//! A frame with length zero carries no kind byte and is a keep-alive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::error::PeerError;
use crate::peers::{BlockLength, BlockOffset, PieceIndex};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageKind {
    type Error = PeerError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        use MessageKind::*;
        Ok(match id {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            _ => return Err(PeerError::Protocol(format!("unknown message id {id}"))),
        })
    }
}

/// A message kind plus its raw payload. Payload shapes are only interpreted by the
/// `parse_*` helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    KeepAlive,
    Message(Message),
}

impl PeerFrame {
    pub fn into_message(self) -> Option<Message> {
        match self {
            PeerFrame::KeepAlive => None,
            PeerFrame::Message(message) => Some(message),
        }
    }
}

impl From<Message> for PeerFrame {
    fn from(message: Message) -> Self {
        PeerFrame::Message(message)
    }
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn unchoke() -> Self {
        Self::new(MessageKind::Unchoke)
    }

    pub fn interested() -> Self {
        Self::new(MessageKind::Interested)
    }

    pub fn have(index: u32) -> Self {
        Self::with_payload(MessageKind::Have, index.to_be_bytes().to_vec())
    }

    pub fn bitfield(bits: &[u8]) -> Self {
        Self::with_payload(MessageKind::Bitfield, Bytes::copy_from_slice(bits))
    }

    pub fn request(index: u32, begin: BlockOffset, length: BlockLength) -> Self {
        let mut payload = BytesMut::with_capacity(12);
        payload.put_u32(index);
        payload.put_u32(begin);
        payload.put_u32(length);
        Self::with_payload(MessageKind::Request, payload.freeze())
    }

    pub fn piece(index: u32, begin: BlockOffset, block: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(8 + block.len());
        payload.put_u32(index);
        payload.put_u32(begin);
        payload.extend_from_slice(block);
        Self::with_payload(MessageKind::Piece, payload.freeze())
    }

    pub fn parse_have(&self) -> Result<PieceIndex, PeerError> {
        if self.kind != MessageKind::Have {
            return Err(PeerError::Protocol(format!(
                "expected have message, got {:?}",
                self.kind
            )));
        }
        if self.payload.len() != 4 {
            return Err(PeerError::Protocol(format!(
                "expected have payload of length 4, got {}",
                self.payload.len()
            )));
        }

        let mut payload = &self.payload[..];
        Ok(payload.get_u32() as PieceIndex)
    }

    /// Copies the block carried by a piece message into `piece`, which is the
    /// buffer for piece `expected_index`. Every bound is checked before anything
    /// is written. Returns the number of bytes copied.
    pub fn parse_piece(
        &self,
        expected_index: PieceIndex,
        piece: &mut [u8],
    ) -> Result<usize, PeerError> {
        if self.kind != MessageKind::Piece {
            return Err(PeerError::Protocol(format!(
                "expected piece message, got {:?}",
                self.kind
            )));
        }
        if self.payload.len() < 8 {
            return Err(PeerError::Validation(format!(
                "piece payload of {} bytes is too short",
                self.payload.len()
            )));
        }

        let mut header = &self.payload[..8];
        let index = header.get_u32() as PieceIndex;
        let begin = header.get_u32() as usize;
        let block = &self.payload[8..];

        if index != expected_index {
            return Err(PeerError::Validation(format!(
                "expected piece {expected_index}, got {index}"
            )));
        }
        if begin >= piece.len() {
            return Err(PeerError::Validation(format!(
                "block offset {begin} is past the piece length {}",
                piece.len()
            )));
        }
        if block.len() > piece.len() - begin {
            return Err(PeerError::Validation(format!(
                "block of {} bytes at offset {begin} overruns the piece length {}",
                block.len(),
                piece.len()
            )));
        }

        piece[begin..begin + block.len()].copy_from_slice(block);
        Ok(block.len())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerCodec;

impl PeerCodec {
    const LENGTH_PREFIX: usize = 4;
    // room for a bitfield of 8M pieces, far above any block we request
    const MAX_FRAME_LENGTH: usize = (1 << 20) + 1;
}

impl Decoder for PeerCodec {
    type Item = PeerFrame;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < Self::LENGTH_PREFIX {
            return Ok(None);
        }

        // peek, the prefix is only consumed once the whole frame is buffered
        let mut prefix = &src[..Self::LENGTH_PREFIX];
        let length = prefix.get_u32() as usize;

        if length > Self::MAX_FRAME_LENGTH {
            return Err(PeerError::Protocol(format!(
                "frame of {length} bytes exceeds the limit of {}",
                Self::MAX_FRAME_LENGTH
            )));
        }

        if src.len() < Self::LENGTH_PREFIX + length {
            src.reserve(Self::LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }

        src.advance(Self::LENGTH_PREFIX);
        if length == 0 {
            return Ok(Some(PeerFrame::KeepAlive));
        }

        let mut frame = src.split_to(length);
        let kind = MessageKind::try_from(frame.get_u8())?;
        Ok(Some(PeerFrame::Message(Message {
            kind,
            payload: frame.freeze(),
        })))
    }
}

impl Encoder<PeerFrame> for PeerCodec {
    type Error = PeerError;

    fn encode(&mut self, frame: PeerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            PeerFrame::KeepAlive => dst.put_u32(0),
            PeerFrame::Message(Message { kind, payload }) => {
                let length = 1 + payload.len();
                if length > Self::MAX_FRAME_LENGTH {
                    return Err(PeerError::Protocol(format!(
                        "refusing to send a frame of {length} bytes"
                    )));
                }

                dst.reserve(Self::LENGTH_PREFIX + length);
                dst.put_u32(length as u32);
                dst.put_u8(kind as u8);
                dst.extend_from_slice(&payload);
            }
        }
        Ok(())
    }
}

pub type PeerFrames<T> = Framed<T, PeerCodec>;

/// Anything that reads and writes peer frames. Implemented for framed sockets and
/// the in-memory streams used in tests.
pub trait PeerStream:
    Stream<Item = Result<PeerFrame, PeerError>> + Sink<PeerFrame, Error = PeerError> + Unpin + Send
{
}

impl<T> PeerStream for T where
    T: Stream<Item = Result<PeerFrame, PeerError>>
        + Sink<PeerFrame, Error = PeerError>
        + Unpin
        + Send
{
}

/// Wraps a stream that has completed the handshake in the message codec.
pub fn upgrade_stream<T>(stream: T) -> PeerFrames<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(stream, PeerCodec)
}
