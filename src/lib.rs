pub mod config;
pub mod error;
pub mod metainfo;
pub mod peer_protocol;
pub mod peers;
pub mod piece_picker;
pub mod torrent;
pub mod tracker;

mod prelude;

pub use config::DownloadConfig;
pub use error::{DownloadError, PeerError};
pub use peers::PeerAddr;
pub use piece_picker::download;
pub use torrent::{Bitfield, InfoHash, PeerId, Torrent};
