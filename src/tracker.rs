//! HTTP tracker announce, compact peer lists only.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::Deserialize;
use serde_bytes::ByteBuf;

use crate::peers::PeerAddr;
use crate::prelude::*;
use crate::torrent::{InfoHash, PeerId};

#[derive(Debug, Clone)]
pub struct TrackerRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub left: usize,
}

impl TrackerRequest {
    /// Query string for the announce. The binary fields are percent-encoded byte
    /// by byte, everything else goes through the form serializer.
    pub fn to_query(&self) -> String {
        let params = form_urlencoded::Serializer::new(String::new())
            .append_pair("port", &self.port.to_string())
            .append_pair("uploaded", "0")
            .append_pair("downloaded", "0")
            .append_pair("left", &self.left.to_string())
            .append_pair("compact", "1")
            .finish();

        format!(
            "info_hash={}&peer_id={}&{}",
            urlencoding::encode_binary(self.info_hash.as_bytes()),
            urlencoding::encode_binary(self.peer_id.as_bytes()),
            params
        )
    }
}

#[derive(Debug, Clone)]
pub struct TrackerResponse {
    pub interval: Option<u64>,
    pub peer_addresses: Vec<PeerAddr>,
}

#[derive(Deserialize)]
struct RawTrackerResponse {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    interval: Option<u64>,
    peers: Option<ByteBuf>,
}

impl TrackerResponse {
    const COMPACT_PEER_LEN: usize = 6;

    pub fn from_bencode(bytes: &[u8]) -> anyhow::Result<Self> {
        let raw: RawTrackerResponse =
            serde_bencode::from_bytes(bytes).context("malformed tracker response")?;

        if let Some(reason) = raw.failure_reason {
            anyhow::bail!("tracker refused the announce: {reason}");
        }

        let peers = raw.peers.context("tracker response has no peers")?;
        if peers.len() % Self::COMPACT_PEER_LEN != 0 {
            anyhow::bail!("received invalid peers from tracker");
        }

        let peer_addresses = peers
            .chunks_exact(Self::COMPACT_PEER_LEN)
            .map(|peer| {
                let ip = Ipv4Addr::new(peer[0], peer[1], peer[2], peer[3]);
                let port = u16::from_be_bytes([peer[4], peer[5]]);
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            })
            .collect();

        Ok(Self {
            interval: raw.interval,
            peer_addresses,
        })
    }
}

pub struct HttpTracker<'a> {
    client: &'a reqwest::Client,
    announce_url: &'a str,
}

impl<'a> HttpTracker<'a> {
    pub fn new(client: &'a reqwest::Client, announce_url: &'a str) -> Self {
        Self {
            client,
            announce_url,
        }
    }

    #[instrument(level = "info", name = "announce", skip_all, fields(tracker = %self.announce_url))]
    pub async fn announce(&self, request: &TrackerRequest) -> anyhow::Result<TrackerResponse> {
        let separator = if self.announce_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", self.announce_url, separator, request.to_query());

        info!("announcing to tracker");
        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("tracker request failed")?
            .error_for_status()
            .context("tracker returned an error status")?
            .bytes()
            .await
            .context("could not read tracker response")?;

        let response = TrackerResponse::from_bencode(&body)?;
        info!(peers = response.peer_addresses.len(), "tracker responded");
        Ok(response)
    }
}
