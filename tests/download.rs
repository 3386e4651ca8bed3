mod support;

use std::time::Duration;

use sha1_smol::Sha1;
use tokio::time::timeout;

use swarm_fetch::{download, DownloadConfig, DownloadError, InfoHash, PeerId};

use support::{sample_pieces, spawn_mock_peer, torrent_for, MockPeerConfig};

const TEST_DEADLINE: Duration = Duration::from_secs(20);

fn test_config() -> DownloadConfig {
    DownloadConfig {
        piece_timeout: Duration::from_millis(500),
        ..DownloadConfig::default()
    }
}

#[tokio::test]
async fn two_full_peers_assemble_the_file() {
    let pieces = sample_pieces();
    let torrent = torrent_for(&pieces, 8);
    assert_eq!(torrent.length, 30);

    let peers = vec![
        spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces)).await,
        spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces)).await,
    ];

    let buf = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(buf.len(), 30);
    assert_eq!(buf, pieces.concat());
}

#[tokio::test]
async fn overlapping_peer_subsets_cover_every_piece() {
    let pieces: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 100]).collect();
    let torrent = torrent_for(&pieces, 100);

    let peers = vec![
        spawn_mock_peer(MockPeerConfig::new(10).with_pieces(&pieces, 0..4)).await,
        spawn_mock_peer(MockPeerConfig::new(10).with_pieces(&pieces, 3..8)).await,
        spawn_mock_peer(MockPeerConfig::new(10).with_pieces(&pieces, [7, 8, 9, 0])).await,
    ];

    let buf = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap()
    .unwrap();

    for (index, chunk) in buf.chunks(100).enumerate() {
        assert_eq!(
            Sha1::from(chunk).digest().bytes(),
            torrent.piece_hashes[index]
        );
    }
}

#[tokio::test]
async fn pieces_span_several_blocks() {
    let pieces: Vec<Vec<u8>> = (0..3u32)
        .map(|i| (0..40000u32).map(|b| ((b * 7 + i) % 256) as u8).collect())
        .chain(std::iter::once(vec![0xee; 1234]))
        .collect();
    let torrent = torrent_for(&pieces, 40000);

    let peers = vec![spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces)).await];

    let buf = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(buf, pieces.concat());
}

#[tokio::test]
async fn corrupt_pieces_never_reach_the_output() {
    let pieces = sample_pieces();
    let torrent = torrent_for(&pieces, 8);

    let peers = vec![
        spawn_mock_peer(
            MockPeerConfig::new(4)
                .with_all_pieces(&pieces)
                .corrupting(1)
                .corrupting(3),
        )
        .await,
        spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces)).await,
    ];

    let buf = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(buf, pieces.concat());
}

#[tokio::test]
async fn wrong_info_hash_peer_contributes_nothing() {
    let pieces = sample_pieces();
    let torrent = torrent_for(&pieces, 8);

    let peers = vec![
        spawn_mock_peer(
            MockPeerConfig::new(4)
                .with_all_pieces(&pieces)
                .with_info_hash(InfoHash([0x13; 20])),
        )
        .await,
        spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces)).await,
    ];

    let buf = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(buf, pieces.concat());
}

#[tokio::test]
async fn timed_out_attempt_is_retried_elsewhere() {
    let pieces = sample_pieces();
    let torrent = torrent_for(&pieces, 8);

    let peers = vec![
        spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces).silent()).await,
        spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces)).await,
    ];

    let buf = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(buf, pieces.concat());
}

#[tokio::test]
async fn unreachable_peer_does_not_block_the_others() {
    let pieces = sample_pieces();
    let torrent = torrent_for(&pieces, 8);

    // bind then drop so nothing is listening on the port
    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let peers = vec![
        closed,
        spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces)).await,
    ];

    let buf = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(buf, pieces.concat());
}

#[tokio::test]
async fn no_peers_is_an_error() {
    let torrent = torrent_for(&sample_pieces(), 8);
    let result = download(&torrent, &[], PeerId::random(), test_config()).await;
    assert!(matches!(result, Err(DownloadError::NoPeers)));
}

#[tokio::test]
async fn all_workers_gone_reports_a_stall() {
    let pieces = sample_pieces();
    let torrent = torrent_for(&pieces, 8);

    let peers = vec![
        spawn_mock_peer(
            MockPeerConfig::new(4)
                .with_all_pieces(&pieces)
                .with_info_hash(InfoHash([0x13; 20])),
        )
        .await,
    ];

    let result = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(DownloadError::Stalled { remaining: 4 })));
}

#[tokio::test]
async fn silent_only_peer_stalls_after_its_attempt_fails() {
    let pieces = sample_pieces();
    let torrent = torrent_for(&pieces, 8);

    let peers =
        vec![spawn_mock_peer(MockPeerConfig::new(4).with_all_pieces(&pieces).silent()).await];

    let result = timeout(
        TEST_DEADLINE,
        download(&torrent, &peers, PeerId::random(), test_config()),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(DownloadError::Stalled { remaining: 4 })));
}
