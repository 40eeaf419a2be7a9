//! 루프백 종단 간 테스트
//!
//! 임시 디렉터리의 파일을 localhost UDP로 내려받아 바이트 단위로 검증한다.

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rft::file::SinkFile;
use rft::{Client, Config, Error, Server, CHUNK_PAYLOAD_SIZE};

/// 테스트용 패턴 데이터 생성
fn pattern_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn test_config() -> Config {
    Config {
        drain_grace: Duration::from_millis(50),
        ..Config::default()
    }
}

/// 서버를 임시 포트에 띄우고 주소를 돌려준다
async fn start_server(root: &Path) -> (Arc<Server>, SocketAddr) {
    let server = Arc::new(
        Server::bind(test_config(), "127.0.0.1:0".parse().unwrap(), root.to_path_buf())
            .await
            .unwrap(),
    );
    let addr = server.local_addr().unwrap();

    let engine = server.clone();
    tokio::spawn(async move {
        let _ = engine.run().await;
    });

    (server, addr)
}

/// 파일 하나를 내려받아 원본과 비교
async fn fetch_and_verify(addr: SocketAddr, file_name: &str, expected: &[u8]) {
    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join(file_name);
    let mut sink = SinkFile::create(&out_path).await.unwrap();

    let client = Client::connect(test_config(), addr).await.unwrap();
    let stats = tokio::time::timeout(
        Duration::from_secs(30),
        client.fetch(file_name, &mut sink),
    )
    .await
    .expect("전송이 제시간에 끝나지 않음")
    .expect("전송 실패");

    assert_eq!(stats.payload_bytes, expected.len() as u64);

    let got = fs::read(&out_path).unwrap();
    assert_eq!(got.len(), expected.len(), "파일 크기 불일치");
    assert_eq!(got, expected, "파일 내용 불일치");
}

#[tokio::test]
async fn transfer_2500_bytes_in_three_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern_data(2500);
    fs::File::create(dir.path().join("report.txt"))
        .unwrap()
        .write_all(&data)
        .unwrap();

    let (_server, addr) = start_server(dir.path()).await;

    // 2500바이트 = 997 + 997 + 506, 청크 순서대로 기록
    fetch_and_verify(addr, "report.txt", &data).await;
}

#[tokio::test]
async fn transfer_exact_chunk_boundary_has_full_last_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern_data(CHUNK_PAYLOAD_SIZE * 3);
    fs::File::create(dir.path().join("boundary.bin"))
        .unwrap()
        .write_all(&data)
        .unwrap();

    let (_server, addr) = start_server(dir.path()).await;

    // 997의 배수: 빈 마지막 청크 없이 꽉 찬 청크 3개
    fetch_and_verify(addr, "boundary.bin", &data).await;
}

#[tokio::test]
async fn transfer_larger_file_grows_window() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern_data(50_000);
    fs::File::create(dir.path().join("large.bin"))
        .unwrap()
        .write_all(&data)
        .unwrap();

    let (_server, addr) = start_server(dir.path()).await;
    fetch_and_verify(addr, "large.bin", &data).await;
}

#[tokio::test]
async fn transfer_empty_file_completes_without_chunks() {
    let dir = tempfile::tempdir().unwrap();
    fs::File::create(dir.path().join("empty.bin")).unwrap();

    let (_server, addr) = start_server(dir.path()).await;
    fetch_and_verify(addr, "empty.bin", &[]).await;
}

#[tokio::test]
async fn concurrent_transfers_share_one_server_socket() {
    let dir = tempfile::tempdir().unwrap();
    let data_a = pattern_data(10_000);
    let data_b: Vec<u8> = (0..7_000).map(|i| (i % 13) as u8).collect();
    fs::File::create(dir.path().join("a.bin"))
        .unwrap()
        .write_all(&data_a)
        .unwrap();
    fs::File::create(dir.path().join("b.bin"))
        .unwrap()
        .write_all(&data_b)
        .unwrap();

    let (server, addr) = start_server(dir.path()).await;

    let fetch_a = fetch_and_verify(addr, "a.bin", &data_a);
    let fetch_b = fetch_and_verify(addr, "b.bin", &data_b);
    tokio::join!(fetch_a, fetch_b);

    // 전송이 끝난 스트림은 해지되고 ID는 반납된다
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.active_streams(), 0);
}

#[tokio::test]
async fn handshake_timeout_fails_without_partial_file() {
    // 응답하지 않는 엔드포인트
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();

    let config = Config {
        handshake_timeout: Duration::from_millis(300),
        ..test_config()
    };

    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("never.bin");
    let mut sink = SinkFile::create(&out_path).await.unwrap();

    let client = Client::connect(config, addr).await.unwrap();
    let err = client.fetch("never.bin", &mut sink).await.unwrap_err();
    assert!(matches!(err, Error::HandshakeTimeout { .. }));

    // 받은 게 없으니 파일은 비어 있어야 한다
    assert_eq!(fs::read(&out_path).unwrap().len(), 0);
}

#[tokio::test]
async fn missing_file_is_reported_as_peer_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, addr) = start_server(dir.path()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let mut sink = SinkFile::create(out_dir.path().join("x.bin")).await.unwrap();

    let client = Client::connect(test_config(), addr).await.unwrap();
    let err = client.fetch("no-such-file.bin", &mut sink).await.unwrap_err();
    assert!(matches!(err, Error::PeerError { .. }));
}

#[test]
fn default_handshake_timeout_is_five_seconds() {
    assert_eq!(Config::default().handshake_timeout, Duration::from_secs(5));
}
