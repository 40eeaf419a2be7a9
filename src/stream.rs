//! 스트림 상태 머신
//!
//! 전송 하나의 생애주기: 핸드쉐이크 → 청크 단계 → 종료.
//! 모든 에러는 스트림 경계에서 붙잡혀 해당 스트림만 실패시킨다.
//! 엔진의 수신 루프나 다른 스트림으로는 절대 번지지 않는다.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::congestion::CongestionControl;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::{SinkFile, SourceFile};
use crate::message::{Message, MessageBody, MessageType};
use crate::stats::TransferStats;
use crate::{CHUNK_PAYLOAD_SIZE, PROTOCOL_VERSION, UNASSIGNED_STREAM_ID};

/// Error 메시지 카테고리: 파일 리소스
pub const ERROR_CATEGORY_RESOURCE: u8 = 0x1;

/// Error 메시지 카테고리: 프로토콜
pub const ERROR_CATEGORY_PROTOCOL: u8 = 0x2;

/// 스트림 생애주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    HandshakeSent,
    AwaitingPeerHandshake,
    Transferring,
    Draining,
    Closed,
    /// 어느 상태에서든 도달 가능한 터미널 상태
    Failed,
}

/// 수신 역할 (클라이언트): 파일 하나를 당겨온다
pub struct ClientStream<C> {
    congestion: Arc<C>,
    config: Config,
    state: StreamState,
    stats: TransferStats,
}

impl<C: CongestionControl> ClientStream<C> {
    pub fn new(config: Config, congestion: Arc<C>) -> Self {
        Self {
            congestion,
            config,
            state: StreamState::Created,
            stats: TransferStats::new(UNASSIGNED_STREAM_ID),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 파일 요청 실행. 성공이든 실패든 컨트롤러 큐를 닫고 통계를 고정한다.
    pub async fn run(&mut self, file_name: &str, sink: &mut SinkFile) -> Result<()> {
        let result = self.run_inner(file_name, sink).await;

        match &result {
            Ok(()) => {
                self.state = StreamState::Closed;
            }
            Err(e) => {
                warn!(
                    stream_id = self.congestion.stream_id(),
                    "다운로드 종료: {}", e
                );
                self.state = StreamState::Failed;
            }
        }

        self.stats.stream_id = self.congestion.stream_id();
        self.stats.finish(self.state, self.congestion.counters());
        self.congestion.close();
        info!("{}", self.stats.summary());

        result
    }

    async fn run_inner(&mut self, file_name: &str, sink: &mut SinkFile) -> Result<()> {
        // 핸드쉐이크 개시. 스트림 ID는 아직 없으므로 0으로 나간다.
        self.congestion
            .send(Message {
                stream_id: UNASSIGNED_STREAM_ID,
                sequence_number: 0,
                body: MessageBody::ClientHello {
                    version: PROTOCOL_VERSION,
                    next_header_type: 0,
                    next_header_offset: 0,
                    window: self.config.max_window,
                    start_chunk: 0,
                    file_name: file_name.to_owned(),
                },
            })
            .await?;
        self.state = StreamState::HandshakeSent;

        // ServerHello 대기. 타임아웃/엉뚱한 메시지/예약 필드 사용은 전부 치명.
        self.state = StreamState::AwaitingPeerHandshake;
        let hello = timeout(self.config.handshake_timeout, self.congestion.receive())
            .await
            .map_err(|_| Error::HandshakeTimeout {
                waited_ms: self.config.handshake_timeout.as_millis() as u64,
            })??;

        let file_size = match hello.body {
            MessageBody::ServerHello {
                next_header_type,
                next_header_offset,
                file_size,
                ..
            } => {
                if next_header_type != 0 || next_header_offset != 0 {
                    return Err(Error::ProtocolViolation(
                        "서버가 예약된 next header 필드를 사용함".into(),
                    ));
                }
                file_size
            }
            MessageBody::Error {
                category,
                code,
                message,
            } => {
                return Err(Error::PeerError {
                    category,
                    code,
                    message,
                })
            }
            _ => {
                return Err(Error::UnexpectedMessage {
                    expected: MessageType::ServerHello,
                    got: hello.msg_type(),
                })
            }
        };

        // 서버가 배정한 스트림 ID 채택
        self.congestion.adopt_stream_id(hello.stream_id);
        let total_chunks = Config::chunk_count(file_size);
        info!(
            stream_id = hello.stream_id,
            file_size, total_chunks, "ServerHello 수신, 전송 시작"
        );

        self.state = StreamState::Transferring;
        for index in 0..total_chunks {
            let msg = self.congestion.receive().await?;
            let payload = match msg.body {
                // 청크 체크섬 필드는 의도적으로 검증하지 않는다 (프로토콜 예외)
                MessageBody::Chunk { payload, .. } => payload,
                MessageBody::Error {
                    category,
                    code,
                    message,
                } => {
                    return Err(Error::PeerError {
                        category,
                        code,
                        message,
                    })
                }
                _ => {
                    return Err(Error::UnexpectedMessage {
                        expected: MessageType::Chunk,
                        got: msg.msg_type(),
                    })
                }
            };

            // 마지막 청크만 fileSize mod 997, 나머지는 997.
            // 크기가 정확히 나누어떨어지면 마지막도 꽉 찬 997바이트.
            let expected = if index + 1 == total_chunks {
                Config::last_chunk_len(file_size)
            } else {
                CHUNK_PAYLOAD_SIZE
            };
            if payload.len() != expected {
                return Err(Error::ProtocolViolation(format!(
                    "청크 {} 크기 불일치: expected {}, got {}",
                    index,
                    expected,
                    payload.len()
                )));
            }

            sink.write_all(&payload).await?;
            self.stats.record_chunk(payload.len());
        }

        // 내구 저장소까지 플러시하고 종료
        sink.sync().await?;
        Ok(())
    }
}

/// 송신 역할 (서버): 파일 하나를 내보낸다
pub struct ServerStream<C> {
    id: u16,
    congestion: Arc<C>,
    config: Config,
    state: StreamState,
    stats: TransferStats,
    file_name: String,
    start_chunk: u32,
}

impl<C: CongestionControl> ServerStream<C> {
    /// ClientHello가 수락된 시점에 생성된다
    pub fn new(
        id: u16,
        config: Config,
        congestion: Arc<C>,
        file_name: String,
        start_chunk: u32,
    ) -> Self {
        info!(stream_id = id, file_name = %file_name, "새 스트림 수립");
        Self {
            id,
            congestion,
            config,
            state: StreamState::Created,
            stats: TransferStats::new(id),
            file_name,
            start_chunk,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 전송 실행. 실패 시 피어에게 Error를 한 번 통지하고 이 스트림만 접는다.
    pub async fn run(&mut self, root: &Path) -> Result<()> {
        let result = self.run_inner(root).await;

        match &result {
            Ok(()) => {
                self.state = StreamState::Closed;
            }
            Err(e) => {
                warn!(stream_id = self.id, "스트림 실패: {}", e);
                self.notify_peer_error(e).await;
                self.state = StreamState::Failed;
            }
        }

        self.stats.finish(self.state, self.congestion.counters());
        self.congestion.close();
        info!("{}", self.stats.summary());

        result
    }

    async fn run_inner(&mut self, root: &Path) -> Result<()> {
        let path = root.join(&self.file_name);
        let mut source = SourceFile::open(&path).await?;

        // 파일 전체 체크섬. 메모리보다 큰 파일도 스트리밍으로 처리된다.
        let checksum = source.sha256().await?;
        let file_size = source.len();

        self.congestion
            .send(Message {
                stream_id: self.id,
                sequence_number: 0,
                body: MessageBody::ServerHello {
                    version: PROTOCOL_VERSION,
                    next_header_type: 0,
                    next_header_offset: 0,
                    window: self.config.max_window,
                    checksum,
                    last_modified: source.last_modified(),
                    file_size,
                },
            })
            .await?;
        self.state = StreamState::HandshakeSent;

        // 클라이언트의 첫 ACK 대기. 타임아웃이면 청크 없이 자원 반납.
        self.state = StreamState::AwaitingPeerHandshake;
        timeout(self.config.handshake_timeout, self.congestion.first_ack())
            .await
            .map_err(|_| Error::HandshakeTimeout {
                waited_ms: self.config.handshake_timeout.as_millis() as u64,
            })?;

        self.state = StreamState::Transferring;
        let total_chunks = Config::chunk_count(file_size);
        let mut buf = vec![0u8; CHUNK_PAYLOAD_SIZE];

        for index in self.start_chunk as u64..total_chunks {
            let offset = index * CHUNK_PAYLOAD_SIZE as u64;
            let want = if index + 1 == total_chunks {
                Config::last_chunk_len(file_size)
            } else {
                CHUNK_PAYLOAD_SIZE
            };

            let got = source.read_at(offset, &mut buf[..want]).await?;
            if got != want {
                // 전송 도중 파일이 줄어든 경우
                return Err(Error::Resource {
                    path: path.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("청크 {}에서 {}바이트 기대, {}바이트 읽음", index, want, got),
                    ),
                });
            }

            let payload = Bytes::copy_from_slice(&buf[..want]);
            let checksum = crate::hash::chunk_checksum(&payload);
            self.congestion
                .send(Message {
                    stream_id: self.id,
                    sequence_number: 0,
                    body: MessageBody::Chunk { checksum, payload },
                })
                .await?;
            self.stats.record_chunk(want);
        }

        self.congestion.send(Message::fin(self.id, 0)).await?;

        // 잔여 ACK 유예: 전부 확인되거나 유예 시간이 끝나면 닫는다
        self.state = StreamState::Draining;
        let _ = timeout(self.config.drain_grace, self.congestion.all_acked()).await;
        Ok(())
    }

    /// 실패 원인을 피어에게 Error 메시지로 통지 (베스트 에포트)
    async fn notify_peer_error(&self, err: &Error) {
        let category = match err {
            Error::Resource { .. } | Error::Io(_) => ERROR_CATEGORY_RESOURCE,
            _ => ERROR_CATEGORY_PROTOCOL,
        };

        let _ = self
            .congestion
            .send(Message {
                stream_id: self.id,
                sequence_number: 0,
                body: MessageBody::Error {
                    category,
                    code: 1,
                    message: err.to_string(),
                },
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::RenoCongestionControl;
    use std::time::Duration;

    fn fast_config() -> Config {
        Config {
            handshake_timeout: Duration::from_millis(100),
            drain_grace: Duration::from_millis(50),
            ..Config::default()
        }
    }

    fn server_hello(stream_id: u16, file_size: u64) -> Message {
        Message {
            stream_id,
            sequence_number: 0,
            body: MessageBody::ServerHello {
                version: PROTOCOL_VERSION,
                next_header_type: 0,
                next_header_offset: 0,
                window: 64,
                checksum: [0; 32],
                last_modified: 0,
                file_size,
            },
        }
    }

    #[tokio::test]
    async fn test_client_handshake_timeout_fails_stream() {
        let (ctrl, _out_rx) = RenoCongestionControl::new(&fast_config(), 0);
        let mut stream = ClientStream::new(fast_config(), Arc::new(ctrl));

        let dir = tempfile::tempdir().unwrap();
        let mut sink = SinkFile::create(dir.path().join("out.bin")).await.unwrap();

        let err = stream.run("report.txt", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout { .. }));
        assert_eq!(stream.state(), StreamState::Failed);

        // 받은 게 없으니 파일에도 아무것도 쓰지 않았다
        assert_eq!(sink.written(), 0);
    }

    #[tokio::test]
    async fn test_client_rejects_reserved_next_header_fields() {
        let (ctrl, _out_rx) = RenoCongestionControl::new(&fast_config(), 0);
        let ctrl = Arc::new(ctrl);

        let mut hello = server_hello(9, 100);
        if let MessageBody::ServerHello {
            ref mut next_header_type,
            ..
        } = hello.body
        {
            *next_header_type = 1;
        }
        ctrl.on_message_arrived(hello);

        let mut stream = ClientStream::new(fast_config(), ctrl);
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SinkFile::create(dir.path().join("out.bin")).await.unwrap();

        let err = stream.run("report.txt", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(stream.state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn test_client_fails_on_unexpected_handshake_message() {
        let (ctrl, _out_rx) = RenoCongestionControl::new(&fast_config(), 0);
        let ctrl = Arc::new(ctrl);

        ctrl.on_message_arrived(Message::fin(9, 0));

        let mut stream = ClientStream::new(fast_config(), ctrl);
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SinkFile::create(dir.path().join("out.bin")).await.unwrap();

        let err = stream.run("report.txt", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedMessage { .. }));
    }

    #[tokio::test]
    async fn test_client_ignores_chunk_checksum_field() {
        let (ctrl, _out_rx) = RenoCongestionControl::new(&fast_config(), 0);
        let ctrl = Arc::new(ctrl);

        // 10바이트 파일 = 청크 하나. 체크섬 필드는 쓰레기값.
        ctrl.on_message_arrived(server_hello(5, 10));
        ctrl.on_message_arrived(Message {
            stream_id: 5,
            sequence_number: 0,
            body: MessageBody::Chunk {
                checksum: [0xFF; 8],
                payload: Bytes::from(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
            },
        });

        let mut stream = ClientStream::new(fast_config(), ctrl);
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.bin");
        let mut sink = SinkFile::create(&out_path).await.unwrap();

        stream.run("small.bin", &mut sink).await.unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(
            std::fs::read(&out_path).unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
    }

    #[tokio::test]
    async fn test_server_handshake_timeout_sends_no_chunks() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("data.bin")).unwrap();
        f.write_all(&vec![0xAA; 2500]).unwrap();
        drop(f);

        let (ctrl, mut out_rx) = RenoCongestionControl::new(&fast_config(), 42);
        let mut stream = ServerStream::new(
            42,
            fast_config(),
            Arc::new(ctrl),
            "data.bin".into(),
            0,
        );

        let err = stream.run(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout { .. }));
        assert_eq!(stream.state(), StreamState::Failed);

        // ServerHello는 나갔지만 청크는 하나도 나가지 않았다
        let mut types = Vec::new();
        while let Ok(msg) = out_rx.try_recv() {
            types.push(msg.msg_type());
        }
        assert!(types.contains(&MessageType::ServerHello));
        assert!(!types.contains(&MessageType::Chunk));
    }

    #[tokio::test]
    async fn test_server_missing_file_notifies_peer() {
        let dir = tempfile::tempdir().unwrap();
        let (ctrl, mut out_rx) = RenoCongestionControl::new(&fast_config(), 42);
        let mut stream = ServerStream::new(
            42,
            fast_config(),
            Arc::new(ctrl),
            "no-such-file.bin".into(),
            0,
        );

        let err = stream.run(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));

        let msg = out_rx.try_recv().unwrap();
        assert_eq!(msg.msg_type(), MessageType::Error);
        if let MessageBody::Error { category, .. } = msg.body {
            assert_eq!(category, ERROR_CATEGORY_RESOURCE);
        }
    }
}
