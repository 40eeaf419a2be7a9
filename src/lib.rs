//! # RFT (Reliable File Transfer)
//!
//! UDP 기반 혼잡제어 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **누적 ACK**: TCP 스타일 누적 바이트 오프셋 확인응답
//! - **중복 ACK**: 손실/재정렬을 타임아웃 없이 즉시 피드백
//! - **Reno식 혼잡제어**: slow start / congestion avoidance 2단계 윈도우 성장
//! - **스트림 멀티플렉싱**: 소켓 하나로 여러 전송 동시 처리 (16비트 스트림 ID)
//! - **고정 프레임**: 메시지 하나 = 데이터그램 하나, 최대 1024바이트
//! - **백프레셔**: 바운디드 큐 기반 자동 흐름 제어

pub mod client;
pub mod config;
pub mod congestion;
pub mod error;
pub mod file;
pub mod hash;
pub mod message;
pub mod server;
pub mod stats;
pub mod stream;

pub use client::Client;
pub use config::Config;
pub use congestion::{CongestionControl, RenoCongestionControl};
pub use error::{Error, Result};
pub use message::{Message, MessageType};
pub use server::Server;
pub use stats::TransferStats;
pub use stream::{ClientStream, ServerStream, StreamState};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 공통 헤더 크기: streamId(2) + messageType(1) + sequenceNumber(8)
pub const HEADER_SIZE: usize = 11;

/// 청크 하나의 최대 페이로드 (바이트)
pub const CHUNK_PAYLOAD_SIZE: usize = 997;

/// 데이터그램 최대 크기 (모든 메시지는 이 안에 들어감)
pub const MAX_FRAME_SIZE: usize = 1024;

/// 핸드쉐이크 전 ClientHello가 쓰는 예약 스트림 ID
pub const UNASSIGNED_STREAM_ID: u16 = 0;
