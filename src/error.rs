//! 에러 타입 정의

use thiserror::Error;

use crate::message::MessageType;

/// RFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 메시지: {reason} (길이 {len})")]
    MalformedMessage { reason: &'static str, len: usize },

    #[error("프로토콜 위반: {0}")]
    ProtocolViolation(String),

    #[error("핸드쉐이크 타임아웃: {waited_ms}ms 동안 응답 없음")]
    HandshakeTimeout { waited_ms: u64 },

    #[error("스트림 ID 고갈: 활성 스트림 {live}개")]
    CapacityExhausted { live: usize },

    #[error("파일 리소스 에러: {path}: {source}")]
    Resource {
        path: String,
        source: std::io::Error,
    },

    #[error("전송 에러: {0}")]
    Transport(String),

    #[error("채널 닫힘")]
    ChannelClosed,

    #[error("메시지 타입 불일치: expected {expected:?}, got {got:?}")]
    UnexpectedMessage {
        expected: MessageType,
        got: MessageType,
    },

    #[error("피어 에러 통지: category={category}, code={code}: {message}")]
    PeerError {
        category: u8,
        code: u8,
        message: String,
    },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
