//! 프로토콜 메시지 정의 및 와이어 코덱
//!
//! 메시지 하나 = UDP 데이터그램 하나. 수신측에서 재조립할 일이 없도록
//! 모든 변형은 고정 레이아웃이며 최대 1024바이트 안에 들어간다.
//! 모든 정수 필드는 빅엔디안 (네트워크 바이트 오더).

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};
use crate::{CHUNK_PAYLOAD_SIZE, HEADER_SIZE, MAX_FRAME_SIZE};

/// ClientHello의 파일명 필드 폭 (프레임 전체가 정확히 1024바이트가 되도록)
pub const FILE_NAME_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE - 9;

/// Error 메시지의 텍스트 필드 폭
pub const ERROR_TEXT_SIZE: usize = 256;

/// ClientHello 프레임 크기 (고정 1024)
pub const CLIENT_HELLO_SIZE: usize = HEADER_SIZE + 9 + FILE_NAME_SIZE;

/// ServerHello 프레임 크기
pub const SERVER_HELLO_SIZE: usize = HEADER_SIZE + 5 + 32 + 8 + 8;

/// Ack 프레임 크기
pub const ACK_SIZE: usize = HEADER_SIZE + 2 + 8;

/// Fin 프레임 크기 (헤더만)
pub const FIN_SIZE: usize = HEADER_SIZE;

/// Error 프레임 크기
pub const ERROR_SIZE: usize = HEADER_SIZE + 2 + ERROR_TEXT_SIZE;

/// Chunk 프레임의 페이로드 앞부분: 헤더 + 체크섬(8)
pub const CHUNK_PREFIX_SIZE: usize = HEADER_SIZE + 8;

/// 메시지 타입 (와이어 태그)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// 파일 페이로드 청크
    Chunk = 0x00,

    /// 핸드쉐이크 개시 (클라이언트 → 서버)
    ClientHello = 0x01,

    /// 핸드쉐이크 응답 (서버 → 클라이언트)
    ServerHello = 0x02,

    /// 누적 확인응답
    Ack = 0x03,

    /// 스트림 종료 알림
    Fin = 0x04,

    /// 에러 통지
    Error = 0xFF,
}

impl MessageType {
    /// 와이어 태그에서 타입 복원
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(MessageType::Chunk),
            0x01 => Some(MessageType::ClientHello),
            0x02 => Some(MessageType::ServerHello),
            0x03 => Some(MessageType::Ack),
            0x04 => Some(MessageType::Fin),
            0xFF => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// 메시지 본문 (타입별 필드)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// 파일 요청 핸드쉐이크
    ClientHello {
        version: u8,
        /// 확장 헤더 예약 필드, 0이어야 함
        next_header_type: u8,
        /// 확장 헤더 예약 필드, 0이어야 함
        next_header_offset: u8,
        /// 요청 윈도우 크기 (메시지 단위)
        window: u16,
        /// 시작 청크 인덱스
        start_chunk: u32,
        /// 요청 파일명 (NUL 패딩 고정폭으로 인코딩됨)
        file_name: String,
    },

    /// 핸드쉐이크 응답 + 파일 메타데이터
    ServerHello {
        version: u8,
        next_header_type: u8,
        next_header_offset: u8,
        window: u16,
        /// 파일 전체의 SHA-256 다이제스트
        checksum: [u8; 32],
        /// 파일 수정 시각 (unix epoch 초)
        last_modified: i64,
        /// 파일 전체 크기 (바이트)
        file_size: u64,
    },

    /// 누적 ACK: ack_number 미만은 전부 수신 완료
    Ack { window: u16, ack_number: u64 },

    /// 스트림 종료
    Fin,

    /// 에러 통지
    Error {
        category: u8,
        code: u8,
        message: String,
    },

    /// 파일 페이로드. 체크섬 필드는 프레임에 존재하지만
    /// 프로토콜 예외로 수신측은 검증하지 않는다.
    Chunk { checksum: [u8; 8], payload: Bytes },
}

/// 와이어 메시지: 공통 헤더 + 타입별 본문
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 스트림 ID (핸드쉐이크 전 ClientHello는 0)
    pub stream_id: u16,

    /// 누적 바이트 오프셋 (송신 바이트 스트림 기준, 메시지 카운터 아님)
    pub sequence_number: u64,

    /// 타입별 본문
    pub body: MessageBody,
}

impl Message {
    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        match &self.body {
            MessageBody::Chunk { .. } => MessageType::Chunk,
            MessageBody::ClientHello { .. } => MessageType::ClientHello,
            MessageBody::ServerHello { .. } => MessageType::ServerHello,
            MessageBody::Ack { .. } => MessageType::Ack,
            MessageBody::Fin => MessageType::Fin,
            MessageBody::Error { .. } => MessageType::Error,
        }
    }

    /// 이 메시지가 송신 바이트 스트림에서 차지하는 바이트 수
    ///
    /// 청크만 시퀀스 공간을 소비한다. 컨트롤 메시지는 현재 오프셋을
    /// 실어 보내되 오프셋을 전진시키지 않는다.
    pub fn stream_len(&self) -> u64 {
        match &self.body {
            MessageBody::Chunk { payload, .. } => payload.len() as u64,
            _ => 0,
        }
    }

    /// 인코딩된 프레임 크기
    pub fn wire_size(&self) -> usize {
        match &self.body {
            MessageBody::ClientHello { .. } => CLIENT_HELLO_SIZE,
            MessageBody::ServerHello { .. } => SERVER_HELLO_SIZE,
            MessageBody::Ack { .. } => ACK_SIZE,
            MessageBody::Fin => FIN_SIZE,
            MessageBody::Error { .. } => ERROR_SIZE,
            MessageBody::Chunk { payload, .. } => CHUNK_PREFIX_SIZE + payload.len(),
        }
    }

    /// 고정 레이아웃 프레임으로 인코딩
    ///
    /// 가변 텍스트 필드(파일명, 에러 메시지)는 필드 폭에서 잘리고
    /// 남는 공간은 NUL로 패딩된다.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_size());
        buf.put_u16(self.stream_id);
        buf.put_u8(self.msg_type() as u8);
        buf.put_u64(self.sequence_number);

        match &self.body {
            MessageBody::ClientHello {
                version,
                next_header_type,
                next_header_offset,
                window,
                start_chunk,
                file_name,
            } => {
                buf.put_u8(*version);
                buf.put_u8(*next_header_type);
                buf.put_u8(*next_header_offset);
                buf.put_u16(*window);
                buf.put_u32(*start_chunk);
                put_padded(&mut buf, file_name.as_bytes(), FILE_NAME_SIZE);
            }
            MessageBody::ServerHello {
                version,
                next_header_type,
                next_header_offset,
                window,
                checksum,
                last_modified,
                file_size,
            } => {
                buf.put_u8(*version);
                buf.put_u8(*next_header_type);
                buf.put_u8(*next_header_offset);
                buf.put_u16(*window);
                buf.put_slice(checksum);
                buf.put_i64(*last_modified);
                buf.put_u64(*file_size);
            }
            MessageBody::Ack { window, ack_number } => {
                buf.put_u16(*window);
                buf.put_u64(*ack_number);
            }
            MessageBody::Fin => {}
            MessageBody::Error {
                category,
                code,
                message,
            } => {
                buf.put_u8(*category);
                buf.put_u8(*code);
                put_padded(&mut buf, message.as_bytes(), ERROR_TEXT_SIZE);
            }
            MessageBody::Chunk { checksum, payload } => {
                debug_assert!(payload.len() <= CHUNK_PAYLOAD_SIZE);
                buf.put_slice(checksum);
                buf.put_slice(payload);
            }
        }

        debug_assert_eq!(buf.len(), self.wire_size());
        buf
    }

    /// 데이터그램에서 메시지 디코딩
    ///
    /// 공통 헤더보다 짧거나, 태그를 모르거나, 변형별 고정 크기에
    /// 못 미치면 `MalformedMessage`. 선언된 크기 너머는 읽지 않는다.
    pub fn decode(frame: &[u8]) -> Result<Message> {
        if frame.len() < HEADER_SIZE {
            return Err(Error::MalformedMessage {
                reason: "공통 헤더보다 짧음",
                len: frame.len(),
            });
        }

        let mut buf = frame;
        let stream_id = buf.get_u16();
        let tag = buf.get_u8();
        let sequence_number = buf.get_u64();

        let msg_type = MessageType::from_wire(tag).ok_or(Error::MalformedMessage {
            reason: "알 수 없는 메시지 타입",
            len: frame.len(),
        })?;

        let body = match msg_type {
            MessageType::ClientHello => {
                ensure_len(frame.len(), CLIENT_HELLO_SIZE)?;
                let version = buf.get_u8();
                let next_header_type = buf.get_u8();
                let next_header_offset = buf.get_u8();
                let window = buf.get_u16();
                let start_chunk = buf.get_u32();
                let file_name = take_padded(&mut buf, FILE_NAME_SIZE);
                MessageBody::ClientHello {
                    version,
                    next_header_type,
                    next_header_offset,
                    window,
                    start_chunk,
                    file_name,
                }
            }
            MessageType::ServerHello => {
                ensure_len(frame.len(), SERVER_HELLO_SIZE)?;
                let version = buf.get_u8();
                let next_header_type = buf.get_u8();
                let next_header_offset = buf.get_u8();
                let window = buf.get_u16();
                let mut checksum = [0u8; 32];
                buf.copy_to_slice(&mut checksum);
                let last_modified = buf.get_i64();
                let file_size = buf.get_u64();
                MessageBody::ServerHello {
                    version,
                    next_header_type,
                    next_header_offset,
                    window,
                    checksum,
                    last_modified,
                    file_size,
                }
            }
            MessageType::Ack => {
                ensure_len(frame.len(), ACK_SIZE)?;
                let window = buf.get_u16();
                let ack_number = buf.get_u64();
                MessageBody::Ack { window, ack_number }
            }
            MessageType::Fin => MessageBody::Fin,
            MessageType::Error => {
                ensure_len(frame.len(), ERROR_SIZE)?;
                let category = buf.get_u8();
                let code = buf.get_u8();
                let message = take_padded(&mut buf, ERROR_TEXT_SIZE);
                MessageBody::Error {
                    category,
                    code,
                    message,
                }
            }
            MessageType::Chunk => {
                ensure_len(frame.len(), CHUNK_PREFIX_SIZE)?;
                let payload_len = frame.len() - CHUNK_PREFIX_SIZE;
                if payload_len > CHUNK_PAYLOAD_SIZE {
                    return Err(Error::MalformedMessage {
                        reason: "청크 페이로드가 최대치 초과",
                        len: frame.len(),
                    });
                }
                let mut checksum = [0u8; 8];
                buf.copy_to_slice(&mut checksum);
                let payload = Bytes::copy_from_slice(&buf[..payload_len]);
                MessageBody::Chunk { checksum, payload }
            }
        };

        Ok(Message {
            stream_id,
            sequence_number,
            body,
        })
    }

    /// Ack 메시지 생성 헬퍼
    pub fn ack(stream_id: u16, sequence_number: u64, window: u16, ack_number: u64) -> Self {
        Message {
            stream_id,
            sequence_number,
            body: MessageBody::Ack { window, ack_number },
        }
    }

    /// Fin 메시지 생성 헬퍼
    pub fn fin(stream_id: u16, sequence_number: u64) -> Self {
        Message {
            stream_id,
            sequence_number,
            body: MessageBody::Fin,
        }
    }
}

fn ensure_len(got: usize, need: usize) -> Result<()> {
    if got < need {
        Err(Error::MalformedMessage {
            reason: "변형별 고정 크기보다 짧음",
            len: got,
        })
    } else {
        Ok(())
    }
}

/// 고정폭 필드 쓰기: 폭에서 자르고 나머지는 NUL 패딩
fn put_padded(buf: &mut Vec<u8>, bytes: &[u8], width: usize) {
    let n = bytes.len().min(width);
    buf.put_slice(&bytes[..n]);
    buf.resize(buf.len() + (width - n), 0);
}

/// 고정폭 필드 읽기: 뒤쪽 NUL 패딩 제거
fn take_padded(buf: &mut &[u8], width: usize) -> String {
    let data = *buf;
    let (field, rest) = data.split_at(width);
    *buf = rest;
    let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}
