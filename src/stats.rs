//! 전송 통계

use std::time::{Duration, Instant};

use crate::stream::StreamState;

/// 혼잡제어 레이어 카운터 (컨트롤러가 집계)
#[derive(Debug, Default, Clone, Copy)]
pub struct CongestionCounters {
    /// 보낸 누적 ACK 수
    pub acks_sent: u64,

    /// 받은 ACK 수 (중복 포함)
    pub acks_received: u64,

    /// 보낸 중복 ACK 수 (갭/재정렬 감지 시)
    pub dup_acks_sent: u64,

    /// 받은 중복 ACK 수
    pub dup_acks_received: u64,

    /// 재전송한 청크 수 (RTO + fast retransmit)
    pub retransmitted_chunks: u64,

    /// 수신 버퍼 초과로 드롭한 메시지 수
    pub dropped_overflow: u64,
}

/// 스트림 하나의 전송 통계. 스트림 종료 시 로그로 남긴다.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 스트림 ID
    pub stream_id: u16,

    /// 전송/수신한 페이로드 바이트
    pub payload_bytes: u64,

    /// 전송/수신한 청크 수
    pub chunks: u64,

    /// 종료 시점의 스트림 상태
    pub final_state: StreamState,

    /// 혼잡제어 카운터
    pub congestion: CongestionCounters,

    /// 시작 시각
    started_at: Instant,

    /// 소요 시간 (finish 호출 시 고정)
    elapsed: Option<Duration>,
}

impl TransferStats {
    pub fn new(stream_id: u16) -> Self {
        Self {
            stream_id,
            payload_bytes: 0,
            chunks: 0,
            final_state: StreamState::Created,
            congestion: CongestionCounters::default(),
            started_at: Instant::now(),
            elapsed: None,
        }
    }

    /// 청크 1건 기록
    pub fn record_chunk(&mut self, payload_len: usize) {
        self.chunks += 1;
        self.payload_bytes += payload_len as u64;
    }

    /// 종료 기록: 소요 시간 고정 + 최종 상태/카운터 반영
    pub fn finish(&mut self, state: StreamState, congestion: CongestionCounters) {
        self.elapsed = Some(self.started_at.elapsed());
        self.final_state = state;
        self.congestion = congestion;
    }

    /// 소요 시간
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started_at.elapsed())
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.payload_bytes as f64 / secs
    }

    /// 로그 한 줄 요약
    pub fn summary(&self) -> String {
        format!(
            "stream {}: {:?}, {} bytes / {} chunks, {:.2}ms, {:.2} MB/s, retransmit={}, dup_ack_sent={}, dropped={}",
            self.stream_id,
            self.final_state,
            self.payload_bytes,
            self.chunks,
            self.elapsed().as_secs_f64() * 1000.0,
            self.throughput() / 1_000_000.0,
            self.congestion.retransmitted_chunks,
            self.congestion.dup_acks_sent,
            self.congestion.dropped_overflow,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate_and_finish() {
        let mut stats = TransferStats::new(7);
        stats.record_chunk(997);
        stats.record_chunk(506);
        assert_eq!(stats.payload_bytes, 1503);
        assert_eq!(stats.chunks, 2);

        stats.finish(StreamState::Closed, CongestionCounters::default());
        assert_eq!(stats.final_state, StreamState::Closed);
        assert!(stats.summary().contains("stream 7"));
    }
}
