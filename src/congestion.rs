//! 혼잡제어 레이어
//!
//! 스트림 하나당 컨트롤러 하나. 신뢰성 장부(시퀀스, ACK, 윈도우)를
//! 한 곳에 모으고, 상태 머신과 펌프 태스크 사이는 바운디드 큐로만 잇는다.
//!
//! - 수신측: 순서 어긋난 도착은 드롭하고 즉시 중복 ACK
//! - 송신측: slow start / congestion avoidance + RTO / fast retransmit
//! - 버퍼가 가득 차면 최신 도착분을 드롭 (피어가 타임아웃 후 재전송)

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Message, MessageBody};
use crate::stats::CongestionCounters;

/// 혼잡제어 알고리즘 인터페이스
///
/// 스트림은 이 인터페이스를 통해서만 신뢰성 레이어를 본다.
/// 컴포지션으로 주입되므로 다른 알고리즘으로 교체해도
/// 스트림 로직은 손대지 않는다.
pub trait CongestionControl: Send + Sync {
    /// 스트림 ID와 시퀀스 번호를 스탬핑하고 송신 큐에 적재
    ///
    /// 청크는 윈도우가 허용하는 만큼만 내보낸다. 미확인 바이트가
    /// 윈도우를 채우면 ACK가 올 때까지 호출자를 재운다 (스핀 금지).
    fn send(&self, msg: Message) -> impl Future<Output = Result<()>> + Send;

    /// 인바운드 메시지 1건 처리. 디먹스 루프에서 호출되며 블록하지 않는다.
    fn on_message_arrived(&self, msg: Message);

    /// 버퍼된 다음 메시지를 기다려서 반환
    fn receive(&self) -> impl Future<Output = Result<Message>> + Send;

    /// 피어의 첫 ACK 도착 대기
    fn first_ack(&self) -> impl Future<Output = ()> + Send;

    /// 모든 청크가 확인될 때까지 대기
    fn all_acked(&self) -> impl Future<Output = ()> + Send;

    /// 서버가 배정한 스트림 ID 채택 (이후 송신 메시지에 스탬핑됨)
    fn adopt_stream_id(&self, id: u16);

    /// 현재 스트림 ID
    fn stream_id(&self) -> u16;

    /// 수신측 누적 오프셋 (이 미만은 전부 수신 완료)
    fn ack_number(&self) -> u64;

    /// 피어가 확인한 누적 오프셋
    fn peer_acked(&self) -> u64;

    /// 수신 버퍼 여유 = 피어에게 광고하는 윈도우 (메시지 단위)
    fn advertised_window(&self) -> u16;

    /// 카운터 스냅샷
    fn counters(&self) -> CongestionCounters;

    /// 송신 큐 닫기. 몇 번을 불러도 실제 닫힘은 한 번만 일어난다.
    fn close(&self);
}

/// 윈도우 성장 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionPhase {
    SlowStart,
    CongestionAvoidance,
}

/// 뮤텍스 안의 신뢰성 장부
struct RenoState {
    /// 수신측 누적 오프셋: 다음에 기대하는 시퀀스 번호
    ack_number: u64,

    /// 다음 송신 메시지에 스탬핑할 오프셋
    last_sent_seq: u64,

    /// 피어가 확인한 누적 오프셋. peer_acked <= last_sent_seq 불변
    peer_acked: u64,

    /// 피어가 광고한 윈도우 (메시지 단위)
    peer_window: u16,

    /// 혼잡 윈도우 (메시지 단위, avoidance에서 소수 성장)
    cwnd: f64,

    /// slow start 임계값
    ssthresh: f64,

    phase: CongestionPhase,

    /// 연속 중복 ACK 수
    dup_acks: u32,

    /// 미확인 청크 사본 (오래된 것부터)
    unacked: VecDeque<Message>,

    /// 첫 ACK 도착 여부
    first_ack_seen: bool,
}

impl RenoState {
    fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    fn effective_window(&self) -> usize {
        (self.cwnd as usize).max(1).min(self.peer_window.max(1) as usize)
    }

    /// 새 ACK 1건에 대한 윈도우 성장
    fn grow_window(&mut self, max_window: u16) {
        match self.phase {
            CongestionPhase::SlowStart => {
                self.cwnd += 1.0;
                if self.cwnd >= self.ssthresh {
                    self.phase = CongestionPhase::CongestionAvoidance;
                }
            }
            CongestionPhase::CongestionAvoidance => {
                self.cwnd += 1.0 / self.cwnd;
            }
        }
        self.cwnd = self.cwnd.min(max_window as f64);
    }

    /// 손실 신호에 대한 윈도우 축소. RTO는 cwnd를 1로 되돌린다.
    fn shrink_window(&mut self, hard: bool) {
        self.ssthresh = (self.cwnd / 2.0).max(2.0);
        if hard {
            self.cwnd = 1.0;
            self.phase = CongestionPhase::SlowStart;
        } else {
            self.cwnd = self.ssthresh;
        }
    }
}

/// TCP Reno식 혼잡제어 구현
pub struct RenoCongestionControl {
    stream_id: AtomicU16,
    state: Mutex<RenoState>,

    /// 수신 버퍼: 프로토콜 로직이 소비할 순서 맞은 메시지
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,

    /// 송신 큐. close() 시 None으로 비워 펌프를 끝낸다.
    outbound_tx: Mutex<Option<mpsc::Sender<Message>>>,
    closed: AtomicBool,

    /// ACK 진행 알림 (윈도우 스톨 해제, 첫 ACK 대기)
    ack_notify: Notify,

    max_window: u16,
    retransmit_timeout: std::time::Duration,

    // 카운터
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    dup_acks_sent: AtomicU64,
    dup_acks_received: AtomicU64,
    retransmitted: AtomicU64,
    dropped_overflow: AtomicU64,
}

impl RenoCongestionControl {
    /// 컨트롤러 생성. 송신 큐의 수신단은 펌프 태스크가 가져간다.
    pub fn new(config: &Config, stream_id: u16) -> (Self, mpsc::Receiver<Message>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.recv_buffer_msgs);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_msgs);

        let ctrl = Self {
            stream_id: AtomicU16::new(stream_id),
            state: Mutex::new(RenoState {
                ack_number: 0,
                last_sent_seq: 0,
                peer_acked: 0,
                peer_window: config.max_window,
                cwnd: config.initial_window as f64,
                ssthresh: config.initial_ssthresh as f64,
                phase: CongestionPhase::SlowStart,
                dup_acks: 0,
                unacked: VecDeque::new(),
                first_ack_seen: false,
            }),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx: Mutex::new(Some(outbound_tx)),
            closed: AtomicBool::new(false),
            ack_notify: Notify::new(),
            max_window: config.max_window,
            retransmit_timeout: config.retransmit_timeout,
            acks_sent: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            dup_acks_sent: AtomicU64::new(0),
            dup_acks_received: AtomicU64::new(0),
            retransmitted: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
        };

        (ctrl, outbound_rx)
    }

    /// 현재 혼잡 윈도우 (메시지 단위)
    pub fn congestion_window(&self) -> u16 {
        self.state.lock().cwnd as u16
    }

    /// 현재 성장 단계
    pub fn phase(&self) -> CongestionPhase {
        self.state.lock().phase
    }

    /// 윈도우에 자리가 날 때까지 대기. RTO가 지나면 slow start 재시작 +
    /// 가장 오래된 미확인 청크 재전송.
    async fn wait_for_window(&self) -> Result<()> {
        loop {
            let notified = self.ack_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let st = self.state.lock();
                if st.in_flight() < st.effective_window() {
                    return Ok(());
                }
            }

            trace!(stream_id = self.stream_id(), "윈도우 가득참, ACK 대기");

            if tokio::time::timeout(self.retransmit_timeout, notified)
                .await
                .is_err()
            {
                self.on_retransmit_timeout();
            }

            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ChannelClosed);
            }
        }
    }

    /// RTO: 혼잡 붕괴로 간주. ssthresh 절반, cwnd 1, 맨 앞 미확인 청크 재전송.
    fn on_retransmit_timeout(&self) {
        let front = {
            let mut st = self.state.lock();
            if st.unacked.is_empty() {
                return;
            }
            st.shrink_window(true);
            st.unacked.front().cloned()
        };

        if let Some(msg) = front {
            warn!(
                stream_id = self.stream_id(),
                seq = msg.sequence_number,
                "재전송 타임아웃, slow start 재시작"
            );
            self.retransmitted.fetch_add(1, Ordering::Relaxed);
            self.try_enqueue_outbound(msg);
        }
    }

    /// ACK 처리: 새 ACK면 장부 정리 + 윈도우 성장, 중복이면 fast retransmit 판단
    fn handle_ack(&self, window: u16, ack_number: u64) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);

        let retransmit = {
            let mut st = self.state.lock();
            st.peer_window = window;

            // peer_acked <= last_sent_seq 불변 유지: 보낸 적 없는 바이트의
            // ACK는 보낸 만큼으로 잘라낸다
            let ack_number = ack_number.min(st.last_sent_seq);

            if !st.first_ack_seen {
                st.first_ack_seen = true;
            }

            if ack_number > st.peer_acked {
                st.peer_acked = ack_number;
                st.dup_acks = 0;

                while let Some(front) = st.unacked.front() {
                    if front.sequence_number + front.stream_len() <= ack_number {
                        st.unacked.pop_front();
                    } else {
                        break;
                    }
                }

                st.grow_window(self.max_window);
                None
            } else if !st.unacked.is_empty() {
                self.dup_acks_received.fetch_add(1, Ordering::Relaxed);
                st.dup_acks += 1;

                if st.dup_acks >= 3 {
                    st.dup_acks = 0;
                    st.shrink_window(false);
                    st.unacked.front().cloned()
                } else {
                    None
                }
            } else {
                None
            }
        };

        self.ack_notify.notify_waiters();

        if let Some(msg) = retransmit {
            debug!(
                stream_id = self.stream_id(),
                seq = msg.sequence_number,
                "중복 ACK 3회, fast retransmit"
            );
            self.retransmitted.fetch_add(1, Ordering::Relaxed);
            self.try_enqueue_outbound(msg);
        }
    }

    /// ACK 발행. 디먹스 루프를 막지 않도록 try_send만 쓴다.
    /// 큐가 가득 차면 버린다 (ACK는 다음 도착에서 다시 나간다).
    fn emit_ack(&self, stream_id: u16, ack_number: u64, duplicate: bool) {
        let seq = self.state.lock().last_sent_seq;
        let ack = Message::ack(stream_id, seq, self.advertised_window(), ack_number);

        if duplicate {
            self.dup_acks_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.acks_sent.fetch_add(1, Ordering::Relaxed);
        }

        self.try_enqueue_outbound(ack);
    }

    async fn enqueue_outbound(&self, msg: Message) -> Result<()> {
        let tx = self
            .outbound_tx
            .lock()
            .clone()
            .ok_or(Error::ChannelClosed)?;
        tx.send(msg).await.map_err(|_| Error::ChannelClosed)
    }

    fn try_enqueue_outbound(&self, msg: Message) {
        let Some(tx) = self.outbound_tx.lock().clone() else {
            return;
        };

        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(m)) => {
                warn!(
                    stream_id = self.stream_id(),
                    msg_type = ?m.msg_type(),
                    "송신 큐 가득참, 메시지 드롭"
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl CongestionControl for RenoCongestionControl {
    fn send(&self, msg: Message) -> impl Future<Output = Result<()>> + Send {
        async move {
            let is_chunk = matches!(msg.body, MessageBody::Chunk { .. });
            if is_chunk {
                self.wait_for_window().await?;
            }

            let stamped = {
                let mut st = self.state.lock();
                let mut msg = msg;
                msg.stream_id = self.stream_id();
                msg.sequence_number = st.last_sent_seq;
                st.last_sent_seq += msg.stream_len();
                if is_chunk {
                    st.unacked.push_back(msg.clone());
                }
                msg
            };

            self.enqueue_outbound(stamped).await
        }
    }

    fn on_message_arrived(&self, msg: Message) {
        if let MessageBody::Ack { window, ack_number } = msg.body {
            self.handle_ack(window, ack_number);
            return;
        }

        let stream_id = msg.stream_id;
        let stream_len = msg.stream_len();
        let seq = msg.sequence_number;

        enum Verdict {
            Accepted(u64),
            OutOfOrder(u64),
            Overflow,
        }

        let verdict = {
            let mut st = self.state.lock();
            if seq != st.ack_number {
                Verdict::OutOfOrder(st.ack_number)
            } else {
                match self.inbound_tx.try_send(msg) {
                    Ok(()) => {
                        st.ack_number += stream_len;
                        Verdict::Accepted(st.ack_number)
                    }
                    Err(TrySendError::Full(_)) => Verdict::Overflow,
                    // 소비자가 끝났으면 조용히 버린다. 스트림 정리 경로.
                    Err(TrySendError::Closed(_)) => return,
                }
            }
        };

        match verdict {
            Verdict::Accepted(ack) => {
                trace!(stream_id, seq, "메시지 수락, ack={}", ack);
                self.emit_ack(stream_id, ack, false);
            }
            Verdict::OutOfOrder(ack) => {
                debug!(
                    stream_id,
                    seq, ack, "순서 어긋난 도착, 드롭 후 중복 ACK"
                );
                self.emit_ack(stream_id, ack, true);
            }
            Verdict::Overflow => {
                self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                warn!(stream_id, seq, "수신 버퍼 가득참, 메시지 드롭");
            }
        }
    }

    fn receive(&self) -> impl Future<Output = Result<Message>> + Send {
        async move {
            let mut rx = self.inbound_rx.lock().await;
            rx.recv().await.ok_or(Error::ChannelClosed)
        }
    }

    fn first_ack(&self) -> impl Future<Output = ()> + Send {
        async move {
            loop {
                let notified = self.ack_notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.state.lock().first_ack_seen {
                    return;
                }
                notified.await;
            }
        }
    }

    fn all_acked(&self) -> impl Future<Output = ()> + Send {
        async move {
            loop {
                let notified = self.ack_notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.state.lock().unacked.is_empty() {
                    return;
                }
                notified.await;
            }
        }
    }

    fn adopt_stream_id(&self, id: u16) {
        self.stream_id.store(id, Ordering::SeqCst);
    }

    fn stream_id(&self) -> u16 {
        self.stream_id.load(Ordering::SeqCst)
    }

    fn ack_number(&self) -> u64 {
        self.state.lock().ack_number
    }

    fn peer_acked(&self) -> u64 {
        self.state.lock().peer_acked
    }

    fn advertised_window(&self) -> u16 {
        self.inbound_tx.capacity().min(u16::MAX as usize) as u16
    }

    fn counters(&self) -> CongestionCounters {
        CongestionCounters {
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            dup_acks_sent: self.dup_acks_sent.load(Ordering::Relaxed),
            dup_acks_received: self.dup_acks_received.load(Ordering::Relaxed),
            retransmitted_chunks: self.retransmitted.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
        }
    }

    fn close(&self) {
        // 이미 닫혔으면 아무것도 하지 않는다
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound_tx.lock().take();
        self.ack_notify.notify_waiters();
    }
}
