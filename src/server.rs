//! 서버 엔드포인트 엔진
//!
//! 소켓 하나를 소유하고 인바운드 데이터그램을 스트림 ID로 디먹스한다.
//! - ClientHello → 새 스트림 수립 (프로토콜 태스크 + 송신 펌프)
//! - 그 외 → 레지스트리에서 찾은 스트림의 혼잡 컨트롤러에 전달
//!
//! 데이터그램 단위 에러는 경고만 남기고 루프는 계속 돈다.
//! 공유 소켓 자체가 죽었을 때만 루프가 끝난다.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::congestion::{CongestionControl, RenoCongestionControl};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Message, MessageBody};
use crate::stream::ServerStream;
use crate::{HEADER_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION, UNASSIGNED_STREAM_ID};

/// 수신 루프가 포기하기 전까지 허용하는 연속 소켓 에러 수
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 8;

/// RFT 서버: 설정된 루트 디렉터리의 파일을 서빙한다
pub struct Server {
    config: Config,
    root: PathBuf,
    socket: Arc<UdpSocket>,

    /// 활성 스트림 레지스트리. 삽입은 수신 루프만, 제거는 각 스트림의
    /// 정리 핸들러만 한다.
    streams: Arc<DashMap<u16, Arc<RenoCongestionControl>>>,

    /// 스트림 ID 추첨용 RNG. 엔진 인스턴스가 소유하고 생성 시 초기화된다.
    rng: Mutex<StdRng>,
}

impl Server {
    /// 소켓을 바인딩하고 엔진을 만든다
    pub async fn bind(config: Config, bind_addr: SocketAddr, root: PathBuf) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("RFT 서버 시작: {}", socket.local_addr()?);

        Ok(Self {
            config,
            root,
            socket: Arc::new(socket),
            streams: Arc::new(DashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// 실제 바인딩된 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 현재 활성 스트림 수
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// 수신 루프. 소켓이 회복 불능일 때만 반환한다.
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let mut consecutive_errors = 0u32;

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => {
                    consecutive_errors = 0;
                    x
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!("소켓 수신 에러 ({}회째): {}", consecutive_errors, e);
                    if consecutive_errors >= MAX_CONSECUTIVE_RECV_ERRORS {
                        return Err(Error::Transport(format!(
                            "수신 에러 {}회 연속, 수신 루프 종료: {}",
                            consecutive_errors, e
                        )));
                    }
                    continue;
                }
            };

            // 공통 헤더보다 짧은 데이터그램은 파싱 전에 걸러낸다
            if len < HEADER_SIZE {
                warn!(%peer, len, "헤더보다 짧은 데이터그램, 드롭");
                continue;
            }

            let msg = match Message::decode(&buf[..len]) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%peer, len, "디코딩 실패, 드롭: {}", e);
                    continue;
                }
            };

            match msg.body {
                MessageBody::ClientHello {
                    version,
                    start_chunk,
                    ref file_name,
                    ..
                } => {
                    if version != PROTOCOL_VERSION {
                        warn!(%peer, version, "지원하지 않는 프로토콜 버전, 드롭");
                        continue;
                    }
                    self.accept_stream(file_name.clone(), start_chunk, peer);
                }
                _ => match self.streams.get(&msg.stream_id) {
                    Some(ctrl) => ctrl.on_message_arrived(msg),
                    None => {
                        warn!(
                            stream_id = msg.stream_id,
                            %peer,
                            "모르는 스트림으로 온 메시지, 드롭"
                        );
                    }
                },
            }
        }
    }

    /// ClientHello 수락: ID 배정 → 레지스트리 등록 → 태스크 2개 기동
    fn accept_stream(&self, file_name: String, start_chunk: u32, peer: SocketAddr) {
        let id = match self.allocate_stream_id() {
            Ok(id) => id,
            Err(e) => {
                // 되돌릴 수 없는 용량 한계. 기존 스트림은 계속 서빙한다.
                warn!(%peer, "새 전송 거부: {}", e);
                return;
            }
        };

        let (ctrl, outbound_rx) = RenoCongestionControl::new(&self.config, id);
        let ctrl = Arc::new(ctrl);
        self.streams.insert(id, ctrl.clone());

        // 송신 펌프: 스트림의 송신 큐 → 공유 소켓 (요청 피어 주소로)
        tokio::spawn(Self::outbound_pump(
            self.socket.clone(),
            outbound_rx,
            peer,
            id,
        ));

        // 프로토콜 태스크. 끝나면 큐를 닫고 ID를 반납한다.
        let streams = self.streams.clone();
        let config = self.config.clone();
        let root = self.root.clone();
        tokio::spawn(async move {
            let mut stream = ServerStream::new(id, config, ctrl.clone(), file_name, start_chunk);
            // 에러는 스트림 경계에서 이미 로그됨. 루프로 번지지 않는다.
            let _ = stream.run(&root).await;

            ctrl.close();
            streams.remove(&id);
            debug!(stream_id = id, "스트림 해지, ID 반납");
        });
    }

    /// 16비트 공간에서 균등 추첨, 충돌 시 재추첨.
    /// 0은 핸드쉐이크 전 예약이므로 배정하지 않는다.
    fn allocate_stream_id(&self) -> Result<u16> {
        let live = self.streams.len();
        if live >= u16::MAX as usize {
            return Err(Error::CapacityExhausted { live });
        }

        let mut rng = self.rng.lock();
        loop {
            let id: u16 = rng.gen();
            if id == UNASSIGNED_STREAM_ID {
                continue;
            }
            if !self.streams.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    async fn outbound_pump(
        socket: Arc<UdpSocket>,
        mut outbound_rx: mpsc::Receiver<Message>,
        peer: SocketAddr,
        id: u16,
    ) {
        while let Some(msg) = outbound_rx.recv().await {
            let frame = msg.encode();
            match socket.send_to(&frame, peer).await {
                Ok(n) => {
                    trace!(stream_id = id, bytes = n, %peer, "데이터그램 송신");
                    if n != frame.len() {
                        warn!(
                            stream_id = id,
                            expected = frame.len(),
                            actual = n,
                            "데이터그램이 잘려서 나감, 펌프 종료"
                        );
                        break;
                    }
                }
                Err(e) => {
                    warn!(stream_id = id, "소켓 송신 실패, 펌프 종료: {}", e);
                    break;
                }
            }
        }
        debug!(stream_id = id, "송신 펌프 종료");
    }
}
