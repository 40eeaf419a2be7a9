//! 클라이언트 엔드포인트 엔진
//!
//! 임시 포트 소켓 하나 + 전송 하나. 수신 펌프, 송신 펌프, 프로토콜 로직
//! 세 태스크를 먼저 끝나는 쪽이 이기는 select로 묶는다. 하나가 끝나면
//! 나머지는 취소된다.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::congestion::{CongestionControl, RenoCongestionControl};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::SinkFile;
use crate::message::Message;
use crate::stats::TransferStats;
use crate::stream::ClientStream;
use crate::{HEADER_SIZE, MAX_FRAME_SIZE, UNASSIGNED_STREAM_ID};

/// 단일 파일 수신 클라이언트
pub struct Client {
    config: Config,
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
}

impl Client {
    /// 임시 포트에 바인딩
    pub async fn connect(config: Config, server_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        debug!("클라이언트 바인딩: {}", socket.local_addr()?);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            server_addr,
        })
    }

    /// 파일 하나를 내려받아 sink에 순차 기록한다
    pub async fn fetch(&self, file_name: &str, sink: &mut SinkFile) -> Result<TransferStats> {
        let (ctrl, mut outbound_rx) =
            RenoCongestionControl::new(&self.config, UNASSIGNED_STREAM_ID);
        let ctrl = Arc::new(ctrl);
        let mut stream = ClientStream::new(self.config.clone(), ctrl.clone());

        // 수신 펌프: 소켓 → 디코딩 → 컨트롤러. 끝나는 건 소켓이 죽었을 때뿐.
        let inbound = {
            let socket = self.socket.clone();
            let server_addr = self.server_addr;
            let ctrl = ctrl.clone();
            async move {
                let mut buf = vec![0u8; MAX_FRAME_SIZE];
                loop {
                    let (len, from) = match socket.recv_from(&mut buf).await {
                        Ok(x) => x,
                        Err(e) => {
                            return Error::Transport(format!("소켓 수신 실패: {}", e));
                        }
                    };

                    if from != server_addr {
                        debug!(%from, "서버가 아닌 주소에서 온 데이터그램, 드롭");
                        continue;
                    }
                    if len < HEADER_SIZE {
                        warn!(len, "헤더보다 짧은 데이터그램, 드롭");
                        continue;
                    }

                    match Message::decode(&buf[..len]) {
                        Ok(msg) => ctrl.on_message_arrived(msg),
                        Err(e) => warn!(len, "디코딩 실패, 드롭: {}", e),
                    }
                }
            }
        };

        // 송신 펌프: 컨트롤러의 송신 큐 → 소켓. 큐가 닫히면 끝난다.
        let outbound = {
            let socket = self.socket.clone();
            let server_addr = self.server_addr;
            async move {
                while let Some(msg) = outbound_rx.recv().await {
                    let frame = msg.encode();
                    if let Err(e) = socket.send_to(&frame, server_addr).await {
                        warn!("소켓 송신 실패, 펌프 종료: {}", e);
                        break;
                    }
                }
            }
        };

        // 셋 중 하나가 끝나면 전송 전체가 끝난다
        let result = tokio::select! {
            r = stream.run(file_name, sink) => r,
            e = inbound => Err(e),
            _ = outbound => Err(Error::ChannelClosed),
        };

        // 몇 번을 거쳐 와도 큐 닫힘은 한 번만 일어난다
        ctrl.close();

        result.map(|_| stream.stats().clone())
    }
}
