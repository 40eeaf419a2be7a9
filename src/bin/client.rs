//! RFT 클라이언트 (수신자) - Reliable File Transfer
//!
//! 혼잡제어 UDP 파일 전송 프로토콜 클라이언트
//! - 호출 한 번에 파일 하나 수신
//! - 순서 어긋난 도착은 중복 ACK로 즉시 피드백
//!
//! 사용법:
//!   cargo run --release --bin rft-client -- [OPTIONS]
//!
//! 예시:
//!   # 서버에서 파일 수신
//!   cargo run --release --bin rft-client -- --server 127.0.0.1:5051 --file report.txt
//!
//!   # 저장 경로 지정
//!   cargo run --release --bin rft-client -- -s 127.0.0.1:5051 -f report.txt -o ./saved.txt

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use rft::file::SinkFile;
use rft::{Client, Config};

/// 클라이언트 설정
struct ClientArgs {
    server_addr: SocketAddr,
    file_name: Option<String>,
    output_path: Option<PathBuf>,
    config: Config,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5051".parse().unwrap(),
            file_name: None,
            output_path: None,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    parsed.file_name = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--window" | "-w" => {
                if i + 1 < args.len() {
                    parsed.config.max_window = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--version" | "-V" => {
                println!("rft-client {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                println!(
                    r#"RFT Client - Reliable File Transfer 클라이언트

혼잡제어 UDP 파일 전송 프로토콜 클라이언트
- 호출 한 번에 파일 하나 수신
- 누적 ACK + 중복 ACK 피드백

사용법:
  cargo run --release --bin rft-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>   서버 주소 (기본: 127.0.0.1:5051)
  -f, --file <NAME>     요청할 파일명 (필수)
  -o, --output <PATH>   저장 경로 (기본: 현재 디렉터리의 파일명)
  -w, --window <N>      최대 윈도우 크기, 메시지 단위 (기본: 64)
  -V, --version         버전 출력
  -h, --help            이 도움말 출력

예시:
  # 파일 수신
  cargo run --release --bin rft-client -- -s 192.168.1.10:5051 -f report.txt

  # 저장 경로 지정
  cargo run --release --bin rft-client -- -f report.txt -o /tmp/report.txt
"#
                );
                std::process::exit(1);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    let Some(file_name) = args.file_name else {
        eprintln!("--file <NAME> 옵션이 필요합니다. --help 참고.");
        std::process::exit(2);
    };

    // 저장 경로 구성은 바이너리 가장자리에서만
    let output_path = args
        .output_path
        .unwrap_or_else(|| PathBuf::from(&file_name));

    info!("RFT Client starting...");
    info!("Server address: {}", args.server_addr);
    info!("Requesting file: {}", file_name);
    info!("Saving to: {}", output_path.display());

    let mut sink = SinkFile::create(&output_path).await?;
    let client = Client::connect(args.config, args.server_addr).await?;

    match client.fetch(&file_name, &mut sink).await {
        Ok(stats) => {
            info!(
                "다운로드 완료: {} bytes, {:.2} MB/s",
                stats.payload_bytes,
                stats.throughput() / 1_000_000.0
            );
            Ok(())
        }
        Err(e) => {
            error!("다운로드 실패: {}", e);
            std::process::exit(1);
        }
    }
}
