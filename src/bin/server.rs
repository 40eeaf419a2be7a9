//! RFT 서버 (송신자) - Reliable File Transfer
//!
//! 혼잡제어 UDP 파일 전송 프로토콜 서버
//! - 소켓 하나로 여러 전송 동시 서빙 (스트림 ID 디먹스)
//! - Reno식 slow start / congestion avoidance
//!
//! 사용법:
//!   cargo run --release --bin rft-server -- [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리 서빙
//!   cargo run --release --bin rft-server -- --bind 0.0.0.0:5051
//!
//!   # 특정 디렉터리 서빙
//!   cargo run --release --bin rft-server -- -b 0.0.0.0:5051 --root ./files

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use rft::{Config, Server};

const BANNER: &str = r#"
________________________________
\______   \_   _____/\__    ___/
|       _/|    __)    |    |
|    |   \|     \     |    |
|____|_  /\___  /     |____|
       \/    \/
"#;

/// 서버 설정
struct ServerArgs {
    bind_addr: SocketAddr,
    root: PathBuf,
    config: Config,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5051".parse().unwrap(),
            root: PathBuf::from("."),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--root" | "-r" => {
                if i + 1 < args.len() {
                    parsed.root = PathBuf::from(&args[i + 1]);
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
                println!("rft-server {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                println!(
                    r#"RFT Server - Reliable File Transfer 서버

혼잡제어 UDP 파일 전송 프로토콜 서버
- 소켓 하나로 여러 전송 동시 서빙
- Reno식 혼잡제어 + 누적 ACK

사용법:
  cargo run --release --bin rft-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>    바인드 주소 (기본: 0.0.0.0:5051)
  -r, --root <DIR>     서빙할 디렉터리 (기본: 현재 디렉터리)
  -w, --window <N>     최대 윈도우 크기, 메시지 단위 (기본: 64)
  -V, --version        버전 출력
  -h, --help           이 도움말 출력

예시:
  # 현재 디렉터리 서빙
  cargo run --release --bin rft-server

  # 특정 디렉터리 + 작은 윈도우
  cargo run --release --bin rft-server -- -r ./files -w 16
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

/// 서빙 가능한 파일 나열 (디렉터리 열람은 바이너리 가장자리에서만)
fn list_servable_files(root: &Path) {
    match std::fs::read_dir(root) {
        Ok(entries) => {
            for entry in entries.flatten() {
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    info!("서빙 가능: {}", entry.file_name().to_string_lossy());
                }
            }
        }
        Err(e) => warn!("루트 디렉터리 열람 실패: {}: {}", root.display(), e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    println!("{}", BANNER);
    info!("RFT Server starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Serving root: {}", args.root.display());
    info!("Max window: {} messages", args.config.max_window);

    list_servable_files(&args.root);

    let server = Server::bind(args.config, args.bind_addr, args.root).await?;
    server.run().await?;

    Ok(())
}
