//! 체크섬 계산
//!
//! - 파일 전체: SHA-256 (ServerHello에 실림)
//! - 청크: CRC32를 8바이트로 제로 확장 (프레임 필드 채움용, 수신측 미검증)

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// 파일 해싱용 읽기 버퍼 크기. 메모리보다 큰 파일도 스트리밍으로 처리한다.
const HASH_READ_SIZE: usize = 1024 * 1024;

/// 파일 전체를 스트리밍으로 SHA-256 해싱
pub async fn file_sha256(file: &mut tokio::fs::File) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into())
}

/// 청크 체크섬 필드 값: CRC32(payload)를 상위 비트 0으로 확장
pub fn chunk_checksum(payload: &[u8]) -> [u8; 8] {
    let crc = crc32fast::hash(payload) as u64;
    crc.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_sha256_matches_one_shot_digest() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0x42u8; 3 * 1024 * 1024 + 17];
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let mut file = tokio::fs::File::open(tmp.path()).await.unwrap();
        let streamed = file_sha256(&mut file).await.unwrap();

        let direct: [u8; 32] = Sha256::digest(&data).into();
        assert_eq!(streamed, direct);
    }

    #[test]
    fn test_chunk_checksum_is_crc32_zero_extended() {
        let sum = chunk_checksum(b"hello");
        assert_eq!(&sum[..4], &[0, 0, 0, 0]);
        assert_eq!(
            u64::from_be_bytes(sum),
            crc32fast::hash(b"hello") as u64
        );
    }
}
