//! 파일 콜라보레이터
//!
//! 코어는 파일시스템을 직접 만지지 않고 이 얇은 표면만 쓴다:
//! 송신측은 랜덤 액세스 읽기 + 전체 길이, 수신측은 순차 쓰기 + 플러시.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// 서빙할 파일 (송신측): 크기/수정시각 메타데이터 + 오프셋 읽기
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    file: File,
    len: u64,
    last_modified: i64,
}

impl SourceFile {
    /// 파일 열기. 실패는 Resource 에러로 경로와 함께 보고한다.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| Error::Resource {
                path: path.display().to_string(),
                source: e,
            })?;

        let meta = file.metadata().await.map_err(|e| Error::Resource {
            path: path.display().to_string(),
            source: e,
        })?;

        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(Self {
            len: meta.len(),
            path,
            file,
            last_modified,
        })
    }

    /// 파일 전체 크기 (바이트)
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 수정 시각 (unix epoch 초)
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// 전체 내용의 SHA-256. 위치를 되돌려 놓으므로 read_at과 섞어 써도 된다.
    pub async fn sha256(&mut self) -> Result<[u8; 32]> {
        self.file.seek(SeekFrom::Start(0)).await?;
        let digest = crate::hash::file_sha256(&mut self.file).await?;
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(digest)
    }

    /// 주어진 오프셋에서 buf를 가득 채울 때까지 읽기
    ///
    /// 파일 끝에 걸리면 읽힌 바이트 수만 반환한다.
    pub async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset)).await?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// 경로 표시용
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 저장 대상 (수신측): 순차 쓰기 + 내구성 플러시
pub struct SinkFile {
    path: PathBuf,
    file: File,
    written: u64,
}

impl SinkFile {
    /// 저장 파일 생성 (기존 내용은 잘림)
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .await
            .map_err(|e| Error::Resource {
                path: path.display().to_string(),
                source: e,
            })?;

        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    /// 순차 쓰기
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// 지금까지 쓴 바이트 수
    pub fn written(&self) -> u64 {
        self.written
    }

    /// 디스크까지 플러시
    pub async fn sync(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_read_at_random_access() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255).collect();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let mut src = SourceFile::open(tmp.path()).await.unwrap();
        assert_eq!(src.len(), 256);

        let mut buf = [0u8; 16];
        let n = src.read_at(100, &mut buf).await.unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf[..], &data[100..116]);

        // 파일 끝에 걸친 읽기는 읽힌 만큼만
        let n = src.read_at(250, &mut buf).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[..n], &data[250..]);
    }

    #[tokio::test]
    async fn test_sink_sequential_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = SinkFile::create(&path).await.unwrap();
        sink.write_all(b"hello ").await.unwrap();
        sink.write_all(b"world").await.unwrap();
        sink.sync().await.unwrap();
        assert_eq!(sink.written(), 11);

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_open_missing_file_is_resource_error() {
        let err = SourceFile::open("/no/such/file").await.unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }
}
