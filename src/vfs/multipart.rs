//! Multipart upload engine / 分片上传
//!
//! Parts are read and uploaded strictly one after another, so at most one part is
//! buffered in memory and cleanup order is deterministic. Completion happens once,
//! after every part was accepted; any failure before that aborts the upload.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::storage::{CompletedPart, ObjectStore};
use crate::utils::{content_type_for, SEPARATOR};

use super::error::VfsResult;

/// 5MB per part, the smallest non-final part S3 accepts / 默认分片大小
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// State of one in-flight multipart upload / 进行中的分片上传
#[derive(Debug)]
pub struct UploadSession {
    pub key: String,
    pub upload_id: String,
    /// Parts in the order the store accepted them / 已接受的分片
    pub parts: Vec<CompletedPart>,
}

impl UploadSession {
    fn new(key: &str, upload_id: String) -> Self {
        Self {
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
        }
    }

    fn next_part_number(&self) -> u32 {
        self.parts.len() as u32 + 1
    }
}

/// How an object ended up in the store / 上传方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// One plain PutObject request
    Single { bytes: u64 },
    Multipart { parts: u32, bytes: u64 },
}

pub struct MultipartUploader<'a> {
    store: &'a dyn ObjectStore,
    part_size: usize,
}

impl<'a> MultipartUploader<'a> {
    pub fn new(store: &'a dyn ObjectStore, part_size: usize) -> Self {
        Self {
            store,
            part_size: part_size.max(1),
        }
    }

    /// Write `source` to `key` / 写入对象
    ///
    /// Directory markers (trailing `/`) and absent sources become an empty object.
    /// A source that ends before the first part fills, including an empty one, is
    /// sent as a single PutObject; anything larger goes through multipart.
    pub async fn put<R>(&self, key: &str, source: Option<&mut R>) -> VfsResult<PutOutcome>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let content_type = content_type_for(key);

        let source = match source {
            Some(source) if !key.ends_with(SEPARATOR) => source,
            _ => {
                self.store
                    .put_object(key, Bytes::new(), &content_type)
                    .await?;
                tracing::debug!("Empty object written: key={}", key);
                return Ok(PutOutcome::Single { bytes: 0 });
            }
        };

        let first = read_chunk(source, self.part_size).await?;
        if first.len() < self.part_size {
            let bytes = first.len() as u64;
            self.store.put_object(key, first, &content_type).await?;
            tracing::debug!("Object written in one request: key={}, size={}", key, bytes);
            return Ok(PutOutcome::Single { bytes });
        }

        let upload_id = self.store.create_multipart(key, &content_type).await?;
        let mut session = UploadSession::new(key, upload_id);
        tracing::debug!(
            "Multipart upload started: key={}, upload_id={}",
            key,
            session.upload_id
        );

        let bytes = match self.upload_parts(&mut session, first, source).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Multipart upload failed: key={}, error={}", key, e);
                self.abort(&session).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .complete_multipart(key, &session.upload_id, &session.parts)
            .await
        {
            tracing::warn!("Completing multipart upload failed: key={}, error={}", key, e);
            self.abort(&session).await;
            return Err(e.into());
        }

        tracing::debug!(
            "Multipart upload complete: key={}, parts={}, size={}",
            key,
            session.parts.len(),
            bytes
        );
        Ok(PutOutcome::Multipart {
            parts: session.parts.len() as u32,
            bytes,
        })
    }

    async fn upload_parts<R>(
        &self,
        session: &mut UploadSession,
        first: Bytes,
        source: &mut R,
    ) -> VfsResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut chunk = first;
        let mut total = 0u64;

        loop {
            let part_number = session.next_part_number();
            let len = chunk.len();
            let etag = self
                .store
                .upload_part(&session.key, &session.upload_id, part_number, chunk)
                .await?;
            tracing::debug!(
                "Part uploaded: key={}, part={}, size={}",
                session.key,
                part_number,
                len
            );
            session.parts.push(CompletedPart { part_number, etag });
            total += len as u64;

            // a short part can only be the last one
            if len < self.part_size {
                break;
            }
            chunk = read_chunk(source, self.part_size).await?;
            if chunk.is_empty() {
                break;
            }
        }

        Ok(total)
    }

    async fn abort(&self, session: &UploadSession) {
        if let Err(e) = self
            .store
            .abort_multipart(&session.key, &session.upload_id)
            .await
        {
            tracing::error!(
                "Aborting multipart upload failed: key={}, upload_id={}, error={}",
                session.key,
                session.upload_id,
                e
            );
        }
    }
}

/// Fill up to `size` bytes; a shorter result means end of input / 读取一个分片
async fn read_chunk<R>(source: &mut R, size: usize) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{FailOn, RecordingStore, StoreCall};
    use crate::storage::{Credentials, MemoryStore};
    use crate::vfs::error::VfsError;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    const MIB: usize = 1024 * 1024;

    fn setup() -> (MemoryStore, RecordingStore) {
        let creds = Credentials {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            container: "b".to_string(),
        };
        let memory = MemoryStore::new().with_container("b");
        let store = RecordingStore::new(Arc::new(memory.bucket(&creds)));
        (memory, store)
    }

    /// Yields `remaining` bytes, then fails
    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![7u8; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_twelve_mib_in_five_mib_parts() {
        let (memory, store) = setup();
        let data: Vec<u8> = (0..12 * MIB).map(|i| (i % 251) as u8).collect();
        let mut source = Cursor::new(data.clone());

        let outcome = MultipartUploader::new(&store, 5 * MIB)
            .put("big/blob.bin", Some(&mut source))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PutOutcome::Multipart {
                parts: 3,
                bytes: 12 * MIB as u64
            }
        );
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::CreateMultipart {
                    key: "big/blob.bin".to_string(),
                    content_type: "application/octet-stream".to_string(),
                },
                StoreCall::UploadPart { part_number: 1, len: 5 * MIB },
                StoreCall::UploadPart { part_number: 2, len: 5 * MIB },
                StoreCall::UploadPart { part_number: 3, len: 2 * MIB },
                StoreCall::CompleteMultipart(vec![1, 2, 3]),
            ]
        );
        assert!(memory.contains("b", "big/blob.bin"));
        assert_eq!(
            memory.content_type("b", "big/blob.bin").as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(memory.pending_uploads(), 0);

        let mut stored = Vec::new();
        store
            .get_object("big/blob.bin")
            .await
            .unwrap()
            .read_to_end(&mut stored)
            .await
            .unwrap();
        assert_eq!(stored, data);
    }

    #[tokio::test]
    async fn test_multipart_content_type_follows_extension() {
        let (memory, store) = setup();
        let mut source = Cursor::new(vec![9u8; 3000]);

        MultipartUploader::new(&store, 1024)
            .put("albums/cover.png", Some(&mut source))
            .await
            .unwrap();

        assert_eq!(
            store.calls().first(),
            Some(&StoreCall::CreateMultipart {
                key: "albums/cover.png".to_string(),
                content_type: "image/png".to_string(),
            })
        );
        assert_eq!(
            memory.content_type("b", "albums/cover.png").as_deref(),
            Some("image/png")
        );
    }

    #[tokio::test]
    async fn test_part_failure_aborts_without_complete() {
        let (memory, store) = setup();
        store.fail_on(FailOn::UploadPart(2));
        let mut source = Cursor::new(vec![1u8; 12 * MIB]);

        let err = MultipartUploader::new(&store, 5 * MIB)
            .put("big.bin", Some(&mut source))
            .await
            .unwrap_err();

        assert!(matches!(err, VfsError::StoreRequestFailure(_)));
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::CreateMultipart {
                    key: "big.bin".to_string(),
                    content_type: "application/octet-stream".to_string(),
                },
                StoreCall::UploadPart { part_number: 1, len: 5 * MIB },
                StoreCall::UploadPart { part_number: 2, len: 5 * MIB },
                StoreCall::AbortMultipart("big.bin".to_string()),
            ]
        );
        assert!(!memory.contains("b", "big.bin"));
        assert_eq!(memory.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_read_error_aborts() {
        let (memory, store) = setup();
        let mut source = FailingReader { remaining: 1500 };

        let err = MultipartUploader::new(&store, 1024)
            .put("stream.dat", Some(&mut source))
            .await
            .unwrap_err();

        assert!(matches!(err, VfsError::Read(_)));
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::CreateMultipart {
                    key: "stream.dat".to_string(),
                    content_type: "application/octet-stream".to_string(),
                },
                StoreCall::UploadPart { part_number: 1, len: 1024 },
                StoreCall::AbortMultipart("stream.dat".to_string()),
            ]
        );
        assert_eq!(memory.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_abort_failure_keeps_original_error() {
        let (_memory, store) = setup();
        store.fail_on(FailOn::UploadPart(1));
        store.fail_on(FailOn::Abort);
        let mut source = Cursor::new(vec![0u8; 4096]);

        let err = MultipartUploader::new(&store, 1024)
            .put("x.bin", Some(&mut source))
            .await
            .unwrap_err();

        assert!(matches!(err, VfsError::StoreRequestFailure(_)));
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::CompleteMultipart(_))));
    }

    #[tokio::test]
    async fn test_complete_failure_aborts() {
        let (memory, store) = setup();
        store.fail_on(FailOn::Complete);
        let mut source = Cursor::new(vec![0u8; 2048]);

        assert!(MultipartUploader::new(&store, 1024)
            .put("y.bin", Some(&mut source))
            .await
            .is_err());
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::AbortMultipart("y.bin".to_string()))
        );
        assert_eq!(memory.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_exact_part_size_is_one_part() {
        let (_memory, store) = setup();
        let mut source = Cursor::new(vec![0u8; 1024]);

        let outcome = MultipartUploader::new(&store, 1024)
            .put("exact.bin", Some(&mut source))
            .await
            .unwrap();

        assert_eq!(outcome, PutOutcome::Multipart { parts: 1, bytes: 1024 });
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::CompleteMultipart(vec![1]))
        );
    }

    #[tokio::test]
    async fn test_empty_source_is_single_put() {
        let (memory, store) = setup();
        let mut source = Cursor::new(Vec::<u8>::new());

        let outcome = MultipartUploader::new(&store, 1024)
            .put("empty.txt", Some(&mut source))
            .await
            .unwrap();

        assert_eq!(outcome, PutOutcome::Single { bytes: 0 });
        assert_eq!(
            store.calls(),
            vec![StoreCall::PutObject {
                key: "empty.txt".to_string(),
                len: 0,
                content_type: "text/plain".to_string(),
            }]
        );
        assert!(memory.contains("b", "empty.txt"));
    }

    #[tokio::test]
    async fn test_small_source_is_single_put() {
        let (_memory, store) = setup();
        let mut source = Cursor::new(b"hello".to_vec());

        let outcome = MultipartUploader::new(&store, 1024)
            .put("note.txt", Some(&mut source))
            .await
            .unwrap();

        assert_eq!(outcome, PutOutcome::Single { bytes: 5 });
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_marker_ignores_source() {
        let (memory, store) = setup();
        let mut source = Cursor::new(vec![1u8; 4096]);

        MultipartUploader::new(&store, 1024)
            .put("folder/", Some(&mut source))
            .await
            .unwrap();
        MultipartUploader::new(&store, 1024)
            .put::<Cursor<Vec<u8>>>("other/", None)
            .await
            .unwrap();

        assert!(memory.contains("b", "folder/"));
        assert!(memory.contains("b", "other/"));
        assert!(store
            .calls()
            .iter()
            .all(|c| matches!(c, StoreCall::PutObject { len: 0, .. })));
    }
}
