//! Virtual filesystem over a flat object store / 对象存储虚拟文件系统
//!
//! [`FtpDriver`] is the capability set the FTP engine consumes; [`ObjectFs`] is the
//! one implementation, built per connection by [`ObjectFsFactory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::storage::ObjectReader;

pub mod credentials;
pub mod error;
pub mod listing;
pub mod multipart;
pub mod session;

pub use error::{VfsError, VfsResult};
pub use listing::{Listing, ListingAggregator};
pub use multipart::{MultipartUploader, PutOutcome, UploadSession};
pub use session::{ObjectFs, ObjectFsFactory, VfsOptions};

/// Directory listing row / 目录条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Upload byte source handed over by the transport / 上传数据源
pub type UploadSource<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Filesystem capabilities consumed by the FTP engine, one instance per connection.
/// Failures degrade to `false` / `-1` / `Err`; details are logged, not returned.
#[async_trait]
pub trait FtpDriver: Send {
    async fn authenticate(&mut self, user: &str, pass: &str) -> bool;

    /// Current directory as an absolute path, `/` for the root
    fn working_dir(&self) -> String;

    async fn change_dir(&mut self, path: &str) -> bool;

    async fn list_dir(&mut self, path: &str) -> Vec<DirEntry>;

    async fn get_file(&mut self, path: &str) -> VfsResult<ObjectReader>;

    async fn put_file(&mut self, path: &str, source: Option<UploadSource<'_>>) -> bool;

    async fn delete_file(&mut self, path: &str) -> bool;

    async fn delete_dir(&mut self, path: &str) -> bool;

    async fn make_dir(&mut self, path: &str) -> bool;

    async fn rename(&mut self, from: &str, to: &str) -> bool;

    /// Byte size, `-1` when the object cannot be inspected
    async fn stat_size(&mut self, path: &str) -> i64;

    /// Last-modified time and whether it came from the store
    async fn stat_mtime(&mut self, path: &str) -> (DateTime<Utc>, bool);
}

/// Creates a fresh driver for every accepted connection / 驱动工厂
pub trait DriverFactory: Send + Sync {
    fn new_driver(&self) -> Box<dyn FtpDriver>;
}
