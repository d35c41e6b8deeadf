use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Boxed object body reader / 对象内容读取器
pub type ObjectReader = Box<dyn AsyncRead + Unpin + Send>;

/// Shared store handle / 共享存储句柄
pub type StoreBox = Arc<dyn ObjectStore>;

/// Store-level failure / 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key (or container) does not exist / 对象不存在
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other failed request: network, permission, malformed response / 请求失败
    #[error("store request failed: {0}")]
    Request(String),
}

impl StoreError {
    pub fn request(msg: impl std::fmt::Display) -> Self {
        StoreError::Request(msg.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Credentials bound to one session / 会话绑定的凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    /// Target container (bucket) name / 目标存储桶
    pub container: String,
}

/// Object metadata as reported by the store / 对象元信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of a prefix listing / 一页列举结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Only populated when a delimiter was given / 仅在指定分隔符时填充
    pub common_prefixes: Vec<String>,
    /// More results follow this page / 是否还有更多结果
    pub truncated: bool,
}

/// A part accepted by the store / 已上传的分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object storage capability set (primitive operations only) / 对象存储能力集
///
/// Implementations report failures as [`StoreError`]; they never retry on their own
/// beyond what the underlying client does.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name / 后端名称
    fn name(&self) -> &str;

    /// Existence / permission probe against a container / 存储桶探活
    async fn head_container(&self, container: &str) -> StoreResult<()>;

    async fn head_object(&self, key: &str) -> StoreResult<ObjectMeta>;

    async fn get_object(&self, key: &str) -> StoreResult<ObjectReader>;

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()>;

    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// List keys under `prefix`, starting strictly after `marker` / 按前缀列举
    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        max_keys: usize,
        marker: Option<&str>,
    ) -> StoreResult<ListPage>;

    /// Start a multipart upload, returns the upload id / 初始化分片上传
    async fn create_multipart(&self, key: &str, content_type: &str) -> StoreResult<String>;

    /// Upload one part, returns its entity tag / 上传分片
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String>;

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()>;

    /// Best-effort cleanup of an unfinished upload / 取消分片上传
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()>;
}

/// Builds a store client for a set of session credentials / 存储工厂
pub trait StoreFactory: Send + Sync {
    /// Backend type name / 后端类型名称
    fn store_type(&self) -> &'static str;

    fn connect(&self, credentials: &Credentials) -> anyhow::Result<StoreBox>;
}

pub mod memory;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::{MemoryStore, MemoryStoreFactory};
