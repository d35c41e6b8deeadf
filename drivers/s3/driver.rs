//! S3驱动核心实现
//!
//! 只提供对象原语（head/get/put/delete/list/分片上传），路径语义由上层处理。
//! rust-s3 关闭了 fail-on-err，非2xx响应需要自己检查状态码。

use std::fmt::Display;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use s3::bucket::Bucket;
use s3::creds::Credentials as S3Credentials;
use s3::serde_types::Part;
use s3::Region;
use tokio_util::io::StreamReader;

use super::config::S3Config;
use crate::storage::{
    CompletedPart, Credentials, ListPage, ObjectMeta, ObjectReader, ObjectStore, StoreError,
    StoreResult,
};

/// 绑定到单个存储桶的S3客户端
pub struct S3Store {
    bucket: Box<Bucket>,
    region: Region,
    credentials: S3Credentials,
    force_path_style: bool,
}

impl S3Store {
    /// 创建新的S3客户端（不发请求）
    pub fn new(config: &S3Config, credentials: &Credentials) -> Result<Self> {
        let s3_credentials = S3Credentials::new(
            Some(&credentials.access_key),
            Some(&credentials.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.resolved_endpoint(),
        };

        let bucket = Self::create_bucket(
            &credentials.container,
            &region,
            &s3_credentials,
            config.force_path_style,
        )?;

        Ok(Self {
            bucket,
            region,
            credentials: s3_credentials,
            force_path_style: config.force_path_style,
        })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(
        name: &str,
        region: &Region,
        credentials: &S3Credentials,
        force_path_style: bool,
    ) -> Result<Box<Bucket>> {
        let bucket = Bucket::new(name, region.clone(), credentials.clone())
            .map_err(|e| anyhow!("创建S3 Bucket失败: {}", e))?;

        Ok(if force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

fn request_error(action: &str, key: &str, e: impl Display) -> StoreError {
    StoreError::request(format!("{}失败: key={}, error={}", action, key, e))
}

/// 检查HTTP状态码
fn check_status(action: &str, key: &str, code: u16) -> StoreResult<()> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StoreError::NotFound(key.to_string())),
        _ => Err(StoreError::request(format!(
            "{}失败: key={}, status={}",
            action, key, code
        ))),
    }
}

/// ListObjects 返回 ISO 8601 时间
fn parse_list_time(value: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!("无法解析列表时间 {:?}: {}", value, e);
            Utc::now()
        }
    }
}

/// HeadObject 的 Last-Modified 头是 RFC 2822 格式
fn parse_header_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// 由 HeadObject 响应头构造元数据，缺少大小或修改时间视为失败
fn meta_from_head(
    key: &str,
    content_length: Option<i64>,
    last_modified: Option<&str>,
) -> StoreResult<ObjectMeta> {
    let size = match content_length {
        Some(len) if len >= 0 => len as u64,
        other => {
            return Err(StoreError::request(format!(
                "获取S3对象信息失败: key={}, Content-Length无效: {:?}",
                key, other
            )));
        }
    };
    let last_modified = last_modified.and_then(parse_header_time).ok_or_else(|| {
        StoreError::request(format!(
            "获取S3对象信息失败: key={}, Last-Modified无效: {:?}",
            key, last_modified
        ))
    })?;

    Ok(ObjectMeta {
        key: key.to_string(),
        size,
        last_modified,
    })
}

/// 将响应体字节流转换为AsyncRead，不加载到内存
fn body_reader<S, E>(stream: S) -> ObjectReader
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display,
{
    let stream =
        stream.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
    Box::new(StreamReader::new(stream))
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn head_container(&self, container: &str) -> StoreResult<()> {
        let probe = if self.bucket.name() == container {
            self.bucket.clone()
        } else {
            Self::create_bucket(container, &self.region, &self.credentials, self.force_path_style)
                .map_err(|e| request_error("探测存储桶", container, e))?
        };

        // 取一个键即可确认桶存在且凭证有效
        let (_, code) = probe
            .list_page(String::new(), None, None, None, Some(1))
            .await
            .map_err(|e| request_error("探测存储桶", container, e))?;
        check_status("探测存储桶", container, code)
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectMeta> {
        let (head, code) = self
            .bucket
            .head_object(key)
            .await
            .map_err(|e| request_error("获取S3对象信息", key, e))?;
        check_status("获取S3对象信息", key, code)?;

        meta_from_head(key, head.content_length, head.last_modified.as_deref())
    }

    async fn get_object(&self, key: &str) -> StoreResult<ObjectReader> {
        let response = self
            .bucket
            .get_object_stream(key)
            .await
            .map_err(|e| request_error("获取S3对象", key, e))?;
        check_status("获取S3对象", key, response.status_code)?;

        Ok(body_reader(response.bytes))
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()> {
        let response = self
            .bucket
            .put_object_with_content_type(key, &body, content_type)
            .await
            .map_err(|e| request_error("上传S3对象", key, e))?;
        check_status("上传S3对象", key, response.status_code())
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| request_error("删除S3对象", key, e))?;
        check_status("删除S3对象", key, response.status_code())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        max_keys: usize,
        marker: Option<&str>,
    ) -> StoreResult<ListPage> {
        let (result, code) = self
            .bucket
            .list_page(
                prefix.to_string(),
                delimiter.map(str::to_string),
                None,
                marker.map(str::to_string),
                Some(max_keys),
            )
            .await
            .map_err(|e| request_error("列出S3对象", prefix, e))?;
        check_status("列出S3对象", prefix, code)?;

        Ok(ListPage {
            objects: result
                .contents
                .into_iter()
                .map(|obj| ObjectMeta {
                    last_modified: parse_list_time(&obj.last_modified),
                    key: obj.key,
                    size: obj.size,
                })
                .collect(),
            common_prefixes: result
                .common_prefixes
                .unwrap_or_default()
                .into_iter()
                .map(|cp| cp.prefix)
                .collect(),
            truncated: result.is_truncated,
        })
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> StoreResult<String> {
        let init = self
            .bucket
            .initiate_multipart_upload(key, content_type)
            .await
            .map_err(|e| request_error("初始化分片上传", key, e))?;
        Ok(init.upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String> {
        let part = self
            .bucket
            .put_multipart_chunk(
                body.to_vec(),
                key,
                part_number,
                upload_id,
                "application/octet-stream",
            )
            .await
            .map_err(|e| request_error("上传分片", key, e))?;

        // 错误响应不会带ETag
        if part.etag.is_empty() {
            return Err(StoreError::request(format!(
                "上传分片失败: key={}, part={}, 响应缺少ETag",
                key, part_number
            )));
        }
        Ok(part.etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let parts: Vec<Part> = parts
            .iter()
            .map(|p| Part {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        let response = self
            .bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await
            .map_err(|e| request_error("完成分片上传", key, e))?;
        check_status("完成分片上传", key, response.status_code())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.bucket
            .abort_upload(key, upload_id)
            .await
            .map_err(|e| request_error("取消分片上传", key, e))
    }
}
