//! In-process object store / 内存对象存储
//!
//! Keeps every container as an ordered key map so listings come back in key order,
//! the same way S3 returns them. Multipart uploads are staged per upload id and only
//! become visible on completion.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    CompletedPart, Credentials, ListPage, ObjectMeta, ObjectReader, ObjectStore, StoreBox,
    StoreError, StoreFactory, StoreResult,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingUpload {
    container: String,
    key: String,
    content_type: String,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: BTreeMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, PendingUpload>,
    /// access key -> secret; empty means any credentials are accepted
    accounts: HashMap<String, String>,
}

/// Shared in-memory account holding any number of containers / 内存存储账户
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: &str) -> Self {
        self.inner
            .lock()
            .containers
            .entry(name.to_string())
            .or_default();
        self
    }

    /// Restrict access to the given key pair / 限制访问凭证
    pub fn with_account(self, access_key: &str, secret_key: &str) -> Self {
        self.inner
            .lock()
            .accounts
            .insert(access_key.to_string(), secret_key.to_string());
        self
    }

    /// Handle bound to one container with the given credentials / 绑定存储桶
    pub fn bucket(&self, credentials: &Credentials) -> MemoryBucket {
        MemoryBucket {
            store: self.clone(),
            container: credentials.container.clone(),
            access_key: credentials.access_key.clone(),
            secret_key: credentials.secret_key.clone(),
        }
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.inner
            .lock()
            .containers
            .get(container)
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    /// Uploads created but neither completed nor aborted / 未完成的分片上传数
    pub fn pending_uploads(&self) -> usize {
        self.inner.lock().uploads.len()
    }

    /// Content type an object was stored with / 对象内容类型
    pub fn content_type(&self, container: &str, key: &str) -> Option<String> {
        self.inner
            .lock()
            .containers
            .get(container)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.content_type.clone())
    }
}

/// [`ObjectStore`] view of one container in a [`MemoryStore`] / 单个存储桶视图
#[derive(Debug, Clone)]
pub struct MemoryBucket {
    store: MemoryStore,
    container: String,
    access_key: String,
    secret_key: String,
}

impl MemoryBucket {
    fn authorized(&self, inner: &Inner) -> bool {
        inner.accounts.is_empty()
            || inner.accounts.get(&self.access_key) == Some(&self.secret_key)
    }

    /// Run `f` against this bucket's objects, failing like S3 would when the
    /// credentials or the container are wrong.
    fn with_objects<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, StoredObject>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut inner = self.store.inner.lock();
        if !self.authorized(&inner) {
            return Err(StoreError::request("access denied"));
        }
        match inner.containers.get_mut(&self.container) {
            Some(objects) => f(objects),
            None => Err(StoreError::NotFound(self.container.clone())),
        }
    }
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

#[async_trait]
impl ObjectStore for MemoryBucket {
    fn name(&self) -> &str {
        "memory"
    }

    async fn head_container(&self, container: &str) -> StoreResult<()> {
        let inner = self.store.inner.lock();
        if !self.authorized(&inner) {
            return Err(StoreError::request("access denied"));
        }
        if inner.containers.contains_key(container) {
            Ok(())
        } else {
            Err(StoreError::NotFound(container.to_string()))
        }
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectMeta> {
        self.with_objects(|objects| {
            objects
                .get(key)
                .map(|obj| ObjectMeta {
                    key: key.to_string(),
                    size: obj.data.len() as u64,
                    last_modified: obj.last_modified,
                })
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        })
    }

    async fn get_object(&self, key: &str) -> StoreResult<ObjectReader> {
        let data = self.with_objects(|objects| {
            objects
                .get(key)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        })?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()> {
        self.with_objects(|objects| {
            objects.insert(
                key.to_string(),
                StoredObject {
                    data: body,
                    content_type: content_type.to_string(),
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        // S3 reports success for missing keys as well
        self.with_objects(|objects| {
            objects.remove(key);
            Ok(())
        })
    }

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        max_keys: usize,
        marker: Option<&str>,
    ) -> StoreResult<ListPage> {
        self.with_objects(|objects| {
            let start = match marker {
                Some(m) => Bound::Excluded(m.to_string()),
                None => Bound::Unbounded,
            };
            let mut page = ListPage::default();
            let mut count = 0usize;

            for (key, obj) in objects.range((start, Bound::Unbounded)) {
                if !key.starts_with(prefix) {
                    if key.as_str() > prefix {
                        break;
                    }
                    continue;
                }

                let rolled_up = delimiter.and_then(|d| {
                    let rest = &key[prefix.len()..];
                    rest.find(d)
                        .map(|idx| format!("{}{}", prefix, &rest[..idx + d.len()]))
                });

                if let Some(common) = rolled_up {
                    if page.common_prefixes.last() == Some(&common) {
                        continue;
                    }
                    if count == max_keys {
                        page.truncated = true;
                        break;
                    }
                    page.common_prefixes.push(common);
                } else {
                    if count == max_keys {
                        page.truncated = true;
                        break;
                    }
                    page.objects.push(ObjectMeta {
                        key: key.clone(),
                        size: obj.data.len() as u64,
                        last_modified: obj.last_modified,
                    });
                }
                count += 1;
            }

            Ok(page)
        })
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> StoreResult<String> {
        self.with_objects(|_| Ok(()))?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        self.store.inner.lock().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                container: self.container.clone(),
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String> {
        if part_number == 0 || part_number > 10_000 {
            return Err(StoreError::request(format!(
                "invalid part number {}",
                part_number
            )));
        }
        let mut inner = self.store.inner.lock();
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key && u.container == self.container)
            .ok_or_else(|| StoreError::NotFound(format!("upload {}", upload_id)))?;
        let etag = etag_of(&body);
        upload.parts.insert(part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let mut inner = self.store.inner.lock();
        let upload = inner
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key && u.container == self.container)
            .ok_or_else(|| StoreError::NotFound(format!("upload {}", upload_id)))?;

        if parts.is_empty() {
            return Err(StoreError::request("complete called without parts"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StoreError::request("parts are not in ascending order"));
        }

        let mut assembled = BytesMut::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((data, etag)) if *etag == part.etag => assembled.extend_from_slice(data),
                _ => {
                    return Err(StoreError::request(format!(
                        "invalid part {}",
                        part.part_number
                    )))
                }
            }
        }

        let upload = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("upload {}", upload_id)))?;
        inner
            .containers
            .entry(upload.container)
            .or_default()
            .insert(
                upload.key,
                StoredObject {
                    data: assembled.freeze(),
                    content_type: upload.content_type,
                    last_modified: Utc::now(),
                },
            );
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StoreResult<()> {
        match self.store.inner.lock().uploads.remove(upload_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("upload {}", upload_id))),
        }
    }
}

/// Hands out buckets of one shared [`MemoryStore`] / 内存存储工厂
pub struct MemoryStoreFactory {
    store: MemoryStore,
}

impl MemoryStoreFactory {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    fn connect(&self, credentials: &Credentials) -> Result<StoreBox> {
        Ok(Arc::new(self.store.bucket(credentials)))
    }
}
