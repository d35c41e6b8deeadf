//! Call-recording store wrapper used by unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{
    CompletedPart, ListPage, ObjectMeta, ObjectReader, ObjectStore, StoreError, StoreResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    HeadContainer(String),
    HeadObject(String),
    GetObject(String),
    PutObject { key: String, len: usize, content_type: String },
    DeleteObject(String),
    ListObjects { prefix: String, marker: Option<String>, max_keys: usize },
    CreateMultipart { key: String, content_type: String },
    UploadPart { part_number: u32, len: usize },
    CompleteMultipart(Vec<u32>),
    AbortMultipart(String),
}

/// Which call should fail / 注入失败点
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOn {
    UploadPart(u32),
    ListCall(usize),
    Complete,
    Abort,
}

#[derive(Clone)]
pub struct RecordingStore {
    inner: Arc<dyn ObjectStore>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
    fail_on: Arc<Mutex<Vec<FailOn>>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_on: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail_on(&self, point: FailOn) {
        self.fail_on.lock().push(point);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }

    fn should_fail(&self, point: &FailOn) -> bool {
        self.fail_on.lock().contains(point)
    }

    fn list_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, StoreCall::ListObjects { .. }))
            .count()
    }
}

fn injected() -> StoreError {
    StoreError::request("injected failure")
}

#[async_trait]
impl ObjectStore for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    async fn head_container(&self, container: &str) -> StoreResult<()> {
        self.record(StoreCall::HeadContainer(container.to_string()));
        self.inner.head_container(container).await
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectMeta> {
        self.record(StoreCall::HeadObject(key.to_string()));
        self.inner.head_object(key).await
    }

    async fn get_object(&self, key: &str) -> StoreResult<ObjectReader> {
        self.record(StoreCall::GetObject(key.to_string()));
        self.inner.get_object(key).await
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()> {
        self.record(StoreCall::PutObject {
            key: key.to_string(),
            len: body.len(),
            content_type: content_type.to_string(),
        });
        self.inner.put_object(key, body, content_type).await
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.record(StoreCall::DeleteObject(key.to_string()));
        self.inner.delete_object(key).await
    }

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        max_keys: usize,
        marker: Option<&str>,
    ) -> StoreResult<ListPage> {
        self.record(StoreCall::ListObjects {
            prefix: prefix.to_string(),
            marker: marker.map(str::to_string),
            max_keys,
        });
        if self.should_fail(&FailOn::ListCall(self.list_calls())) {
            return Err(injected());
        }
        self.inner.list_objects(prefix, delimiter, max_keys, marker).await
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> StoreResult<String> {
        self.record(StoreCall::CreateMultipart {
            key: key.to_string(),
            content_type: content_type.to_string(),
        });
        self.inner.create_multipart(key, content_type).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String> {
        self.record(StoreCall::UploadPart {
            part_number,
            len: body.len(),
        });
        if self.should_fail(&FailOn::UploadPart(part_number)) {
            return Err(injected());
        }
        self.inner.upload_part(key, upload_id, part_number, body).await
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        self.record(StoreCall::CompleteMultipart(
            parts.iter().map(|p| p.part_number).collect(),
        ));
        if self.should_fail(&FailOn::Complete) {
            return Err(injected());
        }
        self.inner.complete_multipart(key, upload_id, parts).await
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.record(StoreCall::AbortMultipart(key.to_string()));
        if self.should_fail(&FailOn::Abort) {
            return Err(injected());
        }
        self.inner.abort_multipart(key, upload_id).await
    }
}

/// Factory that always hands out the same recording store / 固定存储工厂
pub struct FixedFactory {
    pub store: RecordingStore,
    pub connected: Mutex<Vec<super::Credentials>>,
}

impl FixedFactory {
    pub fn new(store: RecordingStore) -> Self {
        Self {
            store,
            connected: Mutex::new(Vec::new()),
        }
    }
}

impl super::StoreFactory for FixedFactory {
    fn store_type(&self) -> &'static str {
        "fixed"
    }

    fn connect(&self, credentials: &super::Credentials) -> anyhow::Result<super::StoreBox> {
        self.connected.lock().push(credentials.clone());
        Ok(Arc::new(self.store.clone()))
    }
}
