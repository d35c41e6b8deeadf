//! Per-connection session adapter / 会话适配器
//!
//! Owns the bound credentials, the store client and the working directory of one
//! FTP connection. The `try_*` methods report real failure causes; the [`FtpDriver`]
//! impl collapses them into the booleans the engine expects.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::{Credentials, ObjectMeta, ObjectReader, StoreBox, StoreFactory};
use crate::utils::{resolve_dir_prefix, resolve_key, resolve_object_key, SEPARATOR};

use super::credentials;
use super::error::{VfsError, VfsResult};
use super::listing::{Listing, ListingAggregator, DEFAULT_PAGE_SIZE};
use super::multipart::{MultipartUploader, PutOutcome, DEFAULT_PART_SIZE};
use super::{DirEntry, DriverFactory, FtpDriver, UploadSource};

/// Tunables shared by every session / 会话参数
#[derive(Debug, Clone)]
pub struct VfsOptions {
    pub part_size: usize,
    pub list_page_size: usize,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            list_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

struct Session {
    credentials: Credentials,
    store: StoreBox,
    /// Key prefix form: empty for the root, otherwise ends with `/`
    working_dir: String,
}

/// Object store exposed as an FTP filesystem / 对象存储文件系统
pub struct ObjectFs {
    factory: Arc<dyn StoreFactory>,
    options: VfsOptions,
    session: Option<Session>,
}

impl ObjectFs {
    pub fn new(factory: Arc<dyn StoreFactory>, options: VfsOptions) -> Self {
        Self {
            factory,
            options,
            session: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Container bound at login / 当前存储桶
    pub fn container(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.credentials.container.as_str())
    }

    fn session(&self) -> VfsResult<&Session> {
        self.session.as_ref().ok_or(VfsError::NotAuthenticated)
    }

    pub async fn try_authenticate(&mut self, identity: &str, secret: &str) -> VfsResult<()> {
        // a failed attempt leaves nothing usable behind
        self.session = None;
        let (credentials, store) = credentials::bind(self.factory.as_ref(), identity, secret).await?;
        self.session = Some(Session {
            credentials,
            store,
            working_dir: String::new(),
        });
        Ok(())
    }

    pub fn try_change_dir(&mut self, path: &str) -> VfsResult<()> {
        let session = self.session.as_mut().ok_or(VfsError::NotAuthenticated)?;
        session.working_dir = resolve_dir_prefix(&session.working_dir, path);
        tracing::debug!("PWD: /{}", session.working_dir);
        Ok(())
    }

    pub async fn try_list(&self, path: &str) -> VfsResult<Listing> {
        let session = self.session()?;
        let prefix = resolve_dir_prefix(&session.working_dir, path);
        let working_dir_name = session.working_dir.trim_matches(SEPARATOR);

        Ok(ListingAggregator::new(session.store.as_ref(), self.options.list_page_size)
            .list(&prefix, working_dir_name)
            .await)
    }

    pub async fn try_get(&self, path: &str) -> VfsResult<ObjectReader> {
        let session = self.session()?;
        let key = resolve_key(&session.working_dir, path);
        Ok(session.store.get_object(&key).await?)
    }

    pub async fn try_put(
        &self,
        path: &str,
        source: Option<UploadSource<'_>>,
    ) -> VfsResult<PutOutcome> {
        let session = self.session()?;
        let key = resolve_object_key(&session.working_dir, path);
        if key.is_empty() {
            return Err(VfsError::UnsupportedOperation("writing to the container root"));
        }
        MultipartUploader::new(session.store.as_ref(), self.options.part_size)
            .put(&key, source)
            .await
    }

    pub async fn try_delete_file(&self, path: &str) -> VfsResult<()> {
        let session = self.session()?;
        let key = resolve_object_key(&session.working_dir, path);
        if key.is_empty() {
            return Err(VfsError::NotFound(path.to_string()));
        }
        Ok(session.store.delete_object(&key).await?)
    }

    /// Deletes the `<dir>/` marker only; objects below it are left alone / 删除目录标记
    pub async fn try_delete_dir(&self, path: &str) -> VfsResult<()> {
        let session = self.session()?;
        let marker = resolve_dir_prefix(&session.working_dir, path);
        if marker.is_empty() {
            return Err(VfsError::UnsupportedOperation("removing the container root"));
        }
        Ok(session.store.delete_object(&marker).await?)
    }

    /// Writes an empty `<dir>/` marker object / 写入目录标记
    pub async fn try_make_dir(&self, path: &str) -> VfsResult<()> {
        let session = self.session()?;
        let marker = resolve_dir_prefix(&session.working_dir, path);
        if marker.is_empty() {
            return Err(VfsError::UnsupportedOperation("creating the container root"));
        }
        MultipartUploader::new(session.store.as_ref(), self.options.part_size)
            .put::<tokio::io::Empty>(&marker, None)
            .await
            .map(|_| ())
    }

    pub fn try_rename(&self, _from: &str, _to: &str) -> VfsResult<()> {
        Err(VfsError::UnsupportedOperation("rename"))
    }

    pub async fn try_stat(&self, path: &str) -> VfsResult<ObjectMeta> {
        let session = self.session()?;
        let key = resolve_key(&session.working_dir, path);
        Ok(session.store.head_object(&key).await?)
    }
}

#[async_trait]
impl FtpDriver for ObjectFs {
    async fn authenticate(&mut self, user: &str, pass: &str) -> bool {
        match self.try_authenticate(user, pass).await {
            Ok(()) => {
                tracing::info!("FTP login: user={}", user);
                true
            }
            Err(e) => {
                tracing::warn!("FTP login rejected: user={}, error={}", user, e);
                false
            }
        }
    }

    fn working_dir(&self) -> String {
        match &self.session {
            Some(session) => format!("/{}", session.working_dir.trim_end_matches(SEPARATOR)),
            None => "/".to_string(),
        }
    }

    async fn change_dir(&mut self, path: &str) -> bool {
        self.try_change_dir(path).is_ok()
    }

    async fn list_dir(&mut self, path: &str) -> Vec<DirEntry> {
        match self.try_list(path).await {
            Ok(listing) => listing.entries,
            Err(e) => {
                tracing::warn!("List failed: path={}, error={}", path, e);
                Vec::new()
            }
        }
    }

    async fn get_file(&mut self, path: &str) -> VfsResult<ObjectReader> {
        self.try_get(path).await.map_err(|e| {
            tracing::warn!("Get failed: path={}, error={}", path, e);
            e
        })
    }

    async fn put_file(&mut self, path: &str, source: Option<UploadSource<'_>>) -> bool {
        match self.try_put(path, source).await {
            Ok(outcome) => {
                tracing::info!("Put: path={}, outcome={:?}", path, outcome);
                true
            }
            Err(e) => {
                tracing::warn!("Put failed: path={}, error={}", path, e);
                false
            }
        }
    }

    async fn delete_file(&mut self, path: &str) -> bool {
        match self.try_delete_file(path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Delete failed: path={}, error={}", path, e);
                false
            }
        }
    }

    async fn delete_dir(&mut self, path: &str) -> bool {
        match self.try_delete_dir(path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Remove directory failed: path={}, error={}", path, e);
                false
            }
        }
    }

    /// Always reports failure, even when the marker was written; clients treat the
    /// negative reply as "already exists" and carry on.
    async fn make_dir(&mut self, path: &str) -> bool {
        if let Err(e) = self.try_make_dir(path).await {
            tracing::warn!("Make directory failed: path={}, error={}", path, e);
        }
        false
    }

    async fn rename(&mut self, from: &str, to: &str) -> bool {
        if let Err(e) = self.try_rename(from, to) {
            tracing::debug!("Rename refused: {} -> {}: {}", from, to, e);
        }
        false
    }

    async fn stat_size(&mut self, path: &str) -> i64 {
        match self.try_stat(path).await {
            Ok(meta) => meta.size as i64,
            Err(e) => {
                tracing::debug!("Size lookup failed: path={}, error={}", path, e);
                -1
            }
        }
    }

    async fn stat_mtime(&mut self, path: &str) -> (DateTime<Utc>, bool) {
        match self.try_stat(path).await {
            Ok(meta) => (meta.last_modified, true),
            Err(e) => {
                tracing::debug!("Mtime lookup failed: path={}, error={}", path, e);
                (Utc::now(), false)
            }
        }
    }
}

/// Builds one [`ObjectFs`] per connection from static configuration / 会话工厂
pub struct ObjectFsFactory {
    store_factory: Arc<dyn StoreFactory>,
    options: VfsOptions,
}

impl ObjectFsFactory {
    pub fn new(store_factory: Arc<dyn StoreFactory>, options: VfsOptions) -> Self {
        Self {
            store_factory,
            options,
        }
    }
}

impl DriverFactory for ObjectFsFactory {
    fn new_driver(&self) -> Box<dyn FtpDriver> {
        Box::new(ObjectFs::new(self.store_factory.clone(), self.options.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{FixedFactory, RecordingStore, StoreCall};
    use crate::storage::MemoryStore;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    fn setup() -> (Arc<FixedFactory>, ObjectFs) {
        let creds = Credentials {
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            container: "photos".to_string(),
        };
        let memory = MemoryStore::new().with_container("photos");
        let factory = Arc::new(FixedFactory::new(RecordingStore::new(Arc::new(
            memory.bucket(&creds),
        ))));
        let options = VfsOptions {
            part_size: 1024,
            list_page_size: 2,
        };
        let fs = ObjectFs::new(factory.clone(), options);
        (factory, fs)
    }

    async fn put(fs: &mut ObjectFs, path: &str, data: &[u8]) -> bool {
        let mut cursor = Cursor::new(data.to_vec());
        let source: UploadSource<'_> = &mut cursor;
        fs.put_file(path, Some(source)).await
    }

    async fn login(fs: &mut ObjectFs, factory: &FixedFactory) {
        assert!(fs.authenticate("AK/photos", "SK").await);
        factory.store.clear();
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (factory, mut fs) = setup();
        assert!(!fs.authenticate("no-delimiter", "SK").await);
        assert!(!fs.authenticate("AK/photos/extra", "SK").await);
        assert!(factory.store.calls().is_empty());
        assert!(!fs.is_authenticated());

        assert!(fs.authenticate("AK/photos", "SK").await);
        assert!(fs.is_authenticated());
        assert_eq!(fs.container(), Some("photos"));
        assert_eq!(
            factory.store.calls(),
            vec![StoreCall::HeadContainer("photos".to_string())]
        );
    }

    #[tokio::test]
    async fn test_requires_authentication() {
        let (factory, mut fs) = setup();
        assert!(!fs.change_dir("a").await);
        assert!(fs.list_dir("/").await.is_empty());
        assert!(fs.get_file("a.txt").await.is_err());
        assert!(!fs.delete_file("a.txt").await);
        assert_eq!(fs.stat_size("a.txt").await, -1);
        assert!(matches!(
            fs.try_stat("a.txt").await,
            Err(VfsError::NotAuthenticated)
        ));
        assert!(factory.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_change_dir_never_fails() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        assert_eq!(fs.working_dir(), "/");
        assert!(fs.change_dir("does/not/exist").await);
        assert_eq!(fs.working_dir(), "/does/not/exist");
        assert!(fs.change_dir("..").await);
        assert_eq!(fs.working_dir(), "/does/not");
        assert!(fs.change_dir("/music").await);
        assert_eq!(fs.working_dir(), "/music");
        assert!(fs.change_dir("\\").await);
        assert_eq!(fs.working_dir(), "/");
        assert!(factory.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        let data: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        let before = Utc::now();
        assert!(put(&mut fs, "a/b.txt", &data).await);

        let mut read_back = Vec::new();
        fs.get_file("a/b.txt")
            .await
            .unwrap()
            .read_to_end(&mut read_back)
            .await
            .unwrap();
        assert_eq!(read_back, data);
        assert_eq!(fs.stat_size("a/b.txt").await, data.len() as i64);

        let (mtime, ok) = fs.stat_mtime("a/b.txt").await;
        assert!(ok);
        assert!(mtime >= before);

        assert!(fs.change_dir("a").await);
        assert_eq!(fs.stat_size("b.txt").await, data.len() as i64);
        assert_eq!(fs.stat_size("/a/b.txt").await, data.len() as i64);
    }

    #[tokio::test]
    async fn test_relative_put_joins_with_one_separator() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        assert!(fs.change_dir("docs").await);
        assert!(put(&mut fs, "note.txt", b"hi").await);

        assert_eq!(
            factory.store.calls(),
            vec![StoreCall::PutObject {
                key: "docs/note.txt".to_string(),
                len: 2,
                content_type: "text/plain".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_file() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        assert!(matches!(
            fs.get_file("nope.txt").await,
            Err(VfsError::NotFound(_))
        ));
        assert_eq!(fs.stat_size("nope.txt").await, -1);
        let (_, ok) = fs.stat_mtime("nope.txt").await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_rename_always_fails_without_store_calls() {
        let (factory, mut fs) = setup();
        assert!(!fs.rename("a", "b").await);

        login(&mut fs, &factory).await;
        assert!(!fs.rename("a.txt", "b.txt").await);
        assert!(!fs.rename("dir/", "other/").await);
        assert!(matches!(
            fs.try_rename("a", "b"),
            Err(VfsError::UnsupportedOperation(_))
        ));
        assert!(factory.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_dir_removes_marker_only() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        assert!(put(&mut fs, "foo/inner.txt", b"x").await);
        factory.store.clear();

        assert!(fs.delete_dir("foo").await);
        assert_eq!(
            factory.store.calls(),
            vec![StoreCall::DeleteObject("foo/".to_string())]
        );
        assert_eq!(fs.stat_size("foo/inner.txt").await, 1);
    }

    #[tokio::test]
    async fn test_delete_file_keeps_trailing_separator() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        fs.make_dir("foo").await;
        assert!(put(&mut fs, "foo", b"abc").await);
        factory.store.clear();

        assert!(fs.delete_file("foo/").await);
        assert_eq!(
            factory.store.calls(),
            vec![StoreCall::DeleteObject("foo/".to_string())]
        );
        assert_eq!(fs.stat_size("foo").await, 3);
    }

    #[tokio::test]
    async fn test_make_dir_writes_marker_but_reports_failure() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        assert!(!fs.make_dir("albums").await);
        assert_eq!(
            factory.store.calls(),
            vec![StoreCall::PutObject {
                key: "albums/".to_string(),
                len: 0,
                content_type: "application/octet-stream".to_string(),
            }]
        );
        assert!(fs.try_make_dir("albums2").await.is_ok());

        let names: Vec<_> = fs.list_dir("/").await.into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"albums".to_string()));
        assert!(names.contains(&"albums2".to_string()));
    }

    #[tokio::test]
    async fn test_list_dir_uses_working_dir() {
        let (factory, mut fs) = setup();
        login(&mut fs, &factory).await;

        for path in ["/2020/a.jpg", "/2020/b.jpg", "/2020/raw/c.raw", "/top.txt"] {
            assert!(put(&mut fs, path, b"img").await);
        }

        assert!(fs.change_dir("2020").await);
        let mut entries = fs.list_dir("").await;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.is_dir)).collect();
        assert_eq!(names, vec![("a.jpg", false), ("b.jpg", false), ("raw", true)]);

        let listing = fs.try_list("/").await.unwrap();
        assert!(listing.is_complete());
        // page size 2 over 4 keys
        assert_eq!(listing.pages, 2);
    }
}
