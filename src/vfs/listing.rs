//! Paginated prefix listing folded into synthetic directory and file entries.

use std::collections::HashSet;

use chrono::Utc;

use crate::storage::{ObjectMeta, ObjectStore};
use crate::utils::SEPARATOR;

use super::error::VfsError;
use super::DirEntry;

/// Keys requested per page; S3 caps ListObjects at 1000 / 每页最大键数
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Result of one listing call / 列举结果
#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<DirEntry>,
    /// Page requests that succeeded / 成功请求的页数
    pub pages: usize,
    /// Why pagination stopped early, if it did / 中断原因
    pub interrupted: Option<VfsError>,
}

impl Listing {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }
}

pub struct ListingAggregator<'a> {
    store: &'a dyn ObjectStore,
    page_size: usize,
}

impl<'a> ListingAggregator<'a> {
    pub fn new(store: &'a dyn ObjectStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// List everything under `prefix` / 列出前缀下的所有条目
    ///
    /// `working_dir_name` is never reported as a directory entry. A failed page stops
    /// pagination; entries gathered up to that point are still returned.
    pub async fn list(&self, prefix: &str, working_dir_name: &str) -> Listing {
        let mut listing = Listing::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut marker: Option<String> = None;

        loop {
            let page = match self
                .store
                .list_objects(prefix, None, self.page_size, marker.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        "Listing interrupted: prefix={:?}, marker={:?}, error={}",
                        prefix,
                        marker,
                        e
                    );
                    listing.interrupted = Some(e.into());
                    break;
                }
            };
            listing.pages += 1;

            for object in &page.objects {
                if let Some(entry) = synthesize(object, prefix, working_dir_name, &mut seen) {
                    listing.entries.push(entry);
                }
            }

            if !page.truncated {
                break;
            }
            match page.objects.last() {
                Some(last) => marker = Some(last.key.clone()),
                None => {
                    tracing::warn!(
                        "Store reported a truncated page without keys: prefix={:?}",
                        prefix
                    );
                    break;
                }
            }
        }

        tracing::debug!(
            "Listed prefix={:?}: {} entries over {} pages",
            prefix,
            listing.entries.len(),
            listing.pages
        );
        listing
    }
}

/// Turn one raw key into an entry, or nothing if it is filtered or already seen.
fn synthesize(
    object: &ObjectMeta,
    prefix: &str,
    working_dir_name: &str,
    seen: &mut HashSet<String>,
) -> Option<DirEntry> {
    let remainder = object.key.strip_prefix(prefix)?;

    if remainder.is_empty() || remainder.contains(SEPARATOR) {
        let name = remainder.split(SEPARATOR).next().unwrap_or("");
        if name.is_empty() || name == working_dir_name || !seen.insert(name.to_string()) {
            return None;
        }
        return Some(DirEntry {
            name: name.to_string(),
            is_dir: true,
            size: 0,
            modified: Utc::now(),
        });
    }

    if !seen.insert(remainder.to_string()) {
        return None;
    }
    Some(DirEntry {
        name: remainder.to_string(),
        is_dir: false,
        size: object.size,
        modified: object.last_modified,
    })
}
