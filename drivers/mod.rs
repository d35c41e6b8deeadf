// Driver package / 驱动包
pub mod s3;

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::StorageConfig;
use crate::storage::{MemoryStore, MemoryStoreFactory, StoreFactory};

/// Build the store factory named by the configuration / 按配置创建存储工厂
pub fn create_store_factory(config: &StorageConfig) -> Result<Arc<dyn StoreFactory>> {
    let factory: Arc<dyn StoreFactory> = match config.backend.as_str() {
        "s3" => Arc::new(s3::S3StoreFactory::new(config.s3.clone())),
        "memory" => {
            let store = config
                .memory_containers
                .iter()
                .fold(MemoryStore::new(), |store, name| store.with_container(name));
            Arc::new(MemoryStoreFactory::new(store))
        }
        other => bail!("Unknown storage backend: {}", other),
    };
    tracing::info!("Storage backend: {}", factory.store_type());
    Ok(factory)
}
