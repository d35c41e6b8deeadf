//! S3驱动工厂

use std::sync::Arc;

use anyhow::Result;

use super::config::S3Config;
use super::driver::S3Store;
use crate::storage::{Credentials, StoreBox, StoreFactory};

/// 每个登录会话创建一个S3客户端
pub struct S3StoreFactory {
    config: S3Config,
}

impl S3StoreFactory {
    pub fn new(config: S3Config) -> Self {
        Self { config }
    }
}

impl StoreFactory for S3StoreFactory {
    fn store_type(&self) -> &'static str {
        "s3"
    }

    fn connect(&self, credentials: &Credentials) -> Result<StoreBox> {
        Ok(Arc::new(S3Store::new(&self.config, credentials)?))
    }
}
