//! S3对象存储驱动
//!
//! 基于 rust-s3，凭证在登录时按会话传入

mod config;
mod driver;
mod factory;

pub use config::S3Config;
pub use driver::S3Store;
pub use factory::S3StoreFactory;
