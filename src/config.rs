//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::drivers::s3::S3Config;
use crate::server::FtpConfig;
use crate::vfs::listing::DEFAULT_PAGE_SIZE;
use crate::vfs::multipart::DEFAULT_PART_SIZE;
use crate::vfs::VfsOptions;

/// Environment variable overriding the config file location / 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Gateway settings shared by every session / 网关配置
    pub server: ServerConfig,
    /// FTP listener configuration / FTP配置
    pub ftp: FtpConfig,
    /// Storage backend configuration / 存储配置
    pub storage: StorageConfig,
}

/// Gateway configuration / 网关配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Keys requested per listing page / 每页列举键数
    pub list_page_size: usize,
    /// Multipart upload part size in bytes / 分片大小（字节）
    pub part_size: usize,
}

/// Storage configuration / 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend type: "s3" or "memory" / 存储类型
    pub backend: String,
    /// S3 endpoint settings / S3配置
    pub s3: S3Config,
    /// Containers created at startup for the memory backend / 内存存储的初始存储桶
    pub memory_containers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            list_page_size: DEFAULT_PAGE_SIZE,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "s3".to_string(),
            s3: S3Config::default(),
            memory_containers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Session tunables derived from the server section / 会话参数
    pub fn vfs_options(&self) -> VfsOptions {
        VfsOptions {
            part_size: self.server.part_size,
            list_page_size: self.server.list_page_size,
        }
    }
}

/// Get the config file path / 获取配置文件路径
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from the default location / 从默认位置加载配置
pub fn load_config() -> Result<AppConfig, String> {
    load_config_from(&get_config_path())
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config_from(config_path: &Path) -> Result<AppConfig, String> {
    if config_path.exists() {
        // Load existing config / 加载现有配置
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        // Create default config / 创建默认配置
        let config = AppConfig::default();
        save_config(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig, config_path: &Path) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}
