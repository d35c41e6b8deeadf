use serde::{Deserialize, Serialize};

/// FTP服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    /// 监听地址
    pub listen: String,
    /// 被动模式端口范围（起始为0时由系统分配）
    pub passive_ports_start: u16,
    pub passive_ports_end: u16,
    /// 公共主机地址（用于被动模式）
    pub public_host: Option<String>,
    /// 空闲超时时间（秒）
    pub idle_timeout: u64,
    /// 等待被动数据连接的时间（秒）
    pub data_timeout: u64,
    /// 欢迎语
    pub greeting: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:21".to_string(),
            passive_ports_start: 50000,
            passive_ports_end: 50100,
            public_host: None,
            idle_timeout: 600,
            data_timeout: 30,
            greeting: "S3 FTP gateway ready".to_string(),
        }
    }
}
