pub mod config;
pub mod ftp;

pub use config::FtpConfig;
pub use ftp::{create_ftp_server, FtpServer};
