pub mod config;
pub mod utils;
pub mod storage;
pub mod vfs;
pub mod server;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;
