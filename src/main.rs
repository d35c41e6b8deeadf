use std::sync::Arc;

use anyhow::anyhow;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3_ftp_gateway::config;
use s3_ftp_gateway::drivers;
use s3_ftp_gateway::server::create_ftp_server;
use s3_ftp_gateway::vfs::ObjectFsFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "s3_ftp_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "s3-ftp-gateway {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME")
    );

    // Load configuration / 加载配置
    let app_config = config::load_config().map_err(|e| anyhow!(e))?;
    tracing::info!("FTP server will listen on {}", app_config.ftp.listen);

    // Build the store factory and one driver per connection / 创建存储工厂
    let store_factory = drivers::create_store_factory(&app_config.storage)?;
    let driver_factory = ObjectFsFactory::new(store_factory, app_config.vfs_options());

    let server = create_ftp_server(app_config.ftp.clone(), Arc::new(driver_factory));

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}
