use anyhow::Result;
use tracing_subscriber::EnvFilter;

use rollcall_store::{DescriptorCipher, SqliteStore};

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::RollcallService;
use engine::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    let cipher = DescriptorCipher::load_or_create(&config.key_path)?;
    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = SqliteStore::open(&config.db_path, cipher).await?;
    tracing::info!(db = %config.db_path.display(), "store opened");

    let engine = Engine::new(store, config.policy());
    let service = RollcallService::new(engine);

    let _connection = zbus::connection::Builder::session()?
        .name("org.freedesktop.Rollcall1")?
        .serve_at("/org/freedesktop/Rollcall1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
