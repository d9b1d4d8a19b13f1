mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use directory_client_rumqtt::EventLoop;
use directory_engine::{ChangeNotifier, Directory};
use directory_store::{DynStore, PgStore};
use log::{error, info};
use tokio::{signal, task};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;

    let store = PgStore::connect(&config.database_url, config.max_pool_size)
        .await
        .context("failed to connect to the database")?;
    store
        .migrate()
        .await
        .context("failed to apply the database schema")?;
    let notifications = store
        .listen()
        .await
        .context("failed to listen for change notifications")?;
    let store: Arc<DynStore> = Arc::new(store);

    let (eventloop, client) = EventLoop::new(config.mqtt.options(), 100);
    let (directory, client) = Directory::new(config.directory, store.clone(), eventloop, client);

    task::spawn(ChangeNotifier::new(store, client.clone()).run(notifications));

    let shutdown = client.clone();
    task::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => shutdown.cancel().await,
            Err(e) => error!("Unable to listen for the shutdown signal: {e}"),
        }
    });

    info!(
        "Directory connecting to {}:{}",
        config.mqtt.host, config.mqtt.port
    );
    directory.run().await;
    Ok(())
}
