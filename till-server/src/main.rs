use std::sync::Arc;

use till_server::{EngineConfig, MemoryCatalog, MemoryDirectory, StagingEngine};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    till_server::init_logger_with_file(
        std::env::var("LOG_LEVEL").ok().as_deref(),
        std::env::var("LOG_DIR").ok().as_deref(),
    );

    tracing::info!("Till server starting...");

    let config = EngineConfig::from_env();
    std::fs::create_dir_all(&config.work_dir)?;

    // Standalone shell: in-memory collaborators until a transport binds
    // real catalog/directory backends to the engine.
    let catalog = Arc::new(MemoryCatalog::new());
    let directory = Arc::new(MemoryDirectory::new());

    let engine = Arc::new(StagingEngine::new(config, catalog, directory)?);
    engine.initialize().await?;

    let cancel = CancellationToken::new();
    let sweeper = till_server::sweeper::spawn(Arc::clone(&engine), cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();
    sweeper.await?;

    Ok(())
}
