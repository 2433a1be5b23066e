use std::sync::Arc;

use log::info;

use crate::commands::Commands;
use crate::config::AppConfig;
use crate::error::Error;
use crate::models::{
    models_for_family, ArtifactSource, HubSource, ManagerOptions, ModelCache, ModelFamily,
    ModelManager,
};

/// Build both family managers from `config`, sharing one cache and source.
pub fn build_commands(config: &AppConfig) -> Result<Commands, Error> {
    let source: Arc<dyn ArtifactSource> = Arc::new(HubSource::new(&config.hub_endpoint)?);
    build_commands_with_source(config, source)
}

/// Like [`build_commands`], with an injected artifact source.
pub fn build_commands_with_source(
    config: &AppConfig,
    source: Arc<dyn ArtifactSource>,
) -> Result<Commands, Error> {
    let cache_dir = config.resolved_cache_dir();
    std::fs::create_dir_all(&cache_dir)?;
    info!("Model cache: {:?}", cache_dir);

    let manager = |family: ModelFamily| -> Result<Arc<ModelManager>, Error> {
        Ok(Arc::new(ModelManager::new(ManagerOptions {
            family,
            catalog: models_for_family(family),
            cache: ModelCache::new(&cache_dir),
            source: Arc::clone(&source),
            worker_command: config.worker_command(family)?,
            request_timeout: config.request_timeout(),
            load_timeout: config.load_timeout(),
            shutdown_grace: config.shutdown_grace(),
            recycle_after_request: family == ModelFamily::Tts && config.recycle_tts_worker,
        })))
    };

    Ok(Commands::new(
        manager(ModelFamily::Translation)?,
        manager(ModelFamily::Tts)?,
    ))
}
