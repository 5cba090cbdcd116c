use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};

use audio_api::config::{
    EngineCacheConfig, HandlerConfig, MetricsConfig, ServerConfig, TranscoderConfig,
    WhisperConfig,
};
use audio_api::config_loader;
use audio_api::config_validator::ConfigValidator;
use audio_api::engine_cache::EngineCache;
use audio_api::engines::command_tts::CommandEngineFactory;
use audio_api::engines::whisper::WhisperCliEngine;
use audio_api::engines::TranscriptionEngine;
use audio_api::handlers::{self, ServiceInfo};
use audio_api::metrics::{create_metrics_exporter, Metrics};
use audio_api::transcoder::{AudioTranscoder, FfmpegTranscoder};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // The configuration file only fills variables the environment leaves unset
    let config_loaded = config_loader::load_config();

    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if !config_loaded {
        info!(
            "No configuration file at {}, using environment and defaults",
            config_loader::config_file_path().display()
        );
    }

    let validation = ConfigValidator::validate();
    validation.print_summary();
    if !validation.is_valid() {
        error!("Invalid configuration, refusing to start");
        std::process::exit(1);
    }

    // Load configurations
    let server_config = ServerConfig::default();
    let handler_config = HandlerConfig::default();
    let cache_config = EngineCacheConfig::default();
    let transcoder_config = TranscoderConfig::default();
    let whisper_config = WhisperConfig::default();
    let metrics_config = MetricsConfig::default();

    // Initialize metrics
    let metrics = Metrics::new(create_metrics_exporter(&metrics_config.exporter_type));

    if let Err(e) = handler_config.ensure_temp_dir() {
        warn!(
            "Failed to create temp directory {}: {}",
            handler_config.temp_dir.display(),
            e
        );
    }

    // Synthesis engines are built on first use and kept while requests keep coming
    let cache = Arc::new(EngineCache::new(
        Arc::new(CommandEngineFactory),
        cache_config.ttl,
        metrics.clone(),
    ));
    match cache_config.sweep_interval {
        Some(interval) => cache.start_eviction_task(interval),
        None => info!("Periodic engine eviction disabled, idle engines expire on lookup"),
    }

    let transcoder: Arc<dyn AudioTranscoder> = Arc::new(FfmpegTranscoder::new(transcoder_config));
    let transcriber: Arc<dyn TranscriptionEngine> =
        Arc::new(WhisperCliEngine::new(whisper_config.clone()));

    info!(
        "Starting Audio API server on http://{}",
        server_config.bind_address()
    );
    info!("Using temp directory: {}", handler_config.temp_dir.display());
    info!("Whisper command: {}", whisper_config.command_path);
    info!("Whisper model: {}", whisper_config.model_path.display());
    info!(
        "Synthesis models: {} (default {})",
        handler_config.manifests_dir.display(),
        handler_config.default_model_config.display()
    );
    info!("Engine TTL: {:?}", cache_config.ttl);
    info!("Metrics exporter: {}", metrics_config.exporter_type);

    let service_info = web::Data::new(ServiceInfo::new(server_config.clone(), whisper_config));
    let handler_data = web::Data::new(handler_config);
    let metrics_data = web::Data::new(metrics);
    let cache_data = web::Data::from(Arc::clone(&cache));
    let transcoder_data = web::Data::from(transcoder);
    let transcriber_data = web::Data::from(transcriber);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(handlers::default_headers())
            .app_data(service_info.clone())
            .app_data(handler_data.clone())
            .app_data(metrics_data.clone())
            .app_data(cache_data.clone())
            .app_data(transcoder_data.clone())
            .app_data(transcriber_data.clone())
            .configure(handlers::configure)
    })
    .workers(server_config.workers)
    .bind(server_config.bind_address())?
    .client_disconnect_timeout(server_config.timeout)
    .keep_alive(server_config.keep_alive)
    .run()
    .await?;

    info!("Server stopped, releasing synthesis engines");
    cache.shutdown().await;
    Ok(())
}
