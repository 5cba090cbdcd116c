// Audio API Library
//
// This crate provides an OpenAI-style HTTP API for audio: speech-to-text through
// ffmpeg and whisper.cpp, and text-to-speech through cached synthesis engines.

pub mod config;
pub mod config_loader;
pub mod config_validator;
pub mod engine_cache;
pub mod engines;
pub mod error;
pub mod file_utils;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod transcoder;

// Re-export common types for easier access
pub use config::{
    EngineCacheConfig, HandlerConfig, MetricsConfig, ServerConfig, TranscoderConfig,
    WhisperConfig,
};
pub use engine_cache::{CacheError, EngineCache, ModelKey};
pub use error::HandlerError;
pub use handlers::{configure, default_headers, ServiceInfo};
pub use metrics::Metrics;
pub use models::{ErrorResponse, SpeechRequest, TranscriptionResponse};
pub use transcoder::{AudioTranscoder, FfmpegTranscoder};
