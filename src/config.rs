// Audio API configuration
//
// This module contains configuration structures and constants for the Audio API.
// Every structure reads its values from environment variables and falls back to
// the defaults below. The configuration file (see config_loader) is injected into
// the environment before these structures are built.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default values for configuration
pub mod defaults {
    // HTTP server
    pub const HOST: &str = "127.0.0.1";
    pub const PORT: u16 = 8181;
    pub const TIMEOUT_SECONDS: u64 = 480;
    pub const KEEPALIVE_SECONDS: u64 = 480;
    // 0 means one worker per CPU
    pub const WORKERS: usize = 0;

    // Temporary directory for generated audio and whisper work files
    pub const TEMP_DIR: &str = "./tmp";

    // Upload limit (30 MB)
    pub const MAX_FILE_SIZE: usize = 31_457_280;

    // Text synthesized when a speech request carries no input
    pub const FALLBACK_INPUT: &str = "Hello, this is a test of the speech endpoint.";

    // Synthesis model configuration documents
    pub const MANIFESTS_DIR: &str = "./manifests";
    pub const DEFAULT_MODEL_CONFIG: &str = "./manifests/default.json";

    // Idle lifetime of a cached synthesis engine (25 minutes)
    pub const ENGINE_TTL_SECONDS: u64 = 1500;
    pub const ENGINE_SWEEP_SECONDS: u64 = 60;

    // Transcoding
    pub const FFMPEG_PATH: &str = "ffmpeg";
    pub const TRANSCODE_TIMEOUT_SECONDS: u64 = 120;
    pub const TARGET_SAMPLE_RATE: u32 = 16_000;

    // Transcription
    pub const WHISPER_CMD: &str = "whisper-cli";
    pub const WHISPER_MODEL: &str = "ggml-base-q5_1.bin";
    pub const WHISPER_LANGUAGE: &str = "auto";
    pub const WHISPER_THREADS: usize = 4;

    // Metrics
    pub const METRICS_BACKEND: &str = "prometheus";
}

/// Read an environment variable and parse it, falling back to `default`
/// when the variable is missing or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| String::from(default))
}

/// HTTP server settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Client disconnect timeout
    pub timeout: Duration,
    pub keep_alive: Duration,
    /// Number of HTTP workers, resolved against the CPU count
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let workers = env_or("AUDIO_API_WORKERS", defaults::WORKERS);
        Self {
            host: env_string("AUDIO_API_HOST", defaults::HOST),
            port: env_or("AUDIO_API_PORT", defaults::PORT),
            timeout: Duration::from_secs(env_or("AUDIO_API_TIMEOUT", defaults::TIMEOUT_SECONDS)),
            keep_alive: Duration::from_secs(env_or(
                "AUDIO_API_KEEPALIVE",
                defaults::KEEPALIVE_SECONDS,
            )),
            workers: if workers == 0 { num_cpus::get() } else { workers },
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the HTTP handlers
#[derive(Clone, Debug)]
pub struct HandlerConfig {
    /// Directory to store temporary files
    pub temp_dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_file_size: usize,
    /// Input used when a speech request has no text
    pub fallback_input: String,
    /// Directory holding one `<model>.json` per synthesis model
    pub manifests_dir: PathBuf,
    /// Configuration used when the requested model cannot be resolved
    pub default_model_config: PathBuf,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from(env_string("AUDIO_API_TMP_FILES", defaults::TEMP_DIR)),
            max_file_size: env_or("AUDIO_API_MAX_FILE_SIZE", defaults::MAX_FILE_SIZE),
            fallback_input: env_string("AUDIO_API_FALLBACK_INPUT", defaults::FALLBACK_INPUT),
            manifests_dir: PathBuf::from(env_string(
                "AUDIO_API_MANIFESTS_DIR",
                defaults::MANIFESTS_DIR,
            )),
            default_model_config: PathBuf::from(env_string(
                "AUDIO_API_DEFAULT_MODEL_CONFIG",
                defaults::DEFAULT_MODEL_CONFIG,
            )),
        }
    }
}

impl HandlerConfig {
    /// Ensures the temporary directory exists
    pub fn ensure_temp_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)
    }
}

/// Lifetime settings of the synthesis engine cache
#[derive(Clone, Debug)]
pub struct EngineCacheConfig {
    /// Idle time after which an engine is released
    pub ttl: Duration,
    /// Period of the background sweep, `None` leaves eviction to lookups
    pub sweep_interval: Option<Duration>,
}

impl Default for EngineCacheConfig {
    fn default() -> Self {
        let sweep = env_or("AUDIO_API_ENGINE_SWEEP_SECONDS", defaults::ENGINE_SWEEP_SECONDS);
        Self {
            ttl: Duration::from_secs(env_or(
                "AUDIO_API_ENGINE_TTL_SECONDS",
                defaults::ENGINE_TTL_SECONDS,
            )),
            sweep_interval: (sweep > 0).then(|| Duration::from_secs(sweep)),
        }
    }
}

/// Settings of the ffmpeg transcoder
#[derive(Clone, Debug)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,
    /// Upper bound for one ffmpeg run
    pub timeout: Duration,
    pub sample_rate: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: env_string("AUDIO_API_FFMPEG_PATH", defaults::FFMPEG_PATH),
            timeout: Duration::from_secs(env_or(
                "AUDIO_API_TRANSCODE_TIMEOUT_SECONDS",
                defaults::TRANSCODE_TIMEOUT_SECONDS,
            )),
            sample_rate: defaults::TARGET_SAMPLE_RATE,
        }
    }
}

/// Settings of the whisper.cpp transcription engine
#[derive(Clone, Debug)]
pub struct WhisperConfig {
    /// Path to the whisper-cli binary
    pub command_path: String,
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Spoken language, `auto` for detection
    pub language: String,
    pub threads: usize,
    /// Where intermediate wav/json files are written
    pub work_dir: PathBuf,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            command_path: env_string("AUDIO_API_WHISPER_CMD", defaults::WHISPER_CMD),
            model_path: PathBuf::from(env_string(
                "AUDIO_API_WHISPER_MODEL",
                defaults::WHISPER_MODEL,
            )),
            language: env_string("AUDIO_API_WHISPER_LANGUAGE", defaults::WHISPER_LANGUAGE),
            threads: env_or("AUDIO_API_WHISPER_THREADS", defaults::WHISPER_THREADS),
            work_dir: PathBuf::from(env_string("AUDIO_API_TMP_FILES", defaults::TEMP_DIR)),
        }
    }
}

/// Configuration for metrics collection and export
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Type of metrics exporter ("prometheus", "none")
    pub exporter_type: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let metrics_enabled = env_or("AUDIO_API_METRICS_ENABLED", true);
        let exporter_type = if metrics_enabled {
            env::var("AUDIO_API_METRICS_BACKEND")
                .or_else(|_| env::var("METRICS_BACKEND"))
                .unwrap_or_else(|_| defaults::METRICS_BACKEND.to_string())
        } else {
            "disabled".to_string()
        };
        Self { exporter_type }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("AUDIO_API_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("AUDIO_API_TEST_ENV_OR", 7u64), 7);

        env::set_var("AUDIO_API_TEST_ENV_OR", " 42 ");
        assert_eq!(env_or("AUDIO_API_TEST_ENV_OR", 7u64), 42);

        env::remove_var("AUDIO_API_TEST_ENV_OR");
        assert_eq!(env_or("AUDIO_API_TEST_ENV_OR", 7u64), 7);
    }

    #[test]
    fn test_engine_ttl_default_is_25_minutes() {
        assert_eq!(
            Duration::from_secs(defaults::ENGINE_TTL_SECONDS),
            Duration::from_secs(25 * 60)
        );
    }
}
