//! Inference engines
//!
//! The acoustic models themselves are external programs. This module defines the
//! narrow interfaces the HTTP layer talks to, plus the command-line backed
//! implementations used in production:
//!
//! - [`TranscriptionEngine`]: canonical PCM in, lazy stream of text segments out
//!   ([`whisper::WhisperCliEngine`]).
//! - [`SynthesisEngine`]: text in, audio buffer out
//!   ([`command_tts::CommandSynthesisEngine`]), built from a [`ModelConfig`] by a
//!   [`SynthesisEngineFactory`] and owned by the engine cache.

pub mod command_tts;
pub mod whisper;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

use crate::transcoder::CanonicalPcm;

/// Errors raised by engines, at construction or at inference time
#[derive(Error, Debug)]
pub enum EngineError {
    /// I/O error while talking to the engine process or its files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The engine process exited unsuccessfully
    #[error("Engine process failed: {0}")]
    ProcessFailed(String),
    /// The engine produced output that could not be interpreted
    #[error("Invalid engine output: {0}")]
    InvalidOutput(String),
    /// The requested voice is outside the engine's voice table
    #[error("Voice {voice} is out of range, model has {available} voice(s)")]
    InvalidVoice { voice: u32, available: u32 },
    /// The model configuration points to unusable assets
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
}

/// One piece of transcribed text, in engine emission order
#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    /// Start offset in milliseconds, when the engine reports it
    pub start_ms: Option<i64>,
    /// End offset in milliseconds, when the engine reports it
    pub end_ms: Option<i64>,
}

impl TextSegment {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            start_ms: None,
            end_ms: None,
        }
    }
}

/// Finished audio produced by a synthesis engine
#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Speech-to-text capability
///
/// The returned stream is finite and consumed once; it does no work until polled.
pub trait TranscriptionEngine: Send + Sync {
    fn process(&self, pcm: CanonicalPcm) -> BoxStream<'static, Result<TextSegment, EngineError>>;
}

/// Text-to-speech capability
///
/// Engines are not assumed reentrant, hence `&mut self`; the cache serializes calls.
/// Dropping the returned future must abandon the synthesis (kill the child
/// process, stop the worker), since that is how a client disconnect reaches the
/// engine. In-process engines move CPU-bound work to the blocking pool.
#[async_trait]
pub trait SynthesisEngine: Send {
    async fn generate(
        &mut self,
        text: &str,
        speed: f32,
        voice: u32,
    ) -> Result<GeneratedAudio, EngineError>;
}

/// Builds synthesis engines from configuration documents
///
/// `build` is blocking and may be slow (model loading); callers run it on the
/// blocking thread pool.
pub trait SynthesisEngineFactory: Send + Sync {
    fn build(&self, config: &ModelConfig) -> Result<Box<dyn SynthesisEngine>, EngineError>;
}

fn default_command() -> String {
    "piper".to_string()
}

fn default_sample_rate() -> u32 {
    22_050
}

fn default_num_speakers() -> u32 {
    1
}

/// Configuration document of one synthesis model (`<manifests_dir>/<model>.json`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Synthesizer executable
    #[serde(default = "default_command")]
    pub command: String,
    /// Model file, relative paths resolve against the document's directory
    pub model: PathBuf,
    /// Optional model side-car configuration
    #[serde(default)]
    pub config: Option<PathBuf>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_num_speakers")]
    pub num_speakers: u32,
    /// Extra arguments appended to every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl ModelConfig {
    /// Parse a configuration document and make its paths absolute
    /// relative to `base_dir`
    pub fn from_json(content: &str, base_dir: &Path) -> Result<Self, serde_json::Error> {
        let mut config: ModelConfig = serde_json::from_str(content)?;
        config.model = resolve_relative(base_dir, &config.model);
        config.config = config.config.map(|p| resolve_relative(base_dir, &p));
        Ok(config)
    }
}

fn resolve_relative(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_defaults_and_relative_paths() {
        let config =
            ModelConfig::from_json(r#"{"model": "amy.onnx"}"#, Path::new("/srv/manifests")).unwrap();

        assert_eq!(config.command, "piper");
        assert_eq!(config.model, PathBuf::from("/srv/manifests/amy.onnx"));
        assert_eq!(config.config, None);
        assert_eq!(config.sample_rate, 22_050);
        assert_eq!(config.num_speakers, 1);
        assert!(config.extra_args.is_empty());
    }

    #[test]
    fn test_model_config_keeps_absolute_paths() {
        let config = ModelConfig::from_json(
            r#"{"model": "/models/amy.onnx", "config": "amy.onnx.json", "num_speakers": 4}"#,
            Path::new("/srv/manifests"),
        )
        .unwrap();

        assert_eq!(config.model, PathBuf::from("/models/amy.onnx"));
        assert_eq!(
            config.config,
            Some(PathBuf::from("/srv/manifests/amy.onnx.json"))
        );
        assert_eq!(config.num_speakers, 4);
    }

    #[test]
    fn test_model_config_rejects_unknown_fields_and_missing_model() {
        assert!(ModelConfig::from_json(r#"{"model": "a", "modle": "b"}"#, Path::new("/")).is_err());
        assert!(ModelConfig::from_json(r#"{"command": "piper"}"#, Path::new("/")).is_err());
    }
}
