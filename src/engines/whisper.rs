//! whisper.cpp transcription engine
//!
//! Runs `whisper-cli` on a WAV copy of the canonical PCM and reads back the JSON
//! report (`-oj`). Work files live in the configured temp directory and are removed
//! when the run ends, whatever the outcome.

use std::path::Path;
use std::process::Stdio;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use log::{debug, error, info};
use serde::Deserialize;
use tokio::process::Command;

use super::{EngineError, TextSegment, TranscriptionEngine};
use crate::config::WhisperConfig;
use crate::file_utils::{generate_unique_path, TempFile};
use crate::transcoder::CanonicalPcm;

/// Top-level JSON report written by whisper-cli
#[derive(Debug, Deserialize)]
struct WhisperReport {
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    offsets: Option<WhisperOffsets>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: i64,
    to: i64,
}

/// Parse a whisper-cli JSON report into segments, keeping report order
fn parse_report(content: &str) -> Result<Vec<TextSegment>, EngineError> {
    let report: WhisperReport = serde_json::from_str(content)
        .map_err(|e| EngineError::InvalidOutput(format!("whisper report: {}", e)))?;
    Ok(report
        .transcription
        .into_iter()
        .map(|segment| TextSegment {
            text: segment.text,
            start_ms: segment.offsets.as_ref().map(|o| o.from),
            end_ms: segment.offsets.as_ref().map(|o| o.to),
        })
        .collect())
}

/// Transcription engine backed by whisper.cpp's command-line tool
#[derive(Debug, Clone)]
pub struct WhisperCliEngine {
    config: WhisperConfig,
}

impl WhisperCliEngine {
    pub fn new(config: WhisperConfig) -> Self {
        info!(
            "Whisper engine: {} with model {} (language {})",
            config.command_path,
            config.model_path.display(),
            config.language
        );
        Self { config }
    }

    async fn run(config: WhisperConfig, pcm: CanonicalPcm) -> Result<Vec<TextSegment>, EngineError> {
        let wav = TempFile::new_in(&config.work_dir, "whisper", "wav")?;
        // whisper-cli appends ".json" to the output prefix
        let prefix = generate_unique_path(&config.work_dir, "whisper", "out")?;
        let report = TempFile::adopt(prefix.with_extension("out.json"));

        let wav_path = wav.path().to_path_buf();
        tokio::task::spawn_blocking(move || pcm.write_wav(&wav_path))
            .await
            .map_err(|e| EngineError::ProcessFailed(format!("wav writer task failed: {}", e)))?
            .map_err(|e| EngineError::InvalidOutput(format!("cannot write wav: {}", e)))?;

        let output = Self::command(&config, wav.path(), &prefix)
            .output()
            .await
            .map_err(|e| {
                error!("Failed to run {}: {}", config.command_path, e);
                EngineError::Io(e)
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::ProcessFailed(stderr));
        }

        let content = tokio::fs::read_to_string(report.path()).await.map_err(|e| {
            EngineError::InvalidOutput(format!(
                "cannot read whisper report {}: {}",
                report.path().display(),
                e
            ))
        })?;
        let segments = parse_report(&content)?;
        debug!("whisper produced {} segment(s)", segments.len());
        Ok(segments)
    }

    fn command(config: &WhisperConfig, wav: &Path, prefix: &Path) -> Command {
        let mut command = Command::new(&config.command_path);
        command
            .arg("-m")
            .arg(&config.model_path)
            .arg("-l")
            .arg(&config.language)
            .arg("-t")
            .arg(config.threads.to_string())
            .arg("-f")
            .arg(wav)
            .arg("-oj")
            .arg("-of")
            .arg(prefix)
            .arg("-np")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl TranscriptionEngine for WhisperCliEngine {
    fn process(&self, pcm: CanonicalPcm) -> BoxStream<'static, Result<TextSegment, EngineError>> {
        let config = self.config.clone();
        stream::once(Self::run(config, pcm))
            .map_ok(|segments| stream::iter(segments.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}
