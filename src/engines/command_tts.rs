//! Piper-style command-line synthesizer
//!
//! The synthesizer reads one line of text on stdin and writes raw 16-bit mono
//! PCM on stdout (`--output_raw`). Construction validates the model assets and
//! reads the side-car voice configuration; every `generate` call runs the
//! synthesizer once, and dropping the call kills it.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error, info};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{EngineError, GeneratedAudio, ModelConfig, SynthesisEngine, SynthesisEngineFactory};

/// Fields of the voice side-car file this engine cares about
#[derive(Debug, Default, Deserialize)]
struct VoiceSidecar {
    #[serde(default)]
    audio: Option<VoiceAudio>,
    #[serde(default)]
    num_speakers: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct VoiceAudio {
    sample_rate: u32,
}

/// Synthesis engine backed by an external synthesizer executable
#[derive(Debug, Clone)]
pub struct CommandSynthesisEngine {
    command: String,
    model: PathBuf,
    config: Option<PathBuf>,
    sample_rate: u32,
    num_speakers: u32,
    extra_args: Vec<String>,
}

impl CommandSynthesisEngine {
    /// Validate the model assets and load the voice side-car
    pub fn load(config: &ModelConfig) -> Result<Self, EngineError> {
        if !config.model.is_file() {
            return Err(EngineError::InvalidConfig(format!(
                "model file not found: {}",
                config.model.display()
            )));
        }

        let mut sample_rate = config.sample_rate;
        let mut num_speakers = config.num_speakers;

        if let Some(sidecar_path) = &config.config {
            let content = std::fs::read_to_string(sidecar_path).map_err(|e| {
                EngineError::InvalidConfig(format!(
                    "cannot read voice config {}: {}",
                    sidecar_path.display(),
                    e
                ))
            })?;
            let sidecar: VoiceSidecar = serde_json::from_str(&content).map_err(|e| {
                EngineError::InvalidConfig(format!(
                    "malformed voice config {}: {}",
                    sidecar_path.display(),
                    e
                ))
            })?;
            // The side-car describes the trained model and wins over the manifest
            if let Some(audio) = sidecar.audio {
                sample_rate = audio.sample_rate;
            }
            if let Some(speakers) = sidecar.num_speakers {
                num_speakers = speakers;
            }
        }

        if sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample_rate must be positive".to_string()));
        }

        info!(
            "Loaded synthesis model {} ({} Hz, {} voice(s))",
            config.model.display(),
            sample_rate,
            num_speakers.max(1)
        );

        Ok(Self {
            command: config.command.clone(),
            model: config.model.clone(),
            config: config.config.clone(),
            sample_rate,
            num_speakers: num_speakers.max(1),
            extra_args: config.extra_args.clone(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_speakers(&self) -> u32 {
        self.num_speakers
    }

    fn command(&self, speed: f32, voice: u32) -> Command {
        let mut command = Command::new(&self.command);
        command.arg("--model").arg(&self.model);
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        if self.num_speakers > 1 {
            command.arg("--speaker").arg(voice.to_string());
        }
        // Piper expresses speed as phoneme length: larger is slower
        command
            .arg("--length_scale")
            .arg(format!("{:.3}", 1.0 / speed))
            .arg("--output_raw")
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A dropped request must not leave the synthesizer running
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl SynthesisEngine for CommandSynthesisEngine {
    async fn generate(
        &mut self,
        text: &str,
        speed: f32,
        voice: u32,
    ) -> Result<GeneratedAudio, EngineError> {
        if voice >= self.num_speakers {
            return Err(EngineError::InvalidVoice {
                voice,
                available: self.num_speakers,
            });
        }
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };

        let mut child = self.command(speed, voice).spawn().map_err(|e| {
            error!("Failed to start synthesizer {}: {}", self.command, e);
            EngineError::Io(e)
        })?;

        // The synthesizer reads a single line per utterance
        let line = format!("{}\n", text.replace(['\r', '\n'], " "));
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::ProcessFailed("stdin not captured".to_string()))?;
        let writer = async move {
            let result = stdin.write_all(line.as_bytes()).await;
            drop(stdin);
            result
        };

        // Both halves live in this future; dropping it kills the child
        let (written, output) = tokio::join!(writer, child.wait_with_output());
        let output = output?;
        if let Err(e) = written {
            debug!("Synthesizer closed stdin early: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::ProcessFailed(format!(
                "{} exited with {}: {}",
                self.command, output.status, stderr
            )));
        }

        let samples = decode_raw_pcm(&output.stdout)?;
        if samples.is_empty() {
            return Err(EngineError::InvalidOutput("synthesizer produced no audio".to_string()));
        }

        debug!(
            "Synthesized {} samples at {} Hz for {} characters",
            samples.len(),
            self.sample_rate,
            text.chars().count()
        );

        Ok(GeneratedAudio {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

/// Convert little-endian 16-bit PCM into f32 samples
fn decode_raw_pcm(bytes: &[u8]) -> Result<Vec<f32>, EngineError> {
    if bytes.len() % 2 != 0 {
        return Err(EngineError::InvalidOutput(format!(
            "{} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Factory building [`CommandSynthesisEngine`] instances
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandEngineFactory;

impl SynthesisEngineFactory for CommandEngineFactory {
    fn build(&self, config: &ModelConfig) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        Ok(Box::new(CommandSynthesisEngine::load(config)?))
    }
}
