// Audio transcoding for the transcription path
//
// Uploaded audio can be in any container or codec. The transcription engine only
// accepts 16 kHz mono 16-bit PCM, so every upload goes through ffmpeg first.
// The run is single-shot and fully buffered: bytes in through stdin, raw PCM out
// through stdout, nothing is handed to the transcription stage before ffmpeg exits.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::TranscoderConfig;

/// Transcoding failures
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// ffmpeg could not be started
    #[error("Failed to run transcoder: {0}")]
    Spawn(#[source] std::io::Error),
    /// I/O error while piping data to or from ffmpeg
    #[error("Transcoder I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// ffmpeg rejected the input (unsupported codec, corrupt data)
    #[error("Transcoder failed: {0}")]
    Failed(String),
    /// ffmpeg did not finish in time
    #[error("Transcoding timed out after {0} seconds")]
    Timeout(u64),
    /// ffmpeg output is not 16-bit PCM
    #[error("Transcoder produced {0} bytes, not a whole number of 16-bit samples")]
    InvalidOutput(usize),
}

/// 16-bit mono PCM at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPcm {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl CanonicalPcm {
    /// Build from raw little-endian 16-bit bytes
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self, TranscodeError> {
        if bytes.len() % 2 != 0 {
            return Err(TranscodeError::InvalidOutput(bytes.len()));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Write the samples as a mono 16-bit WAV file
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()
    }
}

/// Converts arbitrary audio into [`CanonicalPcm`]
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn transcode(&self, input: Vec<u8>) -> Result<CanonicalPcm, TranscodeError>;
}

/// ffmpeg-backed transcoder
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg("pipe:0")
            .arg("-vn")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg(self.config.sample_rate.to_string())
            .arg("-f")
            .arg("s16le")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the request future must not leave ffmpeg behind
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn transcode(&self, input: Vec<u8>) -> Result<CanonicalPcm, TranscodeError> {
        let input_len = input.len();
        let mut child = self.command().spawn().map_err(|e| {
            error!("Failed to start {}: {}", self.config.ffmpeg_path, e);
            TranscodeError::Spawn(e)
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TranscodeError::Failed("stdin not captured".to_string()))?;

        // Feed stdin from its own task so a full stdout pipe cannot stall the write
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let timeout = self.config.timeout;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                writer.abort();
                warn!("ffmpeg exceeded {}s on a {} byte upload", timeout.as_secs(), input_len);
                return Err(TranscodeError::Timeout(timeout.as_secs()));
            }
        };

        match writer.await {
            Ok(Ok(())) => {}
            // ffmpeg may stop reading early once it knows the input is bad;
            // the exit status below tells the real story
            Ok(Err(e)) => debug!("ffmpeg closed stdin early: {}", e),
            Err(e) => debug!("ffmpeg stdin writer task failed: {}", e),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("ffmpeg failed ({}): {}", output.status, stderr);
            return Err(TranscodeError::Failed(if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            }));
        }

        let pcm = CanonicalPcm::from_le_bytes(&output.stdout, self.config.sample_rate)?;
        debug!(
            "Transcoded {} bytes into {:.2}s of {} Hz PCM",
            input_len,
            pcm.duration_secs(),
            pcm.sample_rate
        );
        Ok(pcm)
    }
}
