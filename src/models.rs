// Audio API data models
//
// Request and response types used across the API.

use serde::{Deserialize, Deserializer, Serialize};

use crate::engine_cache::EngineInfo;

/// JSON response of the transcription endpoint
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResponse {
    /// Original name of the uploaded file
    pub file_name: String,
    /// Size of the upload in bytes
    pub length: usize,
    /// Concatenated transcript
    pub text: String,
}

/// Error response for API
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Optional status information
    pub status: Option<String>,
}

/// Body of a speech request. Every field is optional.
#[derive(Deserialize, Debug, Default)]
pub struct SpeechRequest {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default, deserialize_with = "lenient_voice")]
    pub voice: u32,
    #[serde(default, deserialize_with = "lenient_speed")]
    pub speed: Option<f32>,
    #[serde(default)]
    pub model: Option<String>,
}

impl SpeechRequest {
    /// Parse a POST body; an empty body is the same as `{}`
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
    }

    /// The text to speak, or `fallback` when absent or blank
    pub fn input_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.input.as_deref() {
            Some(input) if !input.trim().is_empty() => input,
            _ => fallback,
        }
    }

    /// Speed multiplier, 1.0 unless a positive finite value was given
    pub fn speed(&self) -> f32 {
        match self.speed {
            Some(speed) if speed.is_finite() && speed > 0.0 => speed,
            _ => 1.0,
        }
    }
}

/// Query string of `GET /v1/audio/speech`
#[derive(Deserialize, Debug, Default)]
pub struct SpeechQuery {
    pub input: Option<String>,
}

/// `voice` arrives as a number from most clients and as a voice name from
/// OpenAI clients; names and negative values select the first voice.
fn lenient_voice<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_speed<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().map(|f| f as f32),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Server section of the status response
#[derive(Serialize, Debug)]
pub struct ServerStatus {
    pub host: String,
    pub port: u16,
    pub timeout: u64,
    pub keepalive: u64,
    pub workers: usize,
    pub started_at: String,
}

/// Transcription section of the status response
#[derive(Serialize, Debug)]
pub struct TranscriptionStatus {
    pub model: String,
    pub language: String,
    pub max_file_size: usize,
}

/// Synthesis section of the status response
#[derive(Serialize, Debug)]
pub struct SynthesisStatus {
    pub manifests_dir: String,
    pub default_model_config: String,
    pub engine_ttl_seconds: u64,
    pub cached_engines: Vec<EngineInfo>,
}

/// Response of `GET /status`
#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub server: ServerStatus,
    pub transcription: TranscriptionStatus,
    pub synthesis: SynthesisStatus,
}
