// API route handlers for the audio API
//
// This module implements the HTTP endpoints: transcription, speech synthesis,
// status, metrics and CORS preflight.

use crate::config::{HandlerConfig, ServerConfig, WhisperConfig};
use crate::engine_cache::{CacheError, EngineCache, ModelKey};
use crate::engines::{GeneratedAudio, TranscriptionEngine};
use crate::error::HandlerError;
use crate::file_utils::{save_wav, TempFile};
use crate::handlers::form::{ensure_multipart, extract_audio_upload};
use crate::handlers::speech::{resolve_model, temp_file_body};
use crate::metrics::Metrics;
use crate::models::{
    ServerStatus, SpeechQuery, SpeechRequest, StatusResponse, SynthesisStatus,
    TranscriptionResponse, TranscriptionStatus,
};
use crate::transcoder::{AudioTranscoder, CanonicalPcm};
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{get, web, HttpRequest, HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{debug, error, info, warn};
use std::io;
use std::time::Instant;

pub const TRANSCRIPTIONS_PATH: &str = "/v1/audio/transcriptions";
pub const SPEECH_PATH: &str = "/v1/audio/speech";

/// Static facts about the running service, shown by `/status`
#[derive(Clone, Debug)]
pub struct ServiceInfo {
    pub server: ServerConfig,
    pub whisper: WhisperConfig,
    pub started_at: DateTime<Utc>,
}

impl ServiceInfo {
    pub fn new(server: ServerConfig, whisper: WhisperConfig) -> Self {
        Self {
            server,
            whisper,
            started_at: Utc::now(),
        }
    }
}

/// Record the outcome of a request, successful or not
async fn record_request(
    metrics: &Metrics,
    endpoint: &str,
    method: &str,
    result: &Result<HttpResponse, HandlerError>,
    start_time: Instant,
) {
    let status = match result {
        Ok(response) => response.status(),
        Err(e) => e.status_code(),
    };
    metrics
        .record_http_request(
            endpoint,
            method,
            status.as_str(),
            start_time.elapsed().as_secs_f64(),
        )
        .await;
}

/// Handler for transcription requests
///
/// Receives a multipart upload, converts it to 16 kHz mono PCM and returns the
/// transcript, as plain text when `response_format=text`, as JSON otherwise.
pub async fn transcribe(
    req: HttpRequest,
    payload: web::Payload,
    config: web::Data<HandlerConfig>,
    transcoder: web::Data<dyn AudioTranscoder>,
    engine: web::Data<dyn TranscriptionEngine>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();
    let result = run_transcription(
        &req,
        payload,
        &config,
        transcoder.get_ref(),
        engine.get_ref(),
        &metrics,
    )
    .await;
    if let Err(e) = &result {
        warn!("Transcription request failed: {}", e);
    }
    record_request(&metrics, TRANSCRIPTIONS_PATH, "POST", &result, start_time).await;
    result
}

async fn run_transcription(
    req: &HttpRequest,
    payload: web::Payload,
    config: &HandlerConfig,
    transcoder: &dyn AudioTranscoder,
    engine: &dyn TranscriptionEngine,
    metrics: &Metrics,
) -> Result<HttpResponse, HandlerError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    ensure_multipart(content_type)?;

    let form = Multipart::new(req.headers(), payload);
    let upload = extract_audio_upload(form, config.max_file_size).await?;
    metrics.record_upload_size(upload.data.len()).await;

    let wants_text = upload.wants_text();
    let file_name = upload.file_name;
    let length = upload.data.len();

    let transcode_start = Instant::now();
    let pcm = match transcoder.transcode(upload.data).await {
        Ok(pcm) => {
            metrics
                .record_transcode("success", transcode_start.elapsed().as_secs_f64())
                .await;
            pcm
        }
        Err(e) => {
            error!("Failed to transcode '{}': {}", file_name, e);
            metrics
                .record_transcode("failed", transcode_start.elapsed().as_secs_f64())
                .await;
            return Err(e.into());
        }
    };

    let text = if pcm.is_empty() {
        info!("'{}' decoded to no audio, returning an empty transcript", file_name);
        String::new()
    } else {
        transcribe_pcm(engine, pcm, metrics).await?
    };

    info!(
        "Transcribed '{}' ({} bytes) into {} characters",
        file_name,
        length,
        text.chars().count()
    );

    if wants_text {
        Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(text))
    } else {
        Ok(HttpResponse::Ok().json(TranscriptionResponse {
            file_name,
            length,
            text,
        }))
    }
}

/// Concatenate the engine's segments in emission order
async fn transcribe_pcm(
    engine: &dyn TranscriptionEngine,
    pcm: CanonicalPcm,
    metrics: &Metrics,
) -> Result<String, HandlerError> {
    let start_time = Instant::now();
    debug!("Transcribing {:.2}s of audio", pcm.duration_secs());

    let mut segments = engine.process(pcm);
    let mut text = String::new();
    let outcome = async {
        while let Some(segment) = segments.try_next().await? {
            text.push_str(&segment.text);
        }
        Ok::<(), HandlerError>(())
    }
    .await;

    let status = if outcome.is_ok() { "success" } else { "failed" };
    metrics
        .record_transcription(status, start_time.elapsed().as_secs_f64())
        .await;
    outcome.map(|_| text)
}

/// Any method other than POST on the transcription route
pub async fn use_post() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Use POST")
}

/// Handler for `POST /v1/audio/speech` with a JSON body
pub async fn speech_post(
    body: web::Bytes,
    config: web::Data<HandlerConfig>,
    cache: web::Data<EngineCache>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();
    let result = match SpeechRequest::from_body(&body) {
        Ok(request) => synthesize(request, &config, &cache, &metrics).await,
        Err(e) => Err(HandlerError::InvalidJson(e.to_string())),
    };
    if let Err(e) = &result {
        warn!("Speech request failed: {}", e);
    }
    record_request(&metrics, SPEECH_PATH, "POST", &result, start_time).await;
    result
}

/// Handler for `GET /v1/audio/speech?input=...`; other parameters take their defaults
pub async fn speech_get(
    query: web::Query<SpeechQuery>,
    config: web::Data<HandlerConfig>,
    cache: web::Data<EngineCache>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();
    let request = SpeechRequest {
        input: query.into_inner().input,
        ..SpeechRequest::default()
    };
    let result = synthesize(request, &config, &cache, &metrics).await;
    if let Err(e) = &result {
        warn!("Speech request failed: {}", e);
    }
    record_request(&metrics, SPEECH_PATH, "GET", &result, start_time).await;
    result
}

async fn synthesize(
    request: SpeechRequest,
    config: &HandlerConfig,
    cache: &EngineCache,
    metrics: &Metrics,
) -> Result<HttpResponse, HandlerError> {
    let input = request.input_or(&config.fallback_input).to_string();
    let speed = request.speed();
    let voice = request.voice;
    let key = resolve_model(
        request.model.as_deref(),
        &config.manifests_dir,
        &config.default_model_config,
    );
    debug!(
        "Speech request: model {}, voice {}, speed {}, {} characters",
        key,
        voice,
        speed,
        input.chars().count()
    );

    let start_time = Instant::now();
    let generated = generate_speech(cache, &key, &input, speed, voice).await;
    let status = if generated.is_ok() { "success" } else { "failed" };
    metrics
        .record_synthesis(status, start_time.elapsed().as_secs_f64())
        .await;
    let audio = generated?;

    // Removed when the response body is finished or dropped
    let wav = TempFile::new_in(&config.temp_dir, "speech", "wav")?;
    let wav_path = wav.path().to_path_buf();
    tokio::task::spawn_blocking(move || save_wav(&audio, &wav_path))
        .await
        .map_err(|e| HandlerError::FileError(io::Error::other(e)))??;

    let file = tokio::fs::File::open(wav.path()).await?;
    let length = file.metadata().await?.len();
    info!(
        "Generated speech with {}: {} bytes in {:.2}s",
        key,
        length,
        start_time.elapsed().as_secs_f64()
    );

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .no_chunking(length)
        .streaming(temp_file_body(file, wav)))
}

/// Acquire the engine and generate, retrying once if the engine was evicted
/// between acquisition and use
async fn generate_speech(
    cache: &EngineCache,
    key: &ModelKey,
    input: &str,
    speed: f32,
    voice: u32,
) -> Result<GeneratedAudio, HandlerError> {
    let mut retried = false;
    loop {
        let handle = cache.get_or_create(key).await?;
        match handle.generate(input.to_string(), speed, voice).await {
            Err(CacheError::Evicted(evicted)) if !retried => {
                debug!("Engine for {} evicted before use, acquiring again", evicted);
                retried = true;
            }
            result => return result.map_err(HandlerError::from),
        }
    }
}

/// CORS preflight for the audio routes
pub async fn preflight(req: HttpRequest) -> HttpResponse {
    let allowed_methods = if req.path() == SPEECH_PATH {
        "OPTIONS, GET, POST"
    } else {
        "OPTIONS, POST"
    };

    HttpResponse::Ok()
        .append_header(("Allow", allowed_methods))
        .append_header(("Access-Control-Allow-Methods", allowed_methods))
        .append_header(("Access-Control-Allow-Headers", "Authorization, Content-Type"))
        .append_header(("Access-Control-Max-Age", "86400"))
        .finish()
}

/// API status endpoint
///
/// Server settings, transcription settings and the synthesis engines currently cached.
#[get("/status")]
pub async fn api_status(
    info: web::Data<ServiceInfo>,
    config: web::Data<HandlerConfig>,
    cache: web::Data<EngineCache>,
) -> Result<HttpResponse, HandlerError> {
    let response = StatusResponse {
        server: ServerStatus {
            host: info.server.host.clone(),
            port: info.server.port,
            timeout: info.server.timeout.as_secs(),
            keepalive: info.server.keep_alive.as_secs(),
            workers: info.server.workers,
            started_at: info.started_at.to_rfc3339(),
        },
        transcription: TranscriptionStatus {
            model: info.whisper.model_path.display().to_string(),
            language: info.whisper.language.clone(),
            max_file_size: config.max_file_size,
        },
        synthesis: SynthesisStatus {
            manifests_dir: config.manifests_dir.display().to_string(),
            default_model_config: config.default_model_config.display().to_string(),
            engine_ttl_seconds: cache.ttl().as_secs(),
            cached_engines: cache.snapshot().await,
        },
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Metrics endpoint handler
pub async fn metrics_handler(metrics: web::Data<Metrics>) -> HttpResponse {
    match metrics.export().await {
        Ok(data) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(data),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            HttpResponse::InternalServerError().json(format!("Failed to export metrics: {}", e))
        }
    }
}
