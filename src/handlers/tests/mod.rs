//! End-to-end tests of the HTTP handlers against fake engines

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tempfile::TempDir;

use crate::config::HandlerConfig;
use crate::engine_cache::EngineCache;
use crate::engines::{
    EngineError, GeneratedAudio, ModelConfig, SynthesisEngine, SynthesisEngineFactory,
    TextSegment, TranscriptionEngine,
};
use crate::metrics::prometheus::PrometheusExporter;
use crate::metrics::Metrics;
use crate::transcoder::{AudioTranscoder, CanonicalPcm, TranscodeError};

/// Build the application under test from a [`TestEnv`]
macro_rules! test_app {
    ($env:expr) => {{
        let env: &$crate::handlers::tests::TestEnv = &$env;
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap($crate::handlers::default_headers())
                .app_data(actix_web::web::Data::new(env.handler_config.clone()))
                .app_data(actix_web::web::Data::from(
                    env.transcoder.clone() as std::sync::Arc<dyn $crate::transcoder::AudioTranscoder>
                ))
                .app_data(actix_web::web::Data::from(
                    env.transcriber.clone()
                        as std::sync::Arc<dyn $crate::engines::TranscriptionEngine>,
                ))
                .app_data(actix_web::web::Data::from(env.cache.clone()))
                .app_data(actix_web::web::Data::new(env.metrics.clone()))
                .app_data(actix_web::web::Data::new(
                    $crate::handlers::ServiceInfo::new(
                        $crate::config::ServerConfig::default(),
                        $crate::config::WhisperConfig::default(),
                    ),
                ))
                .configure($crate::handlers::configure),
        )
        .await
    }};
}

mod speech;

/// Transcoder returning canned PCM or a canned failure
pub struct FakeTranscoder {
    result: Result<Vec<i16>, String>,
    pub calls: AtomicUsize,
    pub last_input: Mutex<Vec<u8>>,
}

impl FakeTranscoder {
    pub fn returning(samples: Vec<i16>) -> Self {
        Self {
            result: Ok(samples),
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AudioTranscoder for FakeTranscoder {
    async fn transcode(&self, input: Vec<u8>) -> Result<CanonicalPcm, TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = input;
        match &self.result {
            Ok(samples) => Ok(CanonicalPcm {
                samples: samples.clone(),
                sample_rate: 16_000,
            }),
            Err(message) => Err(TranscodeError::Failed(message.clone())),
        }
    }
}

/// Transcription engine emitting fixed segments, optionally followed by an error
pub struct FakeTranscriber {
    segments: Vec<String>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(segments: &[&str]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            segments: vec!["partial".to_string()],
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

impl TranscriptionEngine for FakeTranscriber {
    fn process(&self, _pcm: CanonicalPcm) -> BoxStream<'static, Result<TextSegment, EngineError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut items: Vec<Result<TextSegment, EngineError>> = self
            .segments
            .iter()
            .map(|text| Ok(TextSegment::new(text.clone())))
            .collect();
        if self.fail {
            items.push(Err(EngineError::ProcessFailed("decoder crashed".to_string())));
        }
        stream::iter(items).boxed()
    }
}

/// One `generate` call seen by a fake synthesis engine
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechCall {
    pub model: PathBuf,
    pub text: String,
    pub speed: f32,
    pub voice: u32,
}

pub const FAKE_SAMPLES: [f32; 4] = [0.0, 0.5, -0.5, 0.25];

struct FakeSynthesizer {
    model: PathBuf,
    calls: Arc<Mutex<Vec<SpeechCall>>>,
}

#[async_trait]
impl SynthesisEngine for FakeSynthesizer {
    async fn generate(
        &mut self,
        text: &str,
        speed: f32,
        voice: u32,
    ) -> Result<GeneratedAudio, EngineError> {
        self.calls.lock().unwrap().push(SpeechCall {
            model: self.model.clone(),
            text: text.to_string(),
            speed,
            voice,
        });
        if text == "fail" {
            return Err(EngineError::ProcessFailed("synthesizer crashed".to_string()));
        }
        if voice > 3 {
            return Err(EngineError::InvalidVoice { voice, available: 4 });
        }
        Ok(GeneratedAudio {
            samples: FAKE_SAMPLES.to_vec(),
            sample_rate: 16_000,
        })
    }
}

/// Factory failing for models whose file name contains "broken"
#[derive(Default)]
pub struct FakeFactory {
    pub builds: Arc<Mutex<Vec<PathBuf>>>,
    pub calls: Arc<Mutex<Vec<SpeechCall>>>,
}

impl SynthesisEngineFactory for FakeFactory {
    fn build(&self, config: &ModelConfig) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        std::thread::sleep(Duration::from_millis(20));
        self.builds.lock().unwrap().push(config.model.clone());
        if config.model.to_string_lossy().contains("broken") {
            return Err(EngineError::InvalidConfig("cannot load broken model".to_string()));
        }
        Ok(Box::new(FakeSynthesizer {
            model: config.model.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

/// Scratch directories, fakes and shared state behind one test application
pub struct TestEnv {
    pub dir: TempDir,
    pub handler_config: HandlerConfig,
    pub transcoder: Arc<FakeTranscoder>,
    pub transcriber: Arc<FakeTranscriber>,
    pub cache: Arc<EngineCache>,
    pub builds: Arc<Mutex<Vec<PathBuf>>>,
    pub speech_calls: Arc<Mutex<Vec<SpeechCall>>>,
    pub metrics: Metrics,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_engines(
            FakeTranscoder::returning(vec![0; 1600]),
            FakeTranscriber::new(&["Hello ", "world"]),
        )
    }

    pub fn with_engines(transcoder: FakeTranscoder, transcriber: FakeTranscriber) -> Self {
        let dir = tempfile::tempdir().unwrap();
        // Model keys are canonical paths
        let root = dir.path().canonicalize().unwrap();
        let manifests = root.join("manifests");
        fs::create_dir_all(&manifests).unwrap();
        fs::write(manifests.join("default.json"), r#"{"model": "default.onnx"}"#).unwrap();
        fs::write(manifests.join("voiceA.json"), r#"{"model": "voiceA.onnx"}"#).unwrap();
        fs::write(manifests.join("broken.json"), r#"{"model": "broken.onnx"}"#).unwrap();
        fs::write(manifests.join("garbled.json"), "{ not json").unwrap();

        let handler_config = HandlerConfig {
            temp_dir: root.join("tmp"),
            max_file_size: 1024,
            fallback_input: "Hello, this is a test of the speech endpoint.".to_string(),
            manifests_dir: manifests.clone(),
            default_model_config: manifests.join("default.json"),
        };

        let metrics = Metrics::new(Arc::new(PrometheusExporter::new()));
        let factory = FakeFactory::default();
        let builds = Arc::clone(&factory.builds);
        let speech_calls = Arc::clone(&factory.calls);
        let cache = Arc::new(EngineCache::new(
            Arc::new(factory),
            Duration::from_secs(1500),
            metrics.clone(),
        ));

        Self {
            dir,
            handler_config,
            transcoder: Arc::new(transcoder),
            transcriber: Arc::new(transcriber),
            cache,
            builds,
            speech_calls,
            metrics,
        }
    }

    pub fn manifest(&self, name: &str) -> PathBuf {
        self.handler_config.manifests_dir.join(name)
    }

    /// Files left in the handler temp directory
    pub fn temp_files(&self) -> usize {
        count_files(&self.handler_config.temp_dir)
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    pub fn speech_calls(&self) -> Vec<SpeechCall> {
        self.speech_calls.lock().unwrap().clone()
    }
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

pub const BOUNDARY: &str = "----audio-api-test-boundary";

/// A multipart/form-data body; parts are `(name, filename, data)`
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n", name).as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}
