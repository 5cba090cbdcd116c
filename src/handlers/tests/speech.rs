use std::io::Cursor;

use actix_web::http::{header, StatusCode};
use actix_web::test;
use futures::future::join_all;

use super::{SpeechCall, TestEnv, FAKE_SAMPLES};

const FALLBACK: &str = "Hello, this is a test of the speech endpoint.";

fn speech_post(body: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/v1/audio/speech")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload(body.to_string())
}

/// Decode a WAV response body into its samples
fn wav_samples(body: &[u8]) -> (hound::WavSpec, Vec<i16>) {
    let reader = hound::WavReader::new(Cursor::new(body.to_vec())).unwrap();
    let spec = reader.spec();
    let samples = reader.into_samples::<i16>().map(Result::unwrap).collect();
    (spec, samples)
}

#[actix_web::test]
async fn test_post_returns_wav_and_removes_temp_file() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let req = speech_post(r#"{"input": "Good morning", "voice": 2, "speed": 1.25}"#).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/wav");
    let declared: usize = resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let body = test::read_body(resp).await;
    assert_eq!(body.len(), declared);
    let (spec, samples) = wav_samples(&body);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 16_000);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(samples.len(), FAKE_SAMPLES.len());
    assert_eq!(samples[1], (0.5 * i16::MAX as f32) as i16);

    assert_eq!(
        env.speech_calls(),
        vec![SpeechCall {
            model: env.manifest("default.onnx"),
            text: "Good morning".to_string(),
            speed: 1.25,
            voice: 2,
        }]
    );
    assert_eq!(env.temp_files(), 0);
}

#[actix_web::test]
async fn test_missing_input_uses_fallback_phrase() {
    let env = TestEnv::new();
    let app = test_app!(env);

    for body in ["{}", "", r#"{"input": "  "}"#] {
        let resp = test::call_service(&app, speech_post(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK, "body {:?}", body);
        test::read_body(resp).await;
    }

    let calls = env.speech_calls();
    assert_eq!(calls.len(), 3);
    for call in calls {
        assert_eq!(call.text, FALLBACK);
        assert_eq!(call.voice, 0);
        assert_eq!(call.speed, 1.0);
    }
    assert_eq!(env.temp_files(), 0);
}

#[actix_web::test]
async fn test_get_reads_input_from_query() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let req = test::TestRequest::get()
        .uri("/v1/audio/speech?input=Hi%20there&voice=3&model=voiceA")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    test::read_body(resp).await;

    let req = test::TestRequest::get().uri("/v1/audio/speech").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    test::read_body(resp).await;

    let calls = env.speech_calls();
    assert_eq!(calls[0].text, "Hi there");
    // Only `input` is read from the query string
    assert_eq!(calls[0].voice, 0);
    assert_eq!(calls[0].model, env.manifest("default.onnx"));
    assert_eq!(calls[1].text, FALLBACK);
}

#[actix_web::test]
async fn test_model_resolution() {
    let env = TestEnv::new();
    let app = test_app!(env);

    for model in ["voiceA", "nonexistent", "../manifests/voiceA"] {
        let body = format!(r#"{{"input": "x", "model": "{}"}}"#, model);
        let resp = test::call_service(&app, speech_post(&body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        test::read_body(resp).await;
    }

    let models: Vec<_> = env.speech_calls().into_iter().map(|c| c.model).collect();
    assert_eq!(
        models,
        vec![
            env.manifest("voiceA.onnx"),
            env.manifest("default.onnx"),
            env.manifest("default.onnx"),
        ]
    );
    // One engine per resolved key
    assert_eq!(env.build_count(), 2);
    assert_eq!(env.cache.len().await, 2);
}

#[actix_web::test]
async fn test_malformed_json_is_rejected() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let resp = test::call_service(&app, speech_post("{ nope").to_request()).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(env.speech_calls().is_empty());
    assert_eq!(env.build_count(), 0);
}

#[actix_web::test]
async fn test_missing_default_configuration() {
    let mut env = TestEnv::new();
    env.handler_config.default_model_config = env.manifest("missing.json");
    let app = test_app!(env);

    let resp = test::call_service(&app, speech_post("{}").to_request()).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(env.cache.is_empty().await);
}

#[actix_web::test]
async fn test_malformed_model_configuration() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let resp = test::call_service(&app, speech_post(r#"{"model": "garbled"}"#).to_request()).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(env.build_count(), 0);
    assert!(env.cache.is_empty().await);
}

#[actix_web::test]
async fn test_construction_failure_is_not_cached() {
    let env = TestEnv::new();
    let app = test_app!(env);

    for _ in 0..2 {
        let resp =
            test::call_service(&app, speech_post(r#"{"model": "broken"}"#).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // Every request retried the construction
    assert_eq!(env.build_count(), 2);
    assert!(env.cache.is_empty().await);
    assert_eq!(env.temp_files(), 0);
}

#[actix_web::test]
async fn test_generation_failure_leaves_no_file() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let resp = test::call_service(&app, speech_post(r#"{"input": "fail"}"#).to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let resp = test::call_service(&app, speech_post(r#"{"input": "x", "voice": 9}"#).to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(env.temp_files(), 0);
    // The engine stays cached after a failed generation
    assert_eq!(env.build_count(), 1);
}

#[actix_web::test]
async fn test_concurrent_requests_share_one_engine() {
    let env = TestEnv::new();
    let app = test_app!(env);

    let requests = (0..8).map(|i| {
        let body = format!(r#"{{"input": "line {}", "model": "voiceA"}}"#, i);
        test::call_service(&app, speech_post(&body).to_request())
    });
    let responses = join_all(requests).await;

    for resp in responses {
        assert_eq!(resp.status(), StatusCode::OK);
        test::read_body(resp).await;
    }
    assert_eq!(env.build_count(), 1);
    assert_eq!(env.speech_calls().len(), 8);
    assert_eq!(env.temp_files(), 0);
}
