mod common;

use std::sync::Arc;

use common::{pcm_bytes, tone, wav_bytes, RecordingDevice};
use serde_json::json;
use tars_audio::{AudioSink, SpeakOutcome, StreamFormat, TtsDispatcher};
use tars_core::{PlaybackSettings, TarsError, TtsSettings};
use wiremock::matchers::{any, body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(device: &RecordingDevice) -> TtsDispatcher {
    let playback = PlaybackSettings {
        gain: 1.0,
        file_gain: 1.0,
        normalize: false,
        ..PlaybackSettings::default()
    };
    TtsDispatcher::new(AudioSink::new(Arc::new(device.clone())), playback).unwrap()
}

fn settings(option: &str, toggle: bool) -> TtsSettings {
    TtsSettings {
        ttsoption: option.to_string(),
        toggle_charvoice: toggle,
        tts_voice: "TARS".to_string(),
        ttsurl: None,
        azure_api_key: None,
        azure_region: None,
        azure_endpoint: None,
        elevenlabs_api_key: None,
        elevenlabs_base_url: None,
        voice_id: "JBFqnCBsd6RMkjVDRZzb".to_string(),
        model_id: "eleven_multilingual_v2".to_string(),
        elevenlabs_output_format: "pcm_22050".to_string(),
        language: "en".to_string(),
        piper_model: None,
        timeout_ms: 5_000,
        ..TtsSettings::default()
    }
}

#[tokio::test]
async fn gated_options_are_silent_without_character_voice() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let d = dispatcher(&device);
    for option in ["local", "alltalk", "piper", "xttsv2"] {
        let mut s = settings(option, false);
        s.ttsurl = Some(server.uri());
        let outcome = d.speak("Hello there", &s).await;
        assert!(outcome.is_skipped(), "{option}: {outcome:?}");
    }
    assert_eq!(device.opened(), 0);
}

#[tokio::test]
async fn unknown_option_never_reaches_a_backend() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let d = dispatcher(&device);
    for option in ["festival", "", "xtts", "azure-tts"] {
        let mut s = settings(option, true);
        s.ttsurl = Some(server.uri());
        match d.speak("Hello", &s).await {
            SpeakOutcome::Failed(TarsError::ConfigurationError(msg)) => {
                assert!(msg.contains("Invalid TTS option"), "{msg}")
            }
            other => panic!("{option}: expected configuration error, got {other:?}"),
        }
    }
    assert_eq!(device.opened(), 0);
}

#[tokio::test]
async fn azure_speaks_even_when_character_voice_is_off() {
    let server = MockServer::start().await;
    let audio = tone(2400);
    Mock::given(method("POST"))
        .and(path("/cognitiveservices/v1"))
        .and(header("Ocp-Apim-Subscription-Key", "azure-key"))
        .and(header("Content-Type", "application/ssml+xml"))
        .and(header("X-Microsoft-OutputFormat", "raw-24khz-16bit-mono-pcm"))
        .and(body_string_contains(
            "<prosody rate=\"10%\" pitch=\"5%\" volume=\"default\">Hello there</prosody>",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm_bytes(&audio)))
        .expect(1)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("azure", false);
    s.azure_api_key = Some("azure-key".into());
    s.azure_endpoint = Some(format!("{}/cognitiveservices/v1", server.uri()));

    let outcome = dispatcher(&device).speak("Hello there", &s).await;
    assert!(outcome.is_spoken(), "{outcome:?}");
    assert_eq!(device.formats(), vec![StreamFormat::new(24_000, 1)]);
    assert_eq!(device.samples(), audio);
}

#[tokio::test]
async fn azure_rejection_is_a_soft_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid subscription key"))
        .expect(1)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("azure", true);
    s.azure_api_key = Some("wrong".into());
    s.azure_endpoint = Some(server.uri());

    let outcome = dispatcher(&device).speak("Hello", &s).await;
    assert!(matches!(
        outcome,
        SpeakOutcome::Failed(TarsError::RemoteServiceError(_))
    ));
    assert_eq!(device.opened(), 0);
}

#[tokio::test]
async fn azure_without_credentials_is_a_configuration_error() {
    let device = RecordingDevice::default();
    let outcome = dispatcher(&device).speak("Hello", &settings("azure", true)).await;
    assert!(matches!(
        outcome,
        SpeakOutcome::Failed(TarsError::ConfigurationError(_))
    ));
}

#[tokio::test]
async fn vendor_client_is_reused_across_calls() {
    let server = MockServer::start().await;
    let audio = tone(1000);
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/JBFqnCBsd6RMkjVDRZzb"))
        .and(query_param("output_format", "pcm_22050"))
        .and(header("xi-api-key", "el-key"))
        .and(body_json(json!({
            "text": "Hello",
            "model_id": "eleven_multilingual_v2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm_bytes(&audio)))
        .expect(2)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let d = dispatcher(&device);
    // Always-on: the toggle does not gate it, and the alias selects the same backend
    for option in ["elevenlabs", "vendor-client"] {
        let mut s = settings(option, false);
        s.elevenlabs_api_key = Some("el-key".into());
        s.elevenlabs_base_url = Some(server.uri());
        let outcome = d.speak("Hello", &s).await;
        assert!(outcome.is_spoken(), "{option}: {outcome:?}");
    }
    assert_eq!(device.opened(), 2);
    assert_eq!(device.formats()[0], StreamFormat::new(22_050, 1));
}

#[tokio::test]
async fn elevenlabs_without_key_is_a_configuration_error() {
    let device = RecordingDevice::default();
    let outcome = dispatcher(&device)
        .speak("Hello", &settings("elevenlabs", true))
        .await;
    assert!(matches!(
        outcome,
        SpeakOutcome::Failed(TarsError::ConfigurationError(_))
    ));
}

#[tokio::test]
async fn elevenlabs_encoded_output_format_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("elevenlabs", true);
    s.elevenlabs_api_key = Some("el-key".into());
    s.elevenlabs_base_url = Some(server.uri());
    s.elevenlabs_output_format = "mp3_44100_128".into();
    let outcome = dispatcher(&device).speak("Hello", &s).await;
    assert!(matches!(
        outcome,
        SpeakOutcome::Failed(TarsError::ConfigurationError(_))
    ));
    assert_eq!(device.opened(), 0);
}

#[tokio::test]
async fn silero_runs_even_when_character_voice_is_off() {
    let device = RecordingDevice::default();
    let mut s = settings("silero", false);
    s.silero_command = "/nonexistent/silero-tts".into();
    let outcome = dispatcher(&device).speak("Hello", &s).await;
    // Attempted, and the missing binary surfaces as a local execution failure
    assert!(matches!(
        outcome,
        SpeakOutcome::Failed(TarsError::LocalExecutionError(_))
    ));
}

#[tokio::test]
async fn xtts_without_url_is_a_configuration_error() {
    let device = RecordingDevice::default();
    let outcome = dispatcher(&device).speak("Hello", &settings("xttsv2", true)).await;
    match outcome {
        SpeakOutcome::Failed(TarsError::ConfigurationError(msg)) => assert!(msg.contains("ttsurl")),
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[tokio::test]
async fn xtts_stream_is_played_as_it_arrives() {
    let server = MockServer::start().await;
    let audio = tone(3000);
    Mock::given(method("GET"))
        .and(path("/tts_stream"))
        .and(query_param("text", "Hello there"))
        .and(query_param("speaker_wav", "TARS"))
        .and(query_param("language", "en"))
        .and(header("accept", "audio/x-wav"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/x-wav")
                .set_body_bytes(wav_bytes(&audio, 24_000, 1)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("xttsv2", true);
    s.ttsurl = Some(format!("{}/", server.uri()));

    let outcome = dispatcher(&device).speak("  Hello there ", &s).await;
    assert!(outcome.is_spoken(), "{outcome:?}");
    // Format comes from the WAV header, not the configured fallback
    assert_eq!(device.formats(), vec![StreamFormat::new(24_000, 1)]);
    assert_eq!(device.samples(), audio);
    assert!(device.writes().iter().all(|w| w.len() <= 512));
    assert_eq!(device.closed(), 1);
}

#[tokio::test]
async fn xtts_server_error_is_a_remote_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tts_stream"))
        .respond_with(ResponseTemplate::new(500).set_body_string("speaker not found"))
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("xttsv2", true);
    s.ttsurl = Some(server.uri());
    let outcome = dispatcher(&device).speak("Hello", &s).await;
    assert!(matches!(
        outcome,
        SpeakOutcome::Failed(TarsError::RemoteServiceError(_))
    ));
    assert_eq!(device.opened(), 0);
}

#[tokio::test]
async fn xtts_empty_body_is_a_remote_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tts_stream"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("xttsv2", true);
    s.ttsurl = Some(server.uri());
    let outcome = dispatcher(&device).speak("Hello", &s).await;
    match outcome {
        SpeakOutcome::Failed(TarsError::RemoteServiceError(msg)) => {
            assert!(msg.contains("empty response body"))
        }
        other => panic!("expected remote failure, got {other:?}"),
    }
}

#[tokio::test]
async fn alltalk_without_file_reference_does_not_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tts-generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "generate-success" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("alltalk", true);
    s.ttsurl = Some(server.uri());
    match dispatcher(&device).speak("Hello", &s).await {
        SpeakOutcome::Failed(TarsError::RemoteServiceError(msg)) => {
            assert!(msg.contains("No WAV file URL"), "{msg}")
        }
        other => panic!("expected remote failure, got {other:?}"),
    }
    assert_eq!(device.opened(), 0);
}

#[tokio::test]
async fn alltalk_generates_then_plays_the_file() {
    let server = MockServer::start().await;
    let audio = tone(1500);
    Mock::given(method("POST"))
        .and(path("/api/tts-generate"))
        .and(body_string_contains("text_input=Hello+there"))
        .and(body_string_contains("character_voice_gen=TARS.wav"))
        .and(body_string_contains("narrator_voice_gen=default.wav"))
        .and(body_string_contains("output_file_name=test_output"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "generate-success",
            "output_file_url": "/audio/test_output_1.wav"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/audio/test_output_1.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(wav_bytes(&audio, 22_050, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("alltalk", true);
    s.ttsurl = Some(server.uri());
    let outcome = dispatcher(&device).speak("Hello there", &s).await;
    assert!(outcome.is_spoken(), "{outcome:?}");
    assert_eq!(device.formats(), vec![StreamFormat::new(22_050, 1)]);
    assert_eq!(device.samples(), audio);
}

#[tokio::test]
async fn empty_text_is_skipped_without_network() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let device = RecordingDevice::default();
    let mut s = settings("xttsv2", true);
    s.ttsurl = Some(server.uri());
    let outcome = dispatcher(&device).speak(" \n\t ", &s).await;
    assert!(outcome.is_skipped());
}
