//! ElevenLabs voices through a long-lived vendor client.
//!
//! The client is built once with validated credentials and reused for the life
//! of the dispatcher. Raw PCM output formats (`pcm_<rate>`) are requested so the
//! audio can go straight to the sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::json;
use tars_core::{Result, TarsError};
use tracing::debug;

use super::{AudioOutput, ElevenLabsConfig, SynthesisBackend, SynthesisRequest};
use crate::device::StreamFormat;
use crate::sink::{AudioChunk, AudioSink, PcmBuffer};

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const XI_API_KEY_HEADER: &str = "xi-api-key";

/// Vendor client handle
#[derive(Clone)]
pub struct ElevenLabsClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ElevenLabsClient {
    pub fn new(http: Client, api_key: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(TarsError::ConfigurationError(
                "ElevenLabs API key must be provided for initialization".into(),
            ));
        }
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// True when this handle was built with `api_key`
    pub fn uses_key(&self, api_key: &str) -> bool {
        self.api_key == api_key.trim()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /v1/text-to-speech/{voice_id}` returning the encoded audio bytes
    pub async fn convert(
        &self,
        text: &str,
        voice_id: &str,
        model_id: &str,
        output_format: &str,
        timeout: Duration,
    ) -> Result<Bytes> {
        let url = format!("{}/v1/text-to-speech/{}", self.base_url, voice_id);
        debug!(target = "tts", backend = "elevenlabs", voice_id, "POST {}", url);
        let resp = self
            .http
            .post(&url)
            .timeout(timeout)
            .query(&[("output_format", output_format)])
            .header(XI_API_KEY_HEADER, &self.api_key)
            .json(&json!({ "text": text, "model_id": model_id }))
            .send()
            .await
            .map_err(|e| TarsError::RemoteServiceError(format!("ElevenLabs request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TarsError::RemoteServiceError(format!(
                "ElevenLabs error: status={} body={}",
                status, body
            )));
        }
        let audio = resp.bytes().await.map_err(|e| {
            TarsError::RemoteServiceError(format!("ElevenLabs response read failed: {e}"))
        })?;
        if audio.is_empty() {
            return Err(TarsError::RemoteServiceError("empty response body".into()));
        }
        Ok(audio)
    }
}

/// Sample rate of a raw `pcm_<rate>` output format
pub fn pcm_sample_rate(output_format: &str) -> Option<u32> {
    output_format
        .strip_prefix("pcm_")
        .and_then(|rate| rate.parse::<u32>().ok())
}

pub struct ElevenLabsTts {
    client: Arc<ElevenLabsClient>,
    cfg: ElevenLabsConfig,
    sink: AudioSink,
    gain: f32,
    chunk_samples: usize,
    timeout: Duration,
}

impl ElevenLabsTts {
    pub fn new(
        client: Arc<ElevenLabsClient>,
        cfg: ElevenLabsConfig,
        sink: AudioSink,
        gain: f32,
        chunk_samples: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            cfg,
            sink,
            gain,
            chunk_samples,
            timeout,
        }
    }
}

#[async_trait]
impl SynthesisBackend for ElevenLabsTts {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput> {
        let rate = pcm_sample_rate(&self.cfg.output_format).ok_or_else(|| {
            TarsError::ConfigurationError(format!(
                "unsupported ElevenLabs output format '{}'; use pcm_<rate>",
                self.cfg.output_format
            ))
        })?;
        let audio = self
            .client
            .convert(
                request.text(),
                &self.cfg.voice_id,
                &self.cfg.model_id,
                &self.cfg.output_format,
                self.timeout,
            )
            .await?;
        let buffer = PcmBuffer {
            samples: AudioChunk::from_le_bytes(&audio).samples,
            format: StreamFormat::new(rate, 1),
        };
        self.sink
            .play_buffer(buffer, self.gain, false, self.chunk_samples)
            .await?;
        Ok(AudioOutput::SelfPlayed)
    }
}
