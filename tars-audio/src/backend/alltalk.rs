//! AllTalk server: submit a generation job, then fetch the resulting WAV file.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tars_core::{Result, TarsError};
use tracing::debug;

use super::{AudioOutput, RemoteServerConfig, SynthesisBackend, SynthesisRequest};
use crate::wav::decode_wav;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    output_file_url: Option<String>,
}

pub struct AllTalkTts {
    http: Client,
    cfg: RemoteServerConfig,
    timeout: Duration,
}

impl AllTalkTts {
    pub fn new(http: Client, cfg: RemoteServerConfig, timeout: Duration) -> Self {
        Self { http, cfg, timeout }
    }

    /// Submit the job and return the absolute URL of the generated file
    async fn generate(&self, request: &SynthesisRequest) -> Result<String> {
        let url = format!("{}/api/tts-generate", self.cfg.url);
        let voice = format!("{}.wav", request.voice());
        let form = [
            ("text_input", request.text()),
            ("text_filtering", "standard"),
            ("character_voice_gen", voice.as_str()),
            ("narrator_enabled", "false"),
            ("narrator_voice_gen", "default.wav"),
            ("text_not_inside", "character"),
            ("language", self.cfg.language.as_str()),
            ("output_file_name", "test_output"),
            ("output_file_timestamp", "true"),
            ("autoplay", "false"),
            ("autoplay_volume", "0.8"),
        ];
        debug!(target = "tts", backend = "alltalk", "POST {}", url);
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| TarsError::RemoteServiceError(format!("AllTalk request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TarsError::RemoteServiceError(format!(
                "AllTalk generate error: status={status}"
            )));
        }
        let body: GenerateResponse = resp.json().await.map_err(|e| {
            TarsError::RemoteServiceError(format!("Failed to parse AllTalk response: {e}"))
        })?;
        let file_url = body
            .output_file_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                TarsError::RemoteServiceError("No WAV file URL provided (output_file_url)".into())
            })?;
        Ok(self.resolve_url(&file_url))
    }

    /// Relative references are resolved against the server base URL
    fn resolve_url(&self, file_url: &str) -> String {
        if file_url.starts_with("http://") || file_url.starts_with("https://") {
            file_url.to_string()
        } else {
            format!("{}/{}", self.cfg.url, file_url.trim_start_matches('/'))
        }
    }

    async fn fetch(&self, file_url: &str) -> Result<Vec<u8>> {
        debug!(target = "tts", backend = "alltalk", "GET {}", file_url);
        let resp = self
            .http
            .get(file_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TarsError::RemoteServiceError(format!("AllTalk download failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TarsError::RemoteServiceError(format!(
                "AllTalk download error: status={status}"
            )));
        }
        let bytes = resp.bytes().await.map_err(|e| {
            TarsError::RemoteServiceError(format!("AllTalk download read failed: {e}"))
        })?;
        if bytes.is_empty() {
            return Err(TarsError::RemoteServiceError("empty response body".into()));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SynthesisBackend for AllTalkTts {
    fn name(&self) -> &'static str {
        "alltalk"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput> {
        let file_url = self.generate(request).await?;
        let wav = self.fetch(&file_url).await?;
        Ok(AudioOutput::Buffer(decode_wav(&wav)?))
    }
}
