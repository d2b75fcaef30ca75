//! XTTSv2 streaming server.
//!
//! `GET {ttsurl}/tts_stream?text=..&speaker_wav=..&language=..` with
//! `accept: audio/x-wav`. The body is returned lazily and consumed by the sink
//! as it arrives; it cannot be restarted.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;
use tars_core::{Result, TarsError};
use tracing::{debug, error, info};

use super::{AudioOutput, RemoteServerConfig, SynthesisBackend, SynthesisRequest};
use crate::device::StreamFormat;
use crate::sink::ChunkStream;

pub struct XttsStreamTts {
    http: Client,
    cfg: RemoteServerConfig,
    /// Used when the server sends headerless PCM
    format: StreamFormat,
    timeout: Duration,
}

impl XttsStreamTts {
    pub fn new(http: Client, cfg: RemoteServerConfig, format: StreamFormat, timeout: Duration) -> Self {
        Self {
            http,
            cfg,
            format,
            timeout,
        }
    }
}

#[async_trait]
impl SynthesisBackend for XttsStreamTts {
    fn name(&self) -> &'static str {
        "xttsv2"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput> {
        let url = format!("{}/tts_stream", self.cfg.url);
        debug!(target = "tts", backend = "xttsv2", "GET {}", url);
        // The timeout covers the response head only; the body is bounded per chunk by the sink
        let resp = tokio::time::timeout(
            self.timeout,
            self.http
                .get(&url)
                .query(&[
                    ("text", request.text()),
                    ("speaker_wav", request.voice()),
                    ("language", self.cfg.language.as_str()),
                ])
                .header("accept", "audio/x-wav")
                .send(),
        )
        .await
        .map_err(|_| {
            TarsError::RemoteServiceError(format!(
                "XTTS request timed out after {}ms",
                self.timeout.as_millis()
            ))
        })?
        .map_err(|e| TarsError::RemoteServiceError(format!("XTTS request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TarsError::RemoteServiceError(format!(
                "XTTS error: status={} body={}",
                status, body
            )));
        }

        let body = resp
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| TarsError::RemoteServiceError(format!("XTTS stream failed: {e}")))
            })
            .boxed();
        Ok(AudioOutput::Stream(ChunkStream {
            body,
            format: self.format,
        }))
    }
}

/// Push generation settings to an XTTS server. Failures are logged and returned;
/// callers may continue with the server's current settings.
pub async fn update_tts_settings(http: &Client, ttsurl: &str, timeout: Duration) -> Result<()> {
    let url = format!("{}/set_tts_settings", ttsurl.trim_end_matches('/'));
    let payload = json!({
        "stream_chunk_size": 100,
        "temperature": 0.75,
        "speed": 1,
        "length_penalty": 1.0,
        "repetition_penalty": 5,
        "top_p": 0.85,
        "top_k": 50,
        "enable_text_splitting": true
    });
    let resp = http
        .post(&url)
        .header("Accept", "application/json")
        .timeout(timeout)
        .json(&payload)
        .send()
        .await;
    match resp {
        Ok(resp) if resp.status().is_success() => {
            info!(target = "tts", backend = "xttsv2", "TTS settings updated successfully");
            Ok(())
        }
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(target = "tts", backend = "xttsv2", %status, body = %body, "Failed to update TTS settings");
            Err(TarsError::RemoteServiceError(format!(
                "set_tts_settings returned {status}"
            )))
        }
        Err(e) => {
            error!(target = "tts", backend = "xttsv2", error = %e, "TTS settings update failed");
            Err(TarsError::RemoteServiceError(format!(
                "set_tts_settings failed: {e}"
            )))
        }
    }
}
