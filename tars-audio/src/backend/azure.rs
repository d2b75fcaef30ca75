//! Azure neural voices over the regional REST synthesis endpoint.
//!
//! The input text is wrapped in SSML with fixed prosody (rate +10%, pitch +5%).
//! Raw 24 kHz mono PCM is requested and played through the backend's own sink.
//! A non-success reply is a canceled synthesis: its reason and details go to the
//! error log and the call fails softly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tars_core::{Result, TarsError};
use tracing::{debug, error};

use super::{AudioOutput, AzureConfig, SynthesisBackend, SynthesisRequest};
use crate::device::StreamFormat;
use crate::sink::{AudioChunk, AudioSink, PcmBuffer};

const OUTPUT_FORMAT: &str = "raw-24khz-16bit-mono-pcm";
const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Result of one synthesis session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Completed(Vec<u8>),
    Canceled { reason: String, details: Option<String> },
}

pub struct AzureTts {
    http: Client,
    cfg: AzureConfig,
    sink: AudioSink,
    gain: f32,
    chunk_samples: usize,
    timeout: Duration,
}

impl AzureTts {
    pub fn new(
        http: Client,
        cfg: AzureConfig,
        sink: AudioSink,
        gain: f32,
        chunk_samples: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            cfg,
            sink,
            gain,
            chunk_samples,
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        match &self.cfg.endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                self.cfg.region
            ),
        }
    }

    /// Run one synthesis session and report whether it completed or was canceled.
    pub async fn speak_ssml(&self, ssml: String) -> Result<SynthesisOutcome> {
        let url = self.endpoint();
        debug!(target = "tts", backend = "azure", "POST {}", url);
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .header("Ocp-Apim-Subscription-Key", &self.cfg.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "tars-audio")
            .body(ssml)
            .send()
            .await
            .map_err(|e| TarsError::RemoteServiceError(format!("Azure request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let details = resp.text().await.ok().filter(|t| !t.trim().is_empty());
            return Ok(SynthesisOutcome::Canceled {
                reason: format!("Error ({status})"),
                details,
            });
        }
        let audio = resp
            .bytes()
            .await
            .map_err(|e| TarsError::RemoteServiceError(format!("Azure response read failed: {e}")))?;
        if audio.is_empty() {
            return Ok(SynthesisOutcome::Canceled {
                reason: "EmptyAudio".to_string(),
                details: None,
            });
        }
        Ok(SynthesisOutcome::Completed(audio.to_vec()))
    }
}

/// SSML document with the fixed character prosody
pub fn build_ssml(text: &str, voice: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='en-US'>\
<voice name='{}'><prosody rate=\"10%\" pitch=\"5%\" volume=\"default\">{}</prosody></voice></speak>",
        escape_xml(voice),
        escape_xml(text)
    )
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl SynthesisBackend for AzureTts {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput> {
        let ssml = build_ssml(request.text(), &self.cfg.voice);
        match self.speak_ssml(ssml).await? {
            SynthesisOutcome::Completed(audio) => {
                let buffer = PcmBuffer {
                    samples: AudioChunk::from_le_bytes(&audio).samples,
                    format: StreamFormat::new(OUTPUT_SAMPLE_RATE, 1),
                };
                self.sink
                    .play_buffer(buffer, self.gain, false, self.chunk_samples)
                    .await?;
                Ok(AudioOutput::SelfPlayed)
            }
            SynthesisOutcome::Canceled { reason, details } => {
                error!(target = "tts", backend = "azure", reason = %reason, "Speech synthesis canceled");
                if let Some(ref d) = details {
                    error!(target = "tts", backend = "azure", details = %d, "Cancellation details");
                }
                Err(TarsError::RemoteServiceError(format!(
                    "speech synthesis canceled: {reason}"
                )))
            }
        }
    }
}
