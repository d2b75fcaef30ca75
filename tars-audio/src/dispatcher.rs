//! TTS dispatcher: one `speak` call, one backend invocation, one playback session.
//!
//! Option handling, in order:
//! 1. `ttsoption` is parsed into [`TtsOption`]; an unknown value fails with a
//!    configuration error before any network call or process spawn.
//! 2. Character-voice backends (`local`, `alltalk`, `piper`, `xttsv2`) are
//!    skipped when `toggle_charvoice` is off. `azure`, `elevenlabs` and
//!    `silero` always speak.
//! 3. Empty text is skipped.
//! 4. Required settings are checked, the backend runs, and its output is routed
//!    to the sink unless the backend played it itself.
//!
//! Every failure below this point is logged and returned as
//! [`SpeakOutcome::Failed`]; `speak` itself never errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tars_core::utils::gen_id;
use tars_core::{PlaybackSettings, Result, TarsError, TtsSettings};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::backend::{
    AllTalkTts, AudioOutput, AzureTts, BackendConfig, ElevenLabsClient, ElevenLabsConfig,
    ElevenLabsTts, ProcessPipelineTts, SynthesisBackend, SynthesisRequest, TtsOption,
    XttsStreamTts,
};
use crate::device::StreamFormat;
use crate::sink::AudioSink;

/// Result of one `speak` call
#[derive(Debug)]
pub enum SpeakOutcome {
    Spoken,
    /// Nothing to say, or the selected voice is switched off
    Skipped,
    Failed(TarsError),
}

impl SpeakOutcome {
    pub fn is_spoken(&self) -> bool {
        matches!(self, SpeakOutcome::Spoken)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SpeakOutcome::Skipped)
    }

    pub fn error(&self) -> Option<&TarsError> {
        match self {
            SpeakOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

pub struct TtsDispatcher {
    http: Client,
    sink: AudioSink,
    playback: PlaybackSettings,
    vendor_client: OnceCell<Arc<ElevenLabsClient>>,
}

impl TtsDispatcher {
    pub fn new(sink: AudioSink, playback: PlaybackSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("tars-audio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TarsError::ConfigurationError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            sink,
            playback,
            vendor_client: OnceCell::new(),
        })
    }

    /// Use a vendor client built during setup instead of creating one on first use
    pub fn with_vendor_client(mut self, client: Arc<ElevenLabsClient>) -> Self {
        self.vendor_client = OnceCell::new_with(Some(client));
        self
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn sink(&self) -> &AudioSink {
        &self.sink
    }

    pub fn playback(&self) -> &PlaybackSettings {
        &self.playback
    }

    /// Speak `text` with the backend selected by `settings`.
    ///
    /// Calls are expected to be serialized by the caller; the dispatcher holds no
    /// lock across an utterance.
    pub async fn speak(&self, text: &str, settings: &TtsSettings) -> SpeakOutcome {
        let utterance = gen_id();
        let started = Instant::now();

        let option = match settings.ttsoption.parse::<TtsOption>() {
            Ok(option) => option,
            Err(e) => {
                error!(target = "tts", %utterance, option = %settings.ttsoption, kind = e.kind(), error = %e, "Invalid TTS option");
                return SpeakOutcome::Failed(e);
            }
        };

        if option.requires_character_voice() && !settings.toggle_charvoice {
            debug!(target = "tts", %utterance, %option, "Character voice disabled; skipping");
            return SpeakOutcome::Skipped;
        }

        let Some(request) = SynthesisRequest::new(text, settings.tts_voice.clone(), option) else {
            debug!(target = "tts", %utterance, %option, "Empty text; nothing to speak");
            return SpeakOutcome::Skipped;
        };

        match self.run(&request, settings).await {
            Ok(()) => {
                info!(
                    target = "tts",
                    %utterance,
                    %option,
                    chars = request.text().chars().count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Utterance spoken"
                );
                SpeakOutcome::Spoken
            }
            Err(e) => {
                error!(
                    target = "tts",
                    %utterance,
                    %option,
                    kind = e.kind(),
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Speech failed"
                );
                SpeakOutcome::Failed(e)
            }
        }
    }

    async fn run(&self, request: &SynthesisRequest, settings: &TtsSettings) -> Result<()> {
        let config = BackendConfig::resolve(request.option(), settings)?;
        let timeout = Duration::from_millis(settings.timeout_ms.max(1));
        let backend = self.backend(config, timeout).await?;
        debug!(target = "tts", backend = backend.name(), "Synthesizing");

        match backend.synthesize(request).await? {
            AudioOutput::Buffer(buffer) => {
                self.sink
                    .play_buffer(buffer, self.playback.file_gain, false, self.chunk_samples())
                    .await?;
            }
            AudioOutput::Stream(stream) => {
                self.sink
                    .play_stream(
                        stream,
                        self.playback.gain,
                        self.playback.normalize,
                        self.playback.chunk_size,
                        timeout,
                    )
                    .await?;
            }
            AudioOutput::SelfPlayed => {}
        }
        Ok(())
    }

    async fn backend(
        &self,
        config: BackendConfig,
        timeout: Duration,
    ) -> Result<Box<dyn SynthesisBackend>> {
        let backend: Box<dyn SynthesisBackend> = match config {
            BackendConfig::Azure(cfg) => Box::new(AzureTts::new(
                self.http.clone(),
                cfg,
                self.sink.clone(),
                self.playback.file_gain,
                self.chunk_samples(),
                timeout,
            )),
            BackendConfig::ElevenLabs(cfg) => {
                let client = self.vendor_client(&cfg).await?;
                Box::new(ElevenLabsTts::new(
                    client,
                    cfg,
                    self.sink.clone(),
                    self.playback.file_gain,
                    self.chunk_samples(),
                    timeout,
                ))
            }
            BackendConfig::XttsV2(cfg) => Box::new(XttsStreamTts::new(
                self.http.clone(),
                cfg,
                StreamFormat::new(self.playback.sample_rate, self.playback.channels),
                timeout,
            )),
            BackendConfig::AllTalk(cfg) => {
                Box::new(AllTalkTts::new(self.http.clone(), cfg, timeout))
            }
            local @ (BackendConfig::Local { .. }
            | BackendConfig::Piper(_)
            | BackendConfig::Silero(_)) => Box::new(ProcessPipelineTts::new(local, timeout)?),
        };
        Ok(backend)
    }

    /// The vendor client is built at most once, even under concurrent first use
    async fn vendor_client(&self, cfg: &ElevenLabsConfig) -> Result<Arc<ElevenLabsClient>> {
        let client = self
            .vendor_client
            .get_or_try_init(|| async {
                info!(target = "tts", backend = "elevenlabs", "Initializing vendor client");
                ElevenLabsClient::new(self.http.clone(), &cfg.api_key, cfg.base_url.as_deref())
                    .map(Arc::new)
            })
            .await?;
        if !client.uses_key(&cfg.api_key) {
            warn!(target = "tts", backend = "elevenlabs", "API key changed after initialization; keeping the original client");
        }
        Ok(Arc::clone(client))
    }

    fn chunk_samples(&self) -> usize {
        (self.playback.chunk_size / 2).max(1)
    }
}
