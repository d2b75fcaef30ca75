//! Synthesis backends.
//!
//! Every backend turns a [`SynthesisRequest`] into an [`AudioOutput`]: a complete
//! PCM buffer, a lazy chunk stream, or `SelfPlayed` when the backend drives the
//! output device itself.
//!
//! | option       | backend                   | transport                         | output      |
//! |--------------|---------------------------|-----------------------------------|-------------|
//! | `azure`      | [`AzureTts`]              | REST + SSML                       | self-played |
//! | `elevenlabs` | [`ElevenLabsTts`]         | long-lived vendor client          | self-played |
//! | `xttsv2`     | [`XttsStreamTts`]         | HTTP GET, chunked body            | stream      |
//! | `alltalk`    | [`AllTalkTts`]            | HTTP POST job, then GET file      | buffer      |
//! | `local`      | [`ProcessPipelineTts`]    | espeak-ng → sox → player          | self-played |
//! | `piper`      | [`ProcessPipelineTts`]    | piper → player                    | self-played |
//! | `silero`     | [`ProcessPipelineTts`]    | silero command → player           | self-played |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use tars_core::{Result, TarsError, TtsSettings};

use crate::sink::{ChunkStream, PcmBuffer};

pub mod alltalk;
pub mod azure;
pub mod elevenlabs;
pub mod pipeline;
pub mod xtts;

pub use alltalk::AllTalkTts;
pub use azure::{AzureTts, SynthesisOutcome};
pub use elevenlabs::{ElevenLabsClient, ElevenLabsTts};
pub use pipeline::{PipelineStage, ProcessPipelineTts};
pub use xtts::{update_tts_settings, XttsStreamTts};

/// The closed set of backend kinds selectable through `ttsoption`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TtsOption {
    Azure,
    ElevenLabs,
    Local,
    AllTalk,
    Piper,
    Silero,
    XttsV2,
}

impl TtsOption {
    pub const ALL: [TtsOption; 7] = [
        TtsOption::Azure,
        TtsOption::ElevenLabs,
        TtsOption::Local,
        TtsOption::AllTalk,
        TtsOption::Piper,
        TtsOption::Silero,
        TtsOption::XttsV2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TtsOption::Azure => "azure",
            TtsOption::ElevenLabs => "elevenlabs",
            TtsOption::Local => "local",
            TtsOption::AllTalk => "alltalk",
            TtsOption::Piper => "piper",
            TtsOption::Silero => "silero",
            TtsOption::XttsV2 => "xttsv2",
        }
    }

    /// Character-voice-only backends stay silent when `toggle_charvoice` is off.
    /// Azure, ElevenLabs and Silero always speak.
    pub fn requires_character_voice(&self) -> bool {
        matches!(
            self,
            TtsOption::Local | TtsOption::AllTalk | TtsOption::Piper | TtsOption::XttsV2
        )
    }
}

impl fmt::Display for TtsOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TtsOption {
    type Err = TarsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "azure" => Ok(TtsOption::Azure),
            "elevenlabs" | "vendor-client" => Ok(TtsOption::ElevenLabs),
            "local" => Ok(TtsOption::Local),
            "alltalk" => Ok(TtsOption::AllTalk),
            "piper" => Ok(TtsOption::Piper),
            "silero" => Ok(TtsOption::Silero),
            "xttsv2" => Ok(TtsOption::XttsV2),
            other => Err(TarsError::ConfigurationError(format!(
                "Invalid TTS option: '{other}'"
            ))),
        }
    }
}

/// One utterance: created per call, consumed by exactly one backend invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisRequest {
    text: String,
    voice: String,
    option: TtsOption,
}

impl SynthesisRequest {
    /// Returns `None` when the text is empty after trimming
    pub fn new(text: &str, voice: impl Into<String>, option: TtsOption) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            voice: voice.into(),
            option,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn option(&self) -> TtsOption {
        self.option
    }
}

pub enum AudioOutput {
    Buffer(PcmBuffer),
    Stream(ChunkStream),
    /// The backend has already played the audio
    SelfPlayed,
}

impl fmt::Debug for AudioOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioOutput::Buffer(b) => f
                .debug_struct("Buffer")
                .field("samples", &b.samples.len())
                .field("format", &b.format)
                .finish(),
            AudioOutput::Stream(s) => f.debug_struct("Stream").field("format", &s.format).finish(),
            AudioOutput::SelfPlayed => f.write_str("SelfPlayed"),
        }
    }
}

#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureConfig {
    pub api_key: String,
    pub region: String,
    pub voice: String,
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub base_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteServerConfig {
    pub url: String,
    pub voice: String,
    pub language: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PiperConfig {
    pub bin: PathBuf,
    pub model: PathBuf,
    pub player: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SileroConfig {
    pub command: PathBuf,
    pub player: String,
}

/// Validated per-backend configuration, each variant carrying only what it needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    Azure(AzureConfig),
    ElevenLabs(ElevenLabsConfig),
    Local { player: String },
    AllTalk(RemoteServerConfig),
    Piper(PiperConfig),
    Silero(SileroConfig),
    XttsV2(RemoteServerConfig),
}

fn required(value: &Option<String>, key: &str, option: TtsOption) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            TarsError::ConfigurationError(format!("'{key}' must be provided for '{option}'"))
        })
}

impl BackendConfig {
    pub fn resolve(option: TtsOption, settings: &TtsSettings) -> Result<Self> {
        let remote = |option| -> Result<RemoteServerConfig> {
            Ok(RemoteServerConfig {
                url: required(&settings.ttsurl, "ttsurl", option)?
                    .trim_end_matches('/')
                    .to_string(),
                voice: settings.tts_voice.clone(),
                language: settings.language.clone(),
            })
        };

        Ok(match option {
            TtsOption::Azure => BackendConfig::Azure(AzureConfig {
                api_key: required(&settings.azure_api_key, "azure_api_key", option)?,
                region: match &settings.azure_endpoint {
                    // A custom endpoint makes the region optional
                    Some(_) => settings.azure_region.clone().unwrap_or_default(),
                    None => required(&settings.azure_region, "azure_region", option)?,
                },
                voice: settings.tts_voice.clone(),
                endpoint: settings.azure_endpoint.clone(),
            }),
            TtsOption::ElevenLabs => {
                let api_key = required(&settings.elevenlabs_api_key, "elevenlabs_api_key", option)?;
                // Playback needs raw PCM with a known rate
                if elevenlabs::pcm_sample_rate(&settings.elevenlabs_output_format).is_none() {
                    return Err(TarsError::ConfigurationError(format!(
                        "unsupported ElevenLabs output format '{}'; use pcm_<rate>",
                        settings.elevenlabs_output_format
                    )));
                }
                BackendConfig::ElevenLabs(ElevenLabsConfig {
                    api_key,
                    voice_id: settings.voice_id.clone(),
                    model_id: settings.model_id.clone(),
                    output_format: settings.elevenlabs_output_format.clone(),
                    base_url: settings.elevenlabs_base_url.clone(),
                })
            }
            TtsOption::Local => BackendConfig::Local {
                player: settings.player.clone(),
            },
            TtsOption::AllTalk => BackendConfig::AllTalk(remote(option)?),
            TtsOption::XttsV2 => BackendConfig::XttsV2(remote(option)?),
            TtsOption::Piper => BackendConfig::Piper(PiperConfig {
                bin: settings.piper_bin.clone(),
                model: settings.piper_model.clone().ok_or_else(|| {
                    TarsError::ConfigurationError("'piper_model' must be provided for 'piper'".into())
                })?,
                player: settings.player.clone(),
            }),
            TtsOption::Silero => BackendConfig::Silero(SileroConfig {
                command: settings.silero_command.clone(),
                player: settings.player.clone(),
            }),
        })
    }

    pub fn option(&self) -> TtsOption {
        match self {
            BackendConfig::Azure(_) => TtsOption::Azure,
            BackendConfig::ElevenLabs(_) => TtsOption::ElevenLabs,
            BackendConfig::Local { .. } => TtsOption::Local,
            BackendConfig::AllTalk(_) => TtsOption::AllTalk,
            BackendConfig::Piper(_) => TtsOption::Piper,
            BackendConfig::Silero(_) => TtsOption::Silero,
            BackendConfig::XttsV2(_) => TtsOption::XttsV2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TtsSettings {
        TtsSettings {
            ttsurl: None,
            azure_api_key: None,
            azure_region: None,
            azure_endpoint: None,
            elevenlabs_api_key: None,
            piper_model: None,
            ..TtsSettings::default()
        }
    }

    #[test]
    fn parses_known_options() {
        for option in TtsOption::ALL {
            assert_eq!(option.as_str().parse::<TtsOption>().unwrap(), option);
        }
        assert_eq!(" XTTSv2 ".parse::<TtsOption>().unwrap(), TtsOption::XttsV2);
        assert_eq!(
            "vendor-client".parse::<TtsOption>().unwrap(),
            TtsOption::ElevenLabs
        );
    }

    #[test]
    fn unknown_option_is_a_configuration_error() {
        for bad in ["", "festival", "azure2", "silero silero"] {
            assert!(matches!(
                bad.parse::<TtsOption>(),
                Err(TarsError::ConfigurationError(_))
            ));
        }
    }

    #[test]
    fn toggle_gates_only_character_voices() {
        let gated: Vec<_> = TtsOption::ALL
            .into_iter()
            .filter(|o| o.requires_character_voice())
            .collect();
        assert_eq!(
            gated,
            vec![
                TtsOption::Local,
                TtsOption::AllTalk,
                TtsOption::Piper,
                TtsOption::XttsV2
            ]
        );
    }

    #[test]
    fn empty_text_is_not_a_request() {
        assert!(SynthesisRequest::new("   \n", "v", TtsOption::Local).is_none());
        let req = SynthesisRequest::new("  hello ", "v", TtsOption::Local).unwrap();
        assert_eq!(req.text(), "hello");
    }

    #[test]
    fn xtts_requires_url() {
        let err = BackendConfig::resolve(TtsOption::XttsV2, &settings()).unwrap_err();
        assert!(err.to_string().contains("ttsurl"));

        let mut s = settings();
        s.ttsurl = Some("http://localhost:8020/".into());
        s.tts_voice = "TARS2".into();
        match BackendConfig::resolve(TtsOption::XttsV2, &s).unwrap() {
            BackendConfig::XttsV2(cfg) => {
                assert_eq!(cfg.url, "http://localhost:8020");
                assert_eq!(cfg.voice, "TARS2");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn azure_requires_key_and_region() {
        let mut s = settings();
        s.azure_api_key = Some("key".into());
        assert!(BackendConfig::resolve(TtsOption::Azure, &s).is_err());
        s.azure_region = Some("eastus".into());
        assert!(BackendConfig::resolve(TtsOption::Azure, &s).is_ok());
    }

    #[test]
    fn elevenlabs_requires_key() {
        let mut s = settings();
        assert!(matches!(
            BackendConfig::resolve(TtsOption::ElevenLabs, &s),
            Err(TarsError::ConfigurationError(_))
        ));
        s.elevenlabs_api_key = Some("   ".into());
        assert!(BackendConfig::resolve(TtsOption::ElevenLabs, &s).is_err());
    }

    #[test]
    fn elevenlabs_output_format_must_be_raw_pcm() {
        let mut s = settings();
        s.elevenlabs_api_key = Some("key".into());
        assert!(BackendConfig::resolve(TtsOption::ElevenLabs, &s).is_ok());

        s.elevenlabs_output_format = "mp3_44100_128".into();
        let err = BackendConfig::resolve(TtsOption::ElevenLabs, &s).unwrap_err();
        assert!(matches!(err, TarsError::ConfigurationError(_)));
        assert!(err.to_string().contains("mp3_44100_128"));
    }

    #[test]
    fn piper_requires_model() {
        let mut s = settings();
        assert!(BackendConfig::resolve(TtsOption::Piper, &s).is_err());
        s.piper_model = Some(PathBuf::from("en_US-ryan.onnx"));
        assert_eq!(
            BackendConfig::resolve(TtsOption::Piper, &s).unwrap().option(),
            TtsOption::Piper
        );
    }
}
