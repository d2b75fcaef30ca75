use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration: character files, TTS backend selection and playback tuning
#[derive(Clone, Debug, Default)]
pub struct TarsConfig {
    pub char: CharConfig,
    pub tts: TtsSettings,
    pub audio: PlaybackSettings,
}

/// Where the character card and persona traits live
#[derive(Clone, Debug)]
pub struct CharConfig {
    pub character_card_path: PathBuf,
    pub persona_path: PathBuf,
    /// Substituted for `{{user}}` in the greeting
    pub user_name: String,
}

/// Settings consumed by the TTS dispatcher.
///
/// `ttsoption` stays a plain string here so that unknown values survive loading
/// and are rejected at dispatch time instead of at startup.
#[derive(Clone, Debug)]
pub struct TtsSettings {
    pub ttsoption: String,
    /// Gates the character-voice-only backends (local, alltalk, piper, xttsv2)
    pub toggle_charvoice: bool,
    pub tts_voice: String,
    pub ttsurl: Option<String>,
    pub azure_api_key: Option<String>,
    pub azure_region: Option<String>,
    /// Overrides the regional Azure endpoint (private endpoints, tests)
    pub azure_endpoint: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_base_url: Option<String>,
    pub elevenlabs_output_format: String,
    pub voice_id: String,
    pub model_id: String,
    pub language: String,
    pub piper_bin: PathBuf,
    pub piper_model: Option<PathBuf>,
    pub silero_command: PathBuf,
    /// Device player used at the end of local pipelines (aplay|paplay)
    pub player: String,
    pub timeout_ms: u64,
}

/// Gain/normalization and stream format defaults for the audio sink
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSettings {
    /// Gain applied to streamed audio
    pub gain: f32,
    pub normalize: bool,
    /// Used when a stream carries no WAV header
    pub sample_rate: u32,
    pub channels: u16,
    /// Transport chunk size in bytes for streamed bodies
    pub chunk_size: usize,
    /// Gain applied to complete buffers (downloaded files, vendor audio)
    pub file_gain: f32,
}

impl Default for CharConfig {
    fn default() -> Self {
        Self {
            character_card_path: PathBuf::from("character/TARS.json"),
            persona_path: PathBuf::from("character/persona.ini"),
            user_name: std::env::var("TARS_USER_NAME").unwrap_or_else(|_| "User".to_string()),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            ttsoption: env_opt("TTS_OPTION").unwrap_or_else(|| "local".to_string()),
            toggle_charvoice: true,
            tts_voice: "TARS".to_string(),
            ttsurl: env_opt("TTS_URL"),
            azure_api_key: env_opt("AZURE_API_KEY"),
            azure_region: env_opt("AZURE_REGION"),
            azure_endpoint: None,
            elevenlabs_api_key: env_opt("ELEVENLABS_API_KEY"),
            elevenlabs_base_url: None,
            elevenlabs_output_format: "pcm_22050".to_string(),
            voice_id: "JBFqnCBsd6RMkjVDRZzb".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            language: "en".to_string(),
            piper_bin: env_opt("PIPER_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("piper")),
            piper_model: env_opt("PIPER_MODEL").map(PathBuf::from),
            silero_command: PathBuf::from("silero-tts"),
            player: "aplay".to_string(),
            timeout_ms: env_opt("TTS_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            gain: 5.0,
            normalize: false,
            sample_rate: 22_050,
            channels: 1,
            chunk_size: 1024,
            file_gain: 1.0,
        }
    }
}

impl TarsConfig {
    /// Load configuration from a TOML file (path via TARS_CONFIG or ./tars.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let path = std::env::var("TARS_CONFIG").unwrap_or_else(|_| "tars.toml".into());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit path. Never fails: problems are logged and defaults kept.
    pub fn load_from(path: &Path) -> Self {
        let default = Self::default();
        if !path.exists() {
            tracing::info!(target = "config", path = %path.display(), "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(path) {
            Ok(s) => match Self::from_toml_str(&s) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target = "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml_str(s: &str) -> std::result::Result<Self, toml::de::Error> {
        let t = toml::from_str::<TarsToml>(s)?;
        Ok(t.overlay(Self::default()))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TarsToml {
    pub char: Option<CharToml>,
    pub tts: Option<TtsToml>,
    pub audio: Option<AudioToml>,
}

impl TarsToml {
    fn overlay(self, mut base: TarsConfig) -> TarsConfig {
        if let Some(c) = self.char {
            c.apply(&mut base.char);
        }
        if let Some(t) = self.tts {
            t.apply(&mut base.tts);
        }
        if let Some(a) = self.audio {
            a.apply(&mut base.audio);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct CharToml {
    pub character_card_path: Option<PathBuf>,
    pub persona_path: Option<PathBuf>,
    pub user_name: Option<String>,
}
impl CharToml {
    fn apply(self, c: &mut CharConfig) {
        if let Some(x) = self.character_card_path {
            c.character_card_path = x;
        }
        if let Some(x) = self.persona_path {
            c.persona_path = x;
        }
        if let Some(x) = self.user_name {
            c.user_name = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TtsToml {
    pub ttsoption: Option<String>,
    pub toggle_charvoice: Option<bool>,
    pub tts_voice: Option<String>,
    pub ttsurl: Option<String>,
    pub azure_api_key: Option<String>,
    pub azure_region: Option<String>,
    pub azure_endpoint: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_base_url: Option<String>,
    pub elevenlabs_output_format: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    pub language: Option<String>,
    pub piper_bin: Option<PathBuf>,
    pub piper_model: Option<PathBuf>,
    pub silero_command: Option<PathBuf>,
    pub player: Option<String>,
    pub timeout_ms: Option<u64>,
}
impl TtsToml {
    fn apply(self, t: &mut TtsSettings) {
        if let Some(x) = self.ttsoption {
            t.ttsoption = x.trim().to_lowercase();
        }
        if let Some(x) = self.toggle_charvoice {
            t.toggle_charvoice = x;
        }
        if let Some(x) = self.tts_voice {
            t.tts_voice = x;
        }
        // Empty strings in the file mean "unset", same as a missing key
        if let Some(x) = self.ttsurl.filter(|s| !s.is_empty()) {
            t.ttsurl = Some(x);
        }
        if let Some(x) = self.azure_api_key.filter(|s| !s.is_empty()) {
            t.azure_api_key = Some(x);
        }
        if let Some(x) = self.azure_region.filter(|s| !s.is_empty()) {
            t.azure_region = Some(x);
        }
        if let Some(x) = self.azure_endpoint.filter(|s| !s.is_empty()) {
            t.azure_endpoint = Some(x);
        }
        if let Some(x) = self.elevenlabs_api_key.filter(|s| !s.is_empty()) {
            t.elevenlabs_api_key = Some(x);
        }
        if let Some(x) = self.elevenlabs_base_url.filter(|s| !s.is_empty()) {
            t.elevenlabs_base_url = Some(x);
        }
        if let Some(x) = self.elevenlabs_output_format {
            t.elevenlabs_output_format = x;
        }
        if let Some(x) = self.voice_id {
            t.voice_id = x;
        }
        if let Some(x) = self.model_id {
            t.model_id = x;
        }
        if let Some(x) = self.language {
            t.language = x;
        }
        if let Some(x) = self.piper_bin {
            t.piper_bin = x;
        }
        if let Some(x) = self.piper_model {
            t.piper_model = Some(x);
        }
        if let Some(x) = self.silero_command {
            t.silero_command = x;
        }
        if let Some(x) = self.player {
            t.player = x;
        }
        if let Some(x) = self.timeout_ms {
            t.timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct AudioToml {
    pub gain: Option<f32>,
    pub normalize: Option<bool>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub chunk_size: Option<usize>,
    pub file_gain: Option<f32>,
}
impl AudioToml {
    fn apply(self, a: &mut PlaybackSettings) {
        if let Some(x) = self.gain {
            a.gain = x.max(0.0);
        }
        if let Some(x) = self.normalize {
            a.normalize = x;
        }
        if let Some(x) = self.sample_rate {
            a.sample_rate = x;
        }
        if let Some(x) = self.channels {
            a.channels = x.max(1);
        }
        if let Some(x) = self.chunk_size {
            // Whole 16-bit samples only
            a.chunk_size = (x.max(2) / 2) * 2;
        }
        if let Some(x) = self.file_gain {
            a.file_gain = x.max(0.0);
        }
    }
}
