// TARS voice output
// Synthesis backends, the TTS dispatcher and PCM playback

pub mod backend;
pub mod device;
pub mod dispatcher;
pub mod sink;
pub mod wav;

pub use backend::{
    update_tts_settings, AudioOutput, BackendConfig, ElevenLabsClient, SynthesisBackend,
    SynthesisRequest, TtsOption,
};
#[cfg(feature = "playback")]
pub use device::CpalOutput;
pub use device::{default_output, player_or_null, NullOutput, OutputDevice, OutputStream, PlayerProcessOutput, StreamFormat};
pub use dispatcher::{SpeakOutcome, TtsDispatcher};
pub use sink::{AudioChunk, AudioSink, ChunkStream, PcmBuffer, PlaybackParams};
