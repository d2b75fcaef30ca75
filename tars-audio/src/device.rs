//! Audio output devices.
//!
//! An [`OutputDevice`] opens one [`OutputStream`] per playback session. Streams
//! release the device when dropped, so a session is closed on every exit path.
//!
//! - `CpalOutput` (feature `playback`): the system default output via cpal
//! - [`PlayerProcessOutput`]: pipes raw PCM into `aplay` or `paplay`
//! - [`NullOutput`]: discards audio, for headless runs
//!
//! Linux build note for the `playback` feature: cpal needs ALSA headers
//! (`sudo apt-get install -y libasound2-dev pkg-config`).

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;

use tars_core::{Result, TarsError};
use tracing::{debug, info, warn};

#[cfg(feature = "playback")]
mod cpal_output;

#[cfg(feature = "playback")]
pub use cpal_output::CpalOutput;

/// Sample rate and channel layout of one playback session (always 16-bit signed PCM)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

pub trait OutputDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Open a playback session. The returned stream closes the session on drop.
    fn open(&self, format: StreamFormat) -> Result<Box<dyn OutputStream>>;
}

pub trait OutputStream {
    /// Write interleaved samples, blocking while the device buffer is full.
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Block until everything written so far has been played.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards all audio
#[derive(Clone, Debug, Default)]
pub struct NullOutput;

impl OutputDevice for NullOutput {
    fn name(&self) -> &str {
        "null"
    }

    fn open(&self, format: StreamFormat) -> Result<Box<dyn OutputStream>> {
        info!(target = "audio", rate = format.sample_rate, channels = format.channels, "No audio output; discarding samples");
        Ok(Box::new(NullStream { samples: 0 }))
    }
}

struct NullStream {
    samples: usize,
}

impl OutputStream for NullStream {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        self.samples += samples.len();
        Ok(())
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        debug!(target = "audio", samples = self.samples, "Null stream closed");
    }
}

/// Plays raw PCM through an external player binary reading from stdin
#[derive(Clone, Debug)]
pub struct PlayerProcessOutput {
    bin: PathBuf,
}

impl PlayerProcessOutput {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }

    /// First of `aplay`, `paplay` found on PATH
    pub fn detect() -> Option<Self> {
        get_from_path("aplay")
            .or_else(|| get_from_path("paplay"))
            .map(Self::new)
    }

    fn player_name(&self) -> &str {
        self.bin
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
    }
}

impl OutputDevice for PlayerProcessOutput {
    fn name(&self) -> &str {
        self.player_name()
    }

    fn open(&self, format: StreamFormat) -> Result<Box<dyn OutputStream>> {
        let mut cmd = Command::new(&self.bin);
        match self.player_name() {
            "paplay" => {
                cmd.arg("--raw")
                    .arg("--format=s16le")
                    .arg(format!("--rate={}", format.sample_rate))
                    .arg(format!("--channels={}", format.channels));
            }
            _ => {
                cmd.arg("-q")
                    .arg("-t")
                    .arg("raw")
                    .arg("-f")
                    .arg("S16_LE")
                    .arg("-r")
                    .arg(format.sample_rate.to_string())
                    .arg("-c")
                    .arg(format.channels.to_string())
                    .arg("-");
            }
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        debug!(target = "audio", command = ?cmd, "Starting player");
        let mut child = cmd.spawn().map_err(|e| {
            TarsError::PlaybackError(format!("failed to start {}: {e}", self.bin.display()))
        })?;
        let stdin = child.stdin.take();
        Ok(Box::new(PlayerStream { child, stdin }))
    }
}

struct PlayerStream {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl OutputStream for PlayerStream {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TarsError::PlaybackError("player input already closed".into()))?;
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        stdin
            .write_all(&bytes)
            .map_err(|e| TarsError::PlaybackError(format!("player write failed: {e}")))
    }

    fn drain(&mut self) -> Result<()> {
        // Closing stdin lets the player finish what it has buffered
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| TarsError::PlaybackError(format!("player wait failed: {e}")))?;
        if !status.success() {
            return Err(TarsError::PlaybackError(format!("player exited with {status}")));
        }
        Ok(())
    }
}

impl Drop for PlayerStream {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!(target = "audio", error = %e, "Failed to stop player");
            }
            let _ = self.child.wait();
        }
    }
}

pub(crate) fn get_from_path(bin: &str) -> Option<PathBuf> {
    // If a path-like string is provided, respect it directly
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }

    if let Some(paths_os) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths_os) {
            let candidate = dir.join(bin);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Pick the best available device: cpal when compiled in, then a player binary, then null.
#[cfg(feature = "playback")]
pub fn default_output() -> Arc<dyn OutputDevice> {
    Arc::new(CpalOutput::default())
}

/// Pick the best available device: a player binary, then null.
#[cfg(not(feature = "playback"))]
pub fn default_output() -> Arc<dyn OutputDevice> {
    player_or_null()
}

pub fn player_or_null() -> Arc<dyn OutputDevice> {
    match PlayerProcessOutput::detect() {
        Some(p) => {
            info!(target = "audio", player = %p.bin.display(), "Using player process for output");
            Arc::new(p)
        }
        None => {
            warn!(target = "audio", "No audio player found (aplay/paplay); audio will be discarded");
            Arc::new(NullOutput)
        }
    }
}
