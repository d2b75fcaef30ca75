//! Audio sink: ordered PCM playback with gain and optional peak normalization.
//!
//! Per chunk: normalize (if enabled and the chunk is not silent), apply gain,
//! clamp to the 16-bit range, write. Empty chunks are logged and skipped. The
//! output stream is opened once per `play` call and closed on every exit path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tars_core::{Result, TarsError};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, warn};

use crate::device::{OutputDevice, StreamFormat};
use crate::wav::PcmStreamDecoder;

/// One unit of streaming granularity; carries no word or phoneme boundary
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Little-endian 16-bit samples; a trailing odd byte is ignored
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        Self {
            samples: bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A complete decoded utterance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub format: StreamFormat,
}

impl PcmBuffer {
    /// Split into chunks of `chunk_samples` samples for device writes
    pub fn into_chunks(self, chunk_samples: usize) -> Vec<AudioChunk> {
        self.samples
            .chunks(chunk_samples.max(1))
            .map(|c| AudioChunk::new(c.to_vec()))
            .collect()
    }
}

/// A lazy, non-restartable body of PCM or WAV bytes
pub struct ChunkStream {
    pub body: BoxStream<'static, Result<Bytes>>,
    /// Used when the body carries no WAV header
    pub format: StreamFormat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackParams {
    pub format: StreamFormat,
    pub gain: f32,
    pub normalize: bool,
}

/// Scale so the chunk's peak magnitude maps to `i16::MAX`. Silence is returned unchanged.
pub fn normalize_chunk(samples: &[i16]) -> Vec<f64> {
    let peak = samples
        .iter()
        .map(|s| (*s as i32).abs())
        .max()
        .unwrap_or(0);
    if peak == 0 {
        return samples.iter().map(|s| *s as f64).collect();
    }
    samples
        .iter()
        .map(|s| (*s as f64 * i16::MAX as f64 / peak as f64).round())
        .collect()
}

/// Normalize (optional), apply gain, clamp to the 16-bit signed range.
pub fn process_chunk(samples: &[i16], gain: f32, normalize: bool) -> Vec<i16> {
    let scaled: Vec<f64> = if normalize {
        normalize_chunk(samples)
    } else {
        samples.iter().map(|s| *s as f64).collect()
    };
    let gain = gain as f64;
    scaled
        .into_iter()
        .map(|s| (s * gain).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
        .collect()
}

#[derive(Clone)]
pub struct AudioSink {
    device: Arc<dyn OutputDevice>,
}

impl AudioSink {
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self { device }
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Blocking playback of chunks in order. Returns the number of samples written.
    pub fn play<I>(&self, chunks: I, params: &PlaybackParams) -> Result<usize>
    where
        I: IntoIterator<Item = AudioChunk>,
    {
        // The stream is dropped (and the device session closed) on every return path
        let mut stream = self.device.open(params.format)?;
        let mut written = 0usize;
        for (index, chunk) in chunks.into_iter().enumerate() {
            if chunk.is_empty() {
                warn!(target = "audio", index, "Received empty chunk");
                continue;
            }
            let out = process_chunk(&chunk.samples, params.gain, params.normalize);
            stream.write(&out)?;
            written += out.len();
        }
        stream.drain()?;
        debug!(target = "audio", device = self.device.name(), samples = written, "Playback finished");
        Ok(written)
    }

    /// Play a complete buffer on a blocking worker.
    pub async fn play_buffer(
        &self,
        buffer: PcmBuffer,
        gain: f32,
        normalize: bool,
        chunk_samples: usize,
    ) -> Result<usize> {
        if buffer.samples.is_empty() {
            return Err(TarsError::RemoteServiceError("empty audio buffer".into()));
        }
        let params = PlaybackParams {
            format: buffer.format,
            gain,
            normalize,
        };
        let sink = self.clone();
        task::spawn_blocking(move || sink.play(buffer.into_chunks(chunk_samples), &params))
            .await
            .map_err(|e| TarsError::PlaybackError(format!("playback task failed: {e}")))?
    }

    /// Play a streamed body as it arrives.
    ///
    /// The first bytes are read before the device opens so that a WAV header can
    /// set the stream format. Each wait for the next transport chunk is bounded by
    /// `idle_timeout`. A body that ends without any bytes is a remote failure.
    pub async fn play_stream(
        &self,
        stream: ChunkStream,
        gain: f32,
        normalize: bool,
        chunk_bytes: usize,
        idle_timeout: Duration,
    ) -> Result<usize> {
        let ChunkStream { mut body, format } = stream;
        let mut decoder = PcmStreamDecoder::new(format, chunk_bytes);
        let mut primed: Vec<AudioChunk> = Vec::new();
        let mut received = 0usize;
        let mut ended = false;

        while !decoder.format_known() {
            match next_chunk(&mut body, idle_timeout).await? {
                Some(bytes) => {
                    received += bytes.len();
                    primed.extend(decoder.push(&bytes)?);
                }
                None => {
                    ended = true;
                    break;
                }
            }
        }
        if received == 0 {
            return Err(TarsError::RemoteServiceError("empty response body".into()));
        }
        if ended {
            primed.extend(decoder.finish());
        }

        let params = PlaybackParams {
            format: decoder.format(),
            gain,
            normalize,
        };
        let (tx, mut rx) = mpsc::channel::<AudioChunk>(32);
        let sink = self.clone();
        let player = task::spawn_blocking(move || {
            sink.play(std::iter::from_fn(move || rx.blocking_recv()), &params)
        });

        let fed = feed(&tx, primed, &mut decoder, &mut body, ended, idle_timeout).await;
        // Closing the channel ends the chunk sequence for the player
        drop(tx);
        let played = player
            .await
            .map_err(|e| TarsError::PlaybackError(format!("playback task failed: {e}")))?;
        fed?;
        played
    }
}

async fn next_chunk(
    body: &mut BoxStream<'static, Result<Bytes>>,
    idle_timeout: Duration,
) -> Result<Option<Bytes>> {
    match tokio::time::timeout(idle_timeout, body.next()).await {
        Ok(Some(Ok(bytes))) => Ok(Some(bytes)),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Ok(None),
        Err(_) => Err(TarsError::RemoteServiceError(format!(
            "stream stalled for {}ms",
            idle_timeout.as_millis()
        ))),
    }
}

/// Forward decoded chunks to the player. Stops quietly if the player has gone away.
async fn feed(
    tx: &mpsc::Sender<AudioChunk>,
    primed: Vec<AudioChunk>,
    decoder: &mut PcmStreamDecoder,
    body: &mut BoxStream<'static, Result<Bytes>>,
    ended: bool,
    idle_timeout: Duration,
) -> Result<()> {
    for chunk in primed {
        if tx.send(chunk).await.is_err() {
            return Ok(());
        }
    }
    if ended {
        return Ok(());
    }
    loop {
        let chunks = match next_chunk(body, idle_timeout).await? {
            Some(bytes) => decoder.push(&bytes)?,
            None => {
                for chunk in decoder.finish() {
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                return Ok(());
            }
        };
        for chunk in chunks {
            if tx.send(chunk).await.is_err() {
                return Ok(());
            }
        }
    }
}
