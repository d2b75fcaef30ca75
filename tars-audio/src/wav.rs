//! WAV/PCM decoding for synthesized audio.
//!
//! [`decode_wav`] handles complete container files (via hound).
//! [`PcmStreamDecoder`] handles streamed bodies: it strips a leading RIFF/WAVE
//! header when one is present, carries odd bytes across transport chunks and
//! re-chunks samples to a fixed size.

use std::io::Cursor;

use tars_core::{Result, TarsError};

use crate::device::StreamFormat;
use crate::sink::{AudioChunk, PcmBuffer};

/// Headers larger than this are not a streaming WAV header
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Decode a complete WAV file into interleaved 16-bit samples.
pub fn decode_wav(bytes: &[u8]) -> Result<PcmBuffer> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| TarsError::RemoteServiceError(format!("invalid WAV data: {e}")))?;
    let spec = reader.spec();
    let wav_err = |e: hound::Error| TarsError::RemoteServiceError(format!("invalid WAV data: {e}"));

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, bits) if bits <= 16 => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        (hound::SampleFormat::Int, bits) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| (v >> (bits - 16)) as i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .map(|s| s.map(f32_to_i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
    };

    Ok(PcmBuffer {
        samples,
        format: StreamFormat::new(spec.sample_rate, spec.channels),
    })
}

#[inline]
fn f32_to_i16(s: f32) -> i16 {
    let s = s.clamp(-1.0, 1.0);
    (s * i16::MAX as f32) as i16
}

enum Header {
    NeedMore,
    /// Not a RIFF stream: treat every byte as raw PCM
    Raw,
    Parsed { format: StreamFormat, data_offset: usize },
}

fn parse_header(buf: &[u8]) -> Result<Header> {
    if buf.len() < 12 {
        return Ok(if buf.len() >= 4 && &buf[0..4] != b"RIFF" {
            Header::Raw
        } else {
            Header::NeedMore
        });
    }
    if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return Ok(Header::Raw);
    }

    let mut idx = 12;
    let mut format: Option<StreamFormat> = None;
    while idx + 8 <= buf.len() {
        let chunk_id = &buf[idx..idx + 4];
        let sz = u32::from_le_bytes([buf[idx + 4], buf[idx + 5], buf[idx + 6], buf[idx + 7]]) as usize;
        if chunk_id == b"data" {
            let format = format.ok_or_else(|| {
                TarsError::RemoteServiceError("WAV stream has no fmt chunk before data".into())
            })?;
            return Ok(Header::Parsed {
                format,
                data_offset: idx + 8,
            });
        }
        let body = idx + 8;
        if chunk_id == b"fmt " {
            if body + 16 > buf.len() {
                return Ok(Header::NeedMore);
            }
            let channels = u16::from_le_bytes([buf[body + 2], buf[body + 3]]);
            let rate = u32::from_le_bytes([buf[body + 4], buf[body + 5], buf[body + 6], buf[body + 7]]);
            let bits = u16::from_le_bytes([buf[body + 14], buf[body + 15]]);
            if bits != 16 {
                return Err(TarsError::RemoteServiceError(format!(
                    "unsupported WAV stream encoding: {bits}-bit"
                )));
            }
            format = Some(StreamFormat::new(rate, channels.max(1)));
        }
        // Chunks are padded to even sizes
        idx = body + sz + (sz & 1);
    }
    if buf.len() > MAX_HEADER_BYTES {
        return Err(TarsError::RemoteServiceError(
            "WAV stream header too large".into(),
        ));
    }
    Ok(Header::NeedMore)
}

/// Incremental decoder for a streamed PCM or WAV body
pub struct PcmStreamDecoder {
    fallback: StreamFormat,
    format: Option<StreamFormat>,
    header: Vec<u8>,
    in_data: bool,
    carry: Option<u8>,
    pending: Vec<i16>,
    chunk_samples: usize,
}

impl PcmStreamDecoder {
    /// `chunk_bytes` is the transport chunk size; emitted chunks hold `chunk_bytes / 2` samples.
    pub fn new(fallback: StreamFormat, chunk_bytes: usize) -> Self {
        Self {
            fallback,
            format: None,
            header: Vec::new(),
            in_data: false,
            carry: None,
            pending: Vec::new(),
            chunk_samples: (chunk_bytes / 2).max(1),
        }
    }

    /// True once the header (if any) has been consumed and the format is settled
    pub fn format_known(&self) -> bool {
        self.in_data
    }

    pub fn format(&self) -> StreamFormat {
        self.format.unwrap_or(self.fallback)
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<AudioChunk>> {
        if self.in_data {
            self.push_data(bytes);
        } else {
            self.header.extend_from_slice(bytes);
            match parse_header(&self.header)? {
                Header::NeedMore => {}
                Header::Raw => {
                    self.in_data = true;
                    let data = std::mem::take(&mut self.header);
                    self.push_data(&data);
                }
                Header::Parsed {
                    format,
                    data_offset,
                } => {
                    self.in_data = true;
                    self.format = Some(format);
                    let data = std::mem::take(&mut self.header);
                    self.push_data(&data[data_offset..]);
                }
            }
        }
        Ok(self.take_full_chunks())
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<AudioChunk> {
        if !self.in_data {
            // Body ended inside a would-be header: play it as raw PCM
            self.in_data = true;
            let data = std::mem::take(&mut self.header);
            self.push_data(&data);
        }
        let mut chunks = self.take_full_chunks();
        if !self.pending.is_empty() {
            chunks.push(AudioChunk::new(std::mem::take(&mut self.pending)));
        }
        // A dangling odd byte is half a sample and is dropped
        self.carry = None;
        chunks
    }

    fn push_data(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        if let Some(lo) = self.carry.take() {
            match rest.split_first() {
                Some((&hi, tail)) => {
                    self.pending.push(i16::from_le_bytes([lo, hi]));
                    rest = tail;
                }
                None => {
                    self.carry = Some(lo);
                    return;
                }
            }
        }
        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            self.pending.push(i16::from_le_bytes([pair[0], pair[1]]));
        }
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }
    }

    fn take_full_chunks(&mut self) -> Vec<AudioChunk> {
        let mut chunks = Vec::new();
        while self.pending.len() >= self.chunk_samples {
            let chunk: Vec<i16> = self.pending.drain(..self.chunk_samples).collect();
            chunks.push(AudioChunk::new(chunk));
        }
        chunks
    }
}
