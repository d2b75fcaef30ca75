#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use tars_audio::{OutputDevice, OutputStream, StreamFormat};
use tars_core::{Result, TarsError};

#[derive(Default)]
pub struct Recorded {
    pub formats: Vec<StreamFormat>,
    pub writes: Vec<Vec<i16>>,
    pub closed: usize,
    /// Fail every write once this many have succeeded
    pub fail_after: Option<usize>,
}

/// Output device that keeps everything written to it
#[derive(Clone, Default)]
pub struct RecordingDevice {
    pub state: Arc<Mutex<Recorded>>,
}

impl RecordingDevice {
    pub fn failing_after(writes: usize) -> Self {
        let dev = Self::default();
        dev.state.lock().unwrap().fail_after = Some(writes);
        dev
    }

    pub fn samples(&self) -> Vec<i16> {
        self.state.lock().unwrap().writes.concat()
    }

    pub fn writes(&self) -> Vec<Vec<i16>> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn formats(&self) -> Vec<StreamFormat> {
        self.state.lock().unwrap().formats.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().formats.len()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl OutputDevice for RecordingDevice {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&self, format: StreamFormat) -> Result<Box<dyn OutputStream>> {
        self.state.lock().unwrap().formats.push(format);
        Ok(Box::new(RecordingStream {
            state: self.state.clone(),
        }))
    }
}

struct RecordingStream {
    state: Arc<Mutex<Recorded>>,
}

impl OutputStream for RecordingStream {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.fail_after {
            if state.writes.len() >= limit {
                return Err(TarsError::PlaybackError("device unplugged".into()));
            }
        }
        state.writes.push(samples.to_vec());
        Ok(())
    }
}

impl Drop for RecordingStream {
    fn drop(&mut self) {
        self.state.lock().unwrap().closed += 1;
    }
}

pub fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// A short, non-silent test tone
pub fn tone(len: usize) -> Vec<i16> {
    (0..len).map(|i| ((i as i32 * 37) % 2000 - 1000) as i16).collect()
}
