//! Output stream on the system audio device using cpal.
//!
//! Written samples go into a shared queue that the cpal callback drains; the
//! callback fills with silence when the queue runs dry. `write` blocks while
//! more than `max_buffered_ms` of audio is queued.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tars_core::{Result, TarsError};
use tracing::{error, info, warn};

use super::{OutputDevice, OutputStream, StreamFormat};

#[derive(Clone, Debug)]
pub struct CpalOutput {
    /// Optional output device name substring to match
    pub device_name: Option<String>,
    pub max_buffered_ms: u32,
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self {
            device_name: std::env::var("TARS_OUTPUT_DEVICE").ok(),
            max_buffered_ms: 500,
        }
    }
}

type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

fn lock(queue: &SampleQueue) -> MutexGuard<'_, VecDeque<i16>> {
    match queue.lock() {
        Ok(q) => q,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CpalOutput {
    fn select_device(&self, host: &cpal::Host) -> Option<cpal::Device> {
        if let Some(ref needle) = self.device_name {
            match host.output_devices() {
                Ok(devices) => {
                    for dev in devices {
                        if let Ok(name) = dev.name() {
                            if name.to_lowercase().contains(&needle.to_lowercase()) {
                                info!(target = "audio", "Selected output device by TARS_OUTPUT_DEVICE='{}': {}", needle, name);
                                return Some(dev);
                            }
                        }
                    }
                }
                Err(e) => warn!(target = "audio", "Failed to list output devices: {}", e),
            }
        }
        host.default_output_device()
    }
}

impl OutputDevice for CpalOutput {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&self, format: StreamFormat) -> Result<Box<dyn OutputStream>> {
        let host = cpal::default_host();
        let device = self
            .select_device(&host)
            .ok_or_else(|| TarsError::PlaybackError("No output device available".into()))?;
        let supported = device.default_output_config().map_err(|e| {
            TarsError::PlaybackError(format!("failed to get default output config: {e}"))
        })?;

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let stream = match supported.sample_format() {
            cpal::SampleFormat::I16 => build_output_stream::<i16>(&device, &config, Arc::clone(&queue))?,
            cpal::SampleFormat::F32 => build_output_stream::<f32>(&device, &config, Arc::clone(&queue))?,
            cpal::SampleFormat::U16 => build_output_stream::<u16>(&device, &config, Arc::clone(&queue))?,
            other => {
                return Err(TarsError::PlaybackError(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        };
        stream
            .play()
            .map_err(|e| TarsError::PlaybackError(format!("failed to start output stream: {e}")))?;

        let max_buffered = (format.sample_rate as usize * format.channels as usize
            * self.max_buffered_ms as usize)
            / 1000;
        Ok(Box::new(CpalStream {
            _stream: stream,
            queue,
            max_buffered: max_buffered.max(1),
            samples_per_sec: format.sample_rate as u64 * format.channels as u64,
        }))
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: SampleQueue,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut q = lock(&queue);
                for slot in data.iter_mut() {
                    *slot = T::from_sample(q.pop_front().unwrap_or(0));
                }
            },
            |err| error!(target = "audio", "cpal output stream error: {}", err),
            None,
        )
        .map_err(|e| TarsError::PlaybackError(format!("failed to build output stream: {e}")))
}

/// Dropping the stream stops playback
struct CpalStream {
    _stream: cpal::Stream,
    queue: SampleQueue,
    max_buffered: usize,
    samples_per_sec: u64,
}

impl OutputStream for CpalStream {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        lock(&self.queue).extend(samples.iter().copied());
        let wait_ms = 2000 + samples.len() as u64 * 1000 / self.samples_per_sec.max(1);
        let deadline = Instant::now() + Duration::from_millis(wait_ms);
        while lock(&self.queue).len() > self.max_buffered {
            if Instant::now() > deadline {
                return Err(TarsError::PlaybackError(
                    "output device stopped consuming samples".into(),
                ));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let pending = lock(&self.queue).len() as u64;
        let budget_ms = pending * 1000 / self.samples_per_sec.max(1) + 1000;
        let deadline = Instant::now() + Duration::from_millis(budget_ms);
        while !lock(&self.queue).is_empty() {
            if Instant::now() > deadline {
                return Err(TarsError::PlaybackError(
                    "output device stopped consuming samples".into(),
                ));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        // Let the last device buffer play out
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }
}
