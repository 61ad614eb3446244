//! Audio output using cpal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadenza_core::{Error, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::pcm::{PcmBuffer, SharedPcmBuffer};
use crate::decode::PcmSpec;
use crate::sink::OutputSink;

/// Audio held between the delivery thread and the device callback.
const DEVICE_BUFFER: Duration = Duration::from_millis(200);

/// Output sink on a cpal device.
///
/// The cpal stream is not `Send`, so a `CpalSink` must be created on the
/// thread that writes to it.
pub struct CpalSink {
    _stream: Stream,
    buffer: SharedPcmBuffer,
    paused: Arc<AtomicBool>,
    /// Last error reported by the device callback.
    failure: Arc<Mutex<Option<String>>>,
    format: PcmSpec,
    device_name: String,
}

impl CpalSink {
    /// Open the default output device, preferring the `requested` format.
    pub fn open(requested: PcmSpec) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::SinkFailed("No output device found".to_string()))?;

        Self::with_device(&device, requested)
    }

    /// Open a specific device, preferring the `requested` format.
    pub fn with_device(device: &Device, requested: PcmSpec) -> Result<Self> {
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let supported = choose_config(device, requested)?;
        debug!("Supported output config: {:?}", supported);

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let format = PcmSpec::new(config.sample_rate.0, config.channels);
        if format != requested {
            warn!(
                "Device does not support {}Hz/{}ch, using {}Hz/{}ch",
                requested.sample_rate, requested.channels, format.sample_rate, format.channels
            );
        }

        #[allow(clippy::cast_precision_loss)]
        let capacity =
            (DEVICE_BUFFER.as_secs_f64() * format.samples_per_second() as f64) as usize;
        let buffer = Arc::new(PcmBuffer::new(capacity));
        let paused = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(device, &config, &buffer, &paused, &failure)?,
            SampleFormat::I16 => build_stream::<i16>(device, &config, &buffer, &paused, &failure)?,
            SampleFormat::U16 => build_stream::<u16>(device, &config, &buffer, &paused, &failure)?,
            _ => {
                return Err(Error::SinkFailed(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::SinkFailed(format!("Failed to start stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            buffer,
            paused,
            failure,
            format,
            device_name,
        })
    }
}

impl OutputSink for CpalSink {
    fn name(&self) -> &str {
        &self.device_name
    }

    fn format(&self) -> PcmSpec {
        self.format
    }

    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize> {
        if let Some(message) = self.failure.lock().take() {
            return Err(Error::SinkFailed(message));
        }
        Ok(self.buffer.push_timeout(samples, timeout))
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }

    fn drain(&mut self, timeout: Duration) -> bool {
        if self.paused.load(Ordering::Relaxed) {
            return false;
        }
        self.buffer.wait_empty(timeout)
    }
}

/// Pick a device config matching `requested`, or fall back to the default.
fn choose_config(device: &Device, requested: PcmSpec) -> Result<SupportedStreamConfig> {
    let matching = device
        .supported_output_configs()
        .map_err(|e| Error::SinkFailed(format!("Failed to query output configs: {e}")))?
        .find(|range| {
            range.channels() == requested.channels
                && range.min_sample_rate().0 <= requested.sample_rate
                && range.max_sample_rate().0 >= requested.sample_rate
        })
        .map(|range| range.with_sample_rate(SampleRate(requested.sample_rate)));

    match matching {
        Some(config) => Ok(config),
        None => device
            .default_output_config()
            .map_err(|e| Error::SinkFailed(format!("Failed to get output config: {e}"))),
    }
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    buffer: &SharedPcmBuffer,
    paused: &Arc<AtomicBool>,
    failure: &Arc<Mutex<Option<String>>>,
) -> Result<Stream> {
    let buffer = Arc::clone(buffer);
    let paused = Arc::clone(paused);
    let failure = Arc::clone(failure);
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error: {err}");
        *failure.lock() = Some(err.to_string());
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Paused: output silence and leave the buffer untouched.
                if paused.load(Ordering::Relaxed) {
                    data.fill(T::from_sample(0.0f32));
                    return;
                }

                // A contended buffer plays as an underrun instead of blocking
                // the device thread.
                scratch.resize(data.len(), 0.0);
                let read = buffer.try_pop_into(&mut scratch).unwrap_or(0);

                for (i, sample) in data.iter_mut().enumerate() {
                    *sample = if i < read {
                        T::from_sample(scratch[i])
                    } else {
                        T::from_sample(0.0f32)
                    };
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::SinkFailed(format!("Failed to build stream: {e}")))
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::SinkFailed(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}
