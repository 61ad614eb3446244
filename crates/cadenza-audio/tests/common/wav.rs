//! Synthetic WAV assets shared by unit and integration tests.

use std::path::Path;

/// Ramp period; frame `i` carries the value `i % RAMP_PERIOD`.
pub const RAMP_PERIOD: usize = 30_000;

/// Write a 16-bit PCM WAV whose frames count upwards.
pub fn write_ramp_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
    let data_len = (frames * usize::from(channels) * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);

    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for frame in 0..frames {
        let value = (frame % RAMP_PERIOD) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    std::fs::write(path, bytes).unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
}

/// Recover the ramp value from a decoded sample.
pub fn ramp_value(sample: f32) -> i32 {
    (sample * 32768.0).round() as i32
}
