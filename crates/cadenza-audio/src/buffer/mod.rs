//! Buffers shared between the delivery thread and the device callback.

pub mod pcm;

pub use pcm::PcmBuffer;
