//! Core domain types for Cadenza.

pub mod catalog;
pub mod queue;
pub mod song;

pub use catalog::Catalog;
pub use queue::{PlaybackQueue, QueueEntry, QueueEntryId};
pub use song::Song;
