//! Playback queue types.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Song;

/// Identifier of a single queue entry.
///
/// The same song may be queued several times; each insertion gets its own id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QueueEntryId(Uuid);

impl QueueEntryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single pending item in the playback queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub song: Song,
}

/// Ordered list of songs waiting to be played.
///
/// Entries leave from the front, either when the song playing before them
/// finishes or when it is skipped. Insertion order is preserved and
/// duplicates are kept.
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    entries: VecDeque<QueueEntry>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a song to the tail.
    pub fn enqueue(&mut self, song: Song) -> QueueEntryId {
        let id = QueueEntryId::new();
        self.entries.push_back(QueueEntry { id, song });
        id
    }

    /// Remove and return the head.
    pub fn dequeue_next(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Remove a specific entry.
    pub fn remove(&mut self, id: QueueEntryId) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Owned copy of the pending entries, head first.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn song(name: &str) -> Song {
        Song::new(name, format!("{name}.mp3"))
    }

    #[test]
    fn test_queue_fifo() {
        let mut queue = PlaybackQueue::new();
        assert!(queue.dequeue_next().is_none());

        queue.enqueue(song("A"));
        queue.enqueue(song("B"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.iter().next().unwrap().song.name, "A");

        assert_eq!(queue.dequeue_next().unwrap().song.name, "A");
        assert_eq!(queue.dequeue_next().unwrap().song.name, "B");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_keeps_duplicates() {
        let mut queue = PlaybackQueue::new();
        let first = queue.enqueue(song("A"));
        let second = queue.enqueue(song("A"));
        assert_ne!(first, second);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_queue_remove() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(song("A"));
        let id = queue.enqueue(song("B"));
        queue.enqueue(song("C"));

        assert_eq!(queue.remove(id).unwrap().song.name, "B");
        assert!(queue.remove(id).is_none());

        let names: Vec<_> = queue.iter().map(|e| e.song.name.as_str()).collect();
        assert_eq!(names, ["A", "C"]);
    }

    proptest! {
        #[test]
        fn prop_dequeue_order_matches_enqueue_order(names in prop::collection::vec("[a-z]{1,6}", 0..32)) {
            let mut queue = PlaybackQueue::new();
            for name in &names {
                queue.enqueue(song(name));
            }
            let mut drained = Vec::new();
            while let Some(entry) = queue.dequeue_next() {
                drained.push(entry.song.name);
            }
            prop_assert_eq!(drained, names);
        }
    }
}
