/// Rolling memory module
///
/// Bounded FIFO lists of recently sent video ids and channel ids used by the
/// selector to avoid repeating content. The oldest entry is evicted first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

/// Fixed-capacity FIFO of id strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedMemory {
    capacity: usize,
    items: VecDeque<String>,
}

impl BoundedMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an id, evicting the oldest entries while over capacity.
    /// An id already present moves to the newest position instead of
    /// appearing twice. Returns the ids that were evicted.
    pub fn push(&mut self, id: impl Into<String>) -> Vec<String> {
        let id = id.into();
        self.items.retain(|item| *item != id);
        self.items.push_back(id);

        let mut evicted = Vec::new();
        while self.items.len() > self.capacity {
            if let Some(old) = self.items.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn to_vec(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }

    /// Rebuild with a (possibly different) capacity, keeping the newest entries.
    fn resized(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        self
    }
}

/// On-disk snapshot of the selector's rolling state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub sent_videos: BoundedMemory,
    pub sent_channels: BoundedMemory,
    #[serde(default)]
    pub topic_cursor: usize,
}

impl MemorySnapshot {
    /// Load a snapshot, trimming each memory to the configured capacities.
    ///
    /// Returns `Ok(None)` when the file does not exist yet.
    pub async fn load(
        path: &Path,
        video_capacity: usize,
        channel_capacity: usize,
    ) -> Result<Option<Self>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let snapshot: MemorySnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse memory file {}", path.display()))?;

        Ok(Some(Self {
            sent_videos: snapshot.sent_videos.resized(video_capacity),
            sent_channels: snapshot.sent_channels.resized(channel_capacity),
            topic_cursor: snapshot.topic_cursor,
        }))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize memory")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity() {
        let mut memory = BoundedMemory::new(3);
        for i in 0..10 {
            memory.push(format!("v{}", i));
            assert!(memory.len() <= 3);
        }
        assert_eq!(memory.to_vec(), vec!["v7", "v8", "v9"]);
    }

    #[test]
    fn capacity_plus_one_evicts_oldest_only() {
        let mut memory = BoundedMemory::new(50);
        for i in 0..50 {
            assert!(memory.push(format!("id{}", i)).is_empty());
        }
        let evicted = memory.push("id50");

        assert_eq!(evicted, vec!["id0".to_string()]);
        assert!(!memory.contains("id0"));
        for i in 1..=50 {
            assert!(memory.contains(&format!("id{}", i)));
        }
    }

    #[test]
    fn channel_memory_keeps_last_two() {
        let mut channels = BoundedMemory::new(2);
        channels.push("c1");
        channels.push("c2");
        channels.push("c3");
        assert_eq!(channels.to_vec(), vec!["c2", "c3"]);
    }

    #[test]
    fn repeated_id_moves_to_newest() {
        let mut channels = BoundedMemory::new(3);
        channels.push("c1");
        channels.push("c2");
        channels.push("c1");
        assert_eq!(channels.to_vec(), vec!["c2", "c1"]);

        channels.push("c3");
        assert!(channels.push("c4").contains(&"c2".to_string()));
        assert_eq!(channels.to_vec(), vec!["c1", "c3", "c4"]);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_respects_new_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let mut videos = BoundedMemory::new(4);
        for id in ["a", "b", "c", "d"] {
            videos.push(id);
        }
        let snapshot = MemorySnapshot {
            sent_videos: videos,
            sent_channels: BoundedMemory::new(2),
            topic_cursor: 3,
        };
        snapshot.save(&path).await.unwrap();

        let loaded = MemorySnapshot::load(&path, 2, 2).await.unwrap().unwrap();
        assert_eq!(loaded.sent_videos.to_vec(), vec!["c", "d"]);
        assert_eq!(loaded.sent_videos.capacity(), 2);
        assert_eq!(loaded.topic_cursor, 3);
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = MemorySnapshot::load(&dir.path().join("nope.json"), 5, 5)
            .await
            .unwrap();
        assert!(loaded.is_none());
    }
}
