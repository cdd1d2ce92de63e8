//! Ring-buffer replay memory with uniform sampling and disk snapshots.
//!
//! ## Snapshot layout
//!
//! A snapshot is the `bincode` encoding of:
//!
//! | field         | type     | meaning                                   |
//! |---------------|----------|-------------------------------------------|
//! | `magic`       | `u32`    | `0x5250_4c31` ("RPL1")                    |
//! | `capacity`    | `u64`    | ring capacity when saved                  |
//! | `cursor`      | `u64`    | next slot to overwrite                    |
//! | `total_added` | `u64`    | insertions ever                           |
//! | `data`        | `Vec<T>` | slots in storage order (not age order)    |
//!
//! Snapshots are written to `<path>.tmp` and renamed over `<path>`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{Result, TrainError};

/// Snapshot file magic, "RPL1".
pub const SNAPSHOT_MAGIC: u32 = 0x5250_4c31;

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
    magic: u32,
    capacity: u64,
    cursor: u64,
    total_added: u64,
    data: &'a [T],
}

#[derive(Deserialize)]
struct Snapshot<T> {
    magic: u32,
    capacity: u64,
    cursor: u64,
    total_added: u64,
    data: Vec<T>,
}

#[derive(Debug)]
struct Ring<T> {
    data: Vec<T>,
    cursor: usize,
    total_added: u64,
}

impl<T> Ring<T> {
    fn add(&mut self, item: T, capacity: usize) {
        if self.data.len() < capacity {
            self.data.push(item);
        } else {
            self.data[self.cursor] = item;
        }
        self.cursor = (self.cursor + 1) % capacity;
        self.total_added += 1;
    }

    /// Storage indices from oldest to newest.
    fn age_order(&self) -> impl Iterator<Item = usize> + '_ {
        let len = self.data.len();
        let start = if len == 0 { 0 } else { self.cursor % len };
        (0..len).map(move |i| (start + i) % len)
    }
}

/// Fixed-capacity FIFO of training examples.
///
/// Internally locked; any thread may add, sample or persist, one at a time.
#[derive(Debug)]
pub struct ReplayBuffer<T> {
    ring: Mutex<Ring<T>>,
    capacity: usize,
}

impl<T: Clone> ReplayBuffer<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ReplayBuffer capacity must be positive");
        Self {
            ring: Mutex::new(Ring {
                data: Vec::with_capacity(capacity),
                cursor: 0,
                total_added: 0,
            }),
            capacity,
        }
    }

    /// Insert, overwriting the oldest example when full.
    pub fn add(&self, item: T) {
        self.ring.lock().add(item, self.capacity);
    }

    /// Insert many under one lock.
    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        let mut ring = self.ring.lock();
        for item in items {
            ring.add(item, self.capacity);
        }
    }

    /// `n` examples drawn uniformly with replacement.
    pub fn sample<R: Rng>(&self, rng: &mut R, n: usize) -> Result<Vec<T>> {
        let ring = self.ring.lock();
        if ring.data.is_empty() {
            return Err(TrainError::InvalidArgument(
                "cannot sample from an empty replay buffer".to_owned(),
            ));
        }
        let len = ring.data.len();
        Ok((0..n).map(|_| ring.data[rng.gen_range(0..len)].clone()).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insertions ever, including evicted ones.
    #[must_use]
    pub fn total_added(&self) -> u64 {
        self.ring.lock().total_added
    }

    /// Contents from oldest to newest.
    pub fn to_vec(&self) -> Vec<T> {
        let ring = self.ring.lock();
        ring.age_order().map(|i| ring.data[i].clone()).collect()
    }
}

impl<T: Clone + Serialize + DeserializeOwned> ReplayBuffer<T> {
    /// Write a snapshot atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = tmp_path(path);
        {
            let ring = self.ring.lock();
            let snapshot = SnapshotRef {
                magic: SNAPSHOT_MAGIC,
                capacity: self.capacity as u64,
                cursor: ring.cursor as u64,
                total_added: ring.total_added,
                data: &ring.data,
            };

            let file = File::create(&tmp).map_err(|e| TrainError::io(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &snapshot)?;
            writer.flush().map_err(|e| TrainError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| TrainError::io(path, e))
    }

    /// Replace the contents with a snapshot.
    ///
    /// A snapshot saved with another capacity is replayed oldest first, so
    /// the newest examples survive; `total_added` is restored either way.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TrainError::io(path, e))?;
        let snapshot: Snapshot<T> = bincode::deserialize_from(BufReader::new(file))?;
        let corrupt = |reason: String| TrainError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        if snapshot.magic != SNAPSHOT_MAGIC {
            return Err(corrupt(format!("bad magic {:#010x}", snapshot.magic)));
        }
        let saved_capacity = snapshot.capacity as usize;
        let len = snapshot.data.len();
        if saved_capacity == 0 || len > saved_capacity {
            return Err(corrupt(format!(
                "{len} examples in a ring of capacity {saved_capacity}"
            )));
        }
        let cursor = snapshot.cursor as usize;
        let cursor_ok = if len < saved_capacity {
            cursor == len % saved_capacity
        } else {
            cursor < saved_capacity
        };
        if !cursor_ok || snapshot.total_added < len as u64 {
            return Err(corrupt(format!(
                "cursor {cursor}, total {} inconsistent with {len} examples",
                snapshot.total_added
            )));
        }

        let saved = Ring {
            data: snapshot.data,
            cursor,
            total_added: snapshot.total_added,
        };
        let mut ring = self.ring.lock();
        if saved_capacity == self.capacity {
            *ring = saved;
        } else {
            let mut resized = Ring {
                data: Vec::with_capacity(self.capacity),
                cursor: 0,
                total_added: 0,
            };
            for i in saved.age_order() {
                resized.add(saved.data[i].clone(), self.capacity);
            }
            resized.total_added = saved.total_added;
            *ring = resized;
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TrainRng;
    use tempfile::TempDir;

    #[test]
    fn test_add_until_full() {
        let buffer = ReplayBuffer::new(3);
        buffer.extend([1, 2]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_eviction_is_fifo() {
        let buffer = ReplayBuffer::new(3);
        buffer.extend(1..=5);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.total_added(), 5);
        assert_eq!(buffer.to_vec(), vec![3, 4, 5]);
    }

    #[test]
    fn test_sample_empty_is_error() {
        let buffer: ReplayBuffer<u8> = ReplayBuffer::new(2);
        let err = buffer.sample(&mut TrainRng::new(0), 1).unwrap_err();
        assert!(matches!(err, TrainError::InvalidArgument(_)));
    }

    #[test]
    fn test_sample_with_replacement() {
        let buffer = ReplayBuffer::new(2);
        buffer.add(7);
        let sample = buffer.sample(&mut TrainRng::new(0), 5).unwrap();
        assert_eq!(sample, vec![7; 5]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replay_buffer.data");

        let buffer = ReplayBuffer::new(4);
        buffer.extend(0..6);
        buffer.save(&path).unwrap();
        assert!(!tmp_path(&path).exists());

        let restored = ReplayBuffer::new(4);
        restored.load(&path).unwrap();
        assert_eq!(restored.to_vec(), buffer.to_vec());
        assert_eq!(restored.total_added(), 6);

        // Cursor survives: the next insert evicts the same slot.
        buffer.add(100);
        restored.add(100);
        assert_eq!(restored.to_vec(), buffer.to_vec());
    }

    #[test]
    fn test_load_into_smaller_ring_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replay.data");

        let buffer = ReplayBuffer::new(5);
        buffer.extend(0..7);
        buffer.save(&path).unwrap();

        let smaller: ReplayBuffer<i32> = ReplayBuffer::new(2);
        smaller.load(&path).unwrap();
        assert_eq!(smaller.to_vec(), vec![5, 6]);
        assert_eq!(smaller.total_added(), 7);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let buffer: ReplayBuffer<u8> = ReplayBuffer::new(2);
        let err = buffer.load(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, TrainError::Io { .. }));
    }

    #[test]
    fn test_load_bad_magic_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.data");
        let bogus = SnapshotRef::<u8> {
            magic: 0xdead_beef,
            capacity: 1,
            cursor: 0,
            total_added: 0,
            data: &[],
        };
        std::fs::write(&path, bincode::serialize(&bogus).unwrap()).unwrap();

        let buffer: ReplayBuffer<u8> = ReplayBuffer::new(1);
        let err = buffer.load(&path).unwrap_err();
        assert!(matches!(err, TrainError::Corrupt { .. }));
    }

    #[test]
    fn test_load_truncated_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.data");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let buffer: ReplayBuffer<u8> = ReplayBuffer::new(1);
        assert!(buffer.load(&path).is_err());
    }
}
