//! Per-device count table and its snapshot reader.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// One row of a snapshot, shaped for the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCount {
    pub device_id: String,
    pub count: u64,
}

/// Mapping from device identifier to a monotonically increasing count.
///
/// The table has a single writer: `apply` takes `&mut self`, so only the
/// owner (the aggregator task) can mutate it. Readers go through
/// [`SnapshotReader`] handles, which can only copy.
#[derive(Debug, Default)]
pub struct CountTable {
    state: Arc<Mutex<HashMap<String, u64>>>,
}

impl CountTable {
    /// Increments the device's count by exactly one, creating the entry on
    /// first sight. The increment happens under the table mutex, so no
    /// reader can observe a torn count.
    pub fn apply(&mut self, device_id: &str) -> Result<(), PipelineError> {
        let mut state = self.state.lock().expect("count table mutex poisoned");
        let count = state.entry(device_id.to_string()).or_insert(0);
        *count = count.checked_add(1).ok_or_else(|| {
            PipelineError::Count(format!("count overflow for device {device_id:?}"))
        })?;
        Ok(())
    }

    /// Creates a read-only handle onto this table.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            state: Arc::clone(&self.state),
        }
    }
}

/// Read-only handle producing point-in-time copies of the count table.
#[derive(Clone)]
pub struct SnapshotReader {
    state: Arc<Mutex<HashMap<String, u64>>>,
}

impl SnapshotReader {
    /// Copies all current `{device_id, count}` pairs. The lock is held only
    /// for the duration of the copy; the returned snapshot is immutable and
    /// never reflects later increments. Row order is unspecified.
    pub fn snapshot(&self) -> Vec<DeviceCount> {
        let state = self.state.lock().expect("count table mutex poisoned");
        state
            .iter()
            .map(|(device_id, count)| DeviceCount {
                device_id: device_id.clone(),
                count: *count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_of(snapshot: &[DeviceCount], device_id: &str) -> Option<u64> {
        snapshot
            .iter()
            .find(|entry| entry.device_id == device_id)
            .map(|entry| entry.count)
    }

    #[test]
    fn entries_are_created_lazily_and_increment() {
        let mut table = CountTable::default();
        let reader = table.reader();
        assert!(reader.snapshot().is_empty());

        table.apply("sensor-1").expect("apply");
        table.apply("sensor-1").expect("apply");
        table.apply("sensor-2").expect("apply");

        let snapshot = reader.snapshot();
        assert_eq!(count_of(&snapshot, "sensor-1"), Some(2));
        assert_eq!(count_of(&snapshot, "sensor-2"), Some(1));
    }

    #[test]
    fn empty_device_id_is_a_regular_key() {
        let mut table = CountTable::default();
        table.apply("").expect("apply");
        assert_eq!(count_of(&table.reader().snapshot(), ""), Some(1));
    }

    #[test]
    fn snapshots_are_immutable_copies() {
        let mut table = CountTable::default();
        let reader = table.reader();
        table.apply("sensor-1").expect("apply");

        let before = reader.snapshot();
        table.apply("sensor-1").expect("apply");

        assert_eq!(count_of(&before, "sensor-1"), Some(1));
        assert_eq!(count_of(&reader.snapshot(), "sensor-1"), Some(2));
    }
}
