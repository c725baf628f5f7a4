//! Snapshots of the kernel block-device statistics table.
//!
//! Format: <https://www.kernel.org/doc/Documentation/ABI/testing/procfs-diskstats>
//!
//! Fields (1-based): 1 major, 2 minor, 3 device name, 4 reads completed,
//! 5 reads merged, 6 sectors read, 7 ms reading, 8 writes completed,
//! 9 writes merged, 10 sectors written, 11 ms writing, 12 I/Os in progress,
//! 13 ms doing I/O, 14 weighted ms doing I/O. Kernel 4.18 appends four
//! discard fields and 5.5 two flush fields; those are ignored.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::debug;
use tokio::time::Instant;

use crate::{
    cache::{CacheValue, DEFAULT_VALIDITY},
    error::{Error, Result},
};

/// Location of the statistics table on Linux.
pub const PROC_DISKSTATS: &str = "/proc/diskstats";

const MIN_FIELDS: usize = 14;
const DEVICE_NAME: usize = 2;
const READ_SECTORS: usize = 5;
const WRITE_SECTORS: usize = 9;
const IO_IN_PROGRESS: usize = 11;

/// Point-in-time capture of per-device I/O counters.
///
/// Immutable once parsed; a newer reading is a new snapshot.
#[derive(Debug, Clone)]
pub struct DiskstatsSnapshot {
    timestamp: Instant,
    rows: HashMap<String, Vec<String>>,
}

impl DiskstatsSnapshot {
    /// Parses the content of `/proc/diskstats`.
    ///
    /// Fails on the first row with fewer than 14 fields.
    pub fn parse(content: &str) -> Result<Self> {
        let mut rows = HashMap::new();
        for line in content.lines() {
            let fields: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < MIN_FIELDS {
                return Err(Error::parse(format!(
                    "incorrect format: expected {MIN_FIELDS} or more fields but found {}: {:?}",
                    fields.len(),
                    line.trim()
                )));
            }
            rows.insert(fields[DEVICE_NAME].clone(), fields);
        }
        Ok(Self {
            timestamp: Instant::now(),
            rows,
        })
    }

    /// Reads and parses a statistics file.
    ///
    /// Synchronous: procfs content is generated in memory.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn contains(&self, device: &str) -> bool {
        self.rows.contains_key(device)
    }

    /// Number of I/Os currently in flight for `device`, 0 when unknown.
    pub fn io_in_progress(&self, device: &str) -> u64 {
        self.field(device, IO_IN_PROGRESS)
    }

    /// Sectors read and written by `device` since `previous`.
    ///
    /// A counter that went backwards (reset, rollover, unparsable value)
    /// reports no activity.
    pub fn io_activity_from(&self, previous: &Self, device: &str) -> (u64, u64) {
        let (read, write) = self.counters(device);
        let (previous_read, previous_write) = previous.counters(device);
        (
            read.saturating_sub(previous_read),
            write.saturating_sub(previous_write),
        )
    }

    /// Sectors read and written by `device` and its partitions since
    /// `previous`.
    ///
    /// Partitions are the rows named after the device followed by a number
    /// (`sda1`, `sda2`, ...).
    pub fn partitions_io_activity_from(&self, previous: &Self, device: &str) -> (u64, u64) {
        let devices = self.device_and_partitions(device);
        let (read, write) = self.summed_counters(&devices);
        let (previous_read, previous_write) = previous.summed_counters(&devices);
        (
            read.saturating_sub(previous_read),
            write.saturating_sub(previous_write),
        )
    }

    fn device_and_partitions<'a>(&'a self, device: &'a str) -> Vec<&'a str> {
        let mut devices: Vec<&str> = self
            .rows
            .keys()
            .filter(|key| {
                key.strip_prefix(device)
                    .is_some_and(|suffix| !suffix.is_empty() && suffix.parse::<u32>().is_ok())
            })
            .map(String::as_str)
            .collect();
        devices.push(device);
        devices
    }

    fn summed_counters(&self, devices: &[&str]) -> (u64, u64) {
        devices.iter().fold((0, 0), |(read, write), device| {
            let (r, w) = self.counters(device);
            (read + r, write + w)
        })
    }

    fn counters(&self, device: &str) -> (u64, u64) {
        (
            self.field(device, READ_SECTORS),
            self.field(device, WRITE_SECTORS),
        )
    }

    fn field(&self, device: &str, index: usize) -> u64 {
        self.rows
            .get(device)
            .and_then(|row| row.get(index))
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }
}

/// Shared, cached access to the statistics table.
///
/// Every disk diffs against the same snapshot, read at most once per
/// validity window.
#[derive(Debug)]
pub struct DiskstatsReader {
    path: PathBuf,
    cache: CacheValue<Arc<DiskstatsSnapshot>>,
}

impl DiskstatsReader {
    pub fn new(path: impl Into<PathBuf>, validity: Duration) -> Self {
        Self {
            path: path.into(),
            cache: CacheValue::new(validity),
        }
    }

    pub async fn snapshot(&self) -> Result<Arc<DiskstatsSnapshot>> {
        self.cache
            .get(|| async {
                debug!("reading {}", self.path.display());
                DiskstatsSnapshot::read(&self.path).map(Arc::new)
            })
            .await
    }
}

impl Default for DiskstatsReader {
    fn default() -> Self {
        Self::new(PROC_DISKSTATS, DEFAULT_VALIDITY)
    }
}
