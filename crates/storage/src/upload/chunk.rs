//! Chunk size selection.
//!
//! Each chunk is held in memory while it is pushed, so the chunk size
//! follows how much memory the process can still afford: a quarter of the
//! headroom, rounded down to Drive's 256 KiB granularity and clamped to
//! 256 KiB..=100 MiB.

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, get_current_pid};

/// Drive requires chunk sizes to be multiples of this.
pub const CHUNK_ALIGNMENT: u64 = 256 * 1024;
pub const MIN_CHUNK_SIZE: u64 = CHUNK_ALIGNMENT;
pub const MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Chunk size for a memory `limit` (if any) of which `used` is taken.
pub fn detect_chunk_size(limit: Option<u64>, used: u64) -> u64 {
    let Some(limit) = limit else {
        return MAX_CHUNK_SIZE;
    };
    let headroom = limit.saturating_sub(used);
    let aligned = (headroom / 4) / CHUNK_ALIGNMENT * CHUNK_ALIGNMENT;
    aligned.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub limit: Option<u64>,
    pub used: u64,
}

impl MemorySnapshot {
    pub fn chunk_size(self) -> u64 {
        detect_chunk_size(self.limit, self.used)
    }
}

pub trait MemoryProbe: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;
}

/// A probe that always reports the same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMemory(pub MemorySnapshot);

impl FixedMemory {
    pub fn new(limit: Option<u64>, used: u64) -> Self {
        Self(MemorySnapshot { limit, used })
    }
}

impl MemoryProbe for FixedMemory {
    fn snapshot(&self) -> MemorySnapshot {
        self.0
    }
}

/// Reads this process's resident memory. Without a configured limit the
/// limit is what the process uses plus what the host still has available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory {
    limit: Option<u64>,
}

impl ProcessMemory {
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit }
    }
}

impl MemoryProbe for ProcessMemory {
    fn snapshot(&self) -> MemorySnapshot {
        let mut system = System::new();
        let used = match get_current_pid() {
            Ok(pid) => {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                system.process(pid).map_or(0, |process| process.memory())
            },
            Err(err) => {
                tracing::debug!(error = err, "unable to determine current process");
                0
            },
        };
        let limit = match self.limit {
            Some(limit) => Some(limit),
            None => {
                system.refresh_memory();
                match system.available_memory() {
                    0 => None,
                    available => Some(used + available),
                }
            },
        };
        MemorySnapshot { limit, used }
    }
}
