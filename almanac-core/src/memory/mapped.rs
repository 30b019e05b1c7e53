//! File-backed generation array shared across processes.
//!
//! The settings service creates the file and maps it read-write; clients map
//! it read-only. Slots are naturally aligned `i32`s at
//! `index * 4`, accessed atomically so a reader never sees a torn value.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{PoisonError, RwLock};

use memmap2::{MmapOptions, MmapRaw};
use uuid::Uuid;

use super::{check_index, MemoryIntArray, SLOT_SIZE};
use crate::error::MemoryError;

/// Memory-mapped generation block.
#[derive(Debug)]
pub struct MappedIntArray {
    map: RwLock<Option<MmapRaw>>,
    len: usize,
    path: PathBuf,
    writable: bool,
}

impl MappedIntArray {
    /// Create (or truncate) the block file at `path` with `len` zeroed slots
    /// and map it read-write.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<Self, MemoryError> {
        if len == 0 {
            return Err(MemoryError::InvalidLayout {
                reason: "generation array must have at least one slot".to_string(),
            });
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len((len * SLOT_SIZE) as u64)?;

        let map = MmapRaw::map_raw(&file)?;
        tracing::debug!(path = %path.display(), len, "created generation array");

        Ok(Self {
            map: RwLock::new(Some(map)),
            len,
            path,
            writable: true,
        })
    }

    /// Create a uniquely named block file inside `dir`.
    pub fn create_in<P: AsRef<Path>>(dir: P, len: usize) -> Result<Self, MemoryError> {
        let name = format!("generations-{}.bin", Uuid::now_v7().as_simple());
        Self::create(dir.as_ref().join(name), len)
    }

    /// Map an existing block file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len() as usize;

        if size == 0 || size % SLOT_SIZE != 0 {
            return Err(MemoryError::InvalidLayout {
                reason: format!(
                    "{} is {} bytes, expected a non-zero multiple of {}",
                    path.display(),
                    size,
                    SLOT_SIZE
                ),
            });
        }

        let map = MmapOptions::new().map_raw_read_only(&file)?;

        Ok(Self {
            map: RwLock::new(Some(map)),
            len: size / SLOT_SIZE,
            path,
            writable: false,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `value` at `index`. Only valid on the creating side.
    pub fn set(&self, index: usize, value: i32) -> Result<(), MemoryError> {
        self.with_slot(index, |slot| slot.store(value, Ordering::Release))
    }

    /// Bump the counter at `index`, returning the new value.
    pub fn increment(&self, index: usize) -> Result<i32, MemoryError> {
        self.with_slot(index, |slot| {
            slot.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
        })
    }

    /// Flush writes to the backing file.
    pub fn flush(&self) -> Result<(), MemoryError> {
        let guard = self.map.read().unwrap_or_else(PoisonError::into_inner);
        let map = guard.as_ref().ok_or(MemoryError::Closed)?;
        map.flush()?;
        Ok(())
    }

    fn with_slot<R>(&self, index: usize, f: impl FnOnce(&AtomicI32) -> R) -> Result<R, MemoryError> {
        if !self.writable {
            return Err(MemoryError::Io {
                reason: format!("{} is mapped read-only", self.path.display()),
            });
        }
        let guard = self.map.read().unwrap_or_else(PoisonError::into_inner);
        let map = guard.as_ref().ok_or(MemoryError::Closed)?;
        check_index(index, self.len)?;
        // SAFETY: the mapping is writable, page aligned and `index < len`, so
        // the slot is an aligned, in-bounds i32 that lives as long as `guard`.
        let slot = unsafe { &*(map.as_mut_ptr().add(index * SLOT_SIZE) as *const AtomicI32) };
        Ok(f(slot))
    }
}

impl MemoryIntArray for MappedIntArray {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<i32, MemoryError> {
        let guard = self.map.read().unwrap_or_else(PoisonError::into_inner);
        let map = guard.as_ref().ok_or(MemoryError::Closed)?;
        check_index(index, self.len)?;
        // SAFETY: page aligned mapping, `index < len`; atomic loads are
        // permitted on read-only memory for natively supported sizes.
        let slot = unsafe { &*(map.as_ptr().add(index * SLOT_SIZE) as *const AtomicI32) };
        Ok(slot.load(Ordering::Acquire))
    }

    fn close(&self) -> Result<(), MemoryError> {
        let mut guard = self.map.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(map) = guard.take() {
            if self.writable {
                map.flush()?;
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
