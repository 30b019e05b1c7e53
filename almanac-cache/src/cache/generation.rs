//! Generation tracking for cache invalidation.
//!
//! The settings service bumps a per-namespace counter in a shared array on
//! every change. A [`GenerationTracker`] remembers the last value this
//! process accepted and reports whether the counter has moved since, which
//! is the only signal the cache uses to drop its local values.

use std::fmt;
use std::sync::Arc;

use almanac_core::{GenerationValue, MemoryError, MemoryIntArray, TrackerMaterials};
use chrono::{DateTime, Utc};

/// Callback invoked when the shared array cannot be read or closed.
///
/// Runs on the thread that touched the array, possibly while the owning
/// cache holds its lock, so it must not call back into the cache.
pub type ErrorCallback = Box<dyn Fn(&MemoryError) + Send + Sync>;

/// Tracks one namespace's generation counter in a shared array.
pub struct GenerationTracker {
    array: Arc<dyn MemoryIntArray>,
    index: usize,
    observed: GenerationValue,
    observed_at: DateTime<Utc>,
    on_error: Option<ErrorCallback>,
}

impl GenerationTracker {
    /// Start tracking `array[index]`, taking `generation` as already seen.
    pub fn new(
        array: Arc<dyn MemoryIntArray>,
        index: usize,
        generation: GenerationValue,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        Self {
            array,
            index,
            observed: generation,
            observed_at: Utc::now(),
            on_error,
        }
    }

    /// Build a tracker from service-provided materials.
    ///
    /// Returns `None` if the materials do not address a slot of their array.
    pub fn from_materials(
        materials: TrackerMaterials,
        on_error: Option<ErrorCallback>,
    ) -> Option<Self> {
        let index = materials.usable_index()?;
        Some(Self::new(materials.array, index, materials.generation, on_error))
    }

    /// Check whether the shared generation moved since it was last observed.
    ///
    /// A read failure invokes the error callback and reports a change, which
    /// makes the caller drop anything it cached.
    pub fn is_generation_changed(&mut self) -> bool {
        match self.array.get(self.index) {
            Ok(current) if current == self.observed => false,
            Ok(current) => {
                self.observed = current;
                self.observed_at = Utc::now();
                true
            }
            Err(e) => {
                self.report(&e);
                true
            }
        }
    }

    /// The last generation accepted by this tracker. Performs no I/O.
    pub fn current_generation(&self) -> GenerationValue {
        self.observed
    }

    /// When the current generation was accepted.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Slot of the tracked counter.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Release the shared array handle.
    pub fn destroy(self) {
        if let Err(e) = self.array.close() {
            self.report(&e);
        }
    }

    fn report(&self, error: &MemoryError) {
        if let Some(on_error) = &self.on_error {
            on_error(error);
        }
    }
}

impl fmt::Debug for GenerationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationTracker")
            .field("index", &self.index)
            .field("observed", &self.observed)
            .field("observed_at", &self.observed_at)
            .field("has_error_callback", &self.on_error.is_some())
            .finish()
    }
}
