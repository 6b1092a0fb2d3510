//! Single-slot store for the most recent turbidity reading.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bit pattern used to mark a store that has never been written.
const UNSET: u64 = u64::MAX;

/// Result of reading the store, with the default policy made explicit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadOutcome {
    /// The latest written value, known to be finite.
    Current(f64),
    /// Nothing usable has been written; callers report the default.
    UseDefault,
}

impl ReadOutcome {
    /// Resolve the outcome to a value, substituting [`ReadingStore::DEFAULT`].
    pub fn value(self) -> f64 {
        match self {
            Self::Current(value) => value,
            Self::UseDefault => ReadingStore::DEFAULT,
        }
    }
}

/// Last-value-wins cell shared between the serial reader and request handlers.
///
/// The value is stored as raw `f64` bits so reads and writes never block.
/// `u64::MAX` is a NaN bit pattern, so it can never collide with a finite
/// reading.
#[derive(Debug)]
pub struct ReadingStore {
    bits: AtomicU64,
}

impl ReadingStore {
    /// Value reported before the first successful reading.
    pub const DEFAULT: f64 = 0.0;

    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(UNSET),
        }
    }

    /// Overwrite the current reading.
    pub fn write(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Read the current reading with its default policy.
    pub fn read_outcome(&self) -> ReadOutcome {
        let bits = self.bits.load(Ordering::Relaxed);
        if bits == UNSET {
            return ReadOutcome::UseDefault;
        }

        let value = f64::from_bits(bits);
        if value.is_finite() {
            ReadOutcome::Current(value)
        } else {
            ReadOutcome::UseDefault
        }
    }

    /// Read the current reading, or `0.0` if none is usable.
    pub fn read(&self) -> f64 {
        self.read_outcome().value()
    }

    /// Whether a finite reading has been published.
    pub fn has_reading(&self) -> bool {
        matches!(self.read_outcome(), ReadOutcome::Current(_))
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new()
    }
}
