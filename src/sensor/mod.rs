//! Turbidity sensor ingestion.
//!
//! The serial reader runs on its own thread, classifies each line coming from
//! the device and publishes the latest reading into a shared single-slot store
//! that the HTTP layer reads from.

pub mod serial;
pub mod store;

// Re-export commonly used items
pub use serial::{parse_line, LineOutcome, SerialConfig, SerialReader, SerialReaderHandle};
pub use store::{ReadOutcome, ReadingStore};

/// Marker that identifies a turbidity line from the device.
pub const TURBIDITY_MARKER: &str = "Turbidity:";
