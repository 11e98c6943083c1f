//! Background price synchronization.

pub mod price_sync;

pub use price_sync::{PassOutcome, PassReport, PriceSyncService, SyncError, SyncStatus};
