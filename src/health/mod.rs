//! Health observation subsystem.
//!
//! # Data Flow
//! ```text
//! Registry (observer.rs):
//!     Interval tick (first tick fires immediately)
//!     → Query passing entries for the tracked service
//!     → Diff against the previous snapshot
//!     → Replace snapshot in full
//!     → Emit Down changes, then Up changes (bounded channel)
//! ```
//!
//! # Design Decisions
//! - A full channel blocks the poll loop instead of dropping events
//! - Registry failures skip one cycle; the snapshot is left as it was
//! - Shutdown interrupts the tick wait, the fetch and the emission

pub mod observer;

pub use observer::{diff, HealthObserver, ObserverError, SnapshotDiff};
