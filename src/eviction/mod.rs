//! Grace-period eviction subsystem.
//!
//! # Data Flow
//! ```text
//! Merge loop sees Alive → Down:
//!     → holder.rs add(endpoint)
//!     → scheduler.rs arms a timer tagged by instance name
//!
//! Merge loop sees Pending → Up:
//!     → holder.rs remove(name)
//!     → scheduler.rs cancels the timer
//!
//! Timer elapses uncanceled:
//!     → scheduler.rs fired stream
//!     → holder.rs run loop
//!     → Eviction stream back to the merge loop
//! ```
//!
//! # Design Decisions
//! - At most one armed timer per instance name
//! - Every schedule is identified by a ticket so the consumer can tell a
//!   current removal from one that was already in flight when canceled

pub mod holder;
pub mod scheduler;

pub use holder::{Eviction, EvictionSink, HolderError, PendingHolder};
pub use scheduler::{DelayScheduler, Fired, SchedulerError, Ticket};
