//! Membership subsystem.
//!
//! # Data Flow
//! ```text
//! HealthObserver ──InstanceChange──┐
//!                                  ├─→ client.rs merge loop ─→ table.rs (write lock)
//! PendingHolder  ──Eviction────────┘        │
//!        ↑                                  │
//!        └──── add on Alive → Pending ──────┤
//!        └──── remove on Pending → Alive ───┘
//!
//! Readers (any task):
//!     instances / data_holder / data_holders → table.rs (read lock)
//! ```
//!
//! # Design Decisions
//! - One reader/writer lock covers the table and every ring, so readers
//!   never see a member without its ring points or the reverse
//! - Ring membership follows Absent ↔ Alive only; Pending members drain
//! - Lookup misses are a retryable `LookupError`, not a run failure

pub mod client;
pub mod instance;
pub mod table;

pub use client::{ClientError, MembershipClient};
pub use instance::{Endpoint, Instance, InstanceChange, InstanceStatus};
pub use table::{IgnoreReason, LookupError, MembershipTable, Transition};
