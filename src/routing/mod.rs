//! Key routing subsystem.
//!
//! # Data Flow
//! ```text
//! Membership transition (Absent ↔ Alive/Pending)
//!     → ring.rs add_node / remove_node on every ring
//!
//! data_holder(key)
//!     → hasher.rs hash(key)
//!     → ring.rs anchor bucket lookup
//!     → node name → instance table lookup
//! ```
//!
//! # Design Decisions
//! - Rings hold names only; addresses and status live in the instance table
//! - AnchorHash buckets give uniform load without virtual points
//! - Each backup ring uses a different hash function to decorrelate remapping

pub mod hasher;
pub mod ring;

pub use hasher::{HashAlgorithm, KeyHasher};
pub use ring::{HashRing, DEFAULT_CAPACITY};
