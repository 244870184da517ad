//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every ShutdownSignal resolves
//!     → observer, holder and merge loops exit
//!     → MembershipClient::run returns Ok(())
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger()
//! ```
//!
//! # Design Decisions
//! - One cooperative signal shared by all loops; nothing is aborted
//! - Child signals let the client stop its own loops on a sub-loop failure
//!   without tearing down the caller's wider shutdown tree

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
