//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Observer, holder and merge loop produce:
//!     → tracing events (structured fields: instance, address, ticket)
//!     → metrics.rs (gauges, counters, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - The library only emits; installing subscribers/recorders is the
//!   binary's job
//! - Metrics are cheap (atomic updates through the facade)

pub mod logging;
pub mod metrics;
