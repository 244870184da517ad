//! Service instance membership tracking and consistent-hash routing.

pub mod admin;
pub mod config;
pub mod eviction;
pub mod health;
pub mod lifecycle;
pub mod membership;
pub mod observability;
pub mod registry;
pub mod routing;

pub use config::{ManagerConfig, MembershipConfig};
pub use lifecycle::{Shutdown, ShutdownSignal};
pub use membership::{ClientError, Instance, InstanceStatus, LookupError, MembershipClient};
pub use registry::{ConsulRegistry, MemoryRegistry, Registry};
