//! service-core: Shared infrastructure for the authz workspace.
pub mod config;
pub mod error;
pub mod observability;

pub use http;
pub use serde;
pub use tracing;
