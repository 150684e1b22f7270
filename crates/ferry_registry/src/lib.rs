//! OCI distribution API client.
//!
//! [`HttpRegistry`] implements [`ferry_core::RegistryClient`] so either end of a replication can be
//! a remote registry. Beyond the blob and manifest operations the replication engine needs it can
//! ping a registry and walk its catalog and tag lists.
pub mod auth;
pub use auth::{Challenge, Credentials, Scope};

mod client;
pub use client::{HttpRegistry, MAX_REDIRECTS};

mod config;
pub use config::{RegistryConfig, DEFAULT_TIMEOUT_SECS};

mod errors;
pub use errors::{Error, Result};
