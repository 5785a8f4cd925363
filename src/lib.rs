//! Cloud node lifecycle operator
//!
//! Bridges the Kubernetes view of cluster nodes with an external cloud
//! provider: enriches freshly registered nodes with cloud metadata,
//! keeps reported network addresses in sync with the provider, and
//! deletes nodes whose backing instance no longer exists.

pub mod cloud;
pub mod config;
pub mod controller;
pub mod error;

pub use crate::error::{Error, Result};
