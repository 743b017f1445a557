//! Benchmark library for isolated server processes
//!
//! This crate provides the core functionality for:
//! - Provisioning a web server or cache inside a container backend
//! - Host port forwarding into the container's private network
//! - Load-generator sweeps across offered request rates
//! - Reducing raw load-generator output into per-rate metric tables

pub mod backend;
pub mod bench;
pub mod error;
pub mod exec;
pub mod models;
pub mod network;
pub mod provision;

pub use error::{BenchError, Result};
pub use models::*;
pub use provision::{Provisioned, ProvisionConfig, Provisioner, TeardownReport};
