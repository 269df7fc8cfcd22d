//! # Caravel Compute
//!
//! `caravel_compute` defines the compute-layer seams the control plane drives:
//! a [`Server`] handle owning one cloud VM, and a [`CloudProvider`] façade over
//! each cloud's SDK wrapper. Concrete implementations (AWS, Azure, GCP) live
//! outside the control plane; the provisioner only sees these traits.
pub mod errors;
pub use errors::{Error, Result};

mod server;
pub use server::{AzureServer, Server, ServerState};

mod provider;
pub use provider::{CloudProvider, InstanceFilter, ProvisionSpec};
