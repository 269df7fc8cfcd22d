//! # Caravel Client
//!
//! `caravel_client` is the control plane of a multi-cloud bulk object
//! replication service. Given an overlay [`Topology`](caravel_core::Topology)
//! and a [`ReplicationJob`](caravel_core::ReplicationJob), the
//! [`ReplicatorClient`] provisions a fleet of gateway VMs across clouds, plans
//! the transfer as chunk batches dispatched to source gateways over HTTP,
//! polls the fleet's chunk-state logs until the transfer reaches a terminal
//! state, finalizes multipart uploads, and tears the fleet back down.
//!
//! Cloud SDKs and object stores are reached through the trait seams in
//! [`caravel_compute`] and [`caravel_objectstore`]; this crate never talks to
//! a cloud API directly.
pub mod errors;
pub use errors::{Error, Result};

mod client;
pub use client::ReplicatorClient;

mod config;
pub use config::ClientConfig;

mod gateway;
pub use gateway::{ChunkStatusEntry, CompressionProfile, GatewayClient};

mod provision;
pub use provision::ProvisionOptions;

mod plan;

mod monitor;
pub use monitor::{ChunkStatusRecord, MonitorOptions, TransferStatus};

pub mod profile;
