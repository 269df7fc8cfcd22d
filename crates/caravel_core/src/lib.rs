//! # Caravel Core
//!
//! `caravel_core` provides the shared vocabulary between the caravel control plane
//! ([`caravel_client`]) and the interfaces it drives: region identifiers, the chunk
//! and job data model carried over the gateway wire protocol, the overlay topology
//! consumed by the fleet provisioner, and the bounded parallel fan-out primitive
//! used by every orchestration phase.
pub mod errors;
pub use errors::{Error, Result};

mod region;
pub use region::{Provider, RegionTag};

mod chunk;
pub use chunk::{Chunk, ChunkRequest, ChunkState, DestKind, SourceKind};

mod job;
pub use job::{MultipartUploadRecord, ReplicationJob};

mod topology;
pub use topology::{GatewayNode, Topology};

pub mod fanout;

/// Chunk sizes are expressed in SI megabytes on the wire.
pub const MB: u64 = 1_000_000;

/// Throughput is reported in binary gigabytes.
pub const GB: f64 = (1u64 << 30) as f64;
