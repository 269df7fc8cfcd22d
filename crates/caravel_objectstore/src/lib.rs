//! Provides a simple abstraction over destination object stores.
//!
//! The control plane only touches the multipart-upload control surface of a
//! store: the planner initiates uploads before dispatching chunk requests, and
//! the monitor completes them once every part has landed. Byte movement is the
//! gateway data plane's job and never passes through this crate.
use std::sync::Arc;

use async_trait::async_trait;

use caravel_core::RegionTag;

pub mod config;
pub mod errors;
pub(crate) mod s3;

#[doc(hidden)]
pub use config::Config;
#[doc(hidden)]
pub use errors::{Error, Result};

/// Multipart-upload control surface of one (region, bucket) pair.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Begin a multipart upload for `key`, returning the store-assigned
    /// upload id.
    async fn initiate_multipart_upload(&self, key: &str) -> Result<String>;

    /// Complete a multipart upload from its ordered part numbers.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[u32],
    ) -> Result<()>;
}

/// Opens [`ObjectStore`] handles for (region, bucket) pairs on demand.
///
/// The client holds a single factory; the planner and monitor open handles as
/// jobs reference buckets.
#[async_trait]
pub trait ObjectStoreFactory: Send + Sync + 'static {
    async fn open(&self, region: &RegionTag, bucket: &str) -> Result<Arc<dyn ObjectStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // validate object safety
    struct Whatever {
        objectstore: Box<dyn ObjectStore>,
        factory: Box<dyn ObjectStoreFactory>,
    }
}
