use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkRequest;
use crate::region::RegionTag;

/// A bulk replication request: copy `src_objs` from the source bucket to
/// `dest_objs` in the destination bucket.
///
/// `chunk_requests` starts empty and is attached exactly once by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub source_region: RegionTag,
    pub dest_region: RegionTag,
    pub source_bucket: Option<String>,
    pub dest_bucket: Option<String>,
    pub src_objs: Vec<String>,
    pub dest_objs: Vec<String>,
    /// Size in bytes of each source object, keyed by `src_objs` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_sizes: Option<HashMap<String, u64>>,
    /// Size of synthetic chunks when replicating random data (SI megabytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_chunk_size_mb: Option<u64>,
    /// Splits objects into multipart chunks of at most this size (SI megabytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_requests: Option<Vec<ChunkRequest>>,
}

/// One multipart upload the planner initiated against the destination store.
///
/// `parts` holds the part numbers in the order they were assigned; the monitor
/// replays them verbatim when completing the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUploadRecord {
    pub region: RegionTag,
    pub bucket: String,
    pub upload_id: String,
    pub key: String,
    pub parts: Vec<u32>,
}
