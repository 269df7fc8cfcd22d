use std::fmt;

use serde::{Deserialize, Serialize};

use crate::region::RegionTag;

/// A contiguous byte range of a source object, transferred as a unit.
///
/// `part_number` and `upload_id` are only present when the chunk belongs to a
/// multipart upload against the destination object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: u64,
    pub src_key: String,
    pub dest_key: String,
    pub file_offset_bytes: u64,
    pub chunk_length_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
}

/// Where a source gateway reads chunk bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ObjectStore,
    Random,
}

/// Where a sink gateway writes chunk bytes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestKind {
    ObjectStore,
    SaveLocal,
}

/// A [`Chunk`] plus the transfer context a source gateway needs to move it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub chunk: Chunk,
    pub src_region: RegionTag,
    pub dst_region: RegionTag,
    pub src_type: SourceKind,
    pub dst_type: DestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_random_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_object_store_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_object_store_bucket: Option<String>,
}

/// Lifecycle states a gateway reports for a chunk.
///
/// `UploadComplete` observed at a sink is the only terminal success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Registered,
    DownloadInProgress,
    Downloaded,
    UploadInProgress,
    UploadComplete,
    Failed,
}

impl ChunkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkState::Registered => "registered",
            ChunkState::DownloadInProgress => "download_in_progress",
            ChunkState::Downloaded => "downloaded",
            ChunkState::UploadInProgress => "upload_in_progress",
            ChunkState::UploadComplete => "upload_complete",
            ChunkState::Failed => "failed",
        }
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChunkRequest {
        ChunkRequest {
            chunk: Chunk {
                chunk_id: 7,
                src_key: "data/in".to_string(),
                dest_key: "data/out".to_string(),
                file_offset_bytes: 4_000_000,
                chunk_length_bytes: 2_000_000,
                part_number: Some(2),
                upload_id: Some("upload-123".to_string()),
            },
            src_region: "aws:us-east-1".parse().unwrap(),
            dst_region: "gcp:us-central1".parse().unwrap(),
            src_type: SourceKind::ObjectStore,
            dst_type: DestKind::ObjectStore,
            src_random_size_mb: None,
            src_object_store_bucket: Some("src-bucket".to_string()),
            dst_object_store_bucket: Some("dst-bucket".to_string()),
        }
    }

    #[test]
    fn chunk_request_json_round_trip() {
        let original = request();
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: ChunkRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn wire_enums_use_snake_case() {
        let encoded = serde_json::to_value(request()).unwrap();
        assert_eq!(encoded["src_type"], "object_store");
        assert_eq!(encoded["dst_type"], "object_store");
        assert_eq!(encoded["src_region"], "aws:us-east-1");

        let state: ChunkState = serde_json::from_str("\"upload_complete\"").unwrap();
        assert_eq!(state, ChunkState::UploadComplete);
        assert_eq!(state.to_string(), "upload_complete");
    }
}
