//! Replication planning: chunking, multipart initiation, batch partitioning,
//! and dispatch to the source gateways.

use std::collections::HashMap;
use std::sync::Arc;

use caravel_compute::Server;
use caravel_core::fanout::{do_parallel, Parallelism};
use caravel_core::{
    Chunk, ChunkRequest, DestKind, MultipartUploadRecord, Provider, ReplicationJob, SourceKind, MB,
};

use crate::client::ReplicatorClient;
use crate::errors::{Error, Result};
use crate::gateway::GatewayClient;

impl ReplicatorClient {
    /// Plan `job` and dispatch its chunk batches to the source gateways.
    ///
    /// Attaches the flattened chunk-request list to the job and returns it.
    /// Deterministic given the job, topology, and bound fleet; retries are
    /// left to the HTTP client.
    pub async fn run_replication_plan(&mut self, mut job: ReplicationJob) -> Result<ReplicationJob> {
        if job.src_objs.len() != job.dest_objs.len() {
            return Err(Error::Configuration(format!(
                "source and destination object lists differ in length ({} vs {})",
                job.src_objs.len(),
                job.dest_objs.len()
            )));
        }
        let source_instances = self.source_servers()?;

        self.authorize_azure_buckets(&job).await?;

        // calculate object sizes
        let obj_sizes: HashMap<String, u64> = if let Some(sizes) = &job.obj_sizes {
            sizes.clone()
        } else if let Some(random_mb) = job.random_chunk_size_mb {
            job.src_objs
                .iter()
                .map(|obj| (obj.clone(), random_mb * MB))
                .collect()
        } else {
            return Err(Error::Configuration(
                "either obj_sizes or random_chunk_size_mb must be specified".to_string(),
            ));
        };

        let chunks = self.chunk_job(&job, &obj_sizes).await?;
        let chunk_batches = partition_chunks(chunks, source_instances.len());
        for (batch_idx, batch) in chunk_batches.iter().enumerate() {
            tracing::debug!(
                "batch {batch_idx} size: {} with {} chunks",
                batch.iter().map(|c| c.chunk_length_bytes).sum::<u64>(),
                batch.len()
            );
        }

        // wrap each batch's chunks with the job-level transfer context
        let src_type = match job.source_bucket {
            Some(_) => SourceKind::ObjectStore,
            None => SourceKind::Random,
        };
        let dst_type = match job.dest_bucket {
            Some(_) => DestKind::ObjectStore,
            None => DestKind::SaveLocal,
        };
        let sharded: Vec<Vec<ChunkRequest>> = chunk_batches
            .into_iter()
            .map(|batch| {
                batch
                    .into_iter()
                    .map(|chunk| ChunkRequest {
                        chunk,
                        src_region: job.source_region.clone(),
                        dst_region: job.dest_region.clone(),
                        src_type,
                        dst_type,
                        src_random_size_mb: job.random_chunk_size_mb,
                        src_object_store_bucket: job.source_bucket.clone(),
                        dst_object_store_bucket: job.dest_bucket.clone(),
                    })
                    .collect()
            })
            .collect();

        // dispatch one batch per source gateway, in topology order
        tracing::info!(
            "dispatching {} chunk requests to {} source gateways",
            sharded.iter().map(Vec::len).sum::<usize>(),
            source_instances.len()
        );
        let dispatch: Vec<(Arc<dyn Server>, Vec<ChunkRequest>)> = source_instances
            .into_iter()
            .zip(sharded.iter().cloned())
            .collect();
        let http = &self.http;
        do_parallel(dispatch, Parallelism::Unbounded, |(server, batch)| {
            let http = http.clone();
            async move {
                let gateway = GatewayClient::for_server(server.as_ref(), http)?;
                gateway.send_chunk_requests(&batch).await
            }
        })
        .await?;

        job.chunk_requests = Some(sharded.into_iter().flatten().collect());
        self.log_line(&format!(
            "dispatched plan with {} chunk requests",
            job.chunk_requests.as_ref().map_or(0, Vec::len)
        ));
        Ok(job)
    }

    /// Source gateways in topology order.
    fn source_servers(&self) -> Result<Vec<Arc<dyn Server>>> {
        let sources = self.topology.source_instances();
        if sources.is_empty() {
            return Err(Error::Configuration(
                "topology has no source instances".to_string(),
            ));
        }
        sources
            .iter()
            .map(|node| {
                self.bound_nodes.get(node).cloned().ok_or_else(|| {
                    Error::Configuration(format!("source gateway {node} is not provisioned"))
                })
            })
            .collect()
    }

    /// Grant Azure gateways in the job's endpoint regions access to the
    /// job's storage accounts. AWS and GCP access is granted through IAM
    /// policy at provisioning time.
    async fn authorize_azure_buckets(&self, job: &ReplicationJob) -> Result<()> {
        let mut jobs: Vec<(Arc<dyn Server>, String)> = Vec::new();
        for (region, bucket) in [
            (&job.source_region, &job.source_bucket),
            (&job.dest_region, &job.dest_bucket),
        ] {
            if region.provider() != Provider::Azure {
                continue;
            }
            let Some(bucket) = bucket else { continue };
            let account = bucket.split('/').next().unwrap_or(bucket).to_string();
            for (node, server) in &self.bound_nodes {
                if &node.region == region && server.azure().is_some() {
                    jobs.push((server.clone(), account.clone()));
                }
            }
        }
        if jobs.is_empty() {
            return Ok(());
        }

        tracing::info!("authorizing azure gateways against storage accounts");
        do_parallel(jobs, Parallelism::Unbounded, |(server, account)| {
            async move {
                match server.azure() {
                    Some(azure) => azure
                        .authorize_storage_account(&account)
                        .await
                        .map_err(Error::from),
                    None => Ok(()),
                }
            }
        })
        .await?;
        Ok(())
    }

    /// Expand every (src, dest) object pair into chunks, initiating one
    /// multipart upload per object when `max_chunk_size_mb` is set.
    async fn chunk_job(
        &mut self,
        job: &ReplicationJob,
        obj_sizes: &HashMap<String, u64>,
    ) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut idx: u64 = 0;

        for (src_obj, dest_obj) in job.src_objs.iter().zip(job.dest_objs.iter()) {
            let size = *obj_sizes.get(src_obj).ok_or_else(|| {
                Error::Configuration(format!("no size recorded for source object {src_obj}"))
            })?;

            if let Some(max_chunk_mb) = job.max_chunk_size_mb {
                let chunk_size = max_chunk_mb * MB;
                if chunk_size == 0 {
                    return Err(Error::Configuration(
                        "max_chunk_size_mb must be positive".to_string(),
                    ));
                }
                let dest_bucket = job.dest_bucket.as_deref().ok_or_else(|| {
                    Error::Configuration(
                        "multipart transfers require a destination bucket".to_string(),
                    )
                })?;

                let store = self
                    .object_stores
                    .open(&job.dest_region, dest_bucket)
                    .await?;
                let upload_id = store.initiate_multipart_upload(dest_obj).await?;

                // walk the object; the final chunk covers the remainder and an
                // exact multiple of the chunk size produces no trailing empty
                // chunk
                let mut offset = 0u64;
                let mut part_number = 1u32;
                let mut parts = Vec::new();
                while offset < size {
                    let length = chunk_size.min(size - offset);
                    chunks.push(Chunk {
                        chunk_id: idx,
                        src_key: src_obj.clone(),
                        dest_key: dest_obj.clone(),
                        file_offset_bytes: offset,
                        chunk_length_bytes: length,
                        part_number: Some(part_number),
                        upload_id: Some(upload_id.clone()),
                    });
                    parts.push(part_number);
                    idx += 1;
                    part_number += 1;
                    offset += length;
                }

                self.multipart_upload_requests.push(MultipartUploadRecord {
                    region: job.dest_region.clone(),
                    bucket: dest_bucket.to_string(),
                    upload_id,
                    key: dest_obj.clone(),
                    parts,
                });
            } else {
                chunks.push(Chunk {
                    chunk_id: idx,
                    src_key: src_obj.clone(),
                    dest_key: dest_obj.clone(),
                    file_offset_bytes: 0,
                    chunk_length_bytes: size,
                    part_number: None,
                    upload_id: None,
                });
                idx += 1;
            }
        }
        Ok(chunks)
    }
}

/// Longest-processing-time partition: sort chunks by length descending and
/// place each into the batch with the smallest byte total, ties to the lowest
/// batch index. Always returns exactly `n_batches` batches; some may be empty
/// when there are fewer chunks than batches.
fn partition_chunks(mut chunks: Vec<Chunk>, n_batches: usize) -> Vec<Vec<Chunk>> {
    let mut batches: Vec<Vec<Chunk>> = (0..n_batches).map(|_| Vec::new()).collect();
    let mut totals = vec![0u64; n_batches];

    chunks.sort_by(|a, b| b.chunk_length_bytes.cmp(&a.chunk_length_bytes));
    for chunk in chunks {
        let smallest = totals
            .iter()
            .enumerate()
            .min_by_key(|(_, total)| **total)
            .map(|(i, _)| i)
            .unwrap_or(0);
        totals[smallest] += chunk.chunk_length_bytes;
        batches[smallest].push(chunk);
    }
    batches
}
