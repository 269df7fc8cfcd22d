//! Transfer monitoring: poll the fleet's chunk-state logs until the job
//! completes, a gateway reports an error, or the transfer times out. Artifact
//! collection and gateway shutdown run on every exit path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;

use caravel_compute::Server;
use caravel_core::fanout::{do_parallel, do_parallel_settled, Parallelism};
use caravel_core::{ChunkRequest, ChunkState, GatewayNode, RegionTag, ReplicationJob, GB};

use crate::client::ReplicatorClient;
use crate::errors::{Error, Result};
use crate::gateway::GatewayClient;
use crate::profile;

/// Transfers with no completed bytes after this long are declared stalled.
const STALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Switches for one monitoring run.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub show_spinner: bool,
    /// Emit a progress line at most this often.
    pub log_interval: Option<Duration>,
    /// Hard deadline for the whole transfer.
    pub time_limit: Option<Duration>,
    /// POST `/api/v1/shutdown` to every gateway during cleanup.
    pub cleanup_gateway: bool,
    /// Snapshot the planned job as JSON into the transfer dir.
    pub save_log: bool,
    /// Write the final chunk-status table as CSV plus a Chrome Trace Event
    /// profile.
    pub write_profile: bool,
    /// Slow but useful for debugging.
    pub write_socket_profile: bool,
    /// Dump and download each gateway container's stdout/stderr.
    pub copy_gateway_logs: bool,
    /// Finalize multipart uploads on success.
    pub multipart: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        MonitorOptions {
            show_spinner: false,
            log_interval: None,
            time_limit: None,
            cleanup_gateway: true,
            save_log: true,
            write_profile: true,
            write_socket_profile: false,
            copy_gateway_logs: true,
            multipart: false,
        }
    }
}

/// Terminal outcome of a monitored transfer.
///
/// Gateway-reported errors and timeouts are ordinary outcomes, not `Err`
/// values; the caller decides whether to retry or surface them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "monitor_status", rename_all = "snake_case")]
pub enum TransferStatus {
    Completed {
        completed_chunk_ids: Vec<u64>,
        total_runtime_s: f64,
        throughput_gbits: f64,
    },
    Error {
        /// Non-empty error lists keyed by instance name.
        errors: HashMap<String, Vec<String>>,
    },
    TimedOut {
        completed_chunk_ids: Vec<u64>,
        total_runtime_s: f64,
        throughput_gbits: f64,
    },
}

impl TransferStatus {
    pub fn monitor_status(&self) -> &'static str {
        match self {
            TransferStatus::Completed { .. } => "completed",
            TransferStatus::Error { .. } => "error",
            TransferStatus::TimedOut { .. } => "timed_out",
        }
    }
}

/// One chunk-state log row annotated with the gateway it came from.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkStatusRecord {
    pub chunk_id: u64,
    pub state: ChunkState,
    pub time: DateTime<Utc>,
    pub region: RegionTag,
    pub instance: u32,
}

impl ReplicatorClient {
    /// Monitor a planned transfer until it reaches a terminal state.
    ///
    /// Artifact collection (compression stats, gateway logs, profiles,
    /// gateway shutdown) runs regardless of how the transfer ended, including
    /// when polling itself failed.
    pub async fn monitor_transfer(
        &self,
        job: &ReplicationJob,
        opts: &MonitorOptions,
    ) -> Result<TransferStatus> {
        let chunk_requests = job.chunk_requests.as_deref().ok_or_else(|| {
            Error::Configuration(
                "job has no chunk requests; run the replication plan first".to_string(),
            )
        })?;

        if opts.save_log {
            let file = std::fs::File::create(self.transfer_dir.join("job.json"))?;
            serde_json::to_writer_pretty(file, job)?;
        }

        let outcome = self.poll_until_terminal(chunk_requests, opts).await;
        self.collect_transfer_artifacts(opts).await;
        outcome
    }

    async fn poll_until_terminal(
        &self,
        chunk_requests: &[ChunkRequest],
        opts: &MonitorOptions,
    ) -> Result<TransferStatus> {
        let total_bytes: u64 = chunk_requests
            .iter()
            .map(|cr| cr.chunk.chunk_length_bytes)
            .sum();
        let sinks = self.topology.sink_instances().to_vec();
        let sink_regions = self.topology.sink_regions();

        let spinner = opts.show_spinner.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_message("Transfer starting");
            pb
        });
        let started = Instant::now();
        let mut last_log: Option<Instant> = None;

        loop {
            // no-op probe on every gateway; refreshes auto-shutdown timers and
            // is non-fatal
            let servers: Vec<Arc<dyn Server>> = self.bound_nodes.values().cloned().collect();
            let probes = do_parallel_settled(servers, Parallelism::Unbounded, |server| {
                async move { server.run_command("echo 1").await }
            })
            .await;
            for (server, outcome) in probes {
                if let Err(e) = outcome {
                    tracing::warn!("liveness probe failed on {}: {e}", server.instance_name());
                }
            }

            let errors = self.check_error_logs().await?;
            if errors.values().any(|v| !v.is_empty()) {
                if let Some(pb) = &spinner {
                    pb.abandon_with_message("Transfer failed with gateway errors");
                }
                let errors = errors.into_iter().filter(|(_, v)| !v.is_empty()).collect();
                self.log_line(&format!("gateway errors reported: {errors:?}"));
                return Ok(TransferStatus::Error { errors });
            }

            let records = self.chunk_status_records().await?;
            if records.is_empty() {
                tracing::warn!("no chunk status log entries yet");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }

            let completed_chunk_ids = completed_chunk_ids(&records, &sinks, &sink_regions);
            let completed_set: HashSet<u64> = completed_chunk_ids.iter().copied().collect();
            let completed_bytes: u64 = chunk_requests
                .iter()
                .filter(|cr| completed_set.contains(&cr.chunk.chunk_id))
                .map(|cr| cr.chunk.chunk_length_bytes)
                .sum();

            let earliest = records.iter().map(|r| r.time).min();
            let latest = records.iter().map(|r| r.time).max();
            let total_runtime_s = match (earliest, latest) {
                (Some(first), Some(last)) => (last - first).num_milliseconds() as f64 / 1000.0,
                _ => 0.0,
            };
            let throughput_gbits = if total_runtime_s > 0.0 {
                completed_bytes as f64 * 8.0 / GB / total_runtime_s
            } else {
                0.0
            };

            let gbits_remaining = (total_bytes - completed_bytes) as f64 * 8.0 / GB;
            let eta = (throughput_gbits > 0.0).then(|| gbits_remaining / throughput_gbits);
            let percent = if total_bytes > 0 {
                completed_bytes as f64 / total_bytes as f64 * 100.0
            } else {
                100.0
            };
            let log_line = format!(
                "{percent:.1}% at {throughput_gbits:.2}Gbit/s ({done}/{total} chunks done, \
                 {done_gb:.2}/{total_gb:.2}GB, ETA={eta})",
                done = completed_chunk_ids.len(),
                total = chunk_requests.len(),
                done_gb = completed_bytes as f64 / GB,
                total_gb = total_bytes as f64 / GB,
                eta = eta.map_or("unknown".to_string(), |e| format!("{}s", e as u64)),
            );
            if let Some(pb) = &spinner {
                pb.set_message(format!("Transferred {log_line}"));
            }

            if completed_chunk_ids.len() == chunk_requests.len() {
                if opts.multipart {
                    self.finalize_multipart_uploads().await?;
                }
                if let Some(pb) = &spinner {
                    pb.finish_with_message(format!("Transfer complete ({log_line})"));
                }
                self.log_line(&format!("transfer complete: {log_line}"));
                return Ok(TransferStatus::Completed {
                    completed_chunk_ids,
                    total_runtime_s,
                    throughput_gbits,
                });
            }

            let elapsed = started.elapsed();
            let over_limit = opts.time_limit.map_or(false, |limit| elapsed > limit);
            let stalled = elapsed > STALL_TIMEOUT && completed_bytes == 0;
            if over_limit || stalled {
                if let Some(pb) = &spinner {
                    pb.abandon_with_message(format!("Transfer timed out ({log_line})"));
                }
                tracing::error!(
                    "transfer timed out, share debug logs from {}",
                    self.transfer_dir.display()
                );
                self.log_line(&format!("transfer timed out: {log_line}"));
                return Ok(TransferStatus::TimedOut {
                    completed_chunk_ids,
                    total_runtime_s,
                    throughput_gbits,
                });
            }

            if let Some(interval) = opts.log_interval {
                if last_log.map_or(true, |t| t.elapsed() >= interval) {
                    last_log = Some(Instant::now());
                    tracing::info!("{log_line}");
                    self.log_line(&log_line);
                }
            }
            let pause = if opts.show_spinner {
                Duration::from_millis(10)
            } else {
                Duration::from_millis(250)
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Fetch every gateway's error log, keyed by instance name.
    pub async fn check_error_logs(&self) -> Result<HashMap<String, Vec<String>>> {
        let servers: Vec<Arc<dyn Server>> = self.bound_nodes.values().cloned().collect();
        let http = &self.http;
        let results = do_parallel(servers, Parallelism::Unbounded, |server| {
            let http = http.clone();
            async move {
                let gateway = GatewayClient::for_server(server.as_ref(), http)?;
                gateway.error_log().await
            }
        })
        .await?;
        Ok(results
            .into_iter()
            .map(|(server, errors)| (server.instance_name(), errors))
            .collect())
    }

    /// Fetch and concatenate every gateway's chunk-state log, annotating each
    /// row with the reporting gateway's topology identity.
    pub async fn chunk_status_records(&self) -> Result<Vec<ChunkStatusRecord>> {
        let nodes: Vec<(GatewayNode, Arc<dyn Server>)> = self
            .bound_nodes
            .iter()
            .map(|(node, server)| (node.clone(), server.clone()))
            .collect();
        let http = &self.http;
        let results = do_parallel(nodes, Parallelism::Unbounded, |(node, server)| {
            let http = http.clone();
            async move {
                let gateway = GatewayClient::for_server(server.as_ref(), http)?;
                let entries = gateway.chunk_status_log().await?;
                Ok::<_, Error>(
                    entries
                        .into_iter()
                        .map(|entry| ChunkStatusRecord {
                            chunk_id: entry.chunk_id,
                            state: entry.state,
                            time: entry.time,
                            region: node.region.clone(),
                            instance: node.instance,
                        })
                        .collect::<Vec<_>>(),
                )
            }
        })
        .await?;
        Ok(results.into_iter().flat_map(|(_, rows)| rows).collect())
    }

    async fn finalize_multipart_uploads(&self) -> Result<()> {
        if self.multipart_upload_requests.is_empty() {
            return Ok(());
        }
        tracing::info!(
            "completing {} multipart uploads",
            self.multipart_upload_requests.len()
        );
        let factory = &self.object_stores;
        do_parallel(
            self.multipart_upload_requests.clone(),
            Parallelism::Unbounded,
            |record| async move {
                let store = factory.open(&record.region, &record.bucket).await?;
                store
                    .complete_multipart_upload(&record.key, &record.upload_id, &record.parts)
                    .await
                    .map_err(|source| Error::MultipartFinalize {
                        key: record.key.clone(),
                        upload_id: record.upload_id.clone(),
                        source,
                    })
            },
        )
        .await?;
        Ok(())
    }

    /// Best-effort post-transfer collection; every step logs and swallows its
    /// own failures so one missing artifact never hides the transfer outcome.
    async fn collect_transfer_artifacts(&self, opts: &MonitorOptions) {
        self.log_compression_stats().await;
        if opts.copy_gateway_logs {
            self.copy_gateway_logs().await;
        }
        if opts.write_profile {
            self.write_transfer_profile().await;
        }
        if opts.write_socket_profile {
            self.write_socket_profiles().await;
        }
        if opts.cleanup_gateway {
            self.shutdown_gateways().await;
        }
        tracing::info!(
            "transfer artifacts collected in {}",
            self.transfer_dir.display()
        );
    }

    async fn log_compression_stats(&self) {
        let source_regions = self.topology.source_regions();
        let servers: Vec<Arc<dyn Server>> = self
            .bound_nodes
            .iter()
            .filter(|(node, _)| source_regions.contains(&node.region))
            .map(|(_, server)| server.clone())
            .collect();
        let http = &self.http;
        let results = do_parallel_settled(servers, Parallelism::Unbounded, |server| {
            let http = http.clone();
            async move {
                GatewayClient::for_server(server.as_ref(), http)?
                    .compression_profile()
                    .await
            }
        })
        .await;

        let mut compressed = 0u64;
        let mut uncompressed = 0u64;
        for (server, outcome) in results {
            match outcome {
                Ok(profile) => {
                    compressed += profile.compressed_bytes_sent;
                    uncompressed += profile.uncompressed_bytes_sent;
                }
                Err(e) => tracing::debug!(
                    "no compression profile from {}: {e}",
                    server.instance_name()
                ),
            }
        }
        let ratio = if uncompressed > 0 {
            compressed as f64 / uncompressed as f64
        } else {
            0.0
        };
        let line = format!(
            "sent {:.2}GB compressed, {:.2}GB uncompressed (ratio {:.2})",
            compressed as f64 / GB,
            uncompressed as f64 / GB,
            ratio
        );
        tracing::info!("{line}");
        self.log_line(&line);
    }

    async fn copy_gateway_logs(&self) {
        let servers: Vec<Arc<dyn Server>> = self.bound_nodes.values().cloned().collect();
        let transfer_dir = self.transfer_dir.clone();
        let results = do_parallel_settled(servers, Parallelism::Unbounded, |server| {
            let transfer_dir = transfer_dir.clone();
            async move {
                server
                    .run_command(
                        "sudo docker logs -t caravel_gateway \
                         2> /tmp/gateway.stderr > /tmp/gateway.stdout",
                    )
                    .await?;
                let uuid = server.uuid();
                server
                    .download_file(
                        "/tmp/gateway.stdout",
                        &transfer_dir.join(format!("gateway_{uuid}.stdout")),
                    )
                    .await?;
                server
                    .download_file(
                        "/tmp/gateway.stderr",
                        &transfer_dir.join(format!("gateway_{uuid}.stderr")),
                    )
                    .await?;
                Ok::<_, caravel_compute::Error>(())
            }
        })
        .await;
        for (server, outcome) in results {
            if let Err(e) = outcome {
                tracing::warn!(
                    "failed to copy gateway logs from {}: {e}",
                    server.instance_name()
                );
            }
        }
    }

    async fn write_transfer_profile(&self) {
        let records = match self.chunk_status_records().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("failed to fetch final chunk status log: {e}");
                return;
            }
        };
        if let Err(e) =
            profile::write_status_csv(&records, &self.transfer_dir.join("chunk_status_df.csv"))
        {
            tracing::warn!("failed to write chunk status csv: {e}");
        }
        let trace = profile::trace_events(&records);
        let path = self
            .transfer_dir
            .join(format!("traceevent_{}.json", uuid::Uuid::new_v4()));
        match serde_json::to_string(&trace) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&path, body) {
                    tracing::warn!("failed to write trace events: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize trace events: {e}"),
        }
    }

    async fn write_socket_profiles(&self) {
        let servers: Vec<Arc<dyn Server>> = self.bound_nodes.values().cloned().collect();
        let http = &self.http;
        let results = do_parallel_settled(servers, Parallelism::Unbounded, |server| {
            let http = http.clone();
            async move {
                GatewayClient::for_server(server.as_ref(), http)?
                    .socket_profile()
                    .await
            }
        })
        .await;
        for (server, outcome) in results {
            match outcome {
                Ok(body) => {
                    let path = self
                        .transfer_dir
                        .join(format!("receiver_socket_profile_{}.json", server.uuid()));
                    if let Err(e) = std::fs::write(&path, body) {
                        tracing::warn!("failed to write socket profile: {e}");
                    }
                }
                Err(e) => tracing::warn!(
                    "failed to fetch socket profile from {}: {e}",
                    server.instance_name()
                ),
            }
        }
    }

    async fn shutdown_gateways(&self) {
        let servers: Vec<Arc<dyn Server>> = self.bound_nodes.values().cloned().collect();
        let http = &self.http;
        do_parallel_settled(servers, Parallelism::Unbounded, |server| {
            let http = http.clone();
            async move {
                GatewayClient::for_server(server.as_ref(), http)?
                    .shutdown()
                    .await;
                Ok::<_, Error>(())
            }
        })
        .await;
    }
}

/// Chunks for which every sink region has observed `upload_complete` at one
/// of its sink gateways. Append-only gateway logs make this set monotonically
/// non-decreasing across polls.
fn completed_chunk_ids(
    records: &[ChunkStatusRecord],
    sinks: &[GatewayNode],
    sink_regions: &HashSet<RegionTag>,
) -> Vec<u64> {
    let mut observed: HashMap<u64, HashSet<&RegionTag>> = HashMap::new();
    for record in records {
        if record.state != ChunkState::UploadComplete {
            continue;
        }
        let at_sink = sinks
            .iter()
            .any(|s| s.region == record.region && s.instance == record.instance);
        if at_sink {
            observed
                .entry(record.chunk_id)
                .or_default()
                .insert(&record.region);
        }
    }

    let mut completed: Vec<u64> = observed
        .into_iter()
        .filter(|(_, regions)| sink_regions.iter().all(|r| regions.contains(r)))
        .map(|(chunk_id, _)| chunk_id)
        .collect();
    completed.sort_unstable();
    completed
}
