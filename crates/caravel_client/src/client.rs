use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Local;

use caravel_compute::{CloudProvider, Server};
use caravel_core::{GatewayNode, MultipartUploadRecord, Provider, ReplicationJob, Topology};
use caravel_objectstore::ObjectStoreFactory;

use crate::config::ClientConfig;
use crate::errors::Result;
use crate::monitor::{MonitorOptions, TransferStatus};
use crate::provision::ProvisionOptions;

/// Control plane for one replication run.
///
/// Owns the fleet state: `bound_nodes` maps every topology node to the server
/// realizing it, `temp_nodes` holds servers that are provisioned (or reused
/// but surplus) and not yet bound. Every server lives in exactly one of the
/// two until deprovisioned, so teardown can always find it.
pub struct ReplicatorClient {
    pub(crate) topology: Topology,
    pub(crate) config: ClientConfig,
    pub(crate) providers: HashMap<Provider, Arc<dyn CloudProvider>>,
    pub(crate) object_stores: Arc<dyn ObjectStoreFactory>,

    pub(crate) bound_nodes: HashMap<GatewayNode, Arc<dyn Server>>,
    pub(crate) temp_nodes: Vec<Arc<dyn Server>>,
    pub(crate) multipart_upload_requests: Vec<MultipartUploadRecord>,

    /// Shared connection pool for all gateway control API calls.
    pub(crate) http: reqwest::Client,
    pub(crate) transfer_dir: PathBuf,
    client_log: Mutex<File>,
}

impl ReplicatorClient {
    /// Creates the run-scoped transfer directory
    /// (`<log_base>/transfer_logs/<YYYYMMDD_HHMMSS>/`) and opens `client.log`
    /// inside it.
    pub fn new(
        topology: Topology,
        config: ClientConfig,
        providers: impl IntoIterator<Item = Arc<dyn CloudProvider>>,
        object_stores: Arc<dyn ObjectStoreFactory>,
        log_base: impl AsRef<Path>,
    ) -> Result<Self> {
        let transfer_dir = log_base
            .as_ref()
            .join("transfer_logs")
            .join(Local::now().format("%Y%m%d_%H%M%S").to_string());
        std::fs::create_dir_all(&transfer_dir)?;

        let client_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(transfer_dir.join("client.log"))?;

        let http = reqwest::Client::builder()
            .user_agent(crate::gateway::USER_AGENT)
            .build()?;

        Ok(ReplicatorClient {
            topology,
            config,
            providers: providers
                .into_iter()
                .map(|p| (p.provider(), p))
                .collect(),
            object_stores,
            bound_nodes: HashMap::new(),
            temp_nodes: Vec::new(),
            multipart_upload_requests: Vec::new(),
            http,
            transfer_dir,
            client_log: Mutex::new(client_log),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn transfer_dir(&self) -> &Path {
        &self.transfer_dir
    }

    pub fn bound_nodes(&self) -> &HashMap<GatewayNode, Arc<dyn Server>> {
        &self.bound_nodes
    }

    pub fn temp_nodes(&self) -> &[Arc<dyn Server>] {
        &self.temp_nodes
    }

    pub fn multipart_upload_requests(&self) -> &[MultipartUploadRecord] {
        &self.multipart_upload_requests
    }

    /// Full lifecycle of one job: provision the fleet, plan and dispatch the
    /// transfer, monitor it to a terminal state, then deprovision. Teardown
    /// runs even when an earlier phase failed.
    pub async fn run_transfer(
        &mut self,
        job: ReplicationJob,
        provision_opts: &ProvisionOptions,
        monitor_opts: &MonitorOptions,
    ) -> Result<TransferStatus> {
        let outcome = async {
            self.provision_gateways(provision_opts).await?;
            let job = self.run_replication_plan(job).await?;
            self.monitor_transfer(&job, monitor_opts).await
        }
        .await;

        if let Err(e) = self.deprovision_gateways().await {
            tracing::warn!("failed to deprovision gateway fleet: {e}");
            if outcome.is_ok() {
                return Err(e);
            }
        }
        outcome
    }

    /// Append a line to the run's `client.log`.
    pub(crate) fn log_line(&self, message: &str) {
        let mut file = match self.client_log.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "[{}] {}", Local::now().to_rfc3339(), message) {
            tracing::debug!("failed to write client log: {e}");
        }
    }
}
