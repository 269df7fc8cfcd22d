use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use caravel_core::{Provider, RegionTag};

use crate::errors::Result;

/// Lifecycle state of a cloud VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

impl ServerState {
    /// States that count against provisioning demand when reusing instances.
    pub fn is_active(self) -> bool {
        matches!(self, ServerState::Pending | ServerState::Running)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ServerState::Pending => "pending",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Terminated => "terminated",
            ServerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Exclusive handle to one provisioned cloud VM.
///
/// The control plane holds these as `Arc<dyn Server>` inside its bound-node
/// map and temp-node list; every remote effect on a gateway VM goes through
/// this trait.
#[async_trait]
pub trait Server: Send + Sync {
    /// Stable identifier used to name per-instance log artifacts.
    fn uuid(&self) -> String;

    fn instance_name(&self) -> String;

    fn region_tag(&self) -> RegionTag;

    fn provider(&self) -> Provider {
        self.region_tag().provider()
    }

    fn public_ip(&self) -> String;

    /// Base URL of the gateway control API once the gateway container is up.
    fn gateway_api_url(&self) -> String;

    async fn instance_state(&self) -> ServerState;

    async fn terminate_instance(&self) -> Result<()>;

    /// Run a shell command on the instance, returning its stdout.
    async fn run_command(&self, cmd: &str) -> Result<String>;

    async fn download_file(&self, remote: &str, local: &Path) -> Result<()>;

    /// Arm (or re-arm) the idle auto-shutdown timer.
    async fn enable_auto_shutdown(&self) -> Result<()>;

    async fn init_log_files(&self, log_dir: &Path) -> Result<()>;

    async fn copy_public_key(&self, pub_key: &Path) -> Result<()>;

    /// Start the gateway container and block until its HTTP API is reachable.
    ///
    /// `outgoing_ports` maps peer public IPs to the number of data-plane
    /// connections the gateway should open toward each.
    async fn start_gateway(
        &self,
        outgoing_ports: &HashMap<String, u32>,
        gateway_docker_image: &str,
        use_bbr: bool,
    ) -> Result<()>;

    /// Azure-specific capabilities, when this instance is an Azure VM.
    fn azure(&self) -> Option<&dyn AzureServer> {
        None
    }
}

/// Capabilities only Azure VMs have.
#[async_trait]
pub trait AzureServer: Send + Sync {
    /// Grant the VM's managed identity access to a storage account.
    async fn authorize_storage_account(&self, storage_account: &str) -> Result<()>;
}
