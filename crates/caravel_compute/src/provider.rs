use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use caravel_core::Provider;

use crate::errors::Result;
use crate::server::{Server, ServerState};

/// Instance listing filter used when reusing an existing fleet.
#[derive(Debug, Clone)]
pub struct InstanceFilter {
    pub tags: HashMap<String, String>,
    pub instance_type: String,
    pub states: Vec<ServerState>,
}

impl InstanceFilter {
    /// Matches gateway instances of the given class that are pending or
    /// running.
    pub fn gateways(instance_type: impl Into<String>) -> Self {
        InstanceFilter {
            tags: HashMap::from([("caravel".to_string(), "true".to_string())]),
            instance_type: instance_type.into(),
            states: vec![ServerState::Pending, ServerState::Running],
        }
    }
}

/// Instance shape to provision. `premium_network` is only meaningful on GCP.
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub instance_type: String,
    pub premium_network: bool,
}

/// Façade over one cloud's SDK wrapper.
///
/// All setup operations are idempotent: the provisioner re-invokes them on
/// every run and relies on the wrapper to tolerate existing resources.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether credentials for this cloud are configured and usable.
    fn credentials_enabled(&self) -> bool;

    /// Account-wide setup: IAM role with object-store access (AWS), SSH key
    /// and resource group (Azure), SSH key plus default network and firewall
    /// (GCP).
    async fn setup_account(&self) -> Result<()>;

    /// Per-subregion setup: VPC creation, client CIDR admission, and keyfile
    /// provisioning on AWS; a no-op elsewhere.
    async fn setup_subregion(&self, subregion: &str) -> Result<()>;

    /// List instances in `subregion` matching `filter`.
    async fn matching_instances(
        &self,
        subregion: &str,
        filter: &InstanceFilter,
    ) -> Result<Vec<Arc<dyn Server>>>;

    async fn provision_instance(
        &self,
        subregion: &str,
        spec: &ProvisionSpec,
    ) -> Result<Arc<dyn Server>>;

    /// Admit `ip` through the subregion's gateway security group.
    async fn admit_ip(&self, subregion: &str, ip: &str) -> Result<()>;

    /// Revoke a previously admitted `ip`.
    async fn revoke_ip(&self, subregion: &str, ip: &str) -> Result<()>;
}
