//! Fleet provisioning: realize the overlay topology as running gateway VMs.
//!
//! Phases run sequentially; work within a phase fans out in parallel. Any
//! phase failure aborts provisioning and leaves already-acquired servers in
//! `temp_nodes` (or `bound_nodes`) so `deprovision_gateways` can reclaim them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use caravel_compute::{CloudProvider, InstanceFilter, Server, ServerState};
use caravel_core::fanout::{do_parallel, do_parallel_settled, Parallelism};
use caravel_core::{Provider, RegionTag};

use crate::client::ReplicatorClient;
use crate::errors::{Error, Result};

/// Switches for one provisioning run.
#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    /// Bind matching instances that are already running instead of
    /// provisioning new ones; surplus matches are kept for deprovisioning.
    pub reuse_instances: bool,
    /// Remote directory gateways should write their log files into.
    pub log_dir: Option<PathBuf>,
    /// Public key to authorize for SSH on every gateway.
    pub authorize_ssh_pub_key: Option<PathBuf>,
    /// Enable BBR congestion control on the gateway data plane.
    pub use_bbr: bool,
    /// Ask the data plane to compress chunks in flight.
    pub use_compression: bool,
}

impl ReplicatorClient {
    /// Provision and start the gateway fleet.
    ///
    /// On success every topology node is bound to a running gateway; on
    /// failure the caller must still invoke [`Self::deprovision_gateways`].
    pub async fn provision_gateways(&mut self, opts: &ProvisionOptions) -> Result<()> {
        let regions: Vec<RegionTag> = self
            .topology
            .gateway_nodes()
            .iter()
            .map(|n| n.region.clone())
            .collect();

        // preflight: every provider the topology touches must have usable
        // credentials
        let mut demand: HashMap<Provider, Vec<RegionTag>> = HashMap::new();
        for region in &regions {
            demand
                .entry(region.provider())
                .or_default()
                .push(region.clone());
        }
        let mut clouds: HashMap<Provider, Arc<dyn CloudProvider>> = HashMap::new();
        for provider in demand.keys() {
            match self.providers.get(provider) {
                Some(cloud) if cloud.credentials_enabled() => {
                    clouds.insert(*provider, cloud.clone());
                }
                _ => return Err(Error::MissingCredentials(*provider)),
            }
        }

        self.init_clouds(&demand, &clouds).await?;

        let mut to_provision = regions.clone();
        let mut available: HashMap<RegionTag, Vec<Arc<dyn Server>>> = HashMap::new();
        if opts.reuse_instances {
            self.reuse_existing_instances(&clouds, &mut to_provision, &mut available)
                .await?;
        }

        self.provision_instances(&clouds, to_provision, &mut available)
            .await?;
        self.bind_instances(&mut available)?;
        self.apply_firewall_rules(&regions, &clouds).await?;
        self.start_gateways(opts).await?;

        self.log_line(&format!(
            "provisioned {} gateways ({} surplus kept for teardown)",
            self.bound_nodes.len(),
            self.temp_nodes.len()
        ));
        Ok(())
    }

    /// Per-cloud idempotent initialization: account-wide setup for every
    /// provider in use plus per-subregion setup, all in parallel.
    async fn init_clouds(
        &self,
        demand: &HashMap<Provider, Vec<RegionTag>>,
        clouds: &HashMap<Provider, Arc<dyn CloudProvider>>,
    ) -> Result<()> {
        let mut jobs: Vec<(Arc<dyn CloudProvider>, Option<String>)> = Vec::new();
        for (provider, regions) in demand {
            let cloud = clouds[provider].clone();
            jobs.push((cloud.clone(), None));
            let subregions: HashSet<&str> = regions.iter().map(|r| r.subregion()).collect();
            for subregion in subregions {
                jobs.push((cloud.clone(), Some(subregion.to_string())));
            }
        }

        tracing::info!("initializing cloud accounts and subregions");
        do_parallel(jobs, Parallelism::Unbounded, |(cloud, subregion)| async move {
            let result = match &subregion {
                None => cloud.setup_account().await,
                Some(s) => cloud.setup_subregion(s).await,
            };
            result.map_err(|source| Error::Provision {
                step: "cloud init",
                region: match &subregion {
                    None => cloud.provider().to_string(),
                    Some(s) => format!("{}:{}", cloud.provider(), s),
                },
                source,
            })
        })
        .await?;
        Ok(())
    }

    /// List already-running gateway instances and count them against the
    /// to-provision demand. Every match is staged in `temp_nodes`; surplus
    /// matches simply stay there until deprovisioning.
    async fn reuse_existing_instances(
        &mut self,
        clouds: &HashMap<Provider, Arc<dyn CloudProvider>>,
        to_provision: &mut Vec<RegionTag>,
        available: &mut HashMap<RegionTag, Vec<Arc<dyn Server>>>,
    ) -> Result<()> {
        let unique: HashSet<RegionTag> = to_provision.iter().cloned().collect();
        let jobs: Vec<(Arc<dyn CloudProvider>, RegionTag, InstanceFilter)> = unique
            .into_iter()
            .map(|region| {
                let filter =
                    InstanceFilter::gateways(self.config.instance_class(region.provider()));
                (clouds[&region.provider()].clone(), region, filter)
            })
            .collect();

        tracing::info!("querying clouds for reusable gateway instances");
        let results = do_parallel(
            jobs,
            Parallelism::Unbounded,
            |(cloud, region, filter)| async move {
                cloud
                    .matching_instances(region.subregion(), &filter)
                    .await
                    .map_err(|source| Error::Provision {
                        step: "instance listing",
                        region: region.to_string(),
                        source,
                    })
            },
        )
        .await?;

        for ((_, region, _), instances) in results {
            for server in instances {
                if let Some(pos) = to_provision.iter().position(|r| r == &region) {
                    to_provision.remove(pos);
                }
                tracing::debug!(region = %region, uuid = %server.uuid(), "reusing instance");
                self.temp_nodes.push(server.clone());
                available.entry(region.clone()).or_default().push(server);
            }
        }
        Ok(())
    }

    /// Provision one instance per remaining region slot, in parallel.
    ///
    /// Acquired servers are appended to `temp_nodes` before anything else so
    /// a sibling failure cannot orphan them; only then is the first failure
    /// surfaced.
    async fn provision_instances(
        &mut self,
        clouds: &HashMap<Provider, Arc<dyn CloudProvider>>,
        to_provision: Vec<RegionTag>,
        available: &mut HashMap<RegionTag, Vec<Arc<dyn Server>>>,
    ) -> Result<()> {
        if to_provision.is_empty() {
            return Ok(());
        }
        tracing::info!("provisioning {} gateway instances", to_provision.len());

        let jobs: Vec<(Arc<dyn CloudProvider>, RegionTag)> = to_provision
            .into_iter()
            .map(|region| (clouds[&region.provider()].clone(), region))
            .collect();

        let settled = {
            let config = &self.config;
            do_parallel_settled(jobs, Parallelism::Unbounded, |(cloud, region)| {
                let spec = config.provision_spec(region.provider());
                async move { cloud.provision_instance(region.subregion(), &spec).await }
            })
            .await
        };

        let mut first_error = None;
        let mut fresh = Vec::new();
        for ((_, region), outcome) in settled {
            match outcome {
                Ok(server) => {
                    self.temp_nodes.push(server.clone());
                    available.entry(region).or_default().push(server.clone());
                    fresh.push(server);
                }
                Err(source) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Provision {
                            step: "instance provisioning",
                            region: region.to_string(),
                            source,
                        });
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        do_parallel(fresh, Parallelism::Unbounded, |server| async move {
            server
                .enable_auto_shutdown()
                .await
                .map_err(|source| Error::Provision {
                    step: "auto-shutdown",
                    region: server.region_tag().to_string(),
                    source,
                })
        })
        .await?;
        Ok(())
    }

    /// Bind one instance to every topology node, in topology order.
    fn bind_instances(
        &mut self,
        available: &mut HashMap<RegionTag, Vec<Arc<dyn Server>>>,
    ) -> Result<()> {
        let nodes = self.topology.gateway_nodes().to_vec();
        for node in nodes {
            let server = available
                .get_mut(&node.region)
                .and_then(|bucket| bucket.pop())
                .ok_or_else(|| Error::ProvisionCount {
                    region: node.region.to_string(),
                })?;
            let uuid = server.uuid();
            self.temp_nodes.retain(|s| s.uuid() != uuid);
            self.bound_nodes.insert(node, server);
        }
        Ok(())
    }

    /// Admit every bound gateway's public IP in every AWS subregion of the
    /// topology.
    // TODO: firewall admission for Azure and GCP subregions
    async fn apply_firewall_rules(
        &self,
        regions: &[RegionTag],
        clouds: &HashMap<Provider, Arc<dyn CloudProvider>>,
    ) -> Result<()> {
        let Some(cloud) = clouds.get(&Provider::Aws) else {
            return Ok(());
        };
        let aws_subregions: HashSet<&str> = regions
            .iter()
            .filter(|r| r.provider() == Provider::Aws)
            .map(|r| r.subregion())
            .collect();
        let public_ips: Vec<String> = self.bound_nodes.values().map(|s| s.public_ip()).collect();

        let mut jobs: Vec<(Arc<dyn CloudProvider>, String, String)> = Vec::new();
        for subregion in &aws_subregions {
            for ip in &public_ips {
                jobs.push((cloud.clone(), subregion.to_string(), ip.clone()));
            }
        }

        tracing::info!("applying firewall rules");
        do_parallel(jobs, Parallelism::Unbounded, |(cloud, subregion, ip)| {
            async move {
                cloud
                    .admit_ip(&subregion, &ip)
                    .await
                    .map_err(|source| Error::Provision {
                        step: "firewall admit",
                        region: format!("aws:{subregion}"),
                        source,
                    })
            }
        })
        .await?;
        Ok(())
    }

    /// Start the gateway container on every bound node, wiring each node's
    /// outgoing topology edges to its peers' public IPs.
    async fn start_gateways(&self, opts: &ProvisionOptions) -> Result<()> {
        let mut jobs: Vec<(Arc<dyn Server>, HashMap<String, u32>)> = Vec::new();
        for (node, server) in &self.bound_nodes {
            let mut outgoing_ports = HashMap::new();
            for (peer, num_connections) in self.topology.outgoing_paths(node) {
                let peer_server =
                    self.bound_nodes
                        .get(&peer)
                        .ok_or_else(|| Error::ProvisionCount {
                            region: peer.region.to_string(),
                        })?;
                outgoing_ports.insert(peer_server.public_ip(), num_connections);
            }
            jobs.push((server.clone(), outgoing_ports));
        }

        tracing::info!(
            use_bbr = opts.use_bbr,
            use_compression = opts.use_compression,
            image = %self.config.gateway_docker_image,
            "starting gateway containers"
        );
        let config = &self.config;
        do_parallel(jobs, Parallelism::Unbounded, |(server, outgoing_ports)| {
            let log_dir = opts.log_dir.clone();
            let pub_key = opts.authorize_ssh_pub_key.clone();
            let image = config.gateway_docker_image.clone();
            let use_bbr = opts.use_bbr;
            async move {
                let step = |source| Error::Provision {
                    step: "gateway start",
                    region: server.region_tag().to_string(),
                    source,
                };
                if let Some(dir) = &log_dir {
                    server.init_log_files(dir).await.map_err(step)?;
                }
                if let Some(key) = &pub_key {
                    server.copy_public_key(key).await.map_err(step)?;
                }
                server
                    .start_gateway(&outgoing_ports, &image, use_bbr)
                    .await
                    .map_err(step)
            }
        })
        .await?;
        Ok(())
    }

    /// Tear down every server the client owns, bound or not.
    ///
    /// Safe to call in any state and idempotent: already-terminated servers
    /// are skipped and an empty fleet is a no-op. Firewall revocation errors
    /// are logged and swallowed; termination errors are surfaced only after
    /// every instance has been attempted.
    pub async fn deprovision_gateways(&mut self) -> Result<()> {
        let instances: Vec<Arc<dyn Server>> = self
            .bound_nodes
            .values()
            .cloned()
            .chain(self.temp_nodes.iter().cloned())
            .collect();
        if instances.is_empty() {
            return Ok(());
        }

        // clear gateway IPs from security groups first
        // TODO: firewall revocation for Azure and GCP subregions
        if let Some(cloud) = self.providers.get(&Provider::Aws) {
            let aws_subregions: HashSet<String> = self
                .topology
                .gateway_nodes()
                .iter()
                .filter(|n| n.region.provider() == Provider::Aws)
                .map(|n| n.region.subregion().to_string())
                .collect();
            let mut jobs: Vec<(String, String)> = Vec::new();
            for subregion in &aws_subregions {
                for server in &instances {
                    jobs.push((subregion.clone(), server.public_ip()));
                }
            }
            let results = do_parallel_settled(jobs, Parallelism::Unbounded, |(subregion, ip)| {
                let cloud = cloud.clone();
                async move { cloud.revoke_ip(&subregion, &ip).await }
            })
            .await;
            for ((subregion, ip), outcome) in results {
                if let Err(e) = outcome {
                    tracing::warn!("failed to revoke {ip} from aws:{subregion}: {e}");
                }
            }
        }

        if instances.iter().any(|s| s.provider() == Provider::Azure) {
            tracing::warn!(
                "azure is slow to terminate instances; consider reusing the fleet and \
                 deprovisioning it separately"
            );
        }

        tracing::info!("deprovisioning {} instances", instances.len());
        let results = do_parallel_settled(instances, Parallelism::Unbounded, |server| {
            async move {
                if server.instance_state().await == ServerState::Running {
                    server.terminate_instance().await?;
                    tracing::warn!("deprovisioned {}", server.uuid());
                }
                Ok::<_, caravel_compute::Error>(())
            }
        })
        .await;
        self.temp_nodes.clear();

        let mut first_error = None;
        for (server, outcome) in results {
            if let Err(source) = outcome {
                tracing::warn!("failed to terminate {}: {source}", server.uuid());
                if first_error.is_none() {
                    first_error = Some(Error::Provision {
                        step: "terminate",
                        region: server.region_tag().to_string(),
                        source,
                    });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                self.log_line("deprovisioned gateway fleet");
                Ok(())
            }
        }
    }
}
