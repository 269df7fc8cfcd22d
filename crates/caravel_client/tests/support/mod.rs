#![allow(dead_code)]
//! In-memory fleet for exercising the control plane: mock cloud providers and
//! servers, a mock object store, and an axum stub standing in for the gateway
//! control API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use caravel_client::{ClientConfig, ReplicatorClient};
use caravel_compute::{
    AzureServer, CloudProvider, InstanceFilter, ProvisionSpec, Server, ServerState,
};
use caravel_compute::Result as ComputeResult;
use caravel_core::{ChunkRequest, Provider, RegionTag, ReplicationJob, Topology};
use caravel_objectstore::Result as StoreResult;
use caravel_objectstore::{ObjectStore, ObjectStoreFactory};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .try_init();
}

// ---------------------------------------------------------------------------
// stub gateway HTTP API

#[derive(Default)]
pub struct GatewayState {
    pub chunk_requests: Mutex<Vec<ChunkRequest>>,
    pub errors: Mutex<Vec<String>>,
    pub status_log: Mutex<Vec<Value>>,
    pub reject_chunk_requests: AtomicBool,
    pub shutdowns: AtomicUsize,
}

/// One in-process gateway control API endpoint.
pub struct StubGateway {
    pub state: Arc<GatewayState>,
    pub url: String,
}

impl StubGateway {
    pub async fn spawn() -> StubGateway {
        let state = Arc::new(GatewayState::default());
        let app = Router::new()
            .route("/api/v1/chunk_requests", post(post_chunk_requests))
            .route("/api/v1/chunk_status_log", get(get_chunk_status_log))
            .route("/api/v1/errors", get(get_errors))
            .route("/api/v1/profile/compression", get(get_compression_profile))
            .route("/api/v1/profile/socket/receiver", get(get_socket_profile))
            .route("/api/v1/shutdown", post(post_shutdown))
            .with_state(state.clone());

        let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
            .serve(app.into_make_service());
        let url = format!("http://{}", server.local_addr());
        tokio::spawn(server);

        StubGateway { state, url }
    }

    /// Append one chunk-state log entry, as the data plane would.
    pub fn push_status(&self, chunk_id: u64, state: &str, time: &str) {
        self.state.status_log.lock().unwrap().push(json!({
            "chunk_id": chunk_id,
            "state": state,
            "time": time,
        }));
    }

    pub fn push_error(&self, message: &str) {
        self.state.errors.lock().unwrap().push(message.to_string());
    }

    pub fn received_chunk_ids(&self) -> Vec<u64> {
        self.state
            .chunk_requests
            .lock()
            .unwrap()
            .iter()
            .map(|cr| cr.chunk.chunk_id)
            .collect()
    }
}

async fn post_chunk_requests(
    State(state): State<Arc<GatewayState>>,
    Json(requests): Json<Vec<ChunkRequest>>,
) -> impl IntoResponse {
    if state.reject_chunk_requests.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "gateway rejected batch").into_response();
    }
    state.chunk_requests.lock().unwrap().extend(requests);
    StatusCode::OK.into_response()
}

async fn get_chunk_status_log(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let log = state.status_log.lock().unwrap().clone();
    Json(json!({ "chunk_status_log": log }))
}

async fn get_errors(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let errors = state.errors.lock().unwrap().clone();
    Json(json!({ "errors": errors }))
}

async fn get_compression_profile(State(_state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({ "compressed_bytes_sent": 0, "uncompressed_bytes_sent": 0 }))
}

async fn get_socket_profile(State(_state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({ "receiver": [] }))
}

async fn post_shutdown(State(state): State<Arc<GatewayState>>) -> StatusCode {
    state.shutdowns.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// mock compute layer

static NEXT_SERVER_ID: AtomicUsize = AtomicUsize::new(0);

pub struct MockServer {
    uuid: String,
    name: String,
    region: RegionTag,
    ip: String,
    api_url: String,
    pub state: Mutex<ServerState>,
    pub commands: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<(String, PathBuf)>>,
    pub gateway_started: AtomicBool,
    pub auto_shutdown_enabled: AtomicBool,
    pub authorized_accounts: Mutex<Vec<String>>,
}

impl MockServer {
    pub fn new(region: &RegionTag, api_url: &str) -> Arc<MockServer> {
        let id = NEXT_SERVER_ID.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockServer {
            uuid: format!("mock-{id}"),
            name: format!("caravel-{}-{id}", region.subregion()),
            region: region.clone(),
            ip: format!("10.1.0.{}", id % 250 + 1),
            api_url: api_url.to_string(),
            state: Mutex::new(ServerState::Running),
            commands: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            gateway_started: AtomicBool::new(false),
            auto_shutdown_enabled: AtomicBool::new(false),
            authorized_accounts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Server for MockServer {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn instance_name(&self) -> String {
        self.name.clone()
    }

    fn region_tag(&self) -> RegionTag {
        self.region.clone()
    }

    fn public_ip(&self) -> String {
        self.ip.clone()
    }

    fn gateway_api_url(&self) -> String {
        self.api_url.clone()
    }

    async fn instance_state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    async fn terminate_instance(&self) -> ComputeResult<()> {
        *self.state.lock().unwrap() = ServerState::Terminated;
        Ok(())
    }

    async fn run_command(&self, cmd: &str) -> ComputeResult<String> {
        self.commands.lock().unwrap().push(cmd.to_string());
        Ok(String::new())
    }

    async fn download_file(&self, remote: &str, local: &Path) -> ComputeResult<()> {
        std::fs::write(local, b"")?;
        self.downloads
            .lock()
            .unwrap()
            .push((remote.to_string(), local.to_path_buf()));
        Ok(())
    }

    async fn enable_auto_shutdown(&self) -> ComputeResult<()> {
        self.auto_shutdown_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn init_log_files(&self, _log_dir: &Path) -> ComputeResult<()> {
        Ok(())
    }

    async fn copy_public_key(&self, _pub_key: &Path) -> ComputeResult<()> {
        Ok(())
    }

    async fn start_gateway(
        &self,
        _outgoing_ports: &HashMap<String, u32>,
        _gateway_docker_image: &str,
        _use_bbr: bool,
    ) -> ComputeResult<()> {
        self.gateway_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn azure(&self) -> Option<&dyn AzureServer> {
        (self.region.provider() == Provider::Azure).then_some(self as &dyn AzureServer)
    }
}

#[async_trait]
impl AzureServer for MockServer {
    async fn authorize_storage_account(&self, storage_account: &str) -> ComputeResult<()> {
        self.authorized_accounts
            .lock()
            .unwrap()
            .push(storage_account.to_string());
        Ok(())
    }
}

pub struct MockCloudProvider {
    provider: Provider,
    enabled: bool,
    /// Instances returned by reuse listings, keyed by subregion.
    pub existing: Mutex<HashMap<String, Vec<Arc<MockServer>>>>,
    /// Gateway API URLs for newly provisioned servers, keyed by subregion.
    pub api_urls: Mutex<HashMap<String, String>>,
    pub provisioned: Mutex<Vec<Arc<MockServer>>>,
    pub admitted: Mutex<Vec<(String, String)>>,
    pub revoked: Mutex<Vec<(String, String)>>,
    pub account_setups: AtomicUsize,
    pub subregion_setups: Mutex<Vec<String>>,
    pub fail_provision: AtomicBool,
}

impl MockCloudProvider {
    fn with_enabled(provider: Provider, enabled: bool) -> Arc<MockCloudProvider> {
        Arc::new(MockCloudProvider {
            provider,
            enabled,
            existing: Mutex::new(HashMap::new()),
            api_urls: Mutex::new(HashMap::new()),
            provisioned: Mutex::new(Vec::new()),
            admitted: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
            account_setups: AtomicUsize::new(0),
            subregion_setups: Mutex::new(Vec::new()),
            fail_provision: AtomicBool::new(false),
        })
    }

    pub fn new(provider: Provider) -> Arc<MockCloudProvider> {
        MockCloudProvider::with_enabled(provider, true)
    }

    pub fn without_credentials(provider: Provider) -> Arc<MockCloudProvider> {
        MockCloudProvider::with_enabled(provider, false)
    }

    pub fn set_api_url(&self, subregion: &str, url: &str) {
        self.api_urls
            .lock()
            .unwrap()
            .insert(subregion.to_string(), url.to_string());
    }

    pub fn stage_existing(&self, subregion: &str, server: Arc<MockServer>) {
        self.existing
            .lock()
            .unwrap()
            .entry(subregion.to_string())
            .or_default()
            .push(server);
    }
}

#[async_trait]
impl CloudProvider for MockCloudProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn credentials_enabled(&self) -> bool {
        self.enabled
    }

    async fn setup_account(&self) -> ComputeResult<()> {
        self.account_setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn setup_subregion(&self, subregion: &str) -> ComputeResult<()> {
        self.subregion_setups
            .lock()
            .unwrap()
            .push(subregion.to_string());
        Ok(())
    }

    async fn matching_instances(
        &self,
        subregion: &str,
        _filter: &InstanceFilter,
    ) -> ComputeResult<Vec<Arc<dyn Server>>> {
        Ok(self
            .existing
            .lock()
            .unwrap()
            .get(subregion)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|s| s as Arc<dyn Server>)
            .collect())
    }

    async fn provision_instance(
        &self,
        subregion: &str,
        _spec: &ProvisionSpec,
    ) -> ComputeResult<Arc<dyn Server>> {
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(caravel_compute::Error::CloudApi(
                "instance quota exceeded".to_string(),
            ));
        }
        let region = RegionTag::new(self.provider, subregion)
            .map_err(|e| caravel_compute::Error::CloudApi(e.to_string()))?;
        let url = self
            .api_urls
            .lock()
            .unwrap()
            .get(subregion)
            .cloned()
            .unwrap_or_else(|| "http://127.0.0.1:9".to_string());
        let server = MockServer::new(&region, &url);
        self.provisioned.lock().unwrap().push(server.clone());
        Ok(server)
    }

    async fn admit_ip(&self, subregion: &str, ip: &str) -> ComputeResult<()> {
        self.admitted
            .lock()
            .unwrap()
            .push((subregion.to_string(), ip.to_string()));
        Ok(())
    }

    async fn revoke_ip(&self, subregion: &str, ip: &str) -> ComputeResult<()> {
        self.revoked
            .lock()
            .unwrap()
            .push((subregion.to_string(), ip.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// mock object store

#[derive(Default)]
pub struct MockObjectStore {
    next_upload: AtomicUsize,
    pub initiated: Mutex<Vec<(String, String)>>,
    pub completed: Mutex<Vec<(String, String, Vec<u32>)>>,
    pub fail_complete: AtomicBool,
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn initiate_multipart_upload(&self, key: &str) -> StoreResult<String> {
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.initiated
            .lock()
            .unwrap()
            .push((key.to_string(), upload_id.clone()));
        Ok(upload_id)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[u32],
    ) -> StoreResult<()> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(caravel_objectstore::Error::MissingUploadId(key.to_string()));
        }
        self.completed.lock().unwrap().push((
            key.to_string(),
            upload_id.to_string(),
            parts.to_vec(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockObjectStoreFactory {
    pub stores: Mutex<HashMap<(String, String), Arc<MockObjectStore>>>,
}

impl MockObjectStoreFactory {
    pub fn new() -> Arc<MockObjectStoreFactory> {
        Arc::new(MockObjectStoreFactory::default())
    }

    pub fn store(&self, region: &RegionTag, bucket: &str) -> Option<Arc<MockObjectStore>> {
        self.stores
            .lock()
            .unwrap()
            .get(&(region.to_string(), bucket.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ObjectStoreFactory for MockObjectStoreFactory {
    async fn open(&self, region: &RegionTag, bucket: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        let store = self
            .stores
            .lock()
            .unwrap()
            .entry((region.to_string(), bucket.to_string()))
            .or_default()
            .clone();
        Ok(store as Arc<dyn ObjectStore>)
    }
}

// ---------------------------------------------------------------------------
// fixtures

pub fn region(tag: &str) -> RegionTag {
    tag.parse().unwrap()
}

pub fn new_client(
    topology: Topology,
    providers: Vec<Arc<dyn CloudProvider>>,
    factory: Arc<dyn ObjectStoreFactory>,
    log_base: &Path,
) -> ReplicatorClient {
    ReplicatorClient::new(topology, ClientConfig::default(), providers, factory, log_base)
        .expect("client construction should succeed")
}

/// An object-store-to-object-store job over the given regions.
pub fn object_store_job(source_region: &str, dest_region: &str) -> ReplicationJob {
    ReplicationJob {
        source_region: region(source_region),
        dest_region: region(dest_region),
        source_bucket: Some("src-bucket".to_string()),
        dest_bucket: Some("dst-bucket".to_string()),
        src_objs: vec!["obj".to_string()],
        dest_objs: vec!["obj".to_string()],
        obj_sizes: Some(HashMap::from([("obj".to_string(), 10_000_000)])),
        random_chunk_size_mb: None,
        max_chunk_size_mb: None,
        chunk_requests: None,
    }
}
