use thiserror;

use caravel_core::Provider;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credentials not configured for {0} but the topology provisions {0} gateways")]
    MissingCredentials(Provider),

    #[error("{step} failed for {region}: {source}")]
    Provision {
        step: &'static str,
        region: String,
        #[source]
        source: caravel_compute::Error,
    },

    #[error("no instances available to bind in {region}")]
    ProvisionCount { region: String },

    #[error("failed to send chunk requests to gateway {instance}: {body}")]
    Dispatch { instance: String, body: String },

    #[error("gateway {instance} request {path} failed: {body}")]
    GatewayApi {
        instance: String,
        path: String,
        body: String,
    },

    #[error("failed to complete multipart upload {upload_id} for key {key}")]
    MultipartFinalize {
        key: String,
        upload_id: String,
        #[source]
        source: caravel_objectstore::Error,
    },

    #[error("core error: {0}")]
    Core(#[from] caravel_core::Error),

    #[error("compute error: {0}")]
    Compute(#[from] caravel_compute::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] caravel_objectstore::Error),

    #[error("gateway api request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error serializing to value")]
    SerdeJsonToValueError(#[from] serde_json::Error),
}
