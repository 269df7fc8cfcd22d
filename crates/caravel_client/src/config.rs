use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use caravel_compute::ProvisionSpec;
use caravel_core::Provider;

use crate::errors::{Error, Result};

/// Fleet shape configuration: which instance class each cloud provisions and
/// which gateway image the fleet runs.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_gateway_docker_image")]
    pub gateway_docker_image: String,
    #[serde(default = "default_aws_instance_class")]
    pub aws_instance_class: String,
    #[serde(default = "default_azure_instance_class")]
    pub azure_instance_class: String,
    #[serde(default = "default_gcp_instance_class")]
    pub gcp_instance_class: String,
    #[serde(default = "default_true")]
    pub gcp_use_premium_network: bool,
}

fn default_gateway_docker_image() -> String {
    "ghcr.io/caravel-project/gateway:latest".to_string()
}

fn default_aws_instance_class() -> String {
    "m5.4xlarge".to_string()
}

fn default_azure_instance_class() -> String {
    "Standard_D2_v5".to_string()
}

fn default_gcp_instance_class() -> String {
    "n2-standard-16".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            gateway_docker_image: default_gateway_docker_image(),
            aws_instance_class: default_aws_instance_class(),
            azure_instance_class: default_azure_instance_class(),
            gcp_instance_class: default_gcp_instance_class(),
            gcp_use_premium_network: default_true(),
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut s = String::new();
        file.read_to_string(&mut s)?;
        serde_yaml::from_str(&s)
            .map_err(|e| Error::Configuration(format!("invalid client config: {e}")))
    }

    pub fn instance_class(&self, provider: Provider) -> &str {
        match provider {
            Provider::Aws => &self.aws_instance_class,
            Provider::Azure => &self.azure_instance_class,
            Provider::Gcp => &self.gcp_instance_class,
        }
    }

    pub fn provision_spec(&self, provider: Provider) -> ProvisionSpec {
        ProvisionSpec {
            instance_type: self.instance_class(provider).to_string(),
            premium_network: provider == Provider::Gcp && self.gcp_use_premium_network,
        }
    }
}
