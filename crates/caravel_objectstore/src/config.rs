//! ObjectStore configuration

use std::sync::Arc;

use serde::Deserialize;

use super::ObjectStoreFactory;

/// Deserializable config type with constructor that returns
/// [`Arc<dyn ObjectStoreFactory>`] instances.
#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Config {
    S3(super::s3::S3Config),
}

impl Config {
    /// Constructs an instance of [`Arc<dyn ObjectStoreFactory>`] whose
    /// concrete type depends on which variant is present.
    pub fn new_factory(&self) -> Arc<dyn ObjectStoreFactory> {
        match self {
            Self::S3(cfg) => Arc::new(cfg.new_factory()),
        }
    }
}
