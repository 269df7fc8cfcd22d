use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("invalid region tag: {0}")]
    InvalidRegionTag(String),

    #[error("topology references unknown gateway node: {0}")]
    UnknownGatewayNode(String),
}
