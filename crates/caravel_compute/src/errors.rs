use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by concrete [`super::Server`] and [`super::CloudProvider`]
/// implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cloud api error: {0}")]
    CloudApi(String),

    #[error("instance {0} has no public ip")]
    MissingPublicIp(String),

    #[error("command `{cmd}` failed on {instance}: {message}")]
    Command {
        instance: String,
        cmd: String,
        message: String,
    },

    #[error("gateway failed to start on {instance}: {message}")]
    GatewayStart { instance: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
