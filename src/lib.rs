use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[source] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("IO Error: {0}")]
    IoError(std::io::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    /// The topology (or an env/file input derived from it) failed validation.
    #[error("Validation Error: {0}")]
    ValidationError(String),

    /// Link setup failed: veth creation, vxlan creation, remote resolution.
    #[error("Connectivity Error: {0}")]
    ConnectivityError(String),

    /// A cluster object this component depends on does not exist.
    #[error("Not Found: {0}")]
    NotFound(String),

    /// A bounded wait ran out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A subprocess (`ip`, `tc`, `ethtool`) failed.
    #[error("External Tool Error: {0}")]
    ExternalToolError(String),

    /// NB: this is a catch-all for any other errors
    #[error("Other Error: {0}")]
    OtherError(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod conditions;
pub mod constants;
pub mod crd;
mod events_helper;
pub mod launcher;
pub mod topology_controller;
pub mod util;
pub use events_helper::*;

/// Log and trace integrations
pub mod telemetry;
