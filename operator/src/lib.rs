use async_trait::async_trait;
use kube::runtime::controller::Action;
use manager::Context;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("InvalidQuantity: `{0}` is not a valid storage quantity")]
    InvalidQuantity(String),

    #[error("InvalidDomain: `{0}` is not a valid domain")]
    InvalidDomain(String),

    #[error("InvalidRepoUrl: `{0}` is not a valid repository url")]
    InvalidRepoUrl(String),

    #[error("PluginNotFound: no init plugin named `{0}`")]
    PluginNotFound(String),

    #[error("MissingRequiredField: plugin `{plugin}` requires parameter `{field}`")]
    MissingRequiredField { plugin: String, field: String },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Validation errors cannot be fixed by retrying, only by a spec change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Error::SerializationError(_) | Error::KubeError(_))
    }

    #[must_use]
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serialization".to_string(),
            Error::KubeError(_) => "kube".to_string(),
            Error::InvalidQuantity(_) => "invalid_quantity".to_string(),
            Error::InvalidDomain(_) => "invalid_domain".to_string(),
            Error::InvalidRepoUrl(_) => "invalid_repo_url".to_string(),
            Error::PluginNotFound(_) => "plugin_not_found".to_string(),
            Error::MissingRequiredField { .. } => "missing_required_field".to_string(),
        }
    }
}

#[async_trait]
pub trait Reconciler {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action>;
}

pub use k8s::{COMPONENT, MANAGER, POOL_LABEL};

pub mod applier;
pub mod codeserver;
pub mod codeserverdeployment;
pub mod desired;
pub mod events;
pub mod initplugins;
pub mod random;

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Generated types, for crdgen
pub use k8s::{CodeServer, CodeServerDeployment};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;
