pub mod codeserver;
pub mod codeserverdeployment;

pub use codeserver::{CodeServer, CodeServerSpec, CodeServerStatus, ComputeResources, EnvVar, LocalObjectReference};
pub use codeserverdeployment::{CodeServerDeployment, CodeServerDeploymentSpec, CodeServerTemplate};

/// Value of the `app.kubernetes.io/name` label on every generated resource
pub static COMPONENT: &str = "code-server";
/// Field-manager identity and `app.kubernetes.io/managed-by` label value
pub static MANAGER: &str = "code-server-operator";
/// Label linking a pool-owned CodeServer back to its CodeServerDeployment
pub static POOL_LABEL: &str = "cs.codeserver.dev/deployment";

/// The identity label set carried by every resource this operator writes.
/// Enables both cascading deletion and pool membership queries.
#[must_use]
pub fn standard_labels(instance: &str) -> serde_json::Value {
    serde_json::json!({
        "app.kubernetes.io/name": COMPONENT,
        "app.kubernetes.io/instance": instance,
        "app.kubernetes.io/managed-by": MANAGER,
    })
}
