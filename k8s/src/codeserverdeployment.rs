use crate::codeserver::CodeServerSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Template stamped onto every CodeServer owned by the pool
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CodeServerTemplate {
    pub spec: CodeServerSpec,
}

/// Generate the Kubernetes wrapper struct `CodeServerDeployment` from our Spec struct
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "CodeServerDeployment",
    group = "cs.codeserver.dev",
    version = "v1alpha2",
    namespaced
)]
#[kube(shortname = "csd", printcolumn = r#"
{"name":"replicas", "type":"integer", "description":"Number of replicas", "jsonPath":".spec.replicas"},
{"name":"age",      "type":"date",    "description":"Creation date", "jsonPath":".metadata.creationTimestamp"}"#)]
pub struct CodeServerDeploymentSpec {
    /// Instance template every owned CodeServer converges to
    pub template: CodeServerTemplate,
    /// Target number of owned CodeServer instances
    pub replicas: i32,
}
