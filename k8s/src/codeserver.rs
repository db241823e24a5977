use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single environment variable passed to the code-server container
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Reference to an image pull secret in the same namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Compute limits/requests, keyed by resource name (`cpu`, `memory`),
/// values in Kubernetes quantity notation
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ComputeResources {
    pub limits: Option<BTreeMap<String, String>>,
    pub requests: Option<BTreeMap<String, String>>,
}

/// Generate the Kubernetes wrapper struct `CodeServer` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(kind = "CodeServer", group = "cs.codeserver.dev", version = "v1alpha2", namespaced)]
#[kube(status = "CodeServerStatus", shortname = "cs", printcolumn = r#"
{"name":"storage", "type":"string", "description":"Storage size", "jsonPath":".spec.storageSize"},
{"name":"port",    "type":"integer","description":"Container port", "jsonPath":".spec.containerPort"},
{"name":"status",  "type":"string", "description":"Status", "jsonPath":".status"}"#)]
#[serde(rename_all = "camelCase")]
pub struct CodeServerSpec {
    /// Requested size of the persistent home volume
    #[serde(default = "default_storage_size")]
    pub storage_size: String,
    /// Storage class for the claim, cluster default when empty
    #[serde(default)]
    pub storage_class_name: String,
    /// Additional annotations placed on the persistent volume claim
    #[serde(default)]
    pub storage_annotations: BTreeMap<String, String>,
    /// Pre-bound persistent volume name, dynamic provisioning when empty
    #[serde(default)]
    pub volume_name: String,
    /// Compute limits/requests, defaults to 1 cpu / 1Gi limits
    #[serde(default)]
    pub resources: ComputeResources,
    /// Domain the workspace is published under, host is `<name>.<domain>`.
    /// Must be a valid DNS name; without one the ingress is rejected and the
    /// instance stays NotReady.
    #[serde(default)]
    pub domain: String,
    /// Extra environment variables for the code-server container
    #[serde(default)]
    pub envs: Vec<EnvVar>,
    /// Container image running code-server
    #[serde(default = "default_image")]
    pub image: String,
    /// Command run before the code-server entrypoint starts
    #[serde(default)]
    pub init_command: String,
    /// Init plugins preparing the home volume, plugin name to parameter map
    #[serde(default)]
    pub init_plugins: BTreeMap<String, BTreeMap<String, String>>,
    /// Node selector for scheduling
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Listening port of the code-server container
    #[serde(default = "default_container_port")]
    pub container_port: i32,
    /// Image pull secrets for the pod
    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Ingress class, cluster default when empty
    #[serde(default)]
    pub ingress_class_name: String,
    /// Extra ports published through the service and `/proxy/<port>` routes
    #[serde(default)]
    pub public_proxy_ports: Vec<i32>,
}

fn default_storage_size() -> String {
    "1Gi".to_string()
}

fn default_image() -> String {
    "ghcr.io/coder/code-server:latest".to_string()
}

fn default_container_port() -> i32 {
    19200
}

impl Default for CodeServerSpec {
    fn default() -> Self {
        Self {
            storage_size: default_storage_size(),
            storage_class_name: String::new(),
            storage_annotations: BTreeMap::new(),
            volume_name: String::new(),
            resources: ComputeResources::default(),
            domain: String::new(),
            envs: Vec::new(),
            image: default_image(),
            init_command: String::new(),
            init_plugins: BTreeMap::new(),
            node_selector: BTreeMap::new(),
            container_port: default_container_port(),
            image_pull_secrets: Vec::new(),
            ingress_class_name: String::new(),
            public_proxy_ports: Vec::new(),
        }
    }
}

/// The status object of `CodeServer`
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum CodeServerStatus {
    NotReady,
    Ready,
    Suspended,
}
