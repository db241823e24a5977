//! Desired-state builders: pure functions from a CodeServer spec to the full
//! object JSON of each dependent resource, ready for server-side apply.

use crate::{Error, Result, COMPONENT};
use k8s::{standard_labels, CodeServer};
use kube::{Resource, ResourceExt};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

/// Volume carrying the persistent home directory, shared between the init
/// containers and the main container
pub const HOME_VOLUME: &str = "home";

lazy_static! {
    // the apimachinery quantity format
    static ref QUANTITY: Regex = Regex::new(r"^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$").unwrap();
    static ref DOMAIN: Regex = Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.-]*[A-Za-z0-9])?$").unwrap();
}

/// Controller owner reference enabling cascading deletion of dependents
#[must_use]
pub fn owner_reference<K>(owner: &K) -> Value
where
    K: Resource<DynamicType = ()>,
{
    json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "name": owner.meta().name.clone().unwrap_or_default(),
        "uid": owner.meta().uid.clone().unwrap_or_default(),
        "controller": true,
        "blockOwnerDeletion": true,
    })
}

fn metadata(cs: &CodeServer) -> Value {
    let name = cs.name_any();
    json!({
        "name": name,
        "labels": standard_labels(&name),
        "ownerReferences": [owner_reference(cs)],
    })
}

/// Credentials object holding the workspace password. The caller passes the
/// live value when one exists so reconciliation never rotates it.
#[must_use]
pub fn secret(cs: &CodeServer, password_b64: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": metadata(cs),
        "data": { "password": password_b64 },
    })
}

/// Persistent claim for the home volume
pub fn pvc(cs: &CodeServer) -> Result<Value> {
    if !QUANTITY.is_match(&cs.spec.storage_size) {
        return Err(Error::InvalidQuantity(cs.spec.storage_size.clone()));
    }
    let mut spec = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": { "requests": { "storage": cs.spec.storage_size } },
    });
    if !cs.spec.storage_class_name.is_empty() {
        spec["storageClassName"] = json!(cs.spec.storage_class_name);
    }
    if !cs.spec.volume_name.is_empty() {
        spec["volumeName"] = json!(cs.spec.volume_name);
    }
    let mut meta = metadata(cs);
    if !cs.spec.storage_annotations.is_empty() {
        meta["annotations"] = json!(cs.spec.storage_annotations);
    }
    Ok(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": meta,
        "spec": spec,
    }))
}

/// The code-server workload: one replica, init containers first, password
/// injected from the credentials object ahead of user-declared envs
#[must_use]
pub fn deployment(cs: &CodeServer, init_containers: &[Value]) -> Value {
    let name = cs.name_any();
    let labels = standard_labels(&name);
    let port = cs.spec.container_port;

    let entrypoint = format!("/usr/bin/entrypoint.sh --bind-addr 0.0.0.0:{port}");
    let mut command = if cs.spec.init_command.is_empty() {
        entrypoint
    } else {
        format!("{} && {entrypoint}", cs.spec.init_command)
    };
    if cs.spec.init_plugins.contains_key("git") {
        command.push_str(" /home/coder/work");
    }

    let mut envs = vec![json!({
        "name": "PASSWORD",
        "valueFrom": { "secretKeyRef": { "name": name, "key": "password" } },
    })];
    for env in &cs.spec.envs {
        envs.push(json!({ "name": env.name, "value": env.value }));
    }

    let limits = cs.spec.resources.limits.clone().unwrap_or_default();
    let cpu = limits.get("cpu").cloned().unwrap_or_else(|| "1".to_string());
    let memory = limits.get("memory").cloned().unwrap_or_else(|| "1Gi".to_string());
    let mut resources = json!({ "limits": { "cpu": cpu, "memory": memory } });
    if let Some(ref requests) = cs.spec.resources.requests {
        if !requests.is_empty() {
            resources["requests"] = json!(requests);
        }
    }

    let mut pod_spec = json!({
        "securityContext": {
            "runAsUser": 1000,
            "runAsGroup": 1000,
            "fsGroup": 1000,
            "fsGroupChangePolicy": "OnRootMismatch",
        },
        "initContainers": init_containers,
        "containers": [{
            "name": COMPONENT,
            "image": cs.spec.image,
            "imagePullPolicy": "IfNotPresent",
            "ports": [{ "name": "http", "protocol": "TCP", "containerPort": port }],
            "env": envs,
            "volumeMounts": [{ "name": HOME_VOLUME, "mountPath": "/home/coder" }],
            "resources": resources,
            "command": ["/bin/sh", "-c", command],
        }],
        "volumes": [{
            "name": HOME_VOLUME,
            "persistentVolumeClaim": { "claimName": name },
        }],
    });
    if !cs.spec.node_selector.is_empty() {
        pod_spec["nodeSelector"] = json!(cs.spec.node_selector);
    }
    if !cs.spec.image_pull_secrets.is_empty() {
        let refs: Vec<Value> = cs
            .spec
            .image_pull_secrets
            .iter()
            .map(|s| json!({ "name": s.name }))
            .collect();
        pod_spec["imagePullSecrets"] = json!(refs);
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(cs),
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": pod_spec,
            },
        },
    })
}

/// Network endpoint: the main `http` port plus one named entry per declared
/// proxy port
#[must_use]
pub fn service(cs: &CodeServer) -> Value {
    let port = cs.spec.container_port;
    let mut ports = vec![json!({
        "name": "http",
        "protocol": "TCP",
        "port": port,
        "targetPort": port,
    })];
    for p in &cs.spec.public_proxy_ports {
        ports.push(json!({
            "name": format!("http-{p}"),
            "protocol": "TCP",
            "port": p,
            "targetPort": p,
        }));
    }
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(cs),
        "spec": {
            "type": "ClusterIP",
            "selector": standard_labels(&cs.name_any()),
            "ports": ports,
        },
    })
}

/// Routing rule: `/` to the main port, `/proxy/<port>` per proxy port, on
/// host `<name>.<domain>`
pub fn ingress(cs: &CodeServer) -> Result<Value> {
    let name = cs.name_any();
    if !DOMAIN.is_match(&cs.spec.domain) {
        return Err(Error::InvalidDomain(cs.spec.domain.clone()));
    }
    let host = format!("{name}.{}", cs.spec.domain);

    let mut paths = vec![json!({
        "path": "/",
        "pathType": "Prefix",
        "backend": { "service": { "name": name, "port": { "name": "http" } } },
    })];
    for p in &cs.spec.public_proxy_ports {
        paths.push(json!({
            "path": format!("/proxy/{p}"),
            "pathType": "Prefix",
            "backend": { "service": { "name": name, "port": { "name": format!("http-{p}") } } },
        }));
    }

    let mut spec = json!({
        "rules": [{ "host": host, "http": { "paths": paths } }],
    });
    if !cs.spec.ingress_class_name.is_empty() {
        spec["ingressClassName"] = json!(cs.spec.ingress_class_name);
    }
    Ok(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": metadata(cs),
        "spec": spec,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::{CodeServerSpec, ComputeResources, EnvVar};
    use std::collections::BTreeMap;

    fn alice() -> CodeServer {
        CodeServer::new(
            "alice",
            CodeServerSpec {
                storage_size: "5Gi".to_string(),
                image: "img:tag".to_string(),
                domain: "example.com".to_string(),
                ..CodeServerSpec::default()
            },
        )
    }

    #[test]
    fn test_pvc_requests_declared_size() {
        let value = pvc(&alice()).unwrap();
        assert_eq!(value["spec"]["resources"]["requests"]["storage"], "5Gi");
        assert_eq!(value["spec"]["accessModes"][0], "ReadWriteOnce");
        // cluster defaults apply unless the spec names them
        assert!(value["spec"].get("storageClassName").is_none());
        assert!(value["spec"].get("volumeName").is_none());
    }

    #[test]
    fn test_pvc_rejects_bad_quantity() {
        let mut cs = alice();
        cs.spec.storage_size = "lots".to_string();
        assert!(matches!(pvc(&cs), Err(Error::InvalidQuantity(_))));
    }

    #[test]
    fn test_pvc_storage_class_and_volume_when_set() {
        let mut cs = alice();
        cs.spec.storage_class_name = "fast".to_string();
        cs.spec.volume_name = "pv-7".to_string();
        cs.spec.storage_annotations = BTreeMap::from([("a".to_string(), "b".to_string())]);
        let value = pvc(&cs).unwrap();
        assert_eq!(value["spec"]["storageClassName"], "fast");
        assert_eq!(value["spec"]["volumeName"], "pv-7");
        assert_eq!(value["metadata"]["annotations"]["a"], "b");
    }

    #[test]
    fn test_deployment_binds_declared_port() {
        let value = deployment(&alice(), &[]);
        let container = &value["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["ports"][0]["containerPort"], 19200);
        let command = container["command"][2].as_str().unwrap();
        assert!(command.contains("--bind-addr 0.0.0.0:19200"));
        assert!(!command.contains("/home/coder/work"));
        assert_eq!(value["spec"]["replicas"], 1);
    }

    #[test]
    fn test_deployment_password_env_comes_first() {
        let mut cs = alice();
        cs.spec.envs = vec![EnvVar {
            name: "EDITOR".to_string(),
            value: "vim".to_string(),
        }];
        let value = deployment(&cs, &[]);
        let envs = &value["spec"]["template"]["spec"]["containers"][0]["env"];
        assert_eq!(envs[0]["name"], "PASSWORD");
        assert_eq!(envs[0]["valueFrom"]["secretKeyRef"]["name"], "alice");
        assert_eq!(envs[0]["valueFrom"]["secretKeyRef"]["key"], "password");
        assert_eq!(envs[1]["name"], "EDITOR");
    }

    #[test]
    fn test_deployment_default_limits() {
        let value = deployment(&alice(), &[]);
        let resources = &value["spec"]["template"]["spec"]["containers"][0]["resources"];
        assert_eq!(resources["limits"]["cpu"], "1");
        assert_eq!(resources["limits"]["memory"], "1Gi");
        assert!(resources.get("requests").is_none());
    }

    #[test]
    fn test_deployment_limits_independently_overridable() {
        let mut cs = alice();
        cs.spec.resources = ComputeResources {
            limits: Some(BTreeMap::from([("cpu".to_string(), "2".to_string())])),
            requests: Some(BTreeMap::from([("memory".to_string(), "256Mi".to_string())])),
        };
        let value = deployment(&cs, &[]);
        let resources = &value["spec"]["template"]["spec"]["containers"][0]["resources"];
        assert_eq!(resources["limits"]["cpu"], "2");
        assert_eq!(resources["limits"]["memory"], "1Gi");
        assert_eq!(resources["requests"]["memory"], "256Mi");
    }

    #[test]
    fn test_deployment_appends_workdir_for_git_plugin() {
        let mut cs = alice();
        cs.spec.init_plugins.insert(
            "git".to_string(),
            BTreeMap::from([("repourl".to_string(), "https://github.com/a/b".to_string())]),
        );
        let value = deployment(&cs, &[]);
        let command = value["spec"]["template"]["spec"]["containers"][0]["command"][2]
            .as_str()
            .unwrap();
        assert!(command.ends_with(" /home/coder/work"));
    }

    #[test]
    fn test_deployment_init_containers_in_given_order() {
        let init = vec![json!({"name": "git"}), json!({"name": "copy-home"})];
        let value = deployment(&alice(), &init);
        let rendered = &value["spec"]["template"]["spec"]["initContainers"];
        assert_eq!(rendered[0]["name"], "git");
        assert_eq!(rendered[1]["name"], "copy-home");
    }

    #[test]
    fn test_service_exposes_main_and_proxy_ports() {
        let mut cs = alice();
        cs.spec.public_proxy_ports = vec![8080];
        let value = service(&cs);
        let ports = &value["spec"]["ports"];
        assert_eq!(ports[0]["name"], "http");
        assert_eq!(ports[0]["port"], 19200);
        assert_eq!(ports[1]["name"], "http-8080");
        assert_eq!(ports[1]["port"], 8080);
    }

    #[test]
    fn test_ingress_host_and_paths() {
        let mut cs = alice();
        cs.spec.public_proxy_ports = vec![8080];
        let value = ingress(&cs).unwrap();
        let rule = &value["spec"]["rules"][0];
        assert_eq!(rule["host"], "alice.example.com");
        let paths = &rule["http"]["paths"];
        assert_eq!(paths[0]["path"], "/");
        assert_eq!(paths[0]["backend"]["service"]["port"]["name"], "http");
        assert_eq!(paths[1]["path"], "/proxy/8080");
        assert_eq!(paths[1]["backend"]["service"]["port"]["name"], "http-8080");
        assert!(value["spec"].get("ingressClassName").is_none());
    }

    #[test]
    fn test_ingress_class_name_when_set() {
        let mut cs = alice();
        cs.spec.ingress_class_name = "nginx".to_string();
        let value = ingress(&cs).unwrap();
        assert_eq!(value["spec"]["ingressClassName"], "nginx");
    }

    #[test]
    fn test_ingress_rejects_bad_domain() {
        let mut cs = alice();
        cs.spec.domain = String::new();
        assert!(matches!(ingress(&cs), Err(Error::InvalidDomain(_))));
    }

    #[test]
    fn test_resources_carry_identity_labels_and_owner() {
        let cs = alice();
        for value in [secret(&cs, "cGFzcw=="), service(&cs), deployment(&cs, &[])] {
            let labels = &value["metadata"]["labels"];
            assert_eq!(labels["app.kubernetes.io/name"], "code-server");
            assert_eq!(labels["app.kubernetes.io/instance"], "alice");
            assert_eq!(labels["app.kubernetes.io/managed-by"], "code-server-operator");
            let owner = &value["metadata"]["ownerReferences"][0];
            assert_eq!(owner["kind"], "CodeServer");
            assert_eq!(owner["name"], "alice");
            assert_eq!(owner["controller"], true);
        }
    }

    #[test]
    fn test_secret_holds_single_password_key() {
        let value = secret(&alice(), "cGFzcw==");
        assert_eq!(value["data"]["password"], "cGFzcw==");
        assert_eq!(value["data"].as_object().unwrap().len(), 1);
    }
}
