use crate::{Error, Result, MANAGER};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams},
    core::NamespaceResourceScope,
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Converges one remote resource of kind `K` to a desired description with
/// minimal writes. The desired description is full object JSON
/// (apiVersion/kind/metadata/spec) so it can be sent as a server-side apply.
pub struct Applier<K> {
    api: Api<K>,
}

impl<K> Applier<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
    <K as Resource>::DynamicType: Default,
{
    #[must_use]
    pub fn new(client: Client, ns: &str) -> Applier<K> {
        Applier {
            api: Api::namespaced(client, ns),
        }
    }

    /// Live fetch, tolerating an absent resource as an empty baseline
    pub async fn get_opt(&self, name: &str) -> Result<Option<K>> {
        self.api.get_opt(name).await.map_err(Error::KubeError)
    }

    /// Applies `desired`, claiming every field it specifies under our
    /// field-manager identity and overriding conflicting claims.
    ///
    /// Skips the write entirely when the live values of the specified fields
    /// already deep-equal the desired description. Returns whether a write
    /// happened.
    pub async fn apply(&self, name: &str, desired: &serde_json::Value) -> Result<bool> {
        if let Some(live) = self.get_opt(name).await? {
            let live = serde_json::to_value(&live).map_err(Error::SerializationError)?;
            if owned_projection(&live, desired) == *desired {
                return Ok(false);
            }
        }
        let params = PatchParams::apply(MANAGER).force();
        self.api
            .patch(name, &params, &Patch::Apply(desired))
            .await
            .map_err(Error::KubeError)?;
        Ok(true)
    }

    /// Background delete, an already-absent target is a no-op
    pub async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// Extracts from `live` the subset of fields named by `desired`: objects are
/// walked recursively, arrays of equal length element-wise (the server
/// defaults fields inside list entries we wrote), everything else is taken
/// from `live` wholesale. Comparing the projection against `desired` answers
/// "would this apply change anything we own" without diffing fields other
/// writers manage.
#[must_use]
pub fn owned_projection(live: &serde_json::Value, desired: &serde_json::Value) -> serde_json::Value {
    match desired {
        serde_json::Value::Object(fields) => {
            let mut out = serde_json::Map::with_capacity(fields.len());
            if let serde_json::Value::Object(live_fields) = live {
                for (key, want) in fields {
                    if let Some(have) = live_fields.get(key) {
                        out.insert(key.clone(), owned_projection(have, want));
                    }
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(want) => {
            if let serde_json::Value::Array(have) = live {
                if have.len() == want.len() {
                    return serde_json::Value::Array(
                        have.iter().zip(want).map(|(h, w)| owned_projection(h, w)).collect(),
                    );
                }
            }
            live.clone()
        }
        _ => live.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_projection_equal_when_live_converged() {
        let desired = json!({
            "spec": {"replicas": 1, "template": {"spec": {"containers": [{"name": "cs", "image": "img:tag"}]}}},
            "metadata": {"labels": {"app.kubernetes.io/name": "code-server"}},
        });
        // live carries extra server-defaulted fields we do not own
        let live = json!({
            "spec": {
                "replicas": 1,
                "progressDeadlineSeconds": 600,
                "template": {"spec": {"containers": [{"name": "cs", "image": "img:tag"}], "dnsPolicy": "ClusterFirst"}},
            },
            "metadata": {"labels": {"app.kubernetes.io/name": "code-server"}, "resourceVersion": "42"},
            "status": {"readyReplicas": 1},
        });
        assert_eq!(owned_projection(&live, &desired), desired);
    }

    #[test]
    fn test_projection_detects_scalar_drift() {
        let desired = json!({"spec": {"replicas": 1}});
        let live = json!({"spec": {"replicas": 3}});
        assert_ne!(owned_projection(&live, &desired), desired);
    }

    #[test]
    fn test_projection_detects_missing_field() {
        let desired = json!({"spec": {"replicas": 1, "paused": false}});
        let live = json!({"spec": {"replicas": 1}});
        assert_ne!(owned_projection(&live, &desired), desired);
    }

    #[test]
    fn test_projection_detects_added_array_entries() {
        let desired = json!({"spec": {"ports": [{"name": "http", "port": 19200}]}});
        let live = json!({"spec": {"ports": [{"name": "http", "port": 19200}, {"name": "extra", "port": 1}]}});
        assert_ne!(owned_projection(&live, &desired), desired);
    }

    #[test]
    fn test_projection_ignores_defaulted_fields_inside_array_entries() {
        let desired = json!({"spec": {"containers": [{"name": "cs", "image": "img:tag"}]}});
        let live = json!({
            "spec": {"containers": [{
                "name": "cs",
                "image": "img:tag",
                "imagePullPolicy": "Always",
                "terminationMessagePath": "/dev/termination-log",
            }]},
        });
        assert_eq!(owned_projection(&live, &desired), desired);
    }
}
