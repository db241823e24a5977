use crate::{
    applier::Applier,
    desired::owner_reference,
    events,
    manager::Context,
    random, telemetry, Error, Reconciler, Result, COMPONENT, POOL_LABEL,
};
use async_trait::async_trait;
use chrono::Utc;
use k8s::{standard_labels, CodeServer};
pub use k8s::CodeServerDeployment;
use kube::{
    api::{Api, ListParams, ResourceExt},
    runtime::{controller::Action, events::Recorder},
    Resource,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

static CONTROLLER: &str = "codeserverdeployment";

#[instrument(skip(ctx, pool), fields(trace_id))]
pub async fn reconcile(pool: Arc<CodeServerDeployment>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure(CONTROLLER);
    ctx.diagnostics.write().await.last_event = Utc::now();
    let name = pool.name_any();
    let ns = pool.namespace().unwrap(); // pool is namespace scoped

    info!("Reconciling CodeServerDeployment \"{name}\" in {ns}");
    if pool.metadata.deletion_timestamp.is_some() {
        // owned CodeServers go away with the pool through owner references
        return Ok(Action::await_change());
    }
    pool.reconcile(ctx.clone()).await
}

#[async_trait]
impl Reconciler for CodeServerDeployment {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let client = ctx.client.clone();
        let reporter = ctx.diagnostics.read().await.reporter.clone();
        let recorder = Recorder::new(client.clone(), reporter, self.object_ref(&()));
        let name = self.name_any();
        let ns = self.namespace().unwrap_or_default();

        let api: Api<CodeServer> = Api::namespaced(client.clone(), &ns);
        let applier: Applier<CodeServer> = Applier::new(client.clone(), &ns);

        let selector = format!("{POOL_LABEL}={name},app.kubernetes.io/name={COMPONENT}");
        let owned = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(Error::KubeError)?;

        // Converge every existing instance onto the current template
        for cs in &owned.items {
            if cs.spec != self.spec.template.spec {
                let child = cs.name_any();
                applier.apply(&child, &pooled_codeserver(self, &child)).await?;
                recorder
                    .publish(events::from_update(
                        "CodeServerDeployment",
                        &name,
                        "CodeServer",
                        &child,
                        Some(cs.object_ref(&())),
                    ))
                    .await
                    .map_err(Error::KubeError)?;
                info!("Patched CodeServer `{child}` to match template");
            }
        }

        let names: Vec<String> = owned.items.iter().map(ResourceExt::name_any).collect();
        let target = usize::try_from(self.spec.replicas).unwrap_or(0);
        let (surplus, missing) = scale_plan(&names, target);

        for child in surplus {
            applier.delete(&child).await?;
            recorder
                .publish(events::from_delete("CodeServerDeployment", &name, "CodeServer", &child, None))
                .await
                .map_err(Error::KubeError)?;
            info!("Deleted CodeServer `{child}`");
        }

        for _ in 0..missing {
            let child = format!("{name}-{}", random::lowercase(6));
            applier.apply(&child, &pooled_codeserver(self, &child)).await?;
            recorder
                .publish(events::from_create("CodeServerDeployment", &name, "CodeServer", &child, None))
                .await
                .map_err(Error::KubeError)?;
            info!("Created CodeServer `{child}`");
        }

        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    }
}

/// Full CodeServer description for a pool member: template spec, identity
/// and pool labels, owner reference for cascading deletion
fn pooled_codeserver(pool: &CodeServerDeployment, child: &str) -> Value {
    let mut labels = standard_labels(child);
    labels[POOL_LABEL] = json!(pool.name_any());
    json!({
        "apiVersion": CodeServer::api_version(&()),
        "kind": CodeServer::kind(&()),
        "metadata": {
            "name": child,
            "labels": labels,
            "ownerReferences": [owner_reference(pool)],
        },
        "spec": pool.spec.template.spec,
    })
}

/// Level-triggered scale decision: which instances to delete and how many to
/// create. Surplus instances are deleted in ascending-name order so repeated
/// invocations pick the same victims.
#[must_use]
pub fn scale_plan(names: &[String], target: usize) -> (Vec<String>, usize) {
    let mut sorted = names.to_vec();
    sorted.sort();
    if sorted.len() > target {
        let surplus = sorted.len() - target;
        sorted.truncate(surplus);
        (sorted, 0)
    } else {
        let missing = target - sorted.len();
        (Vec::new(), missing)
    }
}

#[must_use]
pub fn error_policy(pool: Arc<CodeServerDeployment>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        "reconcile failed for CodeServerDeployment '{}': {:?}",
        pool.name_any(),
        error
    );
    ctx.metrics.reconcile_failure(CONTROLLER, &pool.name_any(), error);
    if error.is_terminal() {
        // only a spec change can clear a validation error
        return Action::await_change();
    }
    Action::requeue(Duration::from_secs(5 * 60))
}
