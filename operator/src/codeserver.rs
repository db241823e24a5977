use crate::{
    applier::Applier,
    desired,
    events,
    initplugins::{self, CommonFields},
    manager::Context,
    random, telemetry, Error, Reconciler, Result,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Secret, Service},
    networking::v1::Ingress,
};
pub use k8s::{CodeServer, CodeServerStatus};
use kube::{
    api::{Api, Patch, PatchParams, ResourceExt},
    runtime::{controller::Action, events::Recorder},
    Client, Resource,
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

static CONTROLLER: &str = "codeserver";

#[instrument(skip(ctx, cs), fields(trace_id))]
pub async fn reconcile(cs: Arc<CodeServer>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure(CONTROLLER);
    ctx.diagnostics.write().await.last_event = Utc::now();
    let name = cs.name_any();
    let ns = cs.namespace().unwrap(); // cs is namespace scoped

    info!("Reconciling CodeServer \"{name}\" in {ns}");
    if cs.metadata.deletion_timestamp.is_some() {
        // dependents go away with the owner through owner references
        return Ok(Action::await_change());
    }
    cs.reconcile(ctx.clone()).await
}

#[async_trait]
impl Reconciler for CodeServer {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let client = ctx.client.clone();
        let reporter = ctx.diagnostics.read().await.reporter.clone();
        let recorder = Recorder::new(client.clone(), reporter, self.object_ref(&()));
        let name = self.name_any();
        let ns = self.namespace().unwrap_or_default();

        if self.status.is_none() {
            set_status(self, client.clone(), CodeServerStatus::NotReady).await?;
        }

        // Credentials: the password is generated on first reconcile and kept
        // verbatim afterwards, live value wins over regeneration.
        let secrets: Applier<Secret> = Applier::new(client.clone(), &ns);
        let password_b64 = match secrets.get_opt(&name).await? {
            Some(live) => live
                .data
                .as_ref()
                .and_then(|data| data.get("password"))
                .map(|bytes| STANDARD.encode(&bytes.0)),
            None => None,
        }
        .unwrap_or_else(|| STANDARD.encode(random::alphanumeric(16)));
        if secrets.apply(&name, &desired::secret(self, &password_b64)).await? {
            recorder
                .publish(events::from_update("CodeServer", &name, "Secret", &name, None))
                .await
                .map_err(Error::KubeError)?;
            info!("Secret `{name}` reconciled");
        }

        let pvcs: Applier<PersistentVolumeClaim> = Applier::new(client.clone(), &ns);
        if pvcs.apply(&name, &desired::pvc(self)?).await? {
            recorder
                .publish(events::from_update("CodeServer", &name, "PersistentVolumeClaim", &name, None))
                .await
                .map_err(Error::KubeError)?;
            info!("PersistentVolumeClaim `{name}` reconciled");
        }

        let init_containers = initplugins::create_plugins(&self.spec.init_plugins, &CommonFields {
            image: self.spec.image.clone(),
            volume_name: desired::HOME_VOLUME.to_string(),
        })?;
        let deployments: Applier<Deployment> = Applier::new(client.clone(), &ns);
        if deployments
            .apply(&name, &desired::deployment(self, &init_containers))
            .await?
        {
            recorder
                .publish(events::from_update("CodeServer", &name, "Deployment", &name, None))
                .await
                .map_err(Error::KubeError)?;
            info!("Deployment `{name}` reconciled");
        }

        let services: Applier<Service> = Applier::new(client.clone(), &ns);
        if services.apply(&name, &desired::service(self)).await? {
            recorder
                .publish(events::from_update("CodeServer", &name, "Service", &name, None))
                .await
                .map_err(Error::KubeError)?;
            info!("Service `{name}` reconciled");
        }

        let ingresses: Applier<Ingress> = Applier::new(client.clone(), &ns);
        if ingresses.apply(&name, &desired::ingress(self)?).await? {
            recorder
                .publish(events::from_update("CodeServer", &name, "Ingress", &name, None))
                .await
                .map_err(Error::KubeError)?;
            info!("Ingress `{name}` reconciled");
        }

        set_status(self, client, CodeServerStatus::Ready).await?;
        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    }
}

async fn set_status(cs: &CodeServer, client: Client, status: CodeServerStatus) -> Result<()> {
    if cs.status.as_ref() == Some(&status) {
        return Ok(());
    }
    let api: Api<CodeServer> = Api::namespaced(client, &cs.namespace().unwrap_or_default());
    api.patch_status(
        &cs.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(Error::KubeError)?;
    Ok(())
}

#[must_use]
pub fn error_policy(cs: Arc<CodeServer>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed for CodeServer '{}': {:?}", cs.name_any(), error);
    ctx.metrics.reconcile_failure(CONTROLLER, &cs.name_any(), error);
    if error.is_terminal() {
        // only a spec change can clear a validation error
        return Action::await_change();
    }
    Action::requeue(Duration::from_secs(5 * 60))
}
