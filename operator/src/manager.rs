use crate::{codeserver, codeserverdeployment, CodeServer, CodeServerDeployment, Metrics};
use chrono::{DateTime, Utc};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Secret, Service},
    networking::v1::Ingress,
};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{controller::Controller, events::Reporter, watcher::Config},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

// Context for our reconcilers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "code-server-operator".into(),
        }
    }
}

/// Data owned by the Manager
#[derive(Clone, Default)]
pub struct Manager {
    /// Diagnostics populated by the reconcilers
    diagnostics: Arc<RwLock<Diagnostics>>,
}

/// Manager that owns the CodeServer and CodeServerDeployment controllers
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` plus the two controller futures to be awaited.
    /// It is up to `main` to wait for the controller streams.
    pub async fn new() -> (Self, BoxFuture<'static, ()>, BoxFuture<'static, ()>) {
        let client = Client::try_default().await.expect("create client");
        let manager = Manager::default();
        let context = Arc::new(Context {
            client: client.clone(),
            metrics: Metrics::default(),
            diagnostics: manager.diagnostics.clone(),
        });

        let servers = Api::<CodeServer>::all(client.clone());
        let pools = Api::<CodeServerDeployment>::all(client.clone());
        // Ensure CRDs are installed before loop-watching
        let _r = servers
            .list(&ListParams::default().limit(1))
            .await
            .expect("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");
        let _r = pools
            .list(&ListParams::default().limit(1))
            .await
            .expect("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");

        // All good. Start controllers and return their futures.
        let controller_cs = Controller::new(servers, Config::default().any_semantic())
            .owns(Api::<Secret>::all(client.clone()), Config::default())
            .owns(Api::<PersistentVolumeClaim>::all(client.clone()), Config::default())
            .owns(Api::<Deployment>::all(client.clone()), Config::default())
            .owns(Api::<Service>::all(client.clone()), Config::default())
            .owns(Api::<Ingress>::all(client.clone()), Config::default())
            .run(codeserver::reconcile, codeserver::error_policy, context.clone())
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        let controller_pool = Controller::new(pools, Config::default().any_semantic())
            .owns(Api::<CodeServer>::all(client), Config::default())
            .run(
                codeserverdeployment::reconcile,
                codeserverdeployment::error_policy,
                context,
            )
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        (manager, controller_cs, controller_pool)
    }

    /// Metrics getter
    #[must_use]
    pub fn metrics(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        encoder
            .encode_to_string(&prometheus::default_registry().gather())
            .unwrap_or_default()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
