use std::env;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config,
    },
};
use serde::Serialize;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::constants;
use crate::crd::{topology::TOPOLOGY_FINALIZER, Connectivity, Topology};
use crate::{Error, Result};

const ERROR_REQUEUE_SECS: u64 = 5 * 60;

// Context for the reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event recorder
    pub recorder: Recorder,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// App name children are labeled with
    pub app_name: String,
    /// Namespace the manager (and the Config singleton) lives in
    pub manager_namespace: String,
    /// Detected container runtime kind on this cluster
    pub cri_kind: String,
}

async fn reconcile(topology: Arc<Topology>, ctx: Arc<Context>) -> Result<Action> {
    let ns = topology.namespace().unwrap(); // topology is namespace scoped
    let topologies: Api<Topology> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling Topology \"{}\" in {}", topology.name_any(), ns);
    finalizer(&topologies, TOPOLOGY_FINALIZER, topology, |event| async {
        match event {
            Finalizer::Apply(topology) => topology.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(topology) => topology.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
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
            reporter: super::MANAGER_NAME.into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
}

impl State {
    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub async fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: self.diagnostics.read().await.recorder(client),
            diagnostics: self.diagnostics.clone(),
            app_name: env::var(constants::APP_NAME_ENV)
                .unwrap_or_else(|_| constants::APP_NAME_DEFAULT.to_string()),
            manager_namespace: env::var(constants::POD_NAMESPACE_ENV)
                .ok()
                .or_else(my_namespace)
                .unwrap_or_else(|| "default".to_string()),
            cri_kind: env::var(constants::LAUNCHER_CRI_KIND_ENV).unwrap_or_default(),
        })
    }
}

fn my_namespace() -> Option<String> {
    std::fs::read_to_string("/var/run/secrets/kubernetes.io/serviceaccount/namespace")
        .ok()
        .map(|ns| ns.trim_end_matches('\n').to_string())
}

fn error_policy(_: Arc<Topology>, error: &Error, _: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}

/// Run the topology controller until shutdown. Expected to run as a single
/// replica: no leader election, no metrics bind; per-object serialization
/// comes from the controller work queue. The owned-object watches are not
/// label-filtered so children created before this controller was installed
/// still enqueue their topology.
pub async fn run(state: State) {
    let client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable");
    let topologies = Api::<Topology>::all(client.clone());
    if let Err(e) = topologies.list(&ListParams::default().limit(1)).await {
        error!("Topology CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin gencrd | kubectl apply -f -");
        std::process::exit(1);
    }

    Controller::new(topologies, Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), Config::default())
        .owns(Api::<Service>::all(client.clone()), Config::default())
        .owns(Api::<Connectivity>::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client).await)
        .filter_map(|x| futures::future::ready(std::result::Result::ok(x)))
        .for_each(|_| futures::future::ready(()))
        .await;
}
