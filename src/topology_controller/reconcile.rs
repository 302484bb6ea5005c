//! The reconcile pass for one Topology: fetch the Config singleton, derive
//! node configs, converge children, queue restarts, update status.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::time::{timeout, Duration};
use tracing::*;

use crate::conditions::Conditions;
use crate::crd::{Config, Connectivity, ConnectivityKind, ResolvedConfig, Topology, TopologyStatus};
use crate::util::ObjectDiffer;
use crate::{emit_info, emit_warning};
use crate::{Error, Result};

use super::configmap::{config_map_conforms, render_config_map};
use super::configs::{config_hash, config_yaml, resolve_node_configs, NodeConfig};
use super::connectivity::{connectivity_conforms, render_connectivity};
use super::controller::Context;
use super::deployment::DeploymentReconciler;
use super::nad::{nad_api_resource, nad_conforms, nad_names, render_nad};
use super::rbac;
use super::service::{render_fabric_service, service_conforms};
use super::{ReconcileData, MANAGER_NAME};
use kube::runtime::controller::Action;

const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const RESYNC_INTERVAL_SECS: u64 = 10 * 60;

async fn read_with_timeout<T, F>(what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, kube::Error>>,
{
    match timeout(CLIENT_READ_TIMEOUT, fut).await {
        Ok(result) => result.map_err(Error::KubeError),
        Err(_) => Err(Error::Timeout(format!("reading {what}"))),
    }
}

/// Server-side apply with a single forced retry on conflict.
async fn apply_ssa<K>(api: &Api<K>, name: &str, obj: &K) -> Result<K>
where
    K: Resource + Serialize + DeserializeOwned + Clone + Debug,
{
    let params = PatchParams::apply(MANAGER_NAME);
    match api.patch(name, &params, &Patch::Apply(obj)).await {
        Ok(applied) => Ok(applied),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            debug!(name, "conflict on apply, retrying once with force");
            api.patch(
                name,
                &PatchParams::apply(MANAGER_NAME).force(),
                &Patch::Apply(obj),
            )
            .await
            .map_err(Error::KubeError)
        }
        Err(e) => Err(Error::KubeError(e)),
    }
}

impl Topology {
    pub(super) async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let ns = self.namespace().unwrap();
        let uid = self.uid().unwrap_or_default();

        ctx.diagnostics.write().await.last_event = Utc::now();

        let resolved = self.fetch_resolved_config(&ctx).await;

        // invalid topologies surface through status, not the error requeue
        let configs = match resolve_node_configs(self) {
            Ok(configs) => configs,
            Err(Error::ValidationError(message)) => {
                warn!(topology = self.name_any().as_str(), %message, "invalid topology");
                self.patch_degraded_status(&ctx, "spec", &message).await;
                return Ok(Action::await_change());
            }
            Err(other) => return Err(other),
        };

        let resolved_hash = config_hash(&configs)?;
        let mut data = ReconcileData::new(self, configs, resolved_hash);

        if let Err(err) = self.reconcile_rbac(&ctx, &ns).await {
            self.patch_degraded_status(&ctx, "launcher rbac", &err.to_string())
                .await;
            return Err(err);
        }

        if let Err(err) = self.reconcile_config_map(&ctx, &ns, &uid, &data, &resolved).await {
            self.patch_degraded_status(&ctx, "configmap", &err.to_string())
                .await;
            return Err(err);
        }

        if let Err(err) = self.reconcile_services(&ctx, &ns, &uid, &data, &resolved).await {
            self.patch_degraded_status(&ctx, "fabric services", &err.to_string())
                .await;
            return Err(err);
        }

        if self.spec.connectivity != ConnectivityKind::Multus {
            if let Err(err) = self
                .reconcile_connectivity(&ctx, &ns, &uid, &data, &resolved)
                .await
            {
                self.patch_degraded_status(&ctx, "connectivity", &err.to_string())
                    .await;
                return Err(err);
            }
        } else if let Err(err) = self.reconcile_nads(&ctx, &ns, &uid, &resolved).await {
            self.patch_degraded_status(&ctx, "network attachments", &err.to_string())
                .await;
            return Err(err);
        }

        if let Err(err) = self
            .reconcile_deployments(&ctx, &ns, &uid, &mut data, &resolved)
            .await
        {
            self.patch_degraded_status(&ctx, "deployments", &err.to_string())
                .await;
            return Err(err);
        }

        if self.spec.deployment.persistence.enabled {
            if let Err(err) = self.reconcile_pvcs(&ctx, &ns, &data, &resolved).await {
                self.patch_degraded_status(&ctx, "persistence", &err.to_string())
                    .await;
                return Err(err);
            }
        }

        self.patch_ready_status(&ctx, &data).await?;

        emit_info(
            &ctx.recorder,
            self,
            "Reconciled",
            "Reconciling",
            Some(format!(
                "Reconciled `{}`: {} nodes, {} links",
                self.name_any(),
                data.resolved_configs.len(),
                self.spec.links.len()
            )),
        )
        .await;

        Ok(Action::requeue(Duration::from_secs(RESYNC_INTERVAL_SECS)))
    }

    pub(super) async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        // owned children cascade with the topology
        emit_info(
            &ctx.recorder,
            self,
            "DeleteRequested",
            "Deleting",
            Some(format!("Delete `{}`", self.name_any())),
        )
        .await;
        Ok(Action::await_change())
    }

    async fn fetch_resolved_config(&self, ctx: &Context) -> ResolvedConfig {
        let api: Api<Config> = Api::namespaced(ctx.client.clone(), &ctx.manager_namespace);
        match read_with_timeout("config singleton", api.get_opt(&ctx.app_name)).await {
            Ok(config) => ResolvedConfig::from_config(config.as_ref()),
            Err(error) => {
                // absent or slow config never blocks reconciles
                warn!(%error, "failed reading config singleton, using defaults");
                ResolvedConfig::default()
            }
        }
    }

    async fn reconcile_rbac(&self, ctx: &Context, ns: &str) -> Result<()> {
        let api_sa = Api::namespaced(ctx.client.clone(), ns);
        let sa = rbac::render_launcher_service_account(ns);
        apply_ssa(&api_sa, &sa.name_any(), &sa).await?;

        let api_role = Api::namespaced(ctx.client.clone(), ns);
        let role = rbac::render_launcher_role(ns);
        apply_ssa(&api_role, &role.name_any(), &role).await?;

        let api_rb = Api::namespaced(ctx.client.clone(), ns);
        let rb = rbac::render_launcher_role_binding(ns);
        apply_ssa(&api_rb, &rb.name_any(), &rb).await?;

        Ok(())
    }

    async fn reconcile_config_map(
        &self,
        ctx: &Context,
        ns: &str,
        uid: &str,
        data: &ReconcileData,
        resolved: &ResolvedConfig,
    ) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
        let rendered = render_config_map(self, &data.resolved_configs, resolved)?;

        let existing = read_with_timeout("configmap", api.get_opt(&self.name_any())).await?;
        let conforming = existing
            .as_ref()
            .map(|e| config_map_conforms(e, &rendered, uid))
            .unwrap_or(false);

        if !conforming {
            apply_ssa(&api, &self.name_any(), &rendered).await?;
        }

        Ok(())
    }

    async fn reconcile_services(
        &self,
        ctx: &Context,
        ns: &str,
        uid: &str,
        data: &ReconcileData,
        resolved: &ResolvedConfig,
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(ctx.client.clone(), ns);

        let expected: BTreeMap<String, String> = data
            .resolved_configs
            .keys()
            .map(|node| (self.node_object_name(node), node.clone()))
            .collect();
        let expected_names: Vec<String> = expected.keys().cloned().collect();

        let differ = self.diff_owned(&api, uid, &expected_names).await?;

        for (svc_name, node_name) in &expected {
            let rendered = render_fabric_service(self, node_name, resolved)?;
            let conforming = differ
                .current
                .get(svc_name)
                .map(|e| service_conforms(e, &rendered, uid))
                .unwrap_or(false);
            if !conforming {
                apply_ssa(&api, svc_name, &rendered).await?;
            }
        }

        // drop services for removed nodes
        for name in &differ.extra {
            info!(service = name.as_str(), "deleting extraneous fabric service");
            let _ = api.delete(name, &DeleteParams::default()).await;
        }

        Ok(())
    }

    async fn reconcile_connectivity(
        &self,
        ctx: &Context,
        ns: &str,
        uid: &str,
        data: &ReconcileData,
        resolved: &ResolvedConfig,
    ) -> Result<()> {
        let api: Api<Connectivity> = Api::namespaced(ctx.client.clone(), ns);
        let rendered = render_connectivity(self, &data.resolved_configs, resolved)?;

        let existing = read_with_timeout("connectivity", api.get_opt(&self.name_any())).await?;
        let conforming = existing
            .as_ref()
            .map(|e| connectivity_conforms(e, &rendered, uid))
            .unwrap_or(false);

        if !conforming {
            apply_ssa(&api, &self.name_any(), &rendered).await?;
        }

        Ok(())
    }

    async fn reconcile_nads(
        &self,
        ctx: &Context,
        ns: &str,
        uid: &str,
        resolved: &ResolvedConfig,
    ) -> Result<()> {
        let resource = nad_api_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(ctx.client.clone(), ns, &resource);

        let expected = nad_names(self);
        let differ = self.diff_owned(&api, uid, &expected).await?;

        for nad_name in &expected {
            let rendered = render_nad(self, nad_name, resolved)?;
            let conforming = differ
                .current
                .get(nad_name)
                .map(|e| nad_conforms(e, &rendered, uid))
                .unwrap_or(false);
            if !conforming {
                apply_ssa(&api, nad_name, &rendered).await?;
            }
        }

        for name in &differ.extra {
            info!(nad = name.as_str(), "deleting extraneous attachment");
            let _ = api.delete(name, &DeleteParams::default()).await;
        }

        Ok(())
    }

    async fn reconcile_deployments(
        &self,
        ctx: &Context,
        ns: &str,
        uid: &str,
        data: &mut ReconcileData,
        resolved: &ResolvedConfig,
    ) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), ns);

        let reconciler = DeploymentReconciler {
            app_name: &ctx.app_name,
            manager_namespace: &ctx.manager_namespace,
            cri_kind: &ctx.cri_kind,
            config: resolved,
        };

        let expected: BTreeMap<String, String> = data
            .resolved_configs
            .keys()
            .map(|node| (self.node_object_name(node), node.clone()))
            .collect();
        let expected_names: Vec<String> = expected.keys().cloned().collect();

        let differ = self.diff_owned(&api, uid, &expected_names).await?;

        for (dep_name, node_name) in &expected {
            let rendered = reconciler.render(self, &data.resolved_configs, node_name)?;
            let conforming = differ
                .current
                .get(dep_name)
                .map(|e| reconciler.conforms(e, &rendered, uid))
                .unwrap_or(false);
            if !conforming {
                apply_ssa(&api, dep_name, &rendered).await?;
            }
        }

        for name in &differ.extra {
            info!(deployment = name.as_str(), "deleting extraneous deployment");
            let _ = api.delete(name, &DeleteParams::default()).await;
        }

        reconciler.determine_nodes_needing_restart(data);
        for node_name in data.nodes_needing_restart.clone() {
            let dep_name = self.node_object_name(&node_name);
            info!(
                node = node_name.as_str(),
                "config hash changed, restarting node"
            );
            let patch = json!({
                "spec": {
                    "template": {
                        "metadata": {
                            "annotations": {
                                "skyforge/restartedAt": Utc::now().to_rfc3339(),
                            }
                        }
                    }
                }
            });
            // plain merge patch under a different field manager so the next
            // server-side apply does not claw the annotation back
            api.patch(&dep_name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(Error::KubeError)?;
        }

        Ok(())
    }

    async fn reconcile_pvcs(
        &self,
        ctx: &Context,
        ns: &str,
        data: &ReconcileData,
        resolved: &ResolvedConfig,
    ) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), ns);
        let reconciler = DeploymentReconciler {
            app_name: &ctx.app_name,
            manager_namespace: &ctx.manager_namespace,
            cri_kind: &ctx.cri_kind,
            config: resolved,
        };

        for node_name in data.resolved_configs.keys() {
            let pvc = reconciler.render_pvc(self, node_name)?;
            let name = pvc.name_any();
            // claims are immutable where it matters; only create missing ones
            let existing = read_with_timeout("pvc", api.get_opt(&name)).await?;
            if existing.is_none() {
                apply_ssa(&api, &name, &pvc).await?;
            }
        }

        Ok(())
    }

    /// List this topology's children of one kind (by owner label, then owner
    /// uid) and diff them against the expected name set.
    async fn diff_owned<K>(
        &self,
        api: &Api<K>,
        uid: &str,
        expected: &[String],
    ) -> Result<ObjectDiffer<K>>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        let params = ListParams::default().labels(&format!(
            "{}={}",
            crate::constants::LABEL_TOPOLOGY_OWNER,
            self.name_any()
        ));
        let list = api.list(&params).await.map_err(Error::KubeError)?;

        let current: BTreeMap<String, K> = list
            .items
            .into_iter()
            .filter(|item| {
                item.meta()
                    .owner_references
                    .as_ref()
                    .map(|refs| refs.iter().any(|r| r.uid == uid))
                    .unwrap_or(false)
            })
            .map(|item| (item.name_any(), item))
            .collect();

        let mut differ = ObjectDiffer::new(current);
        differ.set_missing(expected);
        differ.set_extra(expected);
        Ok(differ)
    }

    async fn patch_ready_status(&self, ctx: &Context, data: &ReconcileData) -> Result<()> {
        let api: Api<Topology> =
            Api::namespaced(ctx.client.clone(), &self.namespace().unwrap());
        let observed_generation = self.metadata.generation.unwrap_or(0);

        let mut node_configs = BTreeMap::new();
        for (node, config) in &data.resolved_configs {
            node_configs.insert(node.clone(), config_yaml(config)?);
        }

        let mut status = TopologyStatus {
            config_hash: Some(data.resolved_hash.clone()),
            node_configs: Some(node_configs),
            conditions: self.status.as_ref().and_then(|s| s.conditions.clone()),
        };
        status.upsert_bool(
            "Ready",
            true,
            "Reconciled",
            Some("all children applied"),
            observed_generation,
        );

        let patch = json!({ "status": status });
        api.patch_status(
            &self.name_any(),
            &PatchParams::apply(MANAGER_NAME),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::KubeError)?;

        Ok(())
    }

    /// Best-effort: flip Ready false, naming the child that failed.
    async fn patch_degraded_status(&self, ctx: &Context, child: &str, message: &str) {
        emit_warning(
            &ctx.recorder,
            self,
            "ReconcileFailed",
            "Reconciling",
            Some(format!("{child}: {message}")),
        )
        .await;

        let Some(ns) = self.namespace() else { return };
        let api: Api<Topology> = Api::namespaced(ctx.client.clone(), &ns);
        let observed_generation = self.metadata.generation.unwrap_or(0);

        let mut status = TopologyStatus {
            config_hash: None,
            node_configs: None,
            conditions: self.status.as_ref().and_then(|s| s.conditions.clone()),
        };
        status.upsert_bool(
            "Ready",
            false,
            "ChildFailed",
            Some(&format!("{child}: {message}")),
            observed_generation,
        );

        let patch = json!({ "status": { "conditions": status.conditions } });
        let _ = api
            .patch_status(
                &self.name_any(),
                &PatchParams::apply(MANAGER_NAME),
                &Patch::Merge(&patch),
            )
            .await;
    }
}
