//! Rendering and conformance checking of per-node Deployments.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    ExecAction, HostPathVolumeSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    SecretVolumeSource, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::warn;

use crate::constants::{self, LAUNCHER_COMMAND, LAUNCHER_CONTAINER, SETUP_CONTAINER};
use crate::crd::{ConnectivityKind, ResolvedConfig, Topology};
use crate::util::kubernetes::{config_map_volume_name, map_contains_all_expected};
use crate::{Error, Result};

use super::configs::NodeConfig;
use super::nativemode::{apply_native_mode_overrides, ApplyInput};
use super::ReconcileData;

const PROBE_INITIAL_DELAY: i32 = 60;
const PROBE_PERIOD_SECONDS: i32 = 20;
const PROBE_READINESS_FAILURE_THRESHOLD: i32 = 3;
const PROBE_DEFAULT_STARTUP_FAILURE_THRESHOLD: i32 = 40;

const DEFAULT_PERSISTENCE_CLAIM_SIZE: &str = "5Gi";

/// Renders and validates deployments for a topology. A subcomponent of the
/// topology reconciler, exposed for testing.
pub struct DeploymentReconciler<'a> {
    pub app_name: &'a str,
    pub manager_namespace: &'a str,
    pub cri_kind: &'a str,
    pub config: &'a ResolvedConfig,
}

#[derive(Serialize)]
struct MultusNet {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
}

impl<'a> DeploymentReconciler<'a> {
    /// Render the final deployment for one node.
    pub fn render(
        &self,
        topology: &Topology,
        configs: &BTreeMap<String, NodeConfig>,
        node_name: &str,
    ) -> Result<Deployment> {
        let node_config = configs.get(node_name).ok_or_else(|| {
            Error::OtherError(format!("no resolved config for node {node_name:?}"))
        })?;

        let deployment_name = topology.node_object_name(node_name);
        let config_volume_name = format!("{}-config", topology.name_any());

        let mut deployment = self.render_base(topology, &deployment_name, node_name)?;

        self.render_scheduling(&mut deployment, topology);

        let common_mounts =
            self.render_volumes(&mut deployment, topology, node_name, &config_volume_name);

        self.render_containers(
            &mut deployment,
            topology,
            node_config,
            node_name,
            &config_volume_name,
            &common_mounts,
        );

        self.render_native_setup(&mut deployment, topology);

        self.render_multus_annotation(&mut deployment, topology);
        self.render_vrnetlab_mgmt_annotation(&mut deployment, node_config);

        self.render_env(&mut deployment, topology, node_config, node_name);
        self.render_resources(&mut deployment, topology, node_config, node_name);
        self.render_node_selectors(&mut deployment, topology, node_config);
        self.render_privileges(&mut deployment, topology, node_name);
        self.render_status_probes(&mut deployment, topology, node_name);
        self.render_devices(&mut deployment);
        self.render_persistence(&mut deployment, topology, node_name);

        Ok(deployment)
    }

    /// Render deployments for every node.
    pub fn render_all(
        &self,
        topology: &Topology,
        configs: &BTreeMap<String, NodeConfig>,
    ) -> Result<Vec<Deployment>> {
        configs
            .keys()
            .map(|node_name| self.render(topology, configs, node_name))
            .collect()
    }

    fn selector_labels(&self, name: &str, topology_name: &str, node_name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (constants::LABEL_KUBERNETES_NAME.to_string(), name.to_string()),
            (
                constants::LABEL_APP.to_string(),
                constants::APP_NAME_DEFAULT.to_string(),
            ),
            (constants::LABEL_NAME.to_string(), name.to_string()),
            (
                constants::LABEL_TOPOLOGY_OWNER.to_string(),
                topology_name.to_string(),
            ),
            (
                constants::LABEL_TOPOLOGY_NODE.to_string(),
                node_name.to_string(),
            ),
        ])
    }

    fn render_base(
        &self,
        topology: &Topology,
        name: &str,
        node_name: &str,
    ) -> Result<Deployment> {
        let oref = topology.controller_owner_ref(&()).ok_or_else(|| {
            Error::OtherError("topology has no uid; cannot create owner reference".to_string())
        })?;

        let selector_labels = self.selector_labels(name, &topology.name_any(), node_name);

        let mut labels = selector_labels.clone();
        labels.extend(self.config.labels.clone());

        let annotations = self.config.annotations.clone();

        let mut deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: topology.namespace(),
                owner_references: Some(vec![oref]),
                annotations: Some(annotations.clone()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                revision_history_limit: Some(0),
                // no need to gracefully roll nodes over; recreate them
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    rolling_update: None,
                }),
                selector: LabelSelector {
                    match_labels: Some(selector_labels),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        annotations: Some(annotations),
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        init_containers: Some(Vec::new()),
                        containers: Vec::new(),
                        restart_policy: Some("Always".to_string()),
                        service_account_name: Some(
                            constants::LAUNCHER_SERVICE_ACCOUNT.to_string(),
                        ),
                        volumes: Some(Vec::new()),
                        hostname: Some(node_name.to_string()),
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        };

        if topology.native_mode() {
            pod_spec_mut(&mut deployment).share_process_namespace = Some(true);
        }

        Ok(deployment)
    }

    fn render_scheduling(&self, deployment: &mut Deployment, topology: &Topology) {
        pod_spec_mut(deployment).tolerations =
            topology.spec.deployment.scheduling.tolerations.clone();
    }

    /// Pod volumes plus the mounts every launcher-ish container gets.
    fn render_volumes(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_name: &str,
        config_volume_name: &str,
    ) -> Vec<VolumeMount> {
        let mut volumes = vec![
            Volume {
                name: config_volume_name.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: topology.name_any(),
                    default_mode: Some(
                        constants::PERMISSIONS_EVERYONE_READ_WRITE_OWNER_EXECUTE,
                    ),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            },
            // shared between the setup init container and the launcher;
            // holds the tunnels cache and the pod-net snapshot
            Volume {
                name: "runtime".to_string(),
                empty_dir: Some(Default::default()),
                ..Volume::default()
            },
        ];

        let mut common_mounts = vec![VolumeMount {
            name: "runtime".to_string(),
            mount_path: constants::DEFAULT_RUNTIME_DIR.to_string(),
            ..VolumeMount::default()
        }];

        let (cri_path, cri_sub_path) = self.cri_sock_path(topology);
        if !cri_path.is_empty() && !cri_sub_path.is_empty() {
            volumes.push(Volume {
                name: "cri-sock".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: cri_path,
                    type_: Some(String::new()),
                }),
                ..Volume::default()
            });
            common_mounts.push(VolumeMount {
                name: "cri-sock".to_string(),
                read_only: Some(true),
                mount_path: format!("{}/{}", constants::LAUNCHER_CRI_SOCK_PATH, cri_sub_path),
                sub_path: Some(cri_sub_path),
                ..VolumeMount::default()
            });
        }

        let docker_daemon_config = topology
            .spec
            .image_pull
            .docker_daemon_config
            .clone()
            .or_else(|| self.config.docker_daemon_config.clone());
        if let Some(secret) = docker_daemon_config {
            volumes.push(Volume {
                name: "docker-daemon-config".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret),
                    default_mode: Some(
                        constants::PERMISSIONS_EVERYONE_READ_WRITE_OWNER_EXECUTE,
                    ),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            });
            common_mounts.push(VolumeMount {
                name: "docker-daemon-config".to_string(),
                read_only: Some(true),
                mount_path: "/etc/docker".to_string(),
                ..VolumeMount::default()
            });
        }

        let docker_config = topology
            .spec
            .image_pull
            .docker_config
            .clone()
            .or_else(|| self.config.docker_config.clone());
        if let Some(secret) = docker_config {
            volumes.push(Volume {
                name: "docker-config".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret),
                    default_mode: Some(
                        constants::PERMISSIONS_EVERYONE_READ_WRITE_OWNER_EXECUTE,
                    ),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            });
            common_mounts.push(VolumeMount {
                name: "docker-config".to_string(),
                read_only: Some(true),
                mount_path: "/root/.docker".to_string(),
                ..VolumeMount::default()
            });
        }

        let files = topology
            .spec
            .deployment
            .files_from_config_map
            .get(node_name)
            .cloned()
            .unwrap_or_default();
        for file in files {
            let volume_name =
                config_map_volume_name(&file.config_map_name, &file.config_map_path);

            let mode = match file.mode.as_deref() {
                Some(constants::FILE_MODE_READ) => Some(constants::PERMISSIONS_EVERYONE_READ),
                Some(constants::FILE_MODE_EXECUTE) => {
                    Some(constants::PERMISSIONS_EVERYONE_READ_EXECUTE)
                }
                _ => None,
            };

            volumes.push(Volume {
                name: volume_name.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: file.config_map_name.clone(),
                    default_mode: mode,
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            });

            // relative paths land under the work dir, absolute paths as-is
            let mount_path = if file.file_path.starts_with('/') {
                file.file_path.clone()
            } else {
                format!("{}/{}", constants::LAUNCHER_WORKDIR, file.file_path)
            };

            common_mounts.push(VolumeMount {
                name: volume_name,
                read_only: Some(false),
                mount_path,
                sub_path: Some(file.config_map_path.clone()),
                ..VolumeMount::default()
            });
        }

        pod_spec_mut(deployment).volumes = Some(volumes);

        common_mounts
    }

    fn cri_sock_path(&self, topology: &Topology) -> (String, String) {
        let override_mode = topology
            .spec
            .image_pull
            .pull_through_override
            .as_deref()
            .unwrap_or_default();

        if override_mode == constants::IMAGE_PULL_THROUGH_MODE_NEVER {
            return (String::new(), String::new());
        }

        if override_mode.is_empty()
            && self.config.image_pull_through_mode == constants::IMAGE_PULL_THROUGH_MODE_NEVER
        {
            return (String::new(), String::new());
        }

        if let Some(full_path) = self.config.cri_sock_override.as_deref() {
            if let Some((dir, file)) = full_path.rsplit_once('/') {
                if !dir.is_empty() && !file.is_empty() {
                    return (dir.to_string(), file.to_string());
                }
            }

            warn!("cri sock override set but unparsable, skipping cri sock mount");
            return (String::new(), String::new());
        }

        let cri_kind = self
            .config
            .cri_kind_override
            .as_deref()
            .unwrap_or(self.cri_kind);
        if cri_kind == constants::CRI_KIND_CONTAINERD {
            return (
                constants::CRI_SOCK_CONTAINERD_DIR.to_string(),
                constants::CRI_SOCK_CONTAINERD.to_string(),
            );
        }

        warn!(
            cri_kind,
            "image pull through enabled but cri kind is not containerd, skipping cri sock mount"
        );
        (String::new(), String::new())
    }

    fn render_containers(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_config: &NodeConfig,
        node_name: &str,
        config_volume_name: &str,
        common_mounts: &[VolumeMount],
    ) {
        let native_mode = topology.native_mode();

        let image = topology
            .spec
            .deployment
            .launcher_image
            .clone()
            .unwrap_or_else(|| self.config.launcher_image.clone());
        let image_pull_policy = topology
            .spec
            .deployment
            .launcher_image_pull_policy
            .clone()
            .unwrap_or_else(|| self.config.launcher_image_pull_policy.clone());

        let mut launcher = Container {
            name: node_name.to_string(),
            working_dir: Some(constants::LAUNCHER_WORKDIR.to_string()),
            image: Some(image),
            command: Some(vec![LAUNCHER_COMMAND.to_string(), "launch".to_string()]),
            ports: Some(vec![
                ContainerPort {
                    name: Some(constants::CONNECTIVITY_VXLAN.to_string()),
                    container_port: constants::VXLAN_SERVICE_PORT,
                    protocol: Some(constants::UDP.to_string()),
                    ..ContainerPort::default()
                },
                ContainerPort {
                    name: Some(constants::CONNECTIVITY_SLURPEETH.to_string()),
                    container_port: constants::SLURPEETH_SERVICE_PORT,
                    protocol: Some(constants::TCP.to_string()),
                    ..ContainerPort::default()
                },
            ]),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: config_volume_name.to_string(),
                    read_only: Some(true),
                    mount_path: constants::NODE_CONFIG_FILE.to_string(),
                    sub_path: Some(node_name.to_string()),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: config_volume_name.to_string(),
                    read_only: Some(true),
                    mount_path: constants::FILES_FROM_URL_FILE.to_string(),
                    sub_path: Some(format!("{node_name}-files-from-url")),
                    ..VolumeMount::default()
                },
            ]),
            termination_message_path: Some("/dev/termination-log".to_string()),
            termination_message_policy: Some("File".to_string()),
            image_pull_policy: Some(image_pull_policy.clone()),
            ..Container::default()
        };

        // Users can project files that collide with managed mounts;
        // kubernetes rejects duplicate mountPaths, so collisions are skipped.
        {
            let mounts = launcher.volume_mounts.as_mut().expect("set above");
            let mut seen: Vec<String> =
                mounts.iter().map(|vm| vm.mount_path.trim().to_string()).collect();
            for vm in common_mounts {
                let mount_path = vm.mount_path.trim().to_string();
                if mount_path.is_empty() || seen.contains(&mount_path) {
                    continue;
                }
                seen.push(mount_path);
                mounts.push(vm.clone());
            }
        }

        if !native_mode {
            pod_spec_mut(deployment).containers = vec![launcher];
            return;
        }

        launcher.name = LAUNCHER_CONTAINER.to_string();

        let mut nos = Container {
            name: node_name.to_string(),
            image: Some(node_config.image.clone()),
            termination_message_path: Some("/dev/termination-log".to_string()),
            termination_message_policy: Some("File".to_string()),
            image_pull_policy: Some(image_pull_policy),
            ..Container::default()
        };

        // Systemd-based NOS images must be PID 1; process namespace sharing
        // would demote them.
        if matches!(node_config.kind.as_str(), "ceos" | "eos") {
            pod_spec_mut(deployment).share_process_namespace = None;
        }

        let node_def = topology
            .spec
            .nodes
            .get(node_name)
            .cloned()
            .unwrap_or_default();
        let files = topology
            .spec
            .deployment
            .files_from_config_map
            .get(node_name)
            .cloned()
            .unwrap_or_default();

        let mut input = ApplyInput {
            owning_topology: topology,
            node_name,
            node_image: &node_config.image,
            node_def: &node_def,
            links: &node_config.links,
            files_from_config_map: &files,
            deployment: &mut *deployment,
            nos: &mut nos,
        };
        apply_native_mode_overrides(&mut input);

        pod_spec_mut(deployment).containers = vec![nos, launcher];
    }

    /// In native mode a setup init container captures runtime state (pod-net
    /// snapshot, tunnels cache) before the NOS can mutate the shared netns.
    fn render_native_setup(&self, deployment: &mut Deployment, topology: &Topology) {
        if !topology.native_mode() {
            return;
        }

        let mut init = launcher_container(deployment).clone();
        init.name = SETUP_CONTAINER.to_string();
        init.command = Some(vec![LAUNCHER_COMMAND.to_string(), "setup".to_string()]);
        init.ports = None;
        init.startup_probe = None;
        init.readiness_probe = None;

        pod_spec_mut(deployment)
            .init_containers
            .get_or_insert_with(Vec::new)
            .push(init);
    }

    fn render_multus_annotation(&self, deployment: &mut Deployment, topology: &Topology) {
        if topology.spec.connectivity != ConnectivityKind::Multus {
            return;
        }

        let nets: Vec<MultusNet> = (0..topology.spec.links.len())
            .map(|idx| MultusNet {
                name: format!("{}-l{}", topology.name_any(), idx),
                namespace: None,
            })
            .collect();

        if nets.is_empty() {
            return;
        }

        set_networks_annotation(deployment, nets);
    }

    /// vrnetlab-based kinds may take over and flush their management
    /// interface; a dedicated secondary attachment gives them one to own
    /// without costing the pod its eth0.
    fn render_vrnetlab_mgmt_annotation(
        &self,
        deployment: &mut Deployment,
        node_config: &NodeConfig,
    ) {
        if !constants::VRNETLAB_QEMU_KINDS.contains(&node_config.kind.as_str()) {
            return;
        }

        let current = template_annotations_mut(deployment)
            .get(constants::MULTUS_NETWORKS_ANNOTATION)
            .cloned()
            .unwrap_or_default();

        let mut nets: Vec<MultusNet> = Vec::new();
        if !current.trim().is_empty() {
            if let Ok(existing) = serde_json::from_str::<Vec<serde_json::Value>>(&current) {
                for net in existing {
                    let name = net["name"].as_str().unwrap_or_default().to_string();
                    let namespace = net["namespace"].as_str().map(str::to_string);
                    if name == constants::VRNETLAB_MGMT_NAD_NAME
                        && namespace.as_deref() == Some(constants::VRNETLAB_MGMT_NAD_NAMESPACE)
                    {
                        return;
                    }
                    nets.push(MultusNet { name, namespace });
                }
            }
        }

        nets.push(MultusNet {
            name: constants::VRNETLAB_MGMT_NAD_NAME.to_string(),
            namespace: Some(constants::VRNETLAB_MGMT_NAD_NAMESPACE.to_string()),
        });

        set_networks_annotation(deployment, nets);
    }

    fn render_env(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_config: &NodeConfig,
        node_name: &str,
    ) {
        let launcher_log_level = topology
            .spec
            .deployment
            .launcher_log_level
            .clone()
            .unwrap_or_else(|| self.config.launcher_log_level.clone());

        let pull_through_mode = topology
            .spec
            .image_pull
            .pull_through_override
            .clone()
            .unwrap_or_else(|| self.config.image_pull_through_mode.clone());

        let cri_kind = self
            .config
            .cri_kind_override
            .clone()
            .unwrap_or_else(|| self.cri_kind.to_string());

        let field_env = |name: &str, field_path: &str| EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: Some("v1".to_string()),
                    field_path: field_path.to_string(),
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        };
        let value_env = |name: &str, value: String| EnvVar {
            name: name.to_string(),
            value: Some(value),
            ..EnvVar::default()
        };

        let mut envs = vec![
            field_env(constants::NODE_NAME_ENV, "spec.nodeName"),
            field_env(constants::POD_NAME_ENV, "metadata.name"),
            field_env(constants::POD_NAMESPACE_ENV, "metadata.namespace"),
            value_env(constants::APP_NAME_ENV, self.app_name.to_string()),
            value_env(
                constants::MANAGER_NAMESPACE_ENV,
                self.manager_namespace.to_string(),
            ),
            value_env(constants::LAUNCHER_CRI_KIND_ENV, cri_kind),
            value_env(
                constants::LAUNCHER_IMAGE_PULL_THROUGH_MODE_ENV,
                pull_through_mode,
            ),
            value_env(constants::LAUNCHER_LOGGER_LEVEL_ENV, launcher_log_level),
            value_env(
                constants::LAUNCHER_TOPOLOGY_NAME_ENV,
                topology.name_any(),
            ),
            value_env(constants::LAUNCHER_NODE_NAME_ENV, node_name.to_string()),
            value_env(
                constants::LAUNCHER_NODE_IMAGE_ENV,
                node_config.image.clone(),
            ),
            value_env(
                constants::LAUNCHER_CONNECTIVITY_KIND_ENV,
                topology.spec.connectivity.as_str().to_string(),
            ),
        ];

        if topology.native_mode() {
            envs.push(value_env(
                constants::LAUNCHER_NATIVE_MODE_ENV,
                constants::TRUE.to_string(),
            ));
        }

        if self.privileged(topology) {
            envs.push(value_env(
                constants::LAUNCHER_PRIVILEGED_ENV,
                constants::TRUE.to_string(),
            ));
        }

        if !topology.spec.deployment.extra_env.is_empty() {
            envs.extend(topology.spec.deployment.extra_env.iter().cloned());
        } else {
            envs.extend(self.config.extra_env.iter().cloned());
        }

        launcher_container_mut(deployment).env = Some(envs.clone());

        let init_containers = pod_spec_mut(deployment)
            .init_containers
            .get_or_insert_with(Vec::new);
        for container in init_containers.iter_mut() {
            if container.name == SETUP_CONTAINER {
                container.env = Some(envs.clone());
            }
        }
    }

    fn render_resources(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_config: &NodeConfig,
        node_name: &str,
    ) {
        let resources = &topology.spec.deployment.resources;

        if let Some(node_resources) = resources.get(node_name) {
            launcher_container_mut(deployment).resources = Some(node_resources.clone());
            return;
        }

        if let Some(default_resources) = resources.get(constants::DEFAULT) {
            launcher_container_mut(deployment).resources = Some(default_resources.clone());
            return;
        }

        if let Some(kind_resources) = self.config.resources_for_kind(&node_config.kind) {
            launcher_container_mut(deployment).resources = Some(kind_resources.clone());
        }
    }

    fn render_node_selectors(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_config: &NodeConfig,
    ) {
        let mut selectors = self.config.node_selectors_for_image(&node_config.image);
        if selectors.is_empty() {
            selectors = topology.spec.deployment.scheduling.node_selector.clone();
        }

        pod_spec_mut(deployment).node_selector = Some(selectors);
    }

    fn privileged(&self, topology: &Topology) -> bool {
        topology
            .spec
            .deployment
            .privileged_launcher
            .unwrap_or(self.config.privileged_launcher)
    }

    fn render_privileges(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_name: &str,
    ) {
        if self.privileged(topology) {
            for container in pod_spec_mut(deployment).containers.iter_mut() {
                container.security_context = Some(SecurityContext {
                    privileged: Some(true),
                    run_as_user: Some(0),
                    ..SecurityContext::default()
                });
            }
            return;
        }

        // without this you cant remount /sys/fs/cgroup, /proc, and /proc/sys;
        // the key suffix must name the container it applies to
        let annotations = deployment
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new);
        annotations.insert(
            format!("container.apparmor.security.beta.kubernetes.io/{node_name}"),
            "unconfined".to_string(),
        );
        if topology.native_mode() {
            annotations.insert(
                format!("container.apparmor.security.beta.kubernetes.io/{LAUNCHER_CONTAINER}"),
                "unconfined".to_string(),
            );
        }

        let capabilities = vec![
            "CHOWN",
            "DAC_OVERRIDE",
            "FSETID",
            "FOWNER",
            "MKNOD",
            "NET_RAW",
            "SETGID",
            "SETUID",
            "SETFCAP",
            "SETPCAP",
            "NET_BIND_SERVICE",
            "SYS_CHROOT",
            "KILL",
            "AUDIT_WRITE",
            // tunnel and veth management
            "NET_ADMIN",
            // remounts during NOS bring-up
            "SYS_ADMIN",
            "SYS_RESOURCE",
            // the rest were needed to boot various NOSes
            "LINUX_IMMUTABLE",
            "SYS_BOOT",
            "SYS_TIME",
            "SYS_MODULE",
            "SYS_RAWIO",
            "SYS_PTRACE",
            "SYS_NICE",
            "IPC_LOCK",
        ];

        for container in pod_spec_mut(deployment).containers.iter_mut() {
            // kind handlers may have set their own context (vrnetlab qemu
            // needs full privileges regardless)
            if container
                .security_context
                .as_ref()
                .and_then(|sc| sc.privileged)
                .unwrap_or(false)
            {
                continue;
            }

            container.security_context = Some(SecurityContext {
                privileged: Some(false),
                run_as_user: Some(0),
                capabilities: Some(Capabilities {
                    add: Some(capabilities.iter().map(|c| c.to_string()).collect()),
                    drop: None,
                }),
                ..SecurityContext::default()
            });
        }
    }

    fn render_status_probes(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_name: &str,
    ) {
        let probes = &topology.spec.status_probes;
        if !probes.enabled {
            return;
        }

        if probes.excluded_nodes.iter().any(|n| n == node_name) {
            return;
        }

        let probe_config = probes
            .node_probe_configurations
            .get(node_name)
            .unwrap_or(&probes.probe_configuration);

        if probe_config.ssh_probe_configuration.is_none()
            && probe_config.tcp_probe_configuration.is_none()
        {
            warn!(node = node_name, "no status probe configurations, skipping");
            return;
        }

        let grep = Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "grep".to_string(),
                    constants::NODE_STATUS_HEALTHY.to_string(),
                    constants::NODE_STATUS_FILE.to_string(),
                ]),
            }),
            timeout_seconds: Some(1),
            success_threshold: Some(1),
            period_seconds: Some(PROBE_PERIOD_SECONDS),
            ..Probe::default()
        };

        // default startup window: 40 * 20s (plus the initial delay), which
        // covers even slow-booting VM images
        let failure_threshold = match probe_config.startup_seconds {
            Some(seconds) if seconds > 0 => seconds / PROBE_PERIOD_SECONDS,
            _ => PROBE_DEFAULT_STARTUP_FAILURE_THRESHOLD,
        };

        // the startup probe delays readiness until the nos had time to boot
        let launcher = launcher_container_mut(deployment);
        launcher.startup_probe = Some(Probe {
            initial_delay_seconds: Some(PROBE_INITIAL_DELAY),
            failure_threshold: Some(failure_threshold),
            ..grep.clone()
        });
        launcher.readiness_probe = Some(Probe {
            failure_threshold: Some(PROBE_READINESS_FAILURE_THRESHOLD),
            ..grep
        });

        let mut probe_envs = Vec::new();
        if let Some(tcp) = &probe_config.tcp_probe_configuration {
            probe_envs.push(EnvVar {
                name: constants::LAUNCHER_TCP_PROBE_PORT_ENV.to_string(),
                value: Some(tcp.port.to_string()),
                ..EnvVar::default()
            });
        }
        if let Some(ssh) = &probe_config.ssh_probe_configuration {
            probe_envs.push(EnvVar {
                name: constants::LAUNCHER_SSH_PROBE_USERNAME_ENV.to_string(),
                value: Some(ssh.username.clone()),
                ..EnvVar::default()
            });
            probe_envs.push(EnvVar {
                name: constants::LAUNCHER_SSH_PROBE_PASSWORD_ENV.to_string(),
                value: Some(ssh.password.clone()),
                ..EnvVar::default()
            });
            if let Some(port) = ssh.port {
                probe_envs.push(EnvVar {
                    name: constants::LAUNCHER_SSH_PROBE_PORT_ENV.to_string(),
                    value: Some(port.to_string()),
                    ..EnvVar::default()
                });
            }
        }

        launcher_container_mut(deployment)
            .env
            .get_or_insert_with(Vec::new)
            .extend(probe_envs);
    }

    /// Device nodes are not guaranteed in the container filesystem even when
    /// privileged; KVM-backed images need /dev/kvm and NOSes generally need
    /// /dev/net/tun, so mount them for every container.
    fn render_devices(&self, deployment: &mut Deployment) {
        let devices = [
            ("dev-kvm", "/dev/kvm"),
            ("dev-fuse", "/dev/fuse"),
            ("dev-net-tun", "/dev/net/tun"),
        ];

        let volumes = pod_spec_mut(deployment).volumes.get_or_insert_with(Vec::new);
        for (name, path) in devices {
            if volumes.iter().any(|v| v.name == name) {
                continue;
            }
            volumes.push(Volume {
                name: name.to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: path.to_string(),
                    type_: Some(String::new()),
                }),
                ..Volume::default()
            });
        }

        for container in pod_spec_mut(deployment).containers.iter_mut() {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            for (name, path) in devices {
                if mounts
                    .iter()
                    .any(|vm| vm.name == name || vm.mount_path.trim() == path)
                {
                    continue;
                }
                mounts.push(VolumeMount {
                    name: name.to_string(),
                    read_only: Some(false),
                    mount_path: path.to_string(),
                    ..VolumeMount::default()
                });
            }
        }
    }

    fn render_persistence(
        &self,
        deployment: &mut Deployment,
        topology: &Topology,
        node_name: &str,
    ) {
        if !topology.spec.deployment.persistence.enabled {
            return;
        }

        let volume_name = "node-directory-persistence";

        pod_spec_mut(deployment)
            .volumes
            .get_or_insert_with(Vec::new)
            .push(Volume {
                name: volume_name.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: topology.node_object_name(node_name),
                    read_only: Some(false),
                }),
                ..Volume::default()
            });

        launcher_container_mut(deployment)
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: volume_name.to_string(),
                read_only: Some(false),
                mount_path: format!("{}/persist-{node_name}", constants::LAUNCHER_WORKDIR),
                ..VolumeMount::default()
            });
    }

    /// Render the PVC backing a persisted node directory.
    pub fn render_pvc(&self, topology: &Topology, node_name: &str) -> Result<PersistentVolumeClaim> {
        let oref = topology.controller_owner_ref(&()).ok_or_else(|| {
            Error::OtherError("topology has no uid; cannot create owner reference".to_string())
        })?;

        let name = topology.node_object_name(node_name);
        let claim_size = topology
            .spec
            .deployment
            .persistence
            .claim_size
            .clone()
            .unwrap_or_else(|| DEFAULT_PERSISTENCE_CLAIM_SIZE.to_string());

        Ok(PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: topology.namespace(),
                owner_references: Some(vec![oref]),
                labels: Some(self.selector_labels(&name, &topology.name_any(), node_name)),
                ..ObjectMeta::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: topology
                    .spec
                    .deployment
                    .persistence
                    .storage_class_name
                    .clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(claim_size),
                    )])),
                    ..VolumeResourceRequirements::default()
                }),
                ..PersistentVolumeClaimSpec::default()
            }),
            ..PersistentVolumeClaim::default()
        })
    }

    /// True iff the existing deployment matches the rendered one on every
    /// diff-relevant field and is owned by exactly the expected topology.
    pub fn conforms(
        &self,
        existing: &Deployment,
        rendered: &Deployment,
        expected_owner_uid: &str,
    ) -> bool {
        let (Some(existing_spec), Some(rendered_spec)) =
            (existing.spec.as_ref(), rendered.spec.as_ref())
        else {
            return false;
        };

        if existing_spec.replicas != rendered_spec.replicas {
            return false;
        }

        if existing_spec.selector != rendered_spec.selector {
            return false;
        }

        let (Some(existing_pod), Some(rendered_pod)) = (
            existing_spec.template.spec.as_ref(),
            rendered_spec.template.spec.as_ref(),
        ) else {
            return false;
        };

        if existing_pod.hostname != rendered_pod.hostname {
            return false;
        }

        if !map_contains_all_expected(
            existing_pod.node_selector.as_ref(),
            rendered_pod.node_selector.as_ref(),
        ) {
            return false;
        }

        if existing_pod.tolerations != rendered_pod.tolerations {
            return false;
        }

        if existing_pod.volumes != rendered_pod.volumes {
            return false;
        }

        if existing_pod.containers != rendered_pod.containers {
            return false;
        }

        if existing_pod.init_containers != rendered_pod.init_containers {
            return false;
        }

        if existing_pod.service_account_name != rendered_pod.service_account_name {
            return false;
        }

        if existing_pod.restart_policy != rendered_pod.restart_policy {
            return false;
        }

        if !map_contains_all_expected(
            existing.metadata.annotations.as_ref(),
            rendered.metadata.annotations.as_ref(),
        ) {
            return false;
        }

        if !map_contains_all_expected(
            existing.metadata.labels.as_ref(),
            rendered.metadata.labels.as_ref(),
        ) {
            return false;
        }

        let existing_template_meta = existing_spec.template.metadata.as_ref();
        let rendered_template_meta = rendered_spec.template.metadata.as_ref();
        if !map_contains_all_expected(
            existing_template_meta.and_then(|m| m.annotations.as_ref()),
            rendered_template_meta.and_then(|m| m.annotations.as_ref()),
        ) {
            return false;
        }

        if !map_contains_all_expected(
            existing_template_meta.and_then(|m| m.labels.as_ref()),
            rendered_template_meta.and_then(|m| m.labels.as_ref()),
        ) {
            return false;
        }

        // exactly one owner reference: the owning topology
        let owner_refs = existing.owner_references();
        if owner_refs.len() != 1 {
            return false;
        }

        owner_refs[0].uid == expected_owner_uid
    }

    /// Queue restarts for nodes whose rendered config changed.
    ///
    /// Gates purely on the config hash. Per-node structural comparison was
    /// deliberately abandoned: the previous configs round-trip through YAML
    /// in topology status, and benign nil-vs-empty deltas from that round
    /// trip caused perpetual restart loops. The hash captures real changes
    /// and is stable, so when it moves every pre-existing node restarts.
    pub fn determine_nodes_needing_restart(&self, data: &mut ReconcileData) {
        if data.previous_hash.as_deref() == Some(data.resolved_hash.as_str()) {
            return;
        }

        if data.previous_hash.is_none() {
            // first reconcile; nothing is running yet
            return;
        }

        let nodes: Vec<String> = data
            .resolved_configs
            .keys()
            .filter(|node| data.previous_configs.contains_key(*node))
            .cloned()
            .collect();

        data.nodes_needing_restart.extend(nodes);
    }
}

fn pod_spec_mut(deployment: &mut Deployment) -> &mut PodSpec {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

fn template_annotations_mut(deployment: &mut Deployment) -> &mut BTreeMap<String, String> {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
}

fn set_networks_annotation(deployment: &mut Deployment, nets: Vec<MultusNet>) {
    match serde_json::to_string(&nets) {
        Ok(raw) => {
            template_annotations_mut(deployment)
                .insert(constants::MULTUS_NETWORKS_ANNOTATION.to_string(), raw);
        }
        Err(error) => {
            warn!(%error, "failed marshaling secondary networks annotation");
        }
    }
}

/// The launcher container: the one named for it, else the first.
fn launcher_container(deployment: &Deployment) -> &Container {
    let containers = &deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .expect("deployment has a pod spec")
        .containers;

    containers
        .iter()
        .find(|c| c.name == LAUNCHER_CONTAINER)
        .unwrap_or_else(|| &containers[0])
}

fn launcher_container_mut(deployment: &mut Deployment) -> &mut Container {
    let containers = &mut pod_spec_mut(deployment).containers;
    let idx = containers
        .iter()
        .position(|c| c.name == LAUNCHER_CONTAINER)
        .unwrap_or(0);
    &mut containers[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LinkDefinition, NodeDefinition, TopologySpec};
    use crate::topology_controller::configs::resolve_node_configs;
    use crate::util::hash::hash_object;

    fn ceos_topology() -> Topology {
        let mut spec = TopologySpec::default();
        for name in ["l1", "l2"] {
            spec.nodes.insert(
                name.into(),
                NodeDefinition {
                    kind: "ceos".into(),
                    image: "ceos:4.32".into(),
                    ..NodeDefinition::default()
                },
            );
        }
        spec.links.push(LinkDefinition {
            endpoints: vec!["l1:eth1".into(), "l2:eth1".into()],
        });
        let mut topo = Topology::new("t1", spec);
        topo.metadata.namespace = Some("ns".into());
        topo.metadata.uid = Some("uid-t1".into());
        topo
    }

    fn reconciler(config: &ResolvedConfig) -> DeploymentReconciler<'_> {
        DeploymentReconciler {
            app_name: "skyforge",
            manager_namespace: "skyforge-system",
            cri_kind: "containerd",
            config,
        }
    }

    #[test]
    fn render_native_has_setup_init_nos_and_launcher() {
        let topo = ceos_topology();
        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let deployment = reconciler(&config).render(&topo, &configs, "l1").unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("t1-l1"));

        let pod = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].name, "l1");
        assert_eq!(pod.containers[1].name, LAUNCHER_CONTAINER);
        assert_eq!(pod.hostname.as_deref(), Some("l1"));
        assert_eq!(
            pod.service_account_name.as_deref(),
            Some(constants::LAUNCHER_SERVICE_ACCOUNT)
        );

        let init = pod.init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, SETUP_CONTAINER);
        assert_eq!(
            init[0].command.as_ref().unwrap(),
            &vec![LAUNCHER_COMMAND.to_string(), "setup".to_string()]
        );
        // setup shares the launcher env
        assert_eq!(init[0].env, pod.containers[1].env);

        // ceos disables process namespace sharing
        assert_eq!(pod.share_process_namespace, None);
    }

    #[test]
    fn render_launcher_env_and_ports() {
        let topo = ceos_topology();
        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let deployment = reconciler(&config).render(&topo, &configs, "l1").unwrap();

        let pod = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        let launcher = &pod.containers[1];

        let ports = launcher.ports.as_ref().unwrap();
        assert!(ports
            .iter()
            .any(|p| p.container_port == 6784 && p.protocol.as_deref() == Some("UDP")));
        assert!(ports
            .iter()
            .any(|p| p.container_port == 4799 && p.protocol.as_deref() == Some("TCP")));

        let env = launcher.env.as_ref().unwrap();
        let get = |name: &str| {
            env.iter()
                .find(|e| e.name == name)
                .and_then(|e| e.value.clone())
        };
        assert_eq!(get("LAUNCHER_TOPOLOGY_NAME").as_deref(), Some("t1"));
        assert_eq!(get("LAUNCHER_NODE_NAME").as_deref(), Some("l1"));
        assert_eq!(get("LAUNCHER_NODE_IMAGE").as_deref(), Some("ceos:4.32"));
        assert_eq!(get("LAUNCHER_CONNECTIVITY_KIND").as_deref(), Some("vxlan"));
        assert_eq!(get("LAUNCHER_NATIVE_MODE").as_deref(), Some("true"));

        let nos = &pod.containers[0];
        let nos_env = nos.env.as_ref().unwrap();
        assert!(nos_env.iter().any(|e| e.name == "CEOS"));
        // env sorted for stable diffs
        let names: Vec<&str> = nos_env.iter().map(|e| e.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn render_is_deterministic() {
        let topo = ceos_topology();
        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let r = reconciler(&config);

        let a = r.render(&topo, &configs, "l1").unwrap();
        let b = r.render(&topo, &configs, "l1").unwrap();
        assert_eq!(hash_object(&a).unwrap().1, hash_object(&b).unwrap().1);
    }

    #[test]
    fn conforms_matches_rendered_and_rejects_drift() {
        let topo = ceos_topology();
        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let r = reconciler(&config);
        let rendered = r.render(&topo, &configs, "l1").unwrap();

        let existing = rendered.clone();
        assert!(r.conforms(&existing, &rendered, "uid-t1"));

        // wrong owner
        assert!(!r.conforms(&existing, &rendered, "uid-other"));

        // label drift
        let mut drifted = rendered.clone();
        drifted
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .remove(constants::LABEL_TOPOLOGY_NODE);
        assert!(!r.conforms(&drifted, &rendered, "uid-t1"));

        // container drift
        let mut drifted = rendered.clone();
        drifted
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .containers[0]
            .image = Some("other:1".into());
        assert!(!r.conforms(&drifted, &rendered, "uid-t1"));

        // extra labels on the existing side are fine
        let mut extra = rendered.clone();
        extra
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("other-controller/added".into(), "x".into());
        assert!(r.conforms(&extra, &rendered, "uid-t1"));
    }

    #[test]
    fn restart_decision_gates_on_config_hash() {
        let topo = ceos_topology();
        let configs = resolve_node_configs(&topo).unwrap();
        let hash = super::super::configs::config_hash(&configs).unwrap();
        let config = ResolvedConfig::default();
        let r = reconciler(&config);

        // unchanged hash: no restarts
        let mut data = ReconcileData {
            previous_hash: Some(hash.clone()),
            resolved_hash: hash.clone(),
            previous_configs: configs.clone(),
            resolved_configs: configs.clone(),
            nodes_needing_restart: Default::default(),
        };
        r.determine_nodes_needing_restart(&mut data);
        assert!(data.nodes_needing_restart.is_empty());

        // changed hash: all pre-existing nodes restart, new nodes do not
        let mut changed = topo.clone();
        changed.spec.nodes.insert(
            "l3".into(),
            NodeDefinition {
                kind: "ceos".into(),
                image: "ceos:4.32".into(),
                ..NodeDefinition::default()
            },
        );
        let resolved_configs = resolve_node_configs(&changed).unwrap();
        let resolved_hash = super::super::configs::config_hash(&resolved_configs).unwrap();

        let mut data = ReconcileData {
            previous_hash: Some(hash),
            resolved_hash,
            previous_configs: configs.clone(),
            resolved_configs,
            nodes_needing_restart: Default::default(),
        };
        r.determine_nodes_needing_restart(&mut data);
        assert!(data.nodes_needing_restart.contains("l1"));
        assert!(data.nodes_needing_restart.contains("l2"));
        assert!(!data.nodes_needing_restart.contains("l3"));
    }

    #[test]
    fn legacy_mode_renders_single_launcher_container() {
        let mut topo = ceos_topology();
        topo.spec.deployment.native_mode = Some(false);
        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let deployment = reconciler(&config).render(&topo, &configs, "l1").unwrap();

        let pod = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "l1");
        assert!(pod.init_containers.as_ref().unwrap().is_empty());
    }

    #[test]
    fn vrnetlab_kind_gets_mgmt_attachment_annotation() {
        let mut spec = TopologySpec::default();
        spec.nodes.insert(
            "r7".into(),
            NodeDefinition {
                kind: "cisco_iol".into(),
                image: "ghcr.io/x/vrnetlab/cisco_iol:17".into(),
                ..NodeDefinition::default()
            },
        );
        let mut topo = Topology::new("net", spec);
        topo.metadata.namespace = Some("ns".into());
        topo.metadata.uid = Some("uid-net".into());

        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let deployment = reconciler(&config).render(&topo, &configs, "r7").unwrap();

        let annotations = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap();
        let nets = annotations.get(constants::MULTUS_NETWORKS_ANNOTATION).unwrap();
        assert!(nets.contains("vrnetlab-mgmt"));
        assert!(nets.contains("kube-system"));
    }

    #[test]
    fn persistence_renders_pvc_and_mount() {
        let mut topo = ceos_topology();
        topo.spec.deployment.persistence.enabled = true;
        topo.spec.deployment.persistence.claim_size = Some("10Gi".into());
        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let r = reconciler(&config);

        let deployment = r.render(&topo, &configs, "l1").unwrap();
        let pod = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        assert!(pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .any(|v| v.persistent_volume_claim.is_some()));

        let pvc = r.render_pvc(&topo, "l1").unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("t1-l1"));
        let requests = pvc
            .spec
            .as_ref()
            .unwrap()
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests.get("storage").unwrap().0, "10Gi");
    }

    #[test]
    fn status_probes_render_grep_probes_and_env() {
        let mut topo = ceos_topology();
        topo.spec.status_probes.enabled = true;
        topo.spec.status_probes.probe_configuration.tcp_probe_configuration =
            Some(crate::crd::TcpProbeConfiguration { port: 22 });
        let configs = resolve_node_configs(&topo).unwrap();
        let config = ResolvedConfig::default();
        let deployment = reconciler(&config).render(&topo, &configs, "l1").unwrap();

        let pod = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        let launcher = pod
            .containers
            .iter()
            .find(|c| c.name == LAUNCHER_CONTAINER)
            .unwrap();

        let startup = launcher.startup_probe.as_ref().unwrap();
        assert_eq!(startup.failure_threshold, Some(40));
        assert_eq!(
            startup.exec.as_ref().unwrap().command.as_ref().unwrap()[0],
            "grep"
        );
        assert!(launcher.readiness_probe.is_some());
        assert!(launcher
            .env
            .as_ref()
            .unwrap()
            .iter()
            .any(|e| e.name == "LAUNCHER_TCP_PROBE_PORT" && e.value.as_deref() == Some("22")));
    }
}
