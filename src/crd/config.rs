use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::constants;

/// Cluster-wide defaults, read by the controller as a singleton named after
/// the app in the manager namespace. Namespaced (not cluster-scoped) so the
/// install does not require cluster-wide permissions and the object can be
/// owned by the manager deployment.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "skyforge.dev",
    version = "v1alpha1",
    kind = "Config",
    derive = "Default",
    namespaced,
    doc = "Config holds global defaults applied to every reconciled topology"
)]
pub struct ConfigSpec {
    #[serde(default)]
    pub metadata: ConfigMetadata,
    #[serde(default)]
    pub deployment: ConfigDeployment,
    #[serde(default)]
    pub image_pull: ConfigImagePull,
}

/// Annotations/labels stamped onto every child object.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDeployment {
    pub launcher_image: Option<String>,
    pub launcher_image_pull_policy: Option<String>,
    pub launcher_log_level: Option<String>,
    pub privileged_launcher: Option<bool>,
    /// Resource defaults per NOS kind; `default` applies to all kinds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources_by_node_kind: BTreeMap<String, ResourceRequirements>,
    /// Node selectors applied to deployments whose node image contains the
    /// map key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selectors_by_image: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_env: Vec<EnvVar>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigImagePull {
    pub pull_through_mode: Option<String>,
    pub cri_sock_override: Option<String>,
    pub cri_kind_override: Option<String>,
    pub docker_daemon_config: Option<String>,
    pub docker_config: Option<String>,
}

/// The Config singleton flattened into always-present values. Built from the
/// fetched Config (or from nothing, when the singleton is absent).
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub launcher_image: String,
    pub launcher_image_pull_policy: String,
    pub launcher_log_level: String,
    pub privileged_launcher: bool,
    pub resources_by_node_kind: BTreeMap<String, ResourceRequirements>,
    pub node_selectors_by_image: BTreeMap<String, BTreeMap<String, String>>,
    pub extra_env: Vec<EnvVar>,
    pub image_pull_through_mode: String,
    pub cri_sock_override: Option<String>,
    pub cri_kind_override: Option<String>,
    pub docker_daemon_config: Option<String>,
    pub docker_config: Option<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            launcher_image: "ghcr.io/skyforge/launcher:latest".to_string(),
            launcher_image_pull_policy: "IfNotPresent".to_string(),
            launcher_log_level: "info".to_string(),
            privileged_launcher: false,
            resources_by_node_kind: BTreeMap::new(),
            node_selectors_by_image: BTreeMap::new(),
            extra_env: Vec::new(),
            image_pull_through_mode: constants::IMAGE_PULL_THROUGH_MODE_NEVER.to_string(),
            cri_sock_override: None,
            cri_kind_override: None,
            docker_daemon_config: None,
            docker_config: None,
        }
    }
}

impl ResolvedConfig {
    pub fn from_config(config: Option<&Config>) -> Self {
        let mut resolved = Self::default();

        let Some(config) = config else {
            return resolved;
        };

        let spec = &config.spec;
        resolved.annotations = spec.metadata.annotations.clone();
        resolved.labels = spec.metadata.labels.clone();

        if let Some(image) = &spec.deployment.launcher_image {
            resolved.launcher_image = image.clone();
        }
        if let Some(policy) = &spec.deployment.launcher_image_pull_policy {
            resolved.launcher_image_pull_policy = policy.clone();
        }
        if let Some(level) = &spec.deployment.launcher_log_level {
            resolved.launcher_log_level = level.clone();
        }
        if let Some(privileged) = spec.deployment.privileged_launcher {
            resolved.privileged_launcher = privileged;
        }
        resolved.resources_by_node_kind = spec.deployment.resources_by_node_kind.clone();
        resolved.node_selectors_by_image = spec.deployment.node_selectors_by_image.clone();
        resolved.extra_env = spec.deployment.extra_env.clone();

        if let Some(mode) = &spec.image_pull.pull_through_mode {
            resolved.image_pull_through_mode = mode.clone();
        }
        resolved.cri_sock_override = spec.image_pull.cri_sock_override.clone();
        resolved.cri_kind_override = spec.image_pull.cri_kind_override.clone();
        resolved.docker_daemon_config = spec.image_pull.docker_daemon_config.clone();
        resolved.docker_config = spec.image_pull.docker_config.clone();

        resolved
    }

    /// Resource requirements for a NOS kind, falling back to the `default`
    /// entry.
    pub fn resources_for_kind(&self, kind: &str) -> Option<&ResourceRequirements> {
        self.resources_by_node_kind
            .get(kind)
            .or_else(|| self.resources_by_node_kind.get(constants::DEFAULT))
    }

    /// Node selectors for a node image (substring match on the map key).
    pub fn node_selectors_for_image(&self, image: &str) -> BTreeMap<String, String> {
        for (needle, selectors) in &self.node_selectors_by_image {
            if !needle.is_empty() && image.contains(needle.as_str()) {
                return selectors.clone();
            }
        }
        BTreeMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_config_defaults_when_singleton_absent() {
        let resolved = ResolvedConfig::from_config(None);
        assert_eq!(resolved.launcher_image_pull_policy, "IfNotPresent");
        assert_eq!(
            resolved.image_pull_through_mode,
            constants::IMAGE_PULL_THROUGH_MODE_NEVER
        );
        assert!(!resolved.privileged_launcher);
    }

    #[test]
    fn resolved_config_prefers_singleton_values() {
        let mut spec = ConfigSpec::default();
        spec.deployment.launcher_image = Some("example.com/launcher:v9".into());
        spec.deployment.privileged_launcher = Some(true);
        spec.image_pull.pull_through_mode = Some("auto".into());
        let config = Config::new("skyforge", spec);

        let resolved = ResolvedConfig::from_config(Some(&config));
        assert_eq!(resolved.launcher_image, "example.com/launcher:v9");
        assert!(resolved.privileged_launcher);
        assert_eq!(resolved.image_pull_through_mode, "auto");
    }

    #[test]
    fn node_selectors_match_on_image_substring() {
        let mut spec = ConfigSpec::default();
        let mut selectors = BTreeMap::new();
        selectors.insert("kubernetes.io/arch".to_string(), "amd64".to_string());
        spec.deployment
            .node_selectors_by_image
            .insert("vrnetlab".to_string(), selectors.clone());
        let config = Config::new("skyforge", spec);

        let resolved = ResolvedConfig::from_config(Some(&config));
        assert_eq!(
            resolved.node_selectors_for_image("ghcr.io/x/vrnetlab/vr-vmx:18.2"),
            selectors
        );
        assert!(resolved.node_selectors_for_image("ceos:4.32").is_empty());
    }
}
