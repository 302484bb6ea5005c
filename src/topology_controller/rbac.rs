//! Launcher RBAC in topology namespaces.
//!
//! Node pods run under a fixed service account so launchers can read their
//! Connectivity record and resolve fabric services. The objects are shared
//! by every topology in the namespace, so they carry no owner references and
//! may pre-exist an install; server-side apply keeps them converged.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::constants::LAUNCHER_SERVICE_ACCOUNT;
use crate::crd::API_GROUP;

pub static LAUNCHER_ROLE: &str = "skyforge-launcher-role";
pub static LAUNCHER_ROLE_BINDING: &str = "skyforge-launcher-role-binding";

pub fn render_launcher_service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(LAUNCHER_SERVICE_ACCOUNT.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        automount_service_account_token: Some(true),
        ..ServiceAccount::default()
    }
}

pub fn render_launcher_role(namespace: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(LAUNCHER_ROLE.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![API_GROUP.to_string()]),
                resources: Some(vec!["connectivities".to_string()]),
                verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
                ..PolicyRule::default()
            },
            PolicyRule {
                api_groups: Some(vec![API_GROUP.to_string()]),
                resources: Some(vec!["imagerequests".to_string()]),
                verbs: vec!["get".to_string(), "create".to_string()],
                ..PolicyRule::default()
            },
            // destination resolution falls back from DNS to these
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["services".to_string(), "endpoints".to_string()]),
                verbs: vec!["get".to_string(), "list".to_string()],
                ..PolicyRule::default()
            },
        ]),
    }
}

pub fn render_launcher_role_binding(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(LAUNCHER_ROLE_BINDING.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: LAUNCHER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: LAUNCHER_SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
            ..Subject::default()
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_binding_targets_launcher_service_account() {
        let rb = render_launcher_role_binding("ns");
        assert_eq!(rb.role_ref.name, LAUNCHER_ROLE);
        let subject = rb.subjects.unwrap().pop().unwrap();
        assert_eq!(subject.name, LAUNCHER_SERVICE_ACCOUNT);
        assert_eq!(subject.namespace.as_deref(), Some("ns"));
    }

    #[test]
    fn role_grants_connectivity_reads() {
        let role = render_launcher_role("ns");
        let rules = role.rules.unwrap();
        assert!(rules.iter().any(|r| r
            .resources
            .as_ref()
            .is_some_and(|res| res.contains(&"connectivities".to_string()))));
    }
}
