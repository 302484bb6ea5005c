use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;

use crate::crd::{FileFromConfigMap, NodeDefinition, Topology, TopologySpec};
use crate::topology_controller::configs::LinkEndpoint;

use super::*;

fn topology(name: &str) -> Topology {
    Topology::new(name, TopologySpec::default())
}

fn endpoint(index: usize, local: &str, peer: &str, peer_if: &str) -> LinkEndpoint {
    LinkEndpoint {
        link_index: index,
        local_interface: local.to_string(),
        peer_node: peer.to_string(),
        peer_interface: peer_if.to_string(),
    }
}

fn env_of(container: &Container, key: &str) -> Option<String> {
    env_value(container, key)
}

#[test]
fn ceos_gets_enforced_env_tmpfs_and_init_command() {
    let topo = topology("t1");
    let node_def = NodeDefinition {
        kind: "ceos".into(),
        image: "ceos:4.32".into(),
        startup_config: Some("configs/l1.cfg".into()),
        ..NodeDefinition::default()
    };
    let links = [endpoint(0, "eth1", "l2", "eth1")];
    let files = [FileFromConfigMap {
        file_path: "configs/l1.cfg".into(),
        config_map_name: "t1".into(),
        config_map_path: "l1-startup".into(),
        mode: None,
    }];
    let mut deployment = Deployment::default();
    let mut nos = Container::default();

    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "l1",
        node_image: "ceos:4.32",
        node_def: &node_def,
        links: &links,
        files_from_config_map: &files,
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    for (key, expected) in [
        ("CEOS", "1"),
        ("EOS_PLATFORM", "ceoslab"),
        ("container", "docker"),
        ("ETBA", "1"),
        ("SKIP_ZEROTOUCH_BARRIER_IN_SYSDBINIT", "1"),
        ("MAPETH0", "1"),
        ("MGMT_INTF", "eth0"),
        ("INTFTYPE", "eth"),
    ] {
        assert_eq!(env_of(&nos, key).as_deref(), Some(expected), "env {key}");
    }

    let command = nos.command.as_ref().unwrap();
    assert_eq!(command[0], "bash");
    assert_eq!(command[1], "-c");
    assert!(command[2].starts_with("exec /sbin/init "));
    assert!(command[2].contains("systemd.setenv=CEOS=1"));
    assert!(command[2].contains("systemd.setenv=MGMT_INTF=eth0"));

    let mounts: Vec<&str> = nos
        .volume_mounts
        .as_ref()
        .unwrap()
        .iter()
        .map(|vm| vm.mount_path.as_str())
        .collect();
    for path in ["/run", "/run/lock", "/tmp", "/mnt/flash/startup-config"] {
        assert!(mounts.contains(&path), "missing mount {path}");
    }

    let startup = nos
        .volume_mounts
        .as_ref()
        .unwrap()
        .iter()
        .find(|vm| vm.mount_path == "/mnt/flash/startup-config")
        .unwrap();
    assert_eq!(startup.sub_path.as_deref(), Some("l1-startup"));
    assert_eq!(startup.read_only, Some(true));

    let volume_names: Vec<String> = deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .volumes
        .as_ref()
        .unwrap()
        .iter()
        .map(|v| v.name.clone())
        .collect();
    assert!(volume_names.contains(&"systemd-run".to_string()));
}

#[test]
fn ceos_preserves_declared_intftype_and_strips_mgmt_vrf() {
    let topo = topology("t1");
    let mut node_def = NodeDefinition {
        kind: "ceos".into(),
        image: "ceos:4.32".into(),
        ..NodeDefinition::default()
    };
    node_def.env.insert("INTFTYPE".into(), "et".into());
    node_def.env.insert("CLAB_MGMT_VRF".into(), "mgmt".into());

    let mut deployment = Deployment::default();
    let mut nos = Container::default();
    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "l1",
        node_image: "ceos:4.32",
        node_def: &node_def,
        links: &[],
        files_from_config_map: &[],
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    assert_eq!(env_of(&nos, "INTFTYPE").as_deref(), Some("et"));
    assert!(env_of(&nos, "CLAB_MGMT_VRF").is_none());
    assert!(nos.command.as_ref().unwrap()[2].contains("systemd.setenv=INTFTYPE=et"));
}

#[test]
fn vrnetlab_qemu_sets_intfs_passthrough_and_privileges() {
    let topo = topology("lab");
    let node_def = NodeDefinition {
        kind: "vr-vmx".into(),
        image: "ghcr.io/example/vrnetlab/vr-vmx:18.2".into(),
        ..NodeDefinition::default()
    };
    let links = [
        endpoint(0, "eth1", "r2", "eth1"),
        endpoint(1, "eth2", "r3", "eth1"),
        endpoint(2, "eth5", "r4", "eth1"),
    ];
    let mut deployment = Deployment::default();
    let mut nos = Container::default();
    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "r1",
        node_image: "ghcr.io/example/vrnetlab/vr-vmx:18.2",
        node_def: &node_def,
        links: &links,
        files_from_config_map: &[],
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    assert_eq!(env_of(&nos, "CLAB_INTFS").as_deref(), Some("5"));
    assert_eq!(env_of(&nos, "CLAB_MGMT_PASSTHROUGH").as_deref(), Some("false"));

    let sc = nos.security_context.as_ref().unwrap();
    assert_eq!(sc.privileged, Some(true));
    assert_eq!(sc.run_as_user, Some(0));
    assert_eq!(sc.allow_privilege_escalation, Some(true));

    let args = nos.args.as_ref().unwrap();
    assert!(args.contains(&"--connection-mode".to_string()));
    assert!(args.contains(&"tc".to_string()));
    assert!(args.contains(&"--username".to_string()));
}

#[test]
fn vrnetlab_qemu_mounts_startup_config_into_nos() {
    let topo = topology("lab");
    let node_def = NodeDefinition {
        kind: "vr-vmx".into(),
        image: "ghcr.io/example/vrnetlab/vr-vmx:18.2".into(),
        startup_config: Some("/config/startup-config.cfg".into()),
        ..NodeDefinition::default()
    };
    let files = [FileFromConfigMap {
        file_path: "/config/startup-config.cfg".into(),
        config_map_name: "cm-r1".into(),
        config_map_path: "r1-startup-config.cfg".into(),
        mode: None,
    }];
    let mut deployment = Deployment::default();
    let mut nos = Container::default();
    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "r1",
        node_image: "ghcr.io/example/vrnetlab/vr-vmx:18.2",
        node_def: &node_def,
        links: &[],
        files_from_config_map: &files,
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    let mount = nos
        .volume_mounts
        .as_ref()
        .unwrap()
        .iter()
        .find(|vm| vm.mount_path == "/config/startup-config.cfg")
        .expect("startup config mount");
    assert_eq!(mount.sub_path.as_deref(), Some("r1-startup-config.cfg"));
}

#[test]
fn vios_mounts_startup_config_to_config_dir() {
    let topo = topology("lab");
    let node_def = NodeDefinition {
        kind: "cisco_vios".into(),
        image: "registry.local/vios:15.9".into(),
        startup_config: Some("configs/r1.cfg".into()),
        ..NodeDefinition::default()
    };
    let files = [FileFromConfigMap {
        file_path: "configs/r1.cfg".into(),
        config_map_name: "cm-r1".into(),
        config_map_path: "r1.cfg".into(),
        mode: None,
    }];
    let mut deployment = Deployment::default();
    let mut nos = Container::default();
    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "r1",
        node_image: "registry.local/vios:15.9",
        node_def: &node_def,
        links: &[],
        files_from_config_map: &files,
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    let mount = nos
        .volume_mounts
        .as_ref()
        .unwrap()
        .iter()
        .find(|vm| vm.mount_path == "/config/startup-config.cfg")
        .expect("startup config mount");
    assert_eq!(mount.sub_path.as_deref(), Some("r1.cfg"));
}

#[test]
fn iol_env_and_bootstrap_command() {
    let topo = topology("net");
    let node_def = NodeDefinition {
        kind: "cisco_iol".into(),
        image: "ghcr.io/example/vrnetlab/cisco_iol:17.12".into(),
        ..NodeDefinition::default()
    };
    let links = [
        endpoint(0, "Ethernet0/1", "r2", "Ethernet0/1"),
        endpoint(1, "Ethernet0/2", "r3", "Ethernet0/1"),
    ];
    let mut deployment = Deployment::default();
    let mut nos = Container::default();
    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "r7",
        node_image: "ghcr.io/example/vrnetlab/cisco_iol:17.12",
        node_def: &node_def,
        links: &links,
        files_from_config_map: &[],
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    let pid: u32 = env_of(&nos, "IOL_PID").unwrap().parse().unwrap();
    assert!((1..=1023).contains(&pid));
    assert_eq!(
        env_of(&nos, "SKYFORGE_IOL_NVRAM").as_deref(),
        Some(format!("nvram_{pid:05}").as_str())
    );
    assert_eq!(env_of(&nos, "SKYFORGE_NODE_NAME").as_deref(), Some("r7"));
    assert_eq!(
        env_of(&nos, "SKYFORGE_IOL_LINK_IFACES").as_deref(),
        Some("ethernet0-1,ethernet0-2")
    );

    let command = nos.command.as_ref().unwrap();
    assert_eq!(command[0], "bash");
    assert_eq!(command[1], "-lc");
    assert!(command[2].contains("iouyap"));
    assert!(command[2].contains("iol.bin"));

    let mounts: Vec<&str> = nos
        .volume_mounts
        .as_ref()
        .unwrap()
        .iter()
        .map(|vm| vm.mount_path.as_str())
        .collect();
    assert!(mounts.contains(&"/vrnetlab"));

    // Re-render yields the same pid.
    let mut deployment2 = Deployment::default();
    let mut nos2 = Container::default();
    let mut input2 = ApplyInput {
        owning_topology: &topo,
        node_name: "r7",
        node_image: "ghcr.io/example/vrnetlab/cisco_iol:17.12",
        node_def: &node_def,
        links: &links,
        files_from_config_map: &[],
        deployment: &mut deployment2,
        nos: &mut nos2,
    };
    apply_native_mode_overrides(&mut input2);
    assert_eq!(env_of(&nos, "IOL_PID"), env_of(&nos2, "IOL_PID"));
}

#[test]
fn bind_mounts_translate_absolute_paths_only() {
    let topo = topology("t1");
    let node_def = NodeDefinition {
        kind: "linux".into(),
        image: "alpine:3".into(),
        binds: vec![
            "/opt/data:/data:ro".into(),
            "relative/path:/other".into(),
            "/opt/dup:/data".into(),
        ],
        ..NodeDefinition::default()
    };
    let mut deployment = Deployment::default();
    let mut nos = Container::default();
    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "h1",
        node_image: "alpine:3",
        node_def: &node_def,
        links: &[],
        files_from_config_map: &[],
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    let mounts = nos.volume_mounts.as_ref().unwrap();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].mount_path, "/data");
    assert_eq!(mounts[0].read_only, Some(true));

    // linux fixup: alpine without cmd gets a long-running command
    assert_eq!(
        nos.command.as_ref().unwrap()[2],
        "sleep infinity".to_string()
    );
}

#[test]
fn apply_is_idempotent() {
    let topo = topology("t1");
    let node_def = NodeDefinition {
        kind: "ceos".into(),
        image: "ceos:4.32".into(),
        startup_config: Some("configs/l1.cfg".into()),
        ..NodeDefinition::default()
    };
    let files = [FileFromConfigMap {
        file_path: "configs/l1.cfg".into(),
        config_map_name: "t1".into(),
        config_map_path: "l1-startup".into(),
        mode: None,
    }];
    let links = [endpoint(0, "eth1", "l2", "eth1")];

    let mut deployment = Deployment::default();
    let mut nos = Container::default();
    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "l1",
        node_image: "ceos:4.32",
        node_def: &node_def,
        links: &links,
        files_from_config_map: &files,
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    let deployment_once = deployment.clone();
    let nos_once = nos.clone();

    let mut input = ApplyInput {
        owning_topology: &topo,
        node_name: "l1",
        node_image: "ceos:4.32",
        node_def: &node_def,
        links: &links,
        files_from_config_map: &files,
        deployment: &mut deployment,
        nos: &mut nos,
    };
    apply_native_mode_overrides(&mut input);

    assert_eq!(deployment, deployment_once);
    assert_eq!(nos, nos_once);
}
