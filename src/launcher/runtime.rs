//! The shared per-pod runtime directory.
//!
//! Everything the setup init container writes for the launcher (tunnels
//! cache, pod-net snapshot) lives here, on an emptyDir shared between the
//! two containers.

use std::env;
use std::path::PathBuf;

use crate::constants::{DEFAULT_RUNTIME_DIR, LAUNCHER_RUNTIME_DIR_ENV};

pub fn runtime_dir() -> PathBuf {
    match env::var(LAUNCHER_RUNTIME_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
        _ => PathBuf::from(DEFAULT_RUNTIME_DIR),
    }
}

pub fn runtime_path(name: &str) -> PathBuf {
    runtime_dir().join(name)
}
