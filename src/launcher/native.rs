//! Device prerequisites for native mode.

use std::fs::OpenOptions;

use crate::{Error, Result};

/// QEMU-backed vrnetlab images need /dev/kvm and /dev/net/tun; IOL is the
/// exception (a bare process plus iouyap, no KVM). Missing devices are fatal
/// before any tunnel work starts -- the NOS container would just crashloop
/// later with a far worse error.
pub fn ensure_native_device_requirements(node_kind: &str, node_image: &str) -> Result<()> {
    let kind = node_kind.trim().to_lowercase();
    if kind.is_empty() {
        return Ok(());
    }

    let image = node_image.trim().to_lowercase();
    if !image.contains("/vrnetlab/") || kind == "cisco_iol" || kind == "cisco_ioll2" {
        return Ok(());
    }

    ensure_device(&kind, "/dev/kvm")?;
    ensure_device(&kind, "/dev/net/tun")?;

    Ok(())
}

fn ensure_device(kind: &str, path: &str) -> Result<()> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map(drop)
        .map_err(|e| {
            Error::OtherError(format!(
                "native mode requires {path} for node kind {kind:?}: {e}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_vrnetlab_kinds_need_no_devices() {
        assert!(ensure_native_device_requirements("ceos", "ceos:4.32").is_ok());
        assert!(ensure_native_device_requirements("linux", "alpine:3").is_ok());
        assert!(ensure_native_device_requirements("", "").is_ok());
    }

    #[test]
    fn iol_is_exempt_from_kvm() {
        assert!(
            ensure_native_device_requirements("cisco_iol", "ghcr.io/x/vrnetlab/cisco_iol:17")
                .is_ok()
        );
    }
}
