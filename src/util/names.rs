//! Deterministic naming for Linux interfaces derived from NOS port names.

use sha1::{Digest, Sha1};

/// Linux interface names are capped at 15 bytes (IFNAMSIZ - 1).
pub const LINUX_IF_NAME_MAX_LEN: usize = 15;

/// Prefix the vxlan layer puts in front of the host-side link name.
pub const VXLAN_IF_PREFIX: &str = "vx-";

/// Host-side names must leave room for the `vx-` prefix.
pub const VXLAN_HOST_SIDE_MAX_LEN: usize = LINUX_IF_NAME_MAX_LEN - VXLAN_IF_PREFIX.len();

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Turn any raw NOS port identifier (e.g. `Ethernet0/1`) into a valid Linux
/// interface name: non-empty, lowercase, <= 15 bytes, `[a-z0-9_.-]` only.
///
/// Deterministic: over-long names get an 8-char prefix plus a 6-hex-digit
/// sha1 suffix instead of a bare truncation, so distinct long names stay
/// distinct.
pub fn sanitize_linux_if_name(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return "link".to_string();
    }

    let replaced: String = s
        .chars()
        .map(|c| match c {
            '/' | ':' | ' ' => '-',
            other => other,
        })
        .collect();

    let filtered: String = replaced
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();

    if filtered.is_empty() {
        return "link".to_string();
    }

    if filtered.len() <= LINUX_IF_NAME_MAX_LEN {
        return filtered.to_lowercase();
    }

    let suffix = &sha1_hex(&filtered)[..6];
    let prefix_len = LINUX_IF_NAME_MAX_LEN - 1 - suffix.len();
    let mut out = format!("{}-{}", &filtered[..prefix_len], suffix).to_lowercase();
    out.truncate(LINUX_IF_NAME_MAX_LEN);
    out
}

/// Name for the host side of the veth pair terminating a link endpoint.
///
/// Normally `<node>-<link>`; when that exceeds the 12-byte budget (room must
/// remain for the `vx-` prefix) a hashed short form is substituted:
/// up to 3 bytes of the node, up to 3 of the link, the rest sha1 hex.
pub fn vxlan_host_side_link_name(local_node_name: &str, cnt_link: &str) -> String {
    let base = format!("{local_node_name}-{cnt_link}");
    if base.len() <= VXLAN_HOST_SIDE_MAX_LEN {
        return base;
    }

    let hash = sha1_hex(&base);

    let mut node = sanitize_linux_if_name(local_node_name);
    if node.is_empty() {
        node = "n".to_string();
    }
    node.truncate(3);

    let mut link = cnt_link.to_string();
    if link.is_empty() {
        link = "l".to_string();
    }
    link.truncate(3);

    let used = node.len() + link.len();
    if used >= VXLAN_HOST_SIDE_MAX_LEN {
        let mut out = format!("{node}{link}");
        out.truncate(VXLAN_HOST_SIDE_MAX_LEN);
        return out;
    }

    let remain = VXLAN_HOST_SIDE_MAX_LEN - used;
    let mut out = format!("{node}{link}{}", &hash[..remain]);
    out.truncate(VXLAN_HOST_SIDE_MAX_LEN);
    out
}

/// 32-bit FNV-1a over a string.
pub fn fnv32a(input: &str) -> u32 {
    const FNV32_OFFSET: u32 = 2_166_136_261;
    const FNV32_PRIME: u32 = 16_777_619;

    let mut h = FNV32_OFFSET;
    for b in input.bytes() {
        h ^= u32::from(b);
        h = h.wrapping_mul(FNV32_PRIME);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_valid(name: &str) {
        assert!(!name.is_empty());
        assert!(name.len() <= LINUX_IF_NAME_MAX_LEN, "too long: {name}");
        assert!(
            name.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-.".contains(c)),
            "invalid chars: {name}"
        );
    }

    #[test]
    fn sanitize_path_bearing_name() {
        assert_eq!(sanitize_linux_if_name("Ethernet0/1"), "ethernet0-1");
    }

    #[test]
    fn sanitize_short_names_pass_through_lowercased() {
        assert_eq!(sanitize_linux_if_name("eth1"), "eth1");
        assert_eq!(sanitize_linux_if_name("GigabitE0"), "gigabite0");
        assert_eq!(sanitize_linux_if_name(" swp1 "), "swp1");
    }

    #[test]
    fn sanitize_forbidden_only_input_returns_link() {
        assert_eq!(sanitize_linux_if_name("@#$%"), "link");
        assert_eq!(sanitize_linux_if_name(""), "link");
        assert_eq!(sanitize_linux_if_name("   "), "link");
    }

    #[test]
    fn sanitize_boundary_lengths() {
        // 14, 15 bytes: unchanged (lowercased).
        assert_eq!(sanitize_linux_if_name("abcdefghijklmn"), "abcdefghijklmn");
        assert_eq!(sanitize_linux_if_name("abcdefghijklmno"), "abcdefghijklmno");

        // 16 bytes: hashed form, exactly 15 bytes, still valid.
        let hashed = sanitize_linux_if_name("abcdefghijklmnop");
        assert_eq!(hashed.len(), 15);
        assert!(hashed.starts_with("abcdefgh-"));
        assert_valid(&hashed);
    }

    #[test]
    fn sanitize_long_path_name_hashes() {
        let out = sanitize_linux_if_name("Ethernet0/1/2/3/4/5");
        assert_eq!(out.len(), 15);
        assert_valid(&out);
    }

    #[test]
    fn sanitize_is_deterministic() {
        for input in ["Ethernet0/1/2/3/4/5", "e1", "a b c", "X:Y:Z/W/Q/R/S/T"] {
            assert_eq!(sanitize_linux_if_name(input), sanitize_linux_if_name(input));
            assert_valid(&sanitize_linux_if_name(input));
        }
    }

    #[test]
    fn distinct_long_names_stay_distinct() {
        let a = sanitize_linux_if_name("Ethernet0/1/2/3/4/5");
        let b = sanitize_linux_if_name("Ethernet0/1/2/3/4/6");
        assert_ne!(a, b);
    }

    #[test]
    fn host_side_name_short_passes_through() {
        assert_eq!(vxlan_host_side_link_name("l1", "eth1"), "l1-eth1");
    }

    #[test]
    fn host_side_name_long_is_hashed_and_bounded() {
        let out = vxlan_host_side_link_name("leafswitch1", "ethernet0-1");
        assert!(out.len() <= VXLAN_HOST_SIDE_MAX_LEN);
        assert!(out.starts_with("leaeth"));
        // room for the vx- prefix
        assert!(format!("{VXLAN_IF_PREFIX}{out}").len() <= LINUX_IF_NAME_MAX_LEN);
        // deterministic
        assert_eq!(out, vxlan_host_side_link_name("leafswitch1", "ethernet0-1"));
    }

    #[test]
    fn fnv32a_matches_reference_values() {
        // Reference vectors for 32-bit FNV-1a.
        assert_eq!(fnv32a(""), 2_166_136_261);
        assert_eq!(fnv32a("a"), 0xe40c292c);
        assert_eq!(fnv32a("foobar"), 0xbf9cf968);
    }
}
