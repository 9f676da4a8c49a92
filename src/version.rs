//! Parsing of the running server version and version-gated capabilities.
//!
//! The server version is recorded in an annotation on the custom resource.
//! Commands that only exist on newer server releases consult the predicates
//! here rather than comparing versions inline.

/// Annotation holding the version of the server image currently deployed.
pub const VERSION_ANNOTATION: &str = "vantage.io/version";

/// First server version where `re_ip --force` may run while some nodes are
/// still up. Older servers require the entire cluster to be down.
pub const REIP_WITH_UP_NODES_VERSION: VersionInfo = VersionInfo {
    major: 2,
    minor: 2,
    patch: 0,
};

/// A parsed server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionInfo {
    /// Parse a version string of the form `v<major>.<minor>.<patch>`. Any
    /// trailing build metadata after the patch number is ignored.
    pub fn parse(ver: &str) -> Option<Self> {
        let ver = ver.strip_prefix('v')?;
        let mut it = ver.splitn(3, '.');
        let major = it.next()?.parse().ok()?;
        let minor = it.next()?.parse().ok()?;
        let patch_str = it.next()?;
        let patch = patch_str
            .split(|c: char| !c.is_ascii_digit())
            .next()?
            .parse()
            .ok()?;
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    pub fn is_equal_or_newer(&self, other: &VersionInfo) -> bool {
        self >= other
    }

    /// Whether this server can run an address remap while some nodes remain
    /// up (the `--force` flag on re_ip).
    pub fn supports_reip_with_up_nodes(&self) -> bool {
        self.is_equal_or_newer(&REIP_WITH_UP_NODES_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            VersionInfo::parse("v2.2.0"),
            Some(VersionInfo {
                major: 2,
                minor: 2,
                patch: 0
            })
        );
        assert_eq!(
            VersionInfo::parse("v2.1.13-20250103"),
            Some(VersionInfo {
                major: 2,
                minor: 1,
                patch: 13
            })
        );
        assert_eq!(VersionInfo::parse("2.2.0"), None);
        assert_eq!(VersionInfo::parse("vgarbage"), None);
    }

    #[test]
    fn test_reip_force_gate() {
        assert!(!VersionInfo::parse("v2.1.9").unwrap().supports_reip_with_up_nodes());
        assert!(VersionInfo::parse("v2.2.0").unwrap().supports_reip_with_up_nodes());
        assert!(VersionInfo::parse("v3.0.1").unwrap().supports_reip_with_up_nodes());
    }

    #[test]
    fn test_ordering() {
        let a = VersionInfo::parse("v2.10.0").unwrap();
        let b = VersionInfo::parse("v2.9.3").unwrap();
        assert!(a.is_equal_or_newer(&b));
        assert!(!b.is_equal_or_newer(&a));
    }
}
