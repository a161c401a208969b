//! The `{major, minor, patch}` triple exchanged by the `Version` RPC, and
//! the externally-supplied predicate used to judge whether a client and
//! server version are compatible.

use crate::pb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl From<pb::VersionReply> for Version {
    fn from(rsp: pb::VersionReply) -> Self {
        Self {
            major: rsp.major,
            minor: rsp.minor,
            patch: rsp.patch,
        }
    }
}

/// Same-major-version compatibility, the conventional default when nothing
/// more specific is supplied to [`crate::DatabaseHandle::ensure_version_compatibility`].
pub fn same_major(expected: Version, actual: Version) -> bool {
    expected.major == actual.major
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_major_ignores_minor_and_patch() {
        assert!(same_major(Version::new(1, 0, 0), Version::new(1, 9, 9)));
        assert!(!same_major(Version::new(1, 0, 0), Version::new(2, 0, 0)));
    }

    #[test]
    fn display_is_dotted() {
        assert_eq!(Version::new(1, 2, 3).to_string(), "1.2.3");
    }
}
