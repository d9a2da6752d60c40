//! Kubernetes version parsing and the command-syntax capability table.

use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// `major.minor.patch` with an optional pre-release tag, parsed from
/// `v1.9.6`, `1.9` or `v1.10.0-beta.1`. Build metadata (`+...`) is dropped.
///
/// Ordering follows semver: `v1.8.0-rc.1 < v1.8.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KubeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre: Option<String>,
}

impl KubeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }
}

impl Ord for KubeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_pre_release(a, b),
            })
    }
}

impl PartialOrd for KubeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dot-separated identifiers; numeric ones compare numerically and sort
/// before alphanumeric ones, and a shorter prefix sorts first.
fn compare_pre_release(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(m), Ok(n)) => m.cmp(&n).then_with(|| x.cmp(y)),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => x.cmp(y),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for KubeVersion {
    type Err = SpawnletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SpawnletError::Config(format!("invalid kubernetes version '{}'", s));

        let trimmed = s.trim().strip_prefix('v').unwrap_or(s.trim());
        let without_build = trimmed.split('+').next().unwrap_or_default();
        let (core, pre) = match without_build.split_once('-') {
            Some((_, "")) => return Err(invalid()),
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (without_build, None),
        };
        let mut parts = core.split('.');

        let mut next = |required: bool| -> SpawnletResult<u32> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };

        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            pre,
            ..Self::new(major, minor, patch)
        })
    }
}

/// Version-dependent command syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// `kubeadm join --discovery-token-unsafe-skip-ca-verification`
    DiscoveryTokenUnsafeSkipCaVerification,
}

struct CapabilityRange {
    capability: Capability,
    since: KubeVersion,
    /// Exclusive upper bound, if the syntax was removed again.
    until: Option<KubeVersion>,
}

const CAPABILITIES: &[CapabilityRange] = &[CapabilityRange {
    capability: Capability::DiscoveryTokenUnsafeSkipCaVerification,
    since: KubeVersion::new(1, 8, 0),
    until: None,
}];

/// Capabilities of one target version.
///
/// `None` means a dev build without a version; it is treated as newest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    version: Option<KubeVersion>,
}

impl Capabilities {
    pub fn for_version(version: Option<KubeVersion>) -> Self {
        Self { version }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        CAPABILITIES
            .iter()
            .filter(|range| range.capability == capability)
            .any(|range| match &self.version {
                None => range.until.is_none(),
                Some(v) => *v >= range.since && range.until.as_ref().is_none_or(|until| v < until),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("v1.9.6".parse::<KubeVersion>().unwrap(), KubeVersion::new(1, 9, 6));
        assert_eq!("1.9".parse::<KubeVersion>().unwrap(), KubeVersion::new(1, 9, 0));
        let beta = "v1.10.0-beta.1".parse::<KubeVersion>().unwrap();
        assert_eq!((beta.major, beta.minor, beta.patch), (1, 10, 0));
        assert_eq!(beta.pre.as_deref(), Some("beta.1"));
        assert_eq!(beta.to_string(), "v1.10.0-beta.1");
        assert_eq!(
            "v1.9.6+abc123".parse::<KubeVersion>().unwrap(),
            KubeVersion::new(1, 9, 6)
        );
        assert!("v1.9.0-".parse::<KubeVersion>().is_err());
        assert!("latest".parse::<KubeVersion>().is_err());
        assert!("v1".parse::<KubeVersion>().is_err());
        assert!("1.2.3.4".parse::<KubeVersion>().is_err());
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(KubeVersion::new(1, 10, 0) > KubeVersion::new(1, 9, 6));
    }

    #[test]
    fn test_pre_release_sorts_before_release() {
        let v = |s: &str| s.parse::<KubeVersion>().unwrap();
        assert!(v("v1.8.0-rc.1") < v("v1.8.0"));
        assert!(v("v1.8.0-alpha.2") < v("v1.8.0-beta.1"));
        assert!(v("v1.8.0-beta.2") < v("v1.8.0-beta.10"));
        assert!(v("v1.8.0-rc") < v("v1.8.0-rc.1"));
        assert!(v("v1.8.0-rc.1") > v("v1.7.11"));
    }

    #[test]
    fn test_skip_ca_verification_threshold() {
        let cap = Capability::DiscoveryTokenUnsafeSkipCaVerification;
        let at = |s: &str| Capabilities::for_version(Some(s.parse().unwrap())).supports(cap);

        assert!(!at("v1.7.11"));
        assert!(!at("v1.8.0-rc.1"));
        assert!(at("v1.8.0"));
        assert!(at("v1.8.1-beta.0"));
        assert!(at("v1.9.6"));
        assert!(Capabilities::for_version(None).supports(cap));
    }
}
