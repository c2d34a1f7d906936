//! Service version triple and the compatibility window of this build

use crate::error::{Result, TransportError};
use std::fmt;

/// Version of the tracking service, ordered by major, then minor, then patch
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServiceVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Oldest service this build can talk to
pub const LOWEST_SUPPORTED_SERVICE_VERSION: ServiceVersion = ServiceVersion::new(1, 0, 0);

/// Newest service this build can talk to
pub const HIGHEST_SUPPORTED_SERVICE_VERSION: ServiceVersion = ServiceVersion::new(2, 0, 0);

impl ServiceVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Shared region layout revision used by a service of this version.
    #[inline]
    pub const fn layout_version(&self) -> u32 {
        self.major
    }

    pub(crate) fn to_le_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.major.to_le_bytes());
        out[4..8].copy_from_slice(&self.minor.to_le_bytes());
        out[8..12].copy_from_slice(&self.patch.to_le_bytes());
        out
    }

    pub(crate) fn from_le_bytes(bytes: [u8; 12]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self::new(word(0), word(4), word(8))
    }
}

impl fmt::Display for ServiceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Inclusive range of service versions a consumer accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub lowest: ServiceVersion,
    pub highest: ServiceVersion,
}

impl VersionRange {
    /// The window compiled into this build
    pub const SUPPORTED: VersionRange = VersionRange {
        lowest: LOWEST_SUPPORTED_SERVICE_VERSION,
        highest: HIGHEST_SUPPORTED_SERVICE_VERSION,
    };

    pub fn contains(&self, version: ServiceVersion) -> bool {
        self.lowest <= version && version <= self.highest
    }

    /// Check a service version against this window
    pub fn check(&self, found: ServiceVersion) -> Result<()> {
        if found < self.lowest {
            return Err(TransportError::VersionTooLow {
                found,
                lowest: self.lowest,
            });
        }
        if found > self.highest {
            return Err(TransportError::VersionTooHigh {
                found,
                highest: self.highest,
            });
        }
        Ok(())
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::SUPPORTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InitializationStatus;
    use proptest::prelude::*;

    #[test]
    fn ordering_is_lexicographic() {
        assert!(ServiceVersion::new(1, 2, 0) < ServiceVersion::new(1, 10, 0));
        assert!(ServiceVersion::new(1, 99, 99) < ServiceVersion::new(2, 0, 0));
        assert!(ServiceVersion::new(2, 0, 1) > HIGHEST_SUPPORTED_SERVICE_VERSION);
        assert_eq!(ServiceVersion::new(1, 2, 3).to_string(), "1.2.3");
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let range = VersionRange::SUPPORTED;
        assert!(range.check(LOWEST_SUPPORTED_SERVICE_VERSION).is_ok());
        assert!(range.check(HIGHEST_SUPPORTED_SERVICE_VERSION).is_ok());
        assert!(range.check(ServiceVersion::new(1, 2, 0)).is_ok());

        let low = range.check(ServiceVersion::new(0, 9, 9)).unwrap_err();
        assert_eq!(low.status(), InitializationStatus::ServiceVersionTooLow);

        let high = range.check(ServiceVersion::new(2, 0, 1)).unwrap_err();
        assert_eq!(high.status(), InitializationStatus::ServiceVersionTooHigh);
    }

    proptest! {
        #[test]
        fn check_agrees_with_ordering(major in 0u32..4, minor in 0u32..4, patch in 0u32..4) {
            let version = ServiceVersion::new(major, minor, patch);
            let range = VersionRange::SUPPORTED;
            match range.check(version) {
                Ok(()) => prop_assert!(range.contains(version)),
                Err(TransportError::VersionTooLow { .. }) => prop_assert!(version < range.lowest),
                Err(TransportError::VersionTooHigh { .. }) => prop_assert!(version > range.highest),
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
