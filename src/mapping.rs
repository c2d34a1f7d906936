//! Read-only mapping of the ring negotiated during the handshake

use crate::error::{Result, TransportError};
use crate::handshake::SessionToken;
use crate::layout::{RingHeader, RingView, HEADER_SIZE, RING_MAGIC, SLOT_SIZE};
use crate::resources::ResourceToken;
use crate::shm::{RegionError, SharedRegion};
use tracing::{debug, warn};

/// Consumer side of the shared ring
pub(crate) struct RingMapping {
    region: SharedRegion,
    capacity: u32,
    _resource: ResourceToken,
}

impl RingMapping {
    /// Map the region named by `token` and check it has the layout the
    /// negotiated service version implies
    pub(crate) fn map(token: &SessionToken) -> Result<Self> {
        let name = token.region_name.as_str();
        let region = SharedRegion::open_read_only(name).map_err(|e| match e {
            RegionError::Access(source) => TransportError::ResourceAccess {
                name: name.to_string(),
                source,
            },
            RegionError::Map(source) => TransportError::Mapping {
                name: name.to_string(),
                source,
            },
        })?;
        let resource = ResourceToken::acquire();

        let capacity = validate(&region, token)?;
        debug!(region = name, capacity, "Ring mapping validated");

        Ok(Self {
            region,
            capacity,
            _resource: resource,
        })
    }

    #[inline]
    pub(crate) fn view(&self) -> RingView<'_> {
        // SAFETY: `validate` checked magic, slot size and that the mapping
        // covers every slot; the region lives as long as `self`
        unsafe { RingView::from_raw(self.region.as_ptr(), self.capacity) }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }
}

fn validate(region: &SharedRegion, token: &SessionToken) -> Result<u32> {
    let mismatch = |reason: String| {
        warn!(region = region.name(), %reason, "Shared region layout mismatch");
        TransportError::internal(format!("region '{}': {reason}", region.name()))
    };

    if region.size() < HEADER_SIZE {
        return Err(mismatch(format!(
            "{} bytes is smaller than the {HEADER_SIZE} byte header",
            region.size()
        )));
    }

    let header = unsafe { &*(region.as_ptr() as *const RingHeader) };

    if header.magic != RING_MAGIC {
        return Err(mismatch(format!(
            "invalid magic number: expected 0x{RING_MAGIC:08X}, got 0x{:08X}",
            header.magic
        )));
    }

    let expected_layout = token.service_version.layout_version();
    if header.layout_version != expected_layout {
        return Err(mismatch(format!(
            "layout version {} does not match service {} (layout {expected_layout})",
            header.layout_version, token.service_version
        )));
    }
    if header.slot_size as usize != SLOT_SIZE {
        return Err(mismatch(format!(
            "slot size {} does not match {SLOT_SIZE}",
            header.slot_size
        )));
    }
    if header.capacity == 0 || header.capacity != token.capacity {
        return Err(mismatch(format!(
            "capacity {} does not match negotiated {}",
            header.capacity, token.capacity
        )));
    }

    let required = RingHeader::region_size(header.capacity);
    if region.size() < required {
        return Err(mismatch(format!(
            "{} bytes cannot hold {} slots ({required} bytes)",
            region.size(),
            header.capacity
        )));
    }

    Ok(header.capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InitializationStatus;
    use crate::test_support::unique_namespace;
    use crate::version::ServiceVersion;

    fn token(name: &str, version: ServiceVersion, capacity: u32) -> SessionToken {
        SessionToken {
            session_id: 1,
            service_version: version,
            region_name: name.to_string(),
            capacity,
        }
    }

    fn region_with_header(name: &str, layout_version: u32, capacity: u32, size: usize) -> SharedRegion {
        let region = SharedRegion::create(name, size).unwrap();
        unsafe {
            RingHeader::init(region.as_ptr() as *mut RingHeader, layout_version, capacity);
        }
        region
    }

    #[test]
    fn maps_well_formed_region() {
        let name = format!("/gaze_{}", unique_namespace("map_ok"));
        let _owner = region_with_header(&name, 1, 8, RingHeader::region_size(8));

        let mapping = RingMapping::map(&token(&name, ServiceVersion::new(1, 4, 0), 8)).unwrap();
        assert_eq!(mapping.capacity(), 8);
        assert_eq!(mapping.view().write_sequence(), 0);
    }

    #[test]
    fn missing_region_is_resource_access_error() {
        let name = format!("/gaze_{}", unique_namespace("map_missing"));
        let err = RingMapping::map(&token(&name, ServiceVersion::new(1, 0, 0), 8))
            .err()
            .unwrap();
        assert_eq!(err.status(), InitializationStatus::FailedToAccessSharedResources);
    }

    #[test]
    fn layout_mismatches_are_internal_errors() {
        let name = format!("/gaze_{}", unique_namespace("map_layout"));
        let _owner = region_with_header(&name, 1, 8, RingHeader::region_size(8));

        // service 2.x implies layout 2
        let err = RingMapping::map(&token(&name, ServiceVersion::new(2, 0, 0), 8)).err().unwrap();
        assert_eq!(err.status(), InitializationStatus::InternalError);

        let err = RingMapping::map(&token(&name, ServiceVersion::new(1, 0, 0), 16)).err().unwrap();
        assert_eq!(err.status(), InitializationStatus::InternalError);
    }

    #[test]
    fn truncated_region_is_rejected() {
        let name = format!("/gaze_{}", unique_namespace("map_short"));
        let _owner = region_with_header(&name, 1, 8, RingHeader::region_size(4));

        let err = RingMapping::map(&token(&name, ServiceVersion::new(1, 0, 0), 8)).err().unwrap();
        assert_eq!(err.status(), InitializationStatus::InternalError);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let name = format!("/gaze_{}", unique_namespace("map_magic"));
        let _owner = SharedRegion::create(&name, RingHeader::region_size(8)).unwrap();

        let err = RingMapping::map(&token(&name, ServiceVersion::new(1, 0, 0), 8)).err().unwrap();
        assert!(err.to_string().contains("magic"));
    }
}
