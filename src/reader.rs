//! Consumer session: one handshake connection, one mapping, one cursor

use crate::config::TransportConfig;
use crate::cursor::ReaderCursor;
use crate::error::Result;
use crate::error_context;
use crate::handshake::{HandshakeChannel, SessionToken};
use crate::mapping::RingMapping;
use crate::sample::GazeSample;
use std::time::Duration;
use tracing::{debug, info};

/// Reader side of the transport.
///
/// Reads take `&mut self`: one handle serves one thread at a time, while
/// separate handles are fully independent. Dropping the handle unmaps the
/// ring and closes the session.
pub struct GazeReader {
    cursor: ReaderCursor,
    mapping: RingMapping,
    _channel: HandshakeChannel,
    session: SessionToken,
}

impl GazeReader {
    /// Handshake with the service and map its ring, giving up after `timeout`.
    ///
    /// The handshake needs a round trip to the service, so a zero `timeout`
    /// reaches a running service but always ends in
    /// [`TransportError::Timeout`](crate::TransportError::Timeout); an absent
    /// service is still reported as such.
    ///
    /// On failure nothing stays allocated and the error is also recorded as
    /// this thread's last error description.
    pub fn connect(config: &TransportConfig, timeout: Duration) -> Result<Self> {
        Self::establish(config, timeout).inspect_err(|e| error_context::record_error(e))
    }

    fn establish(config: &TransportConfig, timeout: Duration) -> Result<Self> {
        let (channel, session) = HandshakeChannel::connect(config, timeout)?;
        let mapping = RingMapping::map(&session)?;

        info!(
            session_id = session.session_id,
            service_version = %session.service_version,
            capacity = mapping.capacity(),
            "Gaze reader connected"
        );
        Ok(Self {
            cursor: ReaderCursor::new(config.read_retries),
            mapping,
            _channel: channel,
            session,
        })
    }

    /// True when a sample newer than the last one read has been published
    pub fn is_data_available(&self) -> bool {
        self.cursor.has_unread(&self.mapping.view())
    }

    /// Read the sample after the last one read
    pub fn try_read_next(&mut self) -> Option<GazeSample> {
        self.cursor.try_read_next(&self.mapping.view())
    }

    /// Read the newest sample, skipping anything unread before it
    pub fn try_read_latest(&mut self) -> Option<GazeSample> {
        self.cursor.try_read_latest(&self.mapping.view())
    }

    /// The sample returned by the last successful read, without touching the ring
    pub fn try_read_last(&self) -> Option<GazeSample> {
        self.cursor.try_read_last()
    }

    /// Session negotiated with the service
    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    /// End the session now
    pub fn close(self) {}
}

impl Drop for GazeReader {
    fn drop(&mut self) {
        debug!(session_id = self.session.session_id, "Gaze reader closed");
    }
}

/// Drop the reader held in `slot`, if any. Safe to call any number of times.
pub fn destroy_reader(slot: &mut Option<GazeReader>) {
    slot.take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InitializationStatus;
    use crate::sample::EventFlags;
    use crate::service::{GazeService, ServiceOptions};
    use crate::test_support::test_config;
    use crate::version::ServiceVersion;

    fn fixation(timestamp_ms: u64) -> GazeSample {
        GazeSample::new(timestamp_ms, (0.05, -0.02), (0.04, -0.02), EventFlags::NONE)
    }

    #[test]
    fn reads_through_a_live_session() {
        let config = test_config("reader_live");
        let mut service = GazeService::start(
            &config,
            ServiceOptions {
                version: ServiceVersion::new(1, 2, 0),
                capacity: 16,
                ..ServiceOptions::default()
            },
        )
        .unwrap();

        let mut reader = GazeReader::connect(&config, Duration::from_secs(3)).unwrap();
        assert_eq!(reader.session().service_version, ServiceVersion::new(1, 2, 0));
        assert_eq!(reader.session().capacity, 16);
        assert!(!reader.is_data_available());
        assert!(reader.try_read_last().is_none());

        service.publish(&fixation(1));
        service.publish(&fixation(2));
        assert!(reader.is_data_available());
        assert_eq!(reader.try_read_next().unwrap().timestamp_ms, 1);
        assert_eq!(reader.try_read_latest().unwrap().timestamp_ms, 2);
        assert!(!reader.is_data_available());
        assert_eq!(reader.try_read_last().unwrap().timestamp_ms, 2);
    }

    #[test]
    fn failed_connect_records_error_context() {
        let config = test_config("reader_absent");
        let err = GazeReader::connect(&config, Duration::from_millis(100)).err().unwrap();
        assert_eq!(err.status(), InitializationStatus::FailedToAccessSharedResources);
        assert!(error_context::last_error_description().contains(&config.region_name()));
    }

    #[test]
    fn destroy_is_idempotent() {
        let config = test_config("reader_destroy");
        let _service = GazeService::start(&config, ServiceOptions::default()).unwrap();

        let mut slot = Some(GazeReader::connect(&config, Duration::from_secs(3)).unwrap());
        destroy_reader(&mut slot);
        assert!(slot.is_none());
        destroy_reader(&mut slot);

        let mut never_created: Option<GazeReader> = None;
        destroy_reader(&mut never_created);
    }
}
