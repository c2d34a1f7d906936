//! Session handshake over the rendezvous socket
//!
//! The consumer sends a hello carrying the version window it supports; the
//! service answers with its version and either a session token or "busy".
//! An accepted connection stays open for the lifetime of the session and
//! closing it hands the endpoint back to the service.
//!
//! Frames are little endian:
//!
//! ```text
//! hello:  magic u32 | lowest 3*u32 | highest 3*u32
//! reply:  magic u32 | status u8 | version 3*u32 [| session_id u64 | capacity u32 | name_len u16 | name]
//! ```

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::resources::ResourceToken;
use crate::shm::SharedRegion;
use crate::version::{ServiceVersion, VersionRange};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Magic number opening every handshake frame
const HANDSHAKE_MAGIC: u32 = 0x475A_4853; // "GZHS"

const HELLO_LEN: usize = 4 + 12 + 12;
const REPLY_PREFIX_LEN: usize = 4 + 1 + 12;
const ACCEPT_FIELDS_LEN: usize = 8 + 4 + 2;

const STATUS_ACCEPTED: u8 = 0;
const STATUS_BUSY: u8 = 1;

/// Everything the consumer needs to map the service's ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub session_id: u64,
    pub service_version: ServiceVersion,
    pub region_name: String,
    pub capacity: u32,
}

/// Consumer greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Hello {
    pub supported: VersionRange,
}

impl Hello {
    pub(crate) fn encode(&self) -> [u8; HELLO_LEN] {
        let mut out = [0u8; HELLO_LEN];
        out[0..4].copy_from_slice(&HANDSHAKE_MAGIC.to_le_bytes());
        out[4..16].copy_from_slice(&self.supported.lowest.to_le_bytes());
        out[16..28].copy_from_slice(&self.supported.highest.to_le_bytes());
        out
    }

    pub(crate) fn read_from(reader: &mut impl Read) -> io::Result<Self> {
        let mut buf = [0u8; HELLO_LEN];
        reader.read_exact(&mut buf)?;
        check_magic(&buf)?;
        Ok(Self {
            supported: VersionRange {
                lowest: ServiceVersion::from_le_bytes(array_at(&buf, 4)),
                highest: ServiceVersion::from_le_bytes(array_at(&buf, 16)),
            },
        })
    }
}

/// Service answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Accepted(SessionToken),
    Busy { service_version: ServiceVersion },
}

impl Reply {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let (status, version) = match self {
            Reply::Accepted(token) => (STATUS_ACCEPTED, token.service_version),
            Reply::Busy { service_version } => (STATUS_BUSY, *service_version),
        };

        let mut out = Vec::with_capacity(REPLY_PREFIX_LEN + ACCEPT_FIELDS_LEN + 64);
        out.extend_from_slice(&HANDSHAKE_MAGIC.to_le_bytes());
        out.push(status);
        out.extend_from_slice(&version.to_le_bytes());

        if let Reply::Accepted(token) = self {
            let name = token.region_name.as_bytes();
            let name_len = name.len().min(u16::MAX as usize);
            out.extend_from_slice(&token.session_id.to_le_bytes());
            out.extend_from_slice(&token.capacity.to_le_bytes());
            out.extend_from_slice(&(name_len as u16).to_le_bytes());
            out.extend_from_slice(&name[..name_len]);
        }
        out
    }

    pub(crate) fn read_from(reader: &mut impl Read) -> io::Result<Self> {
        let mut prefix = [0u8; REPLY_PREFIX_LEN];
        reader.read_exact(&mut prefix)?;
        check_magic(&prefix)?;

        let service_version = ServiceVersion::from_le_bytes(array_at(&prefix, 5));
        match prefix[4] {
            STATUS_BUSY => Ok(Reply::Busy { service_version }),
            STATUS_ACCEPTED => {
                let mut fields = [0u8; ACCEPT_FIELDS_LEN];
                reader.read_exact(&mut fields)?;
                let session_id = u64::from_le_bytes(array_at(&fields, 0));
                let capacity = u32::from_le_bytes(array_at(&fields, 8));
                let name_len = u16::from_le_bytes(array_at(&fields, 12)) as usize;

                let mut name = vec![0u8; name_len];
                reader.read_exact(&mut name)?;
                let region_name = String::from_utf8(name)
                    .map_err(|_| invalid_data("region name is not UTF-8"))?;

                Ok(Reply::Accepted(SessionToken {
                    session_id,
                    service_version,
                    region_name,
                    capacity,
                }))
            }
            other => Err(invalid_data(format!("unknown reply status {other}"))),
        }
    }
}

fn array_at<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

fn check_magic(buf: &[u8]) -> io::Result<()> {
    let magic = u32::from_le_bytes(array_at(buf, 0));
    if magic != HANDSHAKE_MAGIC {
        return Err(invalid_data(format!(
            "invalid handshake magic: expected 0x{HANDSHAKE_MAGIC:08X}, got 0x{magic:08X}"
        )));
    }
    Ok(())
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Check whether the service is up, without starting a session
pub fn is_service_available(config: &TransportConfig) -> bool {
    if config.validate().is_err() {
        return false;
    }
    let available = SharedRegion::probe(&config.region_name()).is_ok();
    trace!(namespace = %config.namespace, available, "Probed service");
    available
}

/// Open connection to the service, held for the lifetime of a session
pub(crate) struct HandshakeChannel {
    stream: UnixStream,
    path: PathBuf,
    _resource: ResourceToken,
}

impl HandshakeChannel {
    /// Establish a session within `timeout`.
    ///
    /// Dropping the returned channel ends the session on the service side.
    pub(crate) fn connect(
        config: &TransportConfig,
        timeout: Duration,
    ) -> Result<(Self, SessionToken)> {
        config.validate()?;
        let deadline = Deadline::after(timeout);

        let region = config.region_name();
        SharedRegion::probe(&region).map_err(|source| {
            debug!(region = %region, "Service region not found");
            TransportError::ResourceAccess {
                name: region.clone(),
                source,
            }
        })?;

        let path = config.socket_path();
        let stream = open_stream(&path, &deadline, config.connect_poll_interval)?;
        let mut channel = Self {
            stream,
            path,
            _resource: ResourceToken::acquire(),
        };

        match channel.exchange(&deadline)? {
            Reply::Busy { service_version } => {
                warn!(path = %channel.path.display(), %service_version, "All service channels are busy");
                Err(TransportError::AllChannelsBusy {
                    path: channel.path.clone(),
                })
            }
            Reply::Accepted(token) => {
                VersionRange::SUPPORTED
                    .check(token.service_version)
                    .inspect_err(|e| warn!(error = %e, "Rejecting service"))?;
                debug!(
                    session_id = token.session_id,
                    service_version = %token.service_version,
                    region = %token.region_name,
                    capacity = token.capacity,
                    "Handshake complete"
                );
                Ok((channel, token))
            }
        }
    }

    fn exchange(&mut self, deadline: &Deadline) -> Result<Reply> {
        let hello = Hello {
            supported: VersionRange::SUPPORTED,
        };

        let remaining = deadline.remaining().ok_or_else(|| deadline.expire())?;
        self.stream
            .set_write_timeout(Some(remaining))
            .map_err(|e| self.classify(e, deadline))?;
        self.stream
            .write_all(&hello.encode())
            .map_err(|e| self.classify(e, deadline))?;

        let remaining = deadline.remaining().ok_or_else(|| deadline.expire())?;
        self.stream
            .set_read_timeout(Some(remaining))
            .map_err(|e| self.classify(e, deadline))?;
        Reply::read_from(&mut self.stream).map_err(|e| self.classify(e, deadline))
    }

    fn classify(&self, error: io::Error, deadline: &Deadline) -> TransportError {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => deadline.expire(),
            io::ErrorKind::InvalidData => {
                TransportError::internal(format!("malformed handshake reply: {error}"))
            }
            _ => TransportError::ChannelInit {
                path: self.path.clone(),
                source: error,
            },
        }
    }
}

/// Connect to the rendezvous socket, waiting for the service to start
/// listening until the deadline
fn open_stream(path: &Path, deadline: &Deadline, poll: Duration) -> Result<UnixStream> {
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => {
                trace!(path = %path.display(), "Rendezvous socket connected");
                return Ok(stream);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                let Some(remaining) = deadline.remaining() else {
                    debug!(path = %path.display(), "Service never started listening");
                    return Err(deadline.expire());
                };
                thread::sleep(remaining.min(poll));
            }
            Err(source) => {
                return Err(TransportError::ChannelInit {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// Caller-supplied bound on session establishment
struct Deadline {
    at: Option<Instant>,
    timeout: Duration,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            timeout,
        }
    }

    /// Time left, `None` once expired
    fn remaining(&self) -> Option<Duration> {
        match self.at {
            Some(at) => {
                let left = at.saturating_duration_since(Instant::now());
                (!left.is_zero()).then_some(left)
            }
            None => Some(Duration::from_secs(u32::MAX as u64)),
        }
    }

    /// Timeout error, returned no earlier than the deadline
    fn expire(&self) -> TransportError {
        if let Some(left) = self.remaining() {
            if self.at.is_some() {
                thread::sleep(left);
            }
        }
        TransportError::Timeout {
            duration: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InitializationStatus;
    use crate::test_support::test_config;
    use std::os::unix::net::UnixListener;

    #[test]
    fn reply_wire_layout() {
        let reply = Reply::Accepted(SessionToken {
            session_id: 7,
            service_version: ServiceVersion::new(1, 2, 0),
            region_name: "/gaze_x".into(),
            capacity: 64,
        });
        let bytes = reply.encode();
        assert_eq!(&bytes[0..4], &HANDSHAKE_MAGIC.to_le_bytes());
        assert_eq!(bytes[4], STATUS_ACCEPTED);
        assert_eq!(bytes.len(), REPLY_PREFIX_LEN + ACCEPT_FIELDS_LEN + "/gaze_x".len());
        assert_eq!(Reply::read_from(&mut bytes.as_slice()).unwrap(), reply);
    }

    #[test]
    fn garbage_reply_is_invalid_data() {
        let mut bytes = Reply::Busy {
            service_version: ServiceVersion::new(1, 0, 0),
        }
        .encode();
        bytes[0] ^= 0xFF;
        let err = Reply::read_from(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut bytes = Reply::Busy {
            service_version: ServiceVersion::new(1, 0, 0),
        }
        .encode();
        bytes[4] = 9;
        let err = Reply::read_from(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn absent_service_fails_fast() {
        let config = test_config("hs_absent");
        assert!(!is_service_available(&config));

        let started = Instant::now();
        let err = HandshakeChannel::connect(&config, Duration::from_millis(500))
            .err()
            .unwrap();
        assert_eq!(err.status(), InitializationStatus::FailedToAccessSharedResources);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn silent_listener_times_out() {
        let config = test_config("hs_silent");
        let _region = SharedRegion::create(&config.region_name(), 4096).unwrap();
        let _ = std::fs::remove_file(config.socket_path());
        // bound but never accepted: connect succeeds, the reply never comes
        let _listener = UnixListener::bind(config.socket_path()).unwrap();

        let timeout = Duration::from_millis(150);
        let started = Instant::now();
        let err = HandshakeChannel::connect(&config, timeout).err().unwrap();
        assert_eq!(err.status(), InitializationStatus::Timeout);
        assert!(started.elapsed() >= timeout);

        let _ = std::fs::remove_file(config.socket_path());
    }

    #[test]
    fn garbled_service_is_internal_error() {
        let config = test_config("hs_garbled");
        let _region = SharedRegion::create(&config.region_name(), 4096).unwrap();
        let _ = std::fs::remove_file(config.socket_path());
        let listener = UnixListener::bind(config.socket_path()).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let hello = Hello::read_from(&mut stream).unwrap();
            assert_eq!(hello.supported, VersionRange::SUPPORTED);
            stream.write_all(&[0xAB; REPLY_PREFIX_LEN]).unwrap();
        });

        let err = HandshakeChannel::connect(&config, Duration::from_secs(2)).err().unwrap();
        assert_eq!(err.status(), InitializationStatus::InternalError);

        server.join().unwrap();
        let _ = std::fs::remove_file(config.socket_path());
    }

    #[test]
    fn hangup_before_reply_is_channel_error() {
        let config = test_config("hs_hangup");
        let _region = SharedRegion::create(&config.region_name(), 4096).unwrap();
        let _ = std::fs::remove_file(config.socket_path());
        let listener = UnixListener::bind(config.socket_path()).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = Hello::read_from(&mut stream);
            drop(stream);
        });

        let err = HandshakeChannel::connect(&config, Duration::from_secs(2)).err().unwrap();
        assert_eq!(err.status(), InitializationStatus::FailedToInitializeChannel);

        server.join().unwrap();
        let _ = std::fs::remove_file(config.socket_path());
    }
}
