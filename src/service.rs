//! Producer side of the transport
//!
//! [`RingWriter`] owns the shared ring and is the only thing that ever writes
//! to it. [`GazeService`] pairs a writer with the rendezvous listener that
//! hands sessions out to consumers, and is what a tracking service (or a
//! test) runs to feed [`GazeReader`](crate::GazeReader)s.

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::handshake::{Hello, Reply, SessionToken};
use crate::layout::{RingHeader, RingView};
use crate::sample::GazeSample;
use crate::seqlock;
use crate::shm::{RegionError, SharedRegion};
use crate::version::{ServiceVersion, HIGHEST_SUPPORTED_SERVICE_VERSION};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Default number of ring slots
const DEFAULT_CAPACITY: u32 = 64;

/// Default number of concurrent sessions
const DEFAULT_MAX_SESSIONS: usize = 4;

/// How long a consumer gets to send its hello
const HELLO_TIMEOUT: Duration = Duration::from_secs(1);

/// Accept loop idle sleep
const ACCEPT_POLL: Duration = Duration::from_millis(5);

/// Producer configuration
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Version announced in the handshake
    pub version: ServiceVersion,
    /// Number of ring slots
    pub capacity: u32,
    /// Session endpoints; further consumers are told the service is busy
    pub max_sessions: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            version: HIGHEST_SUPPORTED_SERVICE_VERSION,
            capacity: DEFAULT_CAPACITY,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Single writer of the shared ring
pub struct RingWriter {
    region: SharedRegion,
    capacity: u32,
    sequence: u64,
}

impl RingWriter {
    /// Create and initialize the ring for `config`'s namespace
    pub fn create(config: &TransportConfig, version: ServiceVersion, capacity: u32) -> Result<Self> {
        config.validate()?;
        if capacity == 0 {
            return Err(TransportError::failure("ring capacity must be at least 1"));
        }

        let name = config.region_name();
        let region =
            SharedRegion::create(&name, RingHeader::region_size(capacity)).map_err(|e| match e {
                RegionError::Access(source) => TransportError::ResourceAccess {
                    name: name.clone(),
                    source,
                },
                RegionError::Map(source) => TransportError::Mapping {
                    name: name.clone(),
                    source,
                },
            })?;

        // SAFETY: freshly created, page aligned and sized for `capacity` slots
        unsafe {
            RingHeader::init(region.as_ptr() as *mut RingHeader, version.layout_version(), capacity);
        }

        info!(region = %name, capacity, %version, "Ring created");
        Ok(Self {
            region,
            capacity,
            sequence: 0,
        })
    }

    /// Publish a sample, returning its sequence number
    #[inline]
    pub fn publish(&mut self, sample: &GazeSample) -> u64 {
        self.sequence += 1;
        seqlock::publish(&self.view(), self.sequence, sample);
        trace!(sequence = self.sequence, "Published sample");
        self.sequence
    }

    /// Sequence of the newest published sample
    #[inline]
    pub fn write_sequence(&self) -> u64 {
        self.sequence
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn region_name(&self) -> &str {
        self.region.name()
    }

    fn view(&self) -> RingView<'_> {
        // SAFETY: initialized in `create`, lives as long as `self`
        unsafe { RingView::from_raw(self.region.as_ptr(), self.capacity) }
    }
}

/// State shared with the accept loop
struct Endpoints {
    version: ServiceVersion,
    region_name: String,
    capacity: u32,
    max_sessions: usize,
    next_session: AtomicU64,
    shutdown: AtomicBool,
    sessions: Mutex<HashMap<u64, UnixStream>>,
}

impl Endpoints {
    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, UnixStream>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ring writer plus the rendezvous listener consumers handshake with
pub struct GazeService {
    writer: RingWriter,
    socket_path: PathBuf,
    /// (dev, ino) of the socket we bound, if it could be read back
    socket_id: Option<(u64, u64)>,
    endpoints: Arc<Endpoints>,
    acceptor: Option<JoinHandle<()>>,
}

impl GazeService {
    /// Create the ring and start accepting sessions
    pub fn start(config: &TransportConfig, options: ServiceOptions) -> Result<Self> {
        let writer = RingWriter::create(config, options.version, options.capacity)?;
        let socket_path = config.socket_path();

        let listener = bind(&socket_path).map_err(|source| TransportError::ChannelInit {
            path: socket_path.clone(),
            source,
        })?;
        let socket_id = file_identity(&socket_path);

        let endpoints = Arc::new(Endpoints {
            version: options.version,
            region_name: writer.region_name().to_string(),
            capacity: options.capacity,
            max_sessions: options.max_sessions,
            next_session: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            sessions: Mutex::new(HashMap::new()),
        });

        let acceptor = {
            let endpoints = Arc::clone(&endpoints);
            thread::Builder::new()
                .name("gaze-service-accept".into())
                .spawn(move || accept_loop(listener, endpoints))
                .map_err(|e| TransportError::failure(format!("failed to spawn accept thread: {e}")))?
        };

        info!(
            socket = %socket_path.display(),
            version = %options.version,
            max_sessions = options.max_sessions,
            "Gaze service listening"
        );
        Ok(Self {
            writer,
            socket_path,
            socket_id,
            endpoints,
            acceptor: Some(acceptor),
        })
    }

    #[inline]
    pub fn publish(&mut self, sample: &GazeSample) -> u64 {
        self.writer.publish(sample)
    }

    pub fn writer(&self) -> &RingWriter {
        &self.writer
    }

    /// Sessions currently holding an endpoint
    pub fn active_sessions(&self) -> usize {
        self.endpoints.sessions().len()
    }

    pub fn version(&self) -> ServiceVersion {
        self.endpoints.version
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for GazeService {
    fn drop(&mut self) {
        self.endpoints.shutdown.store(true, Ordering::Release);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }

        for (_, stream) in self.endpoints.sessions().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        // A newer service may have taken the path over
        if self.socket_id.is_some() && file_identity(&self.socket_path) == self.socket_id {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        debug!(socket = %self.socket_path.display(), "Gaze service stopped");
    }
}

fn file_identity(path: &Path) -> Option<(u64, u64)> {
    std::fs::symlink_metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

fn bind(path: &Path) -> io::Result<UnixListener> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => warn!(socket = %path.display(), "Removed stale rendezvous socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn accept_loop(listener: UnixListener, endpoints: Arc<Endpoints>) {
    while !endpoints.shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _)) => {
                let endpoints = Arc::clone(&endpoints);
                let spawned = thread::Builder::new()
                    .name("gaze-handshake".into())
                    .spawn(move || serve(stream, endpoints));
                if let Err(e) = spawned {
                    warn!(error = %e, "Failed to spawn handshake thread");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

/// Handshake with one consumer and hold its endpoint until it hangs up.
///
/// Runs on its own thread so a consumer that never says hello only delays
/// itself.
fn serve(stream: UnixStream, endpoints: Arc<Endpoints>) {
    match admit(&stream, &endpoints) {
        Ok(Some(session_id)) => watch_session(session_id, stream, &endpoints),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Handshake with consumer failed"),
    }
}

/// Answer one hello. Returns the session id if the consumer got an endpoint.
fn admit(mut stream: &UnixStream, endpoints: &Endpoints) -> io::Result<Option<u64>> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HELLO_TIMEOUT))?;
    let hello = Hello::read_from(&mut stream)?;
    debug!(
        lowest = %hello.supported.lowest,
        highest = %hello.supported.highest,
        "Consumer hello"
    );

    let mut sessions = endpoints.sessions();
    if endpoints.shutdown.load(Ordering::Acquire) {
        return Ok(None);
    }
    if sessions.len() >= endpoints.max_sessions {
        drop(sessions);
        debug!(max_sessions = endpoints.max_sessions, "Rejecting consumer, all endpoints busy");
        stream.write_all(
            &Reply::Busy {
                service_version: endpoints.version,
            }
            .encode(),
        )?;
        return Ok(None);
    }

    let session_id = endpoints.next_session.fetch_add(1, Ordering::Relaxed);
    let reply = Reply::Accepted(SessionToken {
        session_id,
        service_version: endpoints.version,
        region_name: endpoints.region_name.clone(),
        capacity: endpoints.capacity,
    });
    stream.write_all(&reply.encode())?;
    stream.set_read_timeout(None)?;
    sessions.insert(session_id, stream.try_clone()?);
    Ok(Some(session_id))
}

/// Hold the endpoint until the consumer hangs up
fn watch_session(session_id: u64, mut stream: UnixStream, endpoints: &Endpoints) {
    debug!(session_id, "Session opened");
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    endpoints.sessions().remove(&session_id);
    debug!(session_id, "Session closed");
}
