//! Transport configuration
//!
//! Both halves of the transport derive their rendezvous names from the same
//! [`TransportConfig`]: the shared region is `/gaze_<namespace>` and the
//! handshake socket is `<runtime_dir>/<namespace>.sock`.

use crate::error::{Result, TransportError};
use std::path::PathBuf;
use std::time::Duration;

pub const NAMESPACE_ENV: &str = "GAZE_MEMORY_NAMESPACE";
pub const RUNTIME_DIR_ENV: &str = "GAZE_MEMORY_RUNTIME_DIR";
pub const READ_RETRIES_ENV: &str = "GAZE_MEMORY_READ_RETRIES";

const DEFAULT_NAMESPACE: &str = "gaze_tracker";
const DEFAULT_READ_RETRIES: u32 = 16;
const DEFAULT_CONNECT_POLL: Duration = Duration::from_millis(10);

/// Prefix of every shared region name
pub(crate) const REGION_PREFIX: &str = "/gaze_";

/// Longest namespace accepted; keeps region names under NAME_MAX
pub const MAX_NAMESPACE_LEN: usize = 200;

/// Where to find the service and how hard to try reading from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Name shared by the service and its consumers
    pub namespace: String,
    /// Directory holding the rendezvous socket
    pub runtime_dir: PathBuf,
    /// Bounded seqlock retries within a single read call
    pub read_retries: u32,
    /// Pause between attempts to reach a service that is not listening yet
    pub connect_poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            runtime_dir: default_runtime_dir(),
            read_retries: DEFAULT_READ_RETRIES,
            connect_poll_interval: DEFAULT_CONNECT_POLL,
        }
    }
}

impl TransportConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `GAZE_MEMORY_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(namespace) = std::env::var(NAMESPACE_ENV) {
            config.namespace = namespace;
        }
        if let Some(dir) = std::env::var_os(RUNTIME_DIR_ENV) {
            config.runtime_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var(READ_RETRIES_ENV) {
            config.read_retries = raw.trim().parse().map_err(|_| {
                TransportError::failure(format!("{READ_RETRIES_ENV} must be an integer, got '{raw}'"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| TransportError::InvalidNamespace {
            namespace: self.namespace.clone(),
            reason: reason.to_string(),
        };

        if self.namespace.is_empty() {
            return Err(invalid("namespace is empty"));
        }
        if self.namespace.len() > MAX_NAMESPACE_LEN {
            return Err(invalid(&format!(
                "max {MAX_NAMESPACE_LEN} bytes, got {}",
                self.namespace.len()
            )));
        }
        if self.namespace.contains(['/', '\0']) {
            return Err(invalid("must not contain '/' or NUL"));
        }
        Ok(())
    }

    /// Name of the shared region the service publishes into
    pub fn region_name(&self) -> String {
        format!("{}{}", REGION_PREFIX, self.namespace)
    }

    /// Path of the rendezvous socket
    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("{}.sock", self.namespace))
    }
}

fn default_runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
