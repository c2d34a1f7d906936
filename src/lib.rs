//! GazeMemory - lock-free shared memory transport for eye-gaze telemetry
//!
//! A tracking service publishes gaze samples into a shared ring; consumer
//! processes map that ring read-only and poll it without ever blocking the
//! service.
//!
//! # Architecture
//!
//! - **Single Writer (Service)**: Owns the ring, publishes samples, hands out sessions
//! - **Multiple Readers (Consumers)**: Handshake once, then read the ring directly
//!
//! # Session lifecycle
//!
//! 1. Probe: is the service's region present?
//! 2. Handshake over the rendezvous socket, bounded by the caller's timeout;
//!    the service's version must lie within
//!    [`LOWEST_SUPPORTED_SERVICE_VERSION`]..=[`HIGHEST_SUPPORTED_SERVICE_VERSION`]
//! 3. Map the ring named in the handshake reply and validate its layout
//! 4. Poll with [`GazeReader::try_read_next`], [`GazeReader::try_read_latest`]
//!    or peek with [`GazeReader::try_read_last`]
//!
//! ```rust,no_run
//! use gaze_memory::{GazeReader, TransportConfig};
//! use std::time::Duration;
//!
//! let config = TransportConfig::from_env()?;
//! let mut reader = GazeReader::connect(&config, Duration::from_secs(3))?;
//! if let Some(sample) = reader.try_read_latest() {
//!     println!("{} ms: {}", sample.timestamp_ms, sample.event_flags);
//! }
//! # Ok::<(), gaze_memory::TransportError>(())
//! ```
//!
//! Overrun is accepted: a reader that falls more than a ring's worth behind
//! loses the samples in between, never the newest one.

pub mod bindings;
pub mod config;
mod cursor;
pub mod error;
pub mod error_context;
pub mod handshake;
mod layout;
mod mapping;
pub mod reader;
mod resources;
pub mod sample;
mod seqlock;
pub mod service;
mod shm;
pub mod version;

#[cfg(test)]
mod test_support;

pub use config::TransportConfig;
pub use error::{InitializationStatus, Result, TransportError};
pub use error_context::last_error_description;
pub use handshake::{is_service_available, SessionToken};
pub use reader::{destroy_reader, GazeReader};
pub use resources::live_resources;
pub use sample::{EventFlags, GazeSample};
pub use service::{GazeService, RingWriter, ServiceOptions};
pub use version::{
    ServiceVersion, VersionRange, HIGHEST_SUPPORTED_SERVICE_VERSION,
    LOWEST_SUPPORTED_SERVICE_VERSION,
};
