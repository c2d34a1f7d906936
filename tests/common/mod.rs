//! Shared helpers for integration tests

#![allow(dead_code)]

use gaze_memory::{
    EventFlags, GazeSample, GazeService, ServiceOptions, ServiceVersion, TransportConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a namespace no other test (or test process) uses
pub fn config(tag: &str) -> TransportConfig {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    TransportConfig {
        runtime_dir: std::env::temp_dir(),
        ..TransportConfig::with_namespace(format!("it{}_{}_{}", std::process::id(), tag, n))
    }
}

pub fn start_service(config: &TransportConfig, version: ServiceVersion) -> GazeService {
    GazeService::start(
        config,
        ServiceOptions {
            version,
            ..ServiceOptions::default()
        },
    )
    .expect("service should start")
}

pub fn sample(timestamp_ms: u64, flags: EventFlags) -> GazeSample {
    GazeSample::new(timestamp_ms, (0.12, -0.03), (0.11, -0.04), flags)
}

/// Poll `cond` until it holds or `within` elapses
pub fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
