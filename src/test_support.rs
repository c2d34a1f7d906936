//! Helpers shared by the unit tests

use crate::config::TransportConfig;
use std::sync::atomic::{AtomicUsize, Ordering};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Namespace unique to this process and call, so tests can run in parallel
pub(crate) fn unique_namespace(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ut{}_{}_{}", std::process::id(), tag, n)
}

pub(crate) fn test_config(tag: &str) -> TransportConfig {
    TransportConfig {
        runtime_dir: std::env::temp_dir(),
        ..TransportConfig::with_namespace(unique_namespace(tag))
    }
}
