//! Process-wide count of transport resources held by reader sessions

use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE: AtomicUsize = AtomicUsize::new(0);

/// Number of rendezvous channels and mappings currently open by readers.
///
/// A failed session construction leaves this unchanged.
pub fn live_resources() -> usize {
    LIVE.load(Ordering::Acquire)
}

/// Counted for as long as it lives
#[derive(Debug)]
pub(crate) struct ResourceToken(());

impl ResourceToken {
    pub(crate) fn acquire() -> Self {
        LIVE.fetch_add(1, Ordering::AcqRel);
        ResourceToken(())
    }
}

impl Drop for ResourceToken {
    fn drop(&mut self) {
        LIVE.fetch_sub(1, Ordering::AcqRel);
    }
}
