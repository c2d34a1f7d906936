//! Per-session read cursor over the shared ring
//!
//! The cursor remembers the last sequence it consumed and a copy of that
//! sample. It starts out empty, positioned before the first sequence, so the
//! first read sees whatever the ring already holds.

use crate::layout::RingView;
use crate::sample::GazeSample;
use crate::seqlock::{self, SlotRead};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
enum CursorState {
    /// Nothing read yet
    Empty,
    /// Holds the sample published as `sequence`
    Valid { sequence: u64, sample: GazeSample },
}

/// Read position of one session. Never moves backward.
#[derive(Debug, Clone)]
pub(crate) struct ReaderCursor {
    state: CursorState,
    retries: u32,
}

impl ReaderCursor {
    pub(crate) fn new(retries: u32) -> Self {
        Self {
            state: CursorState::Empty,
            retries,
        }
    }

    /// Sequence of the last consumed sample, 0 while empty
    #[inline]
    pub(crate) fn position(&self) -> u64 {
        match self.state {
            CursorState::Empty => 0,
            CursorState::Valid { sequence, .. } => sequence,
        }
    }

    /// True when the ring holds something newer than the cursor
    #[inline]
    pub(crate) fn has_unread(&self, view: &RingView<'_>) -> bool {
        view.write_sequence() > self.position()
    }

    /// Consume the sample after the cursor.
    ///
    /// If the writer has lapped the cursor, the oldest sample still in the
    /// ring is consumed instead.
    pub(crate) fn try_read_next(&mut self, view: &RingView<'_>) -> Option<GazeSample> {
        self.read_with(view, |cursor, newest| {
            (cursor + 1).max(view.oldest_retained(newest))
        })
    }

    /// Jump to the newest sample, skipping anything unread in between
    pub(crate) fn try_read_latest(&mut self, view: &RingView<'_>) -> Option<GazeSample> {
        self.read_with(view, |_, newest| newest)
    }

    /// The sample consumed by the last successful read
    #[inline]
    pub(crate) fn try_read_last(&self) -> Option<GazeSample> {
        match self.state {
            CursorState::Empty => None,
            CursorState::Valid { sample, .. } => Some(sample),
        }
    }

    fn read_with(
        &mut self,
        view: &RingView<'_>,
        target: impl Fn(u64, u64) -> u64,
    ) -> Option<GazeSample> {
        let position = self.position();

        for _ in 0..=self.retries {
            let newest = view.write_sequence();
            if newest <= position {
                return None;
            }

            let sequence = target(position, newest);
            match seqlock::read(view, sequence, newest) {
                SlotRead::Consistent(sample) => {
                    self.state = CursorState::Valid { sequence, sample };
                    return Some(sample);
                }
                SlotRead::Lapped | SlotRead::Torn => {
                    core::hint::spin_loop();
                }
            }
        }

        trace!(position, retries = self.retries, "Gave up on contended slot");
        None
    }
}
