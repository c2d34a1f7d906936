//! SeqLock protocol over ring slots
//!
//! One writer, any number of readers, nobody waits. The writer clears a
//! slot's stamp, copies the sample in, stamps the slot with its sequence and
//! then publishes the sequence in the header. A reader copies a slot and
//! accepts it only if both the slot stamp and the header's write sequence are
//! the same before and after the copy.

use crate::layout::RingView;
use crate::sample::GazeSample;
use std::sync::atomic::{fence, Ordering};

/// Outcome of a single fenced copy
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SlotRead {
    /// Consistent copy of the requested sequence
    Consistent(GazeSample),
    /// The slot no longer (or not yet) holds the requested sequence
    Lapped,
    /// The write sequence moved during the copy
    Torn,
}

/// Writer side: store `sample` as `sequence` and publish it.
///
/// Must only be called by the single writer, with `sequence` exactly one past
/// the current write sequence.
#[inline]
pub(crate) fn publish(view: &RingView<'_>, sequence: u64, sample: &GazeSample) {
    let Some(slot) = view.slot_for(sequence) else {
        return;
    };

    // Stamp 0 - write in progress
    slot.stamp.store(0, Ordering::Relaxed);
    fence(Ordering::Release);

    unsafe {
        std::ptr::write_volatile(slot.sample.get(), *sample);
    }

    // Stamp the slot, then make it visible through the header
    slot.stamp.store(sequence, Ordering::Release);
    view.header().write_sequence.0.store(sequence, Ordering::Release);
}

/// Reader side: one attempt at copying `sequence`, with `observed` being the
/// write sequence the caller based its decision on.
#[inline]
pub(crate) fn read(view: &RingView<'_>, sequence: u64, observed: u64) -> SlotRead {
    let Some(slot) = view.slot_for(sequence) else {
        return SlotRead::Lapped;
    };

    let before = slot.stamp.load(Ordering::Acquire);
    if before != sequence {
        return SlotRead::Lapped;
    }

    let sample = unsafe { std::ptr::read_volatile(slot.sample.get()) };

    fence(Ordering::Acquire);

    let after = slot.stamp.load(Ordering::Relaxed);
    if after != sequence {
        return SlotRead::Lapped;
    }
    if view.header().write_sequence.0.load(Ordering::Relaxed) != observed {
        return SlotRead::Torn;
    }
    SlotRead::Consistent(sample)
}
