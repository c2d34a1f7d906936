//! Layout of the shared ring region
//!
//! ```text
//! offset 0    RingHeader   magic, layout_version, capacity, slot_size
//! offset 64                write_sequence (own cache line)
//! offset 128  Slot[0..capacity]   { stamp: u64, sample: GazeSample }
//! ```
//!
//! Sequence `n` (starting at 1) lives in slot `n % capacity`. A slot's stamp
//! holds the sequence it contains, or 0 while the writer is filling it.

use crate::sample::GazeSample;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Magic number for region validation
pub(crate) const RING_MAGIC: u32 = 0x475A_4D52; // "GZMR"

/// Cache line size
const CACHE_LINE_SIZE: usize = 64;

/// Ensures the wrapped value is on its own cache line
#[repr(C, align(64))]
pub(crate) struct CacheAligned<T>(pub T);

/// Header stored at the beginning of the region
#[repr(C)]
pub(crate) struct RingHeader {
    pub magic: u32,
    pub layout_version: u32,
    pub capacity: u32,
    pub slot_size: u32,
    _pad: [u8; CACHE_LINE_SIZE - 16],
    /// Sequence of the newest published sample, 0 before the first one
    pub write_sequence: CacheAligned<AtomicU64>,
}

/// One ring entry
#[repr(C)]
pub(crate) struct Slot {
    pub stamp: AtomicU64,
    pub sample: UnsafeCell<GazeSample>,
}

pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();
pub(crate) const SLOT_SIZE: usize = std::mem::size_of::<Slot>();

const _: () = assert!(HEADER_SIZE == 2 * CACHE_LINE_SIZE);
const _: () = assert!(HEADER_SIZE % std::mem::align_of::<Slot>() == 0);

impl RingHeader {
    /// Bytes needed for a ring of `capacity` slots
    pub(crate) const fn region_size(capacity: u32) -> usize {
        HEADER_SIZE + capacity as usize * SLOT_SIZE
    }

    /// Initialize a new header
    ///
    /// # Safety
    /// `ptr` must point to at least `HEADER_SIZE` writable, 64-byte aligned
    /// bytes that no reader can observe yet
    pub(crate) unsafe fn init(ptr: *mut Self, layout_version: u32, capacity: u32) {
        std::ptr::addr_of_mut!((*ptr).magic).write(RING_MAGIC);
        std::ptr::addr_of_mut!((*ptr).layout_version).write(layout_version);
        std::ptr::addr_of_mut!((*ptr).capacity).write(capacity);
        std::ptr::addr_of_mut!((*ptr).slot_size).write(SLOT_SIZE as u32);
        std::ptr::addr_of_mut!((*ptr).write_sequence).write(CacheAligned(AtomicU64::new(0)));
    }
}

/// Borrowed view of a validated ring region.
///
/// Slots are reached only through bounds-checked indexing.
#[derive(Clone, Copy)]
pub(crate) struct RingView<'a> {
    header: &'a RingHeader,
    slots: &'a [Slot],
}

impl<'a> RingView<'a> {
    /// # Safety
    /// `base` must point to a region of at least `RingHeader::region_size(capacity)`
    /// bytes, aligned to 64, holding an initialized header, and must stay
    /// mapped for `'a`
    pub(crate) unsafe fn from_raw(base: *const u8, capacity: u32) -> Self {
        let header = &*(base as *const RingHeader);
        let slots = std::slice::from_raw_parts(base.add(HEADER_SIZE) as *const Slot, capacity as usize);
        Self { header, slots }
    }

    #[inline]
    pub(crate) fn header(&self) -> &'a RingHeader {
        self.header
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    #[inline]
    pub(crate) fn write_sequence(&self) -> u64 {
        self.header.write_sequence.0.load(Ordering::Acquire)
    }

    /// Slot that holds (or will hold) `sequence`
    #[inline]
    pub(crate) fn slot_for(&self, sequence: u64) -> Option<&'a Slot> {
        let index = usize::try_from(sequence % self.capacity().max(1)).ok()?;
        self.slots.get(index)
    }

    /// Oldest sequence the ring can still hold when `newest` is published
    #[inline]
    pub(crate) fn oldest_retained(&self, newest: u64) -> u64 {
        newest.saturating_sub(self.capacity().saturating_sub(1)).max(1)
    }
}
