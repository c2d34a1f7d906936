//! Gaze sample as stored in the shared ring and handed to consumers

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Event bits attached to a gaze sample.
///
/// Bits above [`EventFlags::HEADSET_DISMOUNT`] come from newer services and
/// are kept as-is.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    pub const BLINK_LEFT: EventFlags = EventFlags(1 << 0);
    pub const BLINK_RIGHT: EventFlags = EventFlags(1 << 1);
    pub const BLINK_BOTH: EventFlags = EventFlags(1 << 2);
    pub const SACCADE: EventFlags = EventFlags(1 << 3);
    pub const HEADSET_MOUNT: EventFlags = EventFlags(1 << 4);
    pub const HEADSET_DISMOUNT: EventFlags = EventFlags(1 << 5);

    /// All bits with a known meaning
    pub const KNOWN: EventFlags = EventFlags((1 << 6) - 1);

    const NAMED: [(EventFlags, &'static str); 6] = [
        (Self::BLINK_LEFT, "blink_left"),
        (Self::BLINK_RIGHT, "blink_right"),
        (Self::BLINK_BOTH, "blink_both"),
        (Self::SACCADE, "saccade"),
        (Self::HEADSET_MOUNT, "headset_mount"),
        (Self::HEADSET_DISMOUNT, "headset_dismount"),
    ];

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set
    #[inline]
    pub const fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: EventFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_blink_left(self) -> bool {
        self.contains(Self::BLINK_LEFT)
    }

    pub const fn is_blink_right(self) -> bool {
        self.contains(Self::BLINK_RIGHT)
    }

    pub const fn is_blink_both(self) -> bool {
        self.contains(Self::BLINK_BOTH)
    }

    pub const fn is_saccade(self) -> bool {
        self.contains(Self::SACCADE)
    }

    pub const fn is_headset_mount(self) -> bool {
        self.contains(Self::HEADSET_MOUNT)
    }

    pub const fn is_headset_dismount(self) -> bool {
        self.contains(Self::HEADSET_DISMOUNT)
    }

    /// Bits introduced by a newer service
    #[inline]
    pub const fn unknown_bits(self) -> u32 {
        self.0 & !Self::KNOWN.0
    }

    pub const fn has_unknown(self) -> bool {
        self.unknown_bits() != 0
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: EventFlags) {
        self.0 |= rhs.0;
    }
}

impl From<u32> for EventFlags {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl From<EventFlags> for u32 {
    fn from(flags: EventFlags) -> Self {
        flags.0
    }
}

impl fmt::Display for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }

        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if !std::mem::take(&mut first) {
                f.write_str("|")?;
            }
            Ok(())
        };

        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                sep(f)?;
                f.write_str(name)?;
            }
        }
        if self.has_unknown() {
            sep(f)?;
            write!(f, "unknown({:#x})", self.unknown_bits())?;
        }
        Ok(())
    }
}

/// One gaze measurement.
///
/// Angles are in radians relative to the headset's forward axis; positive x is
/// to the user's right, positive y is up. The transport never clamps them.
/// The in-memory layout is the slot layout shared with the service.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GazeSample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
    pub event_flags: EventFlags,
}

const _: () = assert!(std::mem::size_of::<GazeSample>() == 32);
const _: () = assert!(std::mem::align_of::<GazeSample>() == 8);

impl GazeSample {
    pub fn new(timestamp_ms: u64, left: (f32, f32), right: (f32, f32), event_flags: EventFlags) -> Self {
        Self {
            timestamp_ms,
            left_x: left.0,
            left_y: left.1,
            right_x: right.0,
            right_y: right.1,
            event_flags,
        }
    }

    /// Samples taken while the headset is off the user's head carry no gaze
    pub fn is_headset_dismounted(&self) -> bool {
        self.event_flags.is_headset_dismount()
    }
}
