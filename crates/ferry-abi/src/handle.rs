use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of slots at the start of the object table that are permanently
/// bound to sentinel values.
pub const RESERVED_HANDLES: u32 = 4;

/// Opaque index into the host object table.
///
/// The guest only ever sees the raw `u32`; the host resolves it through the
/// table. Handles `0..4` are reserved for `undefined`, `null`, `true` and
/// `false` so the guest can test for them without a host round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl Handle {
    pub const UNDEFINED: Self = Self(0);
    pub const NULL: Self = Self(1);
    pub const TRUE: Self = Self(2);
    pub const FALSE: Self = Self(3);

    /// Handle for a boolean sentinel.
    pub fn from_bool(b: bool) -> Self {
        if b {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// Whether this handle is one of the four pre-bound sentinels.
    pub fn is_reserved(self) -> bool {
        self.0 < RESERVED_HANDLES
    }

    /// Reinterpret an i32 received from the guest.
    pub fn from_abi(raw: i32) -> Self {
        Self(raw as u32)
    }

    /// The i32 passed to the guest.
    pub fn to_abi(self) -> i32 {
        self.0 as i32
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_reserved() {
        for h in [Handle::UNDEFINED, Handle::NULL, Handle::TRUE, Handle::FALSE] {
            assert!(h.is_reserved());
        }
        assert!(!Handle(RESERVED_HANDLES).is_reserved());
    }

    #[test]
    fn abi_round_trip_keeps_high_bit() {
        let h = Handle(0x8000_0001);
        assert_eq!(Handle::from_abi(h.to_abi()), h);
    }

    #[test]
    fn display() {
        assert_eq!(Handle(7).to_string(), "#7");
    }
}
