//! Identity types for the pipeline system.
//!
//! `StageId` is a newtype over `u32` that serves as a direct index into the
//! stage arena. `UnitId` is the process-unique correlation id carried by every
//! unit of work.

use std::fmt;
use uuid::Uuid;

/// Index into the pipeline's stage arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StageId(pub u32);

impl StageId {
    /// The no-op sentinel stage every chain starts from.
    pub const ROOT: StageId = StageId(0);

    #[inline]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({})", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Correlation id of a unit of work.
///
/// A random v4 UUID rendered as 32 lowercase hex digits without dashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(Uuid);

impl UnitId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0.simple())
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
