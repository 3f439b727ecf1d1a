//! Identifiers and small value types shared by every module.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Kind of codec block a core implements (decoder, encoder, ...).
///
/// Core selection is always scoped to cores of the submitted buffer's class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleClass(pub u8);

impl ModuleClass {
    pub const DECODER: ModuleClass = ModuleClass(0);
    pub const ENCODER: ModuleClass = ModuleClass(1);
}

impl fmt::Display for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DECODER => write!(f, "decoder"),
            Self::ENCODER => write!(f, "encoder"),
            Self(other) => write!(f, "class{other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoreId(pub u8);

impl CoreId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Handle to one pool slot.
///
/// The generation changes every time the slot is reserved, so a handle that
/// outlives its release never aliases the next owner's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId {
    slot: u16,
    generation: u16,
}

impl BufferId {
    pub(crate) fn new(slot: u16, generation: u16) -> Self {
        Self { slot, generation }
    }

    pub fn slot(self) -> usize {
        self.slot as usize
    }

    pub fn generation(self) -> u16 {
        self.generation
    }

    /// Unpacks a handle from one word: generation in the high half.
    pub fn from_raw(raw: u32) -> Self {
        Self {
            slot: raw as u16,
            generation: (raw >> 16) as u16,
        }
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}.{}", self.slot, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session{}", self.0)
    }
}

/// Opaque identifier of a higher-level job, used for bulk cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerTag(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Final outcome of a submitted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResultTag {
    Ok,
    CommandError,
    BusError,
    Aborted,
    /// Streaming buffer gave up its slice; the hardware kept its state.
    SliceSuspended,
    /// Streaming buffer had to be aborted after its slice ran out.
    SliceAborted,
}

impl ResultTag {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::CommandError => "command-error",
            Self::BusError => "bus-error",
            Self::Aborted => "aborted",
            Self::SliceSuspended => "slice-suspended",
            Self::SliceAborted => "slice-aborted",
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::CommandError => 1,
            Self::BusError => 2,
            Self::Aborted => 3,
            Self::SliceSuspended => 4,
            Self::SliceAborted => 5,
        }
    }
}

impl fmt::Display for ResultTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Buffer(BufferId),
    Any,
}

/// Set of cores a buffer may run on; bit `n` is core `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreMask(pub u32);

impl CoreMask {
    pub const ALL: CoreMask = CoreMask(u32::MAX);

    pub fn single(core: CoreId) -> Self {
        Self(1 << core.0)
    }

    pub fn contains(self, core: CoreId) -> bool {
        core.0 < 32 && self.0 & (1 << core.0) != 0
    }
}

impl Default for CoreMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// A finished buffer as delivered to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub id: BufferId,
    pub tag: ResultTag,
    /// Core the buffer was queued on when it finished.
    pub core: Option<CoreId>,
}
