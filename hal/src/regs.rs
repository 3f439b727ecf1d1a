//! Per-core register window of the command processor.
//!
//! Every core exposes the same word-indexed register file. Offsets below are
//! register indices, not byte offsets.

use bitflags::bitflags;

/// Control register; writes trigger actions, reads return zero.
pub const REG_CTRL: usize = 0;
/// Execution state, see [`HwState`].
pub const REG_STATE: usize = 1;
/// Interrupt status, write-1-to-clear, see [`IntStatus`].
pub const REG_INT_STATUS: usize = 2;
/// Bus address of the first buffer to execute on `START`.
pub const REG_CMD_ADDR: usize = 3;
/// Length in words of the first buffer.
pub const REG_CMD_LEN: usize = 4;
/// Number of buffers software has made ready behind the current one.
pub const REG_READY_COUNT: usize = 5;
/// Bus address of the buffer currently (or last) executing.
pub const REG_CUR_ADDR: usize = 6;
/// Static configuration; lost on every power cycle.
pub const REG_CONFIG: usize = 7;
/// Data credits for streaming buffers; writes add to the count.
pub const REG_DATA_READY: usize = 8;
/// Number of registers in the window.
pub const REG_COUNT: usize = 9;

bitflags! {
    /// Actions requested through [`REG_CTRL`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Ctrl: u32 {
        /// Start executing at `CMD_ADDR`.
        const START = 1 << 0;
        /// Stop at once and raise `ABORTED`.
        const ABORT = 1 << 1;
        /// Give up the current streaming buffer and raise `SKIPPED`.
        const SKIP = 1 << 2;
        /// Hard reset of the core; clears every register.
        const RESET = 1 << 3;
    }
}

bitflags! {
    /// Contents of [`REG_STATE`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HwState: u32 {
        const BUSY = 1 << 0;
        const WAIT_DATA = 1 << 1;
    }
}

bitflags! {
    /// Interrupt causes latched in [`REG_INT_STATUS`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IntStatus: u32 {
        /// A buffer finished and the core followed its jump.
        const DONE = 1 << 0;
        /// The core stopped: end instruction or a jump not yet ready.
        const END = 1 << 1;
        /// Abort request honoured.
        const ABORTED = 1 << 2;
        /// Skip request honoured.
        const SKIPPED = 1 << 3;
        /// Undecodable instruction.
        const CMD_ERR = 1 << 4;
        /// Access outside mapped memory.
        const BUS_ERR = 1 << 5;
        /// Internal hardware timeout; the current buffer may be retried.
        const TIMEOUT = 1 << 6;
    }
}

impl IntStatus {
    /// Causes after which the core is no longer executing.
    pub const STOPPED: IntStatus = IntStatus::END
        .union(IntStatus::ABORTED)
        .union(IntStatus::SKIPPED)
        .union(IntStatus::CMD_ERR)
        .union(IntStatus::BUS_ERR)
        .union(IntStatus::TIMEOUT);
}

/// Register window of one core.
pub trait RegisterBlock: Send + Sync {
    /// Read the register at index `reg`.
    fn read(&self, reg: usize) -> u32;

    /// Write `value` to the register at index `reg`.
    fn write(&self, reg: usize, value: u32);

    /// Convenience accessor for [`REG_STATE`].
    fn state(&self) -> HwState {
        HwState::from_bits_truncate(self.read(REG_STATE))
    }
}
