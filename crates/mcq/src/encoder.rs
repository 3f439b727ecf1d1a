//! Command encoder.
//!
//! A client payload occupies instructions `1..=len` of its buffer. At submit
//! time the encoder wraps it:
//!
//! ```text
//! [0]        READ_STATUS  CUR_ADDR -> status[STARTED]
//! [1..=len]  payload
//! [len+1]    READ_STATUS  all registers -> status[DUMP..]
//! [len+2]    JUMP         not ready (patched when a successor is linked)
//! ```
//!
//! A payload that ends in `END` keeps it as the final instruction and gets
//! no jump. The dump includes `CUR_ADDR`, so a buffer is done exactly when
//! its dumped `CUR_ADDR` equals its own address.

use mcq_hal::isa::{Instr, JumpFlags};
use mcq_hal::regs::{REG_COUNT, REG_CUR_ADDR};

use crate::error::{CqError, CqResult};
use crate::memory::{PoolLayout, PoolMemory, STATUS_DUMP, STATUS_STARTED};
use crate::types::Priority;

/// Instructions the encoder adds around every payload.
pub const ENCODER_OVERHEAD: usize = 3;

/// Where the encoder put things in one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    /// Total instructions including the wrapper.
    pub len: usize,
    /// Index of the chain jump, `None` for buffers ending in `END`.
    pub jump: Option<usize>,
}

impl Encoded {
    pub fn len_words(&self) -> usize {
        self.len * mcq_hal::isa::INSTR_WORDS
    }
}

pub(crate) struct CommandEncoder {
    layout: PoolLayout,
}

impl CommandEncoder {
    pub(crate) fn new(layout: PoolLayout) -> Self {
        Self { layout }
    }

    pub(crate) fn payload_capacity(&self) -> usize {
        self.layout.cmd_capacity().saturating_sub(ENCODER_OVERHEAD)
    }

    /// Copies a client payload into slot `slot`. Returns `true` if it ends in `END`.
    pub(crate) fn write_payload(
        &self,
        mem: &PoolMemory,
        slot: usize,
        payload: &[Instr],
    ) -> CqResult<bool> {
        let capacity = self.payload_capacity();
        if payload.len() > capacity {
            return Err(CqError::BadSize {
                len: payload.len(),
                capacity,
            });
        }
        let last = payload.len().saturating_sub(1);
        for (i, instr) in payload.iter().enumerate() {
            match instr {
                Instr::Jump { .. } => return Err(CqError::BadCommand("payload may not jump")),
                Instr::End if i != last => {
                    return Err(CqError::BadCommand("END must be the last instruction"))
                }
                _ => {}
            }
            mem.write_instr(slot, i + 1, *instr)?;
        }
        Ok(payload.last().map_or(false, Instr::is_end))
    }

    /// Adds the status probes and chain jump around a written payload and
    /// clears the status buffer.
    pub(crate) fn finalize(
        &self,
        mem: &PoolMemory,
        slot: usize,
        payload_len: usize,
        terminated: bool,
    ) -> CqResult<Encoded> {
        let status = self.layout.status_addr(slot);
        mem.write_instr(
            slot,
            0,
            Instr::ReadStatus {
                reg: REG_CUR_ADDR as u8,
                count: 1,
                dst: (status + (STATUS_STARTED * 4) as u64) as u32,
            },
        )?;
        let dump = Instr::ReadStatus {
            reg: 0,
            count: REG_COUNT as u8,
            dst: (status + (STATUS_DUMP * 4) as u64) as u32,
        };

        let encoded = if terminated {
            // payload_len >= 1 here; the END moves one slot down.
            mem.write_instr(slot, payload_len, dump)?;
            mem.write_instr(slot, payload_len + 1, Instr::End)?;
            Encoded {
                len: payload_len + 2,
                jump: None,
            }
        } else {
            mem.write_instr(slot, payload_len + 1, dump)?;
            mem.write_instr(slot, payload_len + 2, not_ready(false))?;
            Encoded {
                len: payload_len + 3,
                jump: Some(payload_len + 2),
            }
        };
        mem.clear_status(slot)?;
        Ok(encoded)
    }

    /// Points the chain jump of `slot` at `target`, or marks it not ready.
    pub(crate) fn patch_jump(
        &self,
        mem: &PoolMemory,
        slot: usize,
        encoded: &Encoded,
        target: Option<usize>,
        irq: bool,
    ) -> CqResult<()> {
        let Some(index) = encoded.jump else {
            return Ok(());
        };
        let instr = match target {
            Some(next) => {
                let mut flags = JumpFlags::READY;
                if irq {
                    flags |= JumpFlags::IRQ;
                }
                Instr::Jump {
                    flags,
                    target: self.layout.cmd_addr(next) as u32,
                }
            }
            None => not_ready(irq),
        };
        mem.write_instr(slot, index, instr)
    }

    /// Returns `true` once the closing probe of `slot` has executed.
    pub(crate) fn is_done(&self, mem: &PoolMemory, slot: usize) -> bool {
        mem.status_word(slot, STATUS_DUMP + REG_CUR_ADDR) == self.layout.cmd_addr(slot) as u32
    }

    /// Forgets any previous execution of `slot` before it is run again.
    pub(crate) fn rearm(&self, mem: &PoolMemory, slot: usize) -> CqResult<()> {
        mem.clear_status(slot)
    }
}

fn not_ready(irq: bool) -> Instr {
    Instr::Jump {
        flags: if irq { JumpFlags::IRQ } else { JumpFlags::empty() },
        target: 0,
    }
}

/// Decides which linked buffers ask for a completion interrupt.
///
/// Interrupts are requested once enough workload has accumulated on a core
/// since the last request, and always for high-priority buffers. A core that
/// stops at an unready jump interrupts regardless, so nothing is left
/// unreported.
#[derive(Debug, Clone)]
pub(crate) struct IrqCoalescer {
    threshold: u32,
    pending: u32,
}

impl IrqCoalescer {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            threshold,
            pending: 0,
        }
    }

    pub(crate) fn on_link(&mut self, workload: u32, priority: Priority) -> bool {
        self.pending = self.pending.saturating_add(workload);
        if priority == Priority::High || self.pending >= self.threshold {
            self.pending = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset(&mut self) {
        self.pending = 0;
    }
}
