//! Behavioural model of one command-processor core.
//!
//! The model executes one buffer per [`CoreModel::step`]: it runs
//! instructions from the program counter until it follows a chain jump,
//! stops, or blocks on data. Causes are latched into `INT_STATUS` and
//! returned so the caller can raise the interrupt after dropping the lock.

use mcq_hal::isa::{Instr, JumpFlags, INSTR_BYTES};
use mcq_hal::regs::{
    Ctrl, HwState, IntStatus, REG_CMD_ADDR, REG_CONFIG, REG_COUNT, REG_CTRL, REG_CUR_ADDR,
    REG_DATA_READY, REG_INT_STATUS, REG_READY_COUNT, REG_STATE,
};
use mcq_hal::DmaRegion;

/// Instructions one step may execute before yielding.
const STEP_BUDGET: usize = 4096;

enum Exec {
    Continue,
    /// Waiting for a data credit; nothing latched.
    Blocked,
    /// Followed a ready jump into the next buffer.
    Chained(IntStatus),
    Stopped(IntStatus),
}

#[derive(Debug, Default)]
pub(crate) struct CoreModel {
    regs: [u32; REG_COUNT],
    pc: u64,
    credits: u32,
    pub(crate) stalled: bool,
    pub(crate) ignore_abort: bool,
    pub(crate) pending_fault: Option<IntStatus>,
    /// Bus addresses of the buffers run to their end, in order.
    pub(crate) executed: Vec<u64>,
}

impl CoreModel {
    pub(crate) fn read(&self, reg: usize) -> u32 {
        match reg {
            REG_CTRL => 0,
            _ => self.regs.get(reg).copied().unwrap_or(0),
        }
    }

    /// Applies a register write. Returns the causes latched by it.
    pub(crate) fn write(&mut self, reg: usize, value: u32) -> IntStatus {
        match reg {
            REG_CTRL => return self.control(Ctrl::from_bits_truncate(value)),
            REG_INT_STATUS => self.regs[REG_INT_STATUS] &= !value,
            REG_DATA_READY => self.credits = self.credits.saturating_add(value),
            REG_STATE | REG_CUR_ADDR => {}
            _ if reg < REG_COUNT => self.regs[reg] = value,
            _ => {}
        }
        IntStatus::empty()
    }

    pub(crate) fn busy(&self) -> bool {
        self.state().contains(HwState::BUSY)
    }

    pub(crate) fn state(&self) -> HwState {
        HwState::from_bits_truncate(self.regs[REG_STATE])
    }

    pub(crate) fn credits(&self) -> u32 {
        self.credits
    }

    /// The power domain went down: the static configuration is gone.
    pub(crate) fn power_off(&mut self) {
        self.regs[REG_CONFIG] = 0;
    }

    fn control(&mut self, ctrl: Ctrl) -> IntStatus {
        if ctrl.contains(Ctrl::RESET) {
            let executed = std::mem::take(&mut self.executed);
            *self = CoreModel {
                executed,
                ..CoreModel::default()
            };
            return IntStatus::empty();
        }
        if ctrl.intersects(Ctrl::ABORT | Ctrl::SKIP) {
            if !self.busy() || self.ignore_abort {
                return IntStatus::empty();
            }
            self.halt();
            self.stalled = false;
            if let Some(fault) = self.pending_fault.take() {
                // Already faulted: the fault is reported instead.
                return self.latch(fault);
            }
            let cause = if ctrl.contains(Ctrl::ABORT) {
                IntStatus::ABORTED
            } else {
                IntStatus::SKIPPED
            };
            return self.latch(cause);
        }
        if ctrl.contains(Ctrl::START) {
            let addr = self.regs[REG_CMD_ADDR];
            self.pc = addr as u64;
            self.regs[REG_CUR_ADDR] = addr;
            self.regs[REG_STATE] = HwState::BUSY.bits();
            if self.regs[REG_CONFIG] == 0 {
                // Started without static configuration.
                self.pending_fault = Some(IntStatus::CMD_ERR);
            }
        }
        IntStatus::empty()
    }

    fn halt(&mut self) {
        self.regs[REG_STATE] = 0;
    }

    fn latch(&mut self, cause: IntStatus) -> IntStatus {
        self.regs[REG_INT_STATUS] |= cause.bits();
        cause
    }

    /// Runs the current buffer. Returns whether anything executed and the
    /// causes latched on the way.
    pub(crate) fn step(&mut self, dma: Option<&DmaRegion>) -> (bool, IntStatus) {
        if !self.busy() {
            return (false, IntStatus::empty());
        }
        if let Some(fault) = self.pending_fault.take() {
            self.halt();
            return (true, self.latch(fault));
        }
        if self.stalled {
            return (false, IntStatus::empty());
        }
        let Some(dma) = dma else {
            self.halt();
            return (true, self.latch(IntStatus::BUS_ERR));
        };

        let mut progressed = false;
        for _ in 0..STEP_BUDGET {
            match self.exec_one(dma) {
                Exec::Continue => progressed = true,
                Exec::Blocked => return (progressed, IntStatus::empty()),
                Exec::Chained(cause) => return (true, self.latch(cause)),
                Exec::Stopped(cause) => {
                    self.halt();
                    return (true, self.latch(cause));
                }
            }
        }
        (progressed, IntStatus::empty())
    }

    fn exec_one(&mut self, dma: &DmaRegion) -> Exec {
        // Opcode word first: it is the one software writes last.
        let words = match (dma.read(self.pc), dma.read(self.pc + 4)) {
            (Ok(w0), Ok(w1)) => [w0, w1],
            _ => return Exec::Stopped(IntStatus::BUS_ERR),
        };
        let Some(instr) = Instr::decode(words) else {
            return Exec::Stopped(IntStatus::CMD_ERR);
        };

        match instr {
            Instr::Nop | Instr::RegWrite { .. } | Instr::Raw(_) => {}
            Instr::ReadStatus { reg, count, dst } => {
                for i in 0..count as usize {
                    let value = self.regs.get(reg as usize + i).copied().unwrap_or(0);
                    if dma.write(dst as u64 + i as u64 * 4, value).is_err() {
                        return Exec::Stopped(IntStatus::BUS_ERR);
                    }
                }
            }
            Instr::WaitData => {
                if self.credits == 0 {
                    self.regs[REG_STATE] |= HwState::WAIT_DATA.bits();
                    return Exec::Blocked;
                }
                self.credits -= 1;
                self.regs[REG_STATE] &= !HwState::WAIT_DATA.bits();
            }
            Instr::Jump { flags, target } => {
                self.executed.push(self.regs[REG_CUR_ADDR] as u64);
                if !flags.contains(JumpFlags::READY) {
                    return Exec::Stopped(IntStatus::END);
                }
                self.regs[REG_READY_COUNT] = self.regs[REG_READY_COUNT].saturating_sub(1);
                self.regs[REG_CUR_ADDR] = target;
                self.pc = target as u64;
                let cause = if flags.contains(JumpFlags::IRQ) {
                    IntStatus::DONE
                } else {
                    IntStatus::empty()
                };
                return Exec::Chained(cause);
            }
            Instr::End => {
                self.executed.push(self.regs[REG_CUR_ADDR] as u64);
                return Exec::Stopped(IntStatus::END);
            }
        }
        self.pc += INSTR_BYTES;
        Exec::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(dma: &DmaRegion, addr: u64, instrs: &[Instr]) {
        for (i, instr) in instrs.iter().enumerate() {
            let [w0, w1] = instr.encode();
            let at = addr + i as u64 * INSTR_BYTES;
            dma.write(at + 4, w1).unwrap();
            dma.write(at, w0).unwrap();
        }
    }

    fn started(addr: u64) -> CoreModel {
        let mut core = CoreModel::default();
        core.write(REG_CONFIG, 1);
        core.write(REG_CMD_ADDR, addr as u32);
        core.write(REG_CTRL, Ctrl::START.bits());
        assert!(core.busy());
        core
    }

    #[test]
    fn follows_ready_jump_and_stops_at_unready_one() {
        let dma = DmaRegion::new(0x1000, 64);
        program(
            &dma,
            0x1000,
            &[
                Instr::Nop,
                Instr::Jump {
                    flags: JumpFlags::READY | JumpFlags::IRQ,
                    target: 0x1040,
                },
            ],
        );
        program(
            &dma,
            0x1040,
            &[Instr::Jump {
                flags: JumpFlags::empty(),
                target: 0,
            }],
        );
        let mut core = started(0x1000);

        assert_eq!(core.step(Some(&dma)), (true, IntStatus::DONE));
        assert_eq!(core.read(REG_CUR_ADDR), 0x1040);
        assert!(core.busy());

        assert_eq!(core.step(Some(&dma)), (true, IntStatus::END));
        assert!(!core.busy());
        assert_eq!(core.executed, vec![0x1000, 0x1040]);
        assert_eq!(core.read(REG_INT_STATUS), (IntStatus::DONE | IntStatus::END).bits());
    }

    #[test]
    fn blocks_on_wait_data_until_credited() {
        let dma = DmaRegion::new(0x1000, 16);
        program(&dma, 0x1000, &[Instr::WaitData, Instr::End]);
        let mut core = started(0x1000);

        assert_eq!(core.step(Some(&dma)), (false, IntStatus::empty()));
        assert!(core.state().contains(HwState::WAIT_DATA));

        core.write(REG_DATA_READY, 1);
        assert_eq!(core.step(Some(&dma)), (true, IntStatus::END));
        assert_eq!(core.credits(), 0);
    }

    #[test]
    fn start_without_configuration_faults() {
        let dma = DmaRegion::new(0x1000, 16);
        program(&dma, 0x1000, &[Instr::End]);
        let mut core = CoreModel::default();
        core.write(REG_CMD_ADDR, 0x1000);
        core.write(REG_CTRL, Ctrl::START.bits());
        assert_eq!(core.step(Some(&dma)), (true, IntStatus::CMD_ERR));
    }

    #[test]
    fn abort_is_ignored_when_told_to() {
        let dma = DmaRegion::new(0x1000, 16);
        program(&dma, 0x1000, &[Instr::End]);
        let mut core = started(0x1000);
        core.ignore_abort = true;
        assert_eq!(core.write(REG_CTRL, Ctrl::ABORT.bits()), IntStatus::empty());
        assert!(core.busy());

        core.write(REG_CTRL, Ctrl::RESET.bits());
        assert!(!core.busy());
        assert!(!core.ignore_abort);
        assert_eq!(core.read(REG_CONFIG), 0);
    }

    #[test]
    fn pending_fault_is_reported_instead_of_abort() {
        let mut core = started(0x1000);
        core.pending_fault = Some(IntStatus::BUS_ERR);
        assert_eq!(core.write(REG_CTRL, Ctrl::ABORT.bits()), IntStatus::BUS_ERR);
        assert!(!core.busy());
        assert_eq!(core.pending_fault, None);
    }
}
