//! Instruction encoding understood by the command processor.
//!
//! Every instruction is two words. Word 0 packs the opcode in bits 0..8, two
//! operand bytes in bits 8..16 and 16..24, and flags in bits 24..32. Word 1
//! carries a 32-bit operand (value, destination or jump target).

use bitflags::bitflags;

/// Words per instruction.
pub const INSTR_WORDS: usize = 2;
/// Bytes per instruction.
pub const INSTR_BYTES: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    RegWrite = 1,
    ReadStatus = 2,
    Jump = 3,
    End = 4,
    WaitData = 5,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Nop),
            1 => Some(Self::RegWrite),
            2 => Some(Self::ReadStatus),
            3 => Some(Self::Jump),
            4 => Some(Self::End),
            5 => Some(Self::WaitData),
            _ => None,
        }
    }
}

bitflags! {
    /// Flags carried by a jump instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct JumpFlags: u8 {
        /// The target is valid; follow it. When clear the core stops.
        const READY = 1 << 0;
        /// Raise `DONE` when following the jump.
        const IRQ = 1 << 1;
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Nop,
    /// Program a codec register.
    RegWrite { reg: u8, value: u32 },
    /// Copy `count` core registers starting at `reg` to bus address `dst`.
    ReadStatus { reg: u8, count: u8, dst: u32 },
    /// Continue at `target` if `READY`, otherwise stop.
    Jump { flags: JumpFlags, target: u32 },
    /// Stop after this buffer.
    End,
    /// Block until a data credit is available, then consume it.
    WaitData,
    /// Opaque codec-specific words, passed through untouched.
    Raw([u32; 2]),
}

impl Instr {
    pub fn encode(&self) -> [u32; 2] {
        match *self {
            Self::Nop => [pack(Opcode::Nop, 0, 0, 0), 0],
            Self::RegWrite { reg, value } => [pack(Opcode::RegWrite, reg, 0, 0), value],
            Self::ReadStatus { reg, count, dst } => {
                [pack(Opcode::ReadStatus, reg, count, 0), dst]
            }
            Self::Jump { flags, target } => [pack(Opcode::Jump, 0, 0, flags.bits()), target],
            Self::End => [pack(Opcode::End, 0, 0, 0), 0],
            Self::WaitData => [pack(Opcode::WaitData, 0, 0, 0), 0],
            Self::Raw(words) => words,
        }
    }

    /// Decodes two words; `None` for an opcode the hardware does not know.
    pub fn decode(words: [u32; 2]) -> Option<Self> {
        let [w0, w1] = words;
        let a = (w0 >> 8) as u8;
        let b = (w0 >> 16) as u8;
        let flags = (w0 >> 24) as u8;
        let instr = match Opcode::from_u8(w0 as u8)? {
            Opcode::Nop => Self::Nop,
            Opcode::RegWrite => Self::RegWrite { reg: a, value: w1 },
            Opcode::ReadStatus => Self::ReadStatus { reg: a, count: b, dst: w1 },
            Opcode::Jump => Self::Jump {
                flags: JumpFlags::from_bits_truncate(flags),
                target: w1,
            },
            Opcode::End => Self::End,
            Opcode::WaitData => Self::WaitData,
        };
        Some(instr)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

const fn pack(op: Opcode, a: u8, b: u8, flags: u8) -> u32 {
    (op as u32) | ((a as u32) << 8) | ((b as u32) << 16) | ((flags as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_flags_live_in_the_top_byte() {
        let jump = Instr::Jump {
            flags: JumpFlags::READY | JumpFlags::IRQ,
            target: 0x1000_0040,
        };
        let words = jump.encode();
        assert_eq!(words[0] >> 24, 0b11);
        assert_eq!(words[1], 0x1000_0040);
        assert_eq!(Instr::decode(words), Some(jump));
    }

    #[test]
    fn unknown_opcode_does_not_decode() {
        assert_eq!(Instr::decode([0x7f, 0]), None);
        let raw = Instr::Raw([0x0000_00ee, 1]);
        assert_eq!(Instr::decode(raw.encode()), None);
    }
}
