//! Hardware Abstraction Layer (HAL) for multi-core command processors
//!
//! This crate provides the vendor-agnostic collaborator traits a command-queue
//! driver needs from the platform: per-core register windows, a shared power
//! domain, interrupt delivery and a DMA-visible memory region. It also fixes
//! the command-processor contract shared by drivers and hardware models: the
//! register map and the instruction encoding.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod dma;
pub mod error;
pub mod interrupt;
pub mod isa;
pub mod platform;
pub mod power;
pub mod regs;

// Re-export commonly used types
pub use dma::DmaRegion;
pub use error::{HalError, HalResult};
pub use interrupt::{InterruptController, IrqHandler};
pub use isa::{Instr, JumpFlags, Opcode};
pub use platform::Platform;
pub use power::PowerDomain;
pub use regs::{Ctrl, HwState, IntStatus, RegisterBlock};
