//! # mcq
//!
//! Driver-side scheduler for a multi-core hardware command processor such as
//! a video decode engine. Clients reserve pre-mapped command buffers, fill
//! them with instructions and submit them; the scheduler chains them onto
//! per-core hardware work queues, collects completions from interrupts and
//! recovers cores that hang.
//!
//! ## Module Overview
//! - [`config`]     – Device sizing and timing, with a builder.
//! - [`pool`]       – Fixed slot arena for command/status buffers.
//! - [`memory`]     – Layout of the DMA region shared with the cores.
//! - [`encoder`]    – Wraps payloads with status probes and a chain jump.
//! - [`queue`]      – Intrusive per-core work queues and jump patching.
//! - [`scheduler`]  – Core selection, preemption and cancellation.
//! - [`completion`] – Interrupt top half and deferred bottom half.
//! - [`watchdog`]   – Per-core hang detection and recovery.
//! - [`session`]    – Client sessions, quotas and completion delivery.
//! - [`device`]     – Lifecycle and the public entry point.
//!
//! Everything is driven from the outside: a port delivers interrupts, calls
//! [`Device::service_core`] from a deferred context and [`Device::tick`] from
//! a periodic timer. Tests drive the same entry points synchronously.

pub mod completion;
pub mod config;
pub mod cores;
pub mod device;
pub mod encoder;
pub mod error;
pub mod memory;
pub mod pool;
pub mod power;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod trace;
pub mod types;
pub mod watchdog;

pub use cores::{CoreState, RecoveryCounts};
pub use config::{CoreConfig, DeviceConfig, DeviceConfigBuilder};
pub use device::{Device, DeviceBuilder};
pub use error::{CqError, CqResult};
pub use mcq_hal::Instr;
pub use pool::PoolStats;
pub use session::{ReserveRequest, Session};
pub use trace::{TraceError, TraceHook};
pub use types::{
    BufferId, Completion, CoreId, CoreMask, ModuleClass, OwnerTag, Priority, ResultTag, SessionId,
    WaitTarget,
};

#[cfg(test)]
mod tests;
