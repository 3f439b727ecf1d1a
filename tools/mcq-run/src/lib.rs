//! Host driver for the simulated command processor.
//!
//! Spins up a [`mcq::Device`] on [`mcq_sim::SimHardware`], pushes a
//! synthetic decode workload through it from several client sessions and
//! summarises where the buffers ran and how they finished.

pub mod logger;
pub mod report;
pub mod workload;

pub use report::Report;
pub use workload::{run, Workload};
