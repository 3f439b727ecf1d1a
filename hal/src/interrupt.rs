//! Interrupt controller abstraction

use crate::error::HalResult;

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

/// Handler invoked in interrupt context for one core's interrupt line.
///
/// Implementations must assume the handler runs with interrupts masked: it
/// may not sleep, allocate, or take any lock that a sleeping context holds.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Interrupt controller abstraction
pub trait InterruptController: Send + Sync {
    /// Attach `handler` to the interrupt line of `line`.
    fn connect(&self, line: usize, handler: IrqHandler) -> HalResult<()>;

    /// Detach whatever handler is attached to `line`.
    fn disconnect(&self, line: usize);

    /// Check if a handler is attached
    fn is_connected(&self, line: usize) -> bool;
}
