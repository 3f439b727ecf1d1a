//! Aggregate view of one command-processor instance.

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::dma::DmaRegion;
use crate::error::HalResult;
use crate::interrupt::InterruptController;
use crate::power::PowerDomain;
use crate::regs::RegisterBlock;

/// Everything a driver needs to run one command processor.
pub trait Platform: Send + Sync {
    /// Number of cores wired to this instance.
    fn core_count(&self) -> usize;

    /// Register window of `core`.
    fn registers(&self, core: usize) -> HalResult<Arc<dyn RegisterBlock>>;

    /// The shared power domain.
    fn power(&self) -> Arc<dyn PowerDomain>;

    /// Interrupt controller; line `n` belongs to core `n`.
    fn interrupts(&self) -> Arc<dyn InterruptController>;

    /// Make `region` visible to the cores' bus masters.
    fn map_dma(&self, region: Arc<DmaRegion>) -> HalResult<()>;
}
