//! Host port of the mcq scheduler.
//!
//! [`SimHardware`] is a software model of a multi-core command processor:
//! per-core register windows, a shared power domain, an interrupt controller
//! and the DMA region the driver maps into it. Tests and the `mcq-run` tool
//! drive it either synchronously, by stepping cores and servicing the device
//! in turn ([`SimHardware::settle`]), or on threads through [`SimRuntime`].
//!
//! The model also injects the faults the driver must survive: hung cores,
//! ignored aborts, bus errors, hardware timeouts and power failures.

mod irq;
mod model;
mod power;
pub mod runtime;

use std::sync::Arc;

use log::{debug, warn};
use mcq::Device;
use mcq_hal::regs::{HwState, IntStatus};
use mcq_hal::{
    DmaRegion, HalError, HalResult, InterruptController, Platform, PowerDomain, RegisterBlock,
};
use parking_lot::Mutex;

pub use irq::SimIrq;
pub use runtime::SimRuntime;

use model::CoreModel;
use power::PowerModel;

/// Rounds of step-and-service before [`SimHardware::settle`] gives up.
const SETTLE_LIMIT: usize = 10_000;

struct Inner {
    cores: Vec<Mutex<CoreModel>>,
    dma: Mutex<Option<Arc<DmaRegion>>>,
    irq: Arc<SimIrq>,
    power: Mutex<PowerModel>,
}

/// Handle to one simulated command processor. Clones share the model.
#[derive(Clone)]
pub struct SimHardware {
    inner: Arc<Inner>,
}

impl SimHardware {
    pub fn new(cores: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                cores: (0..cores).map(|_| Mutex::new(CoreModel::default())).collect(),
                dma: Mutex::new(None),
                irq: Arc::new(SimIrq::new(cores)),
                power: Mutex::new(PowerModel::default()),
            }),
        }
    }

    fn with_core<R>(&self, core: usize, f: impl FnOnce(&mut CoreModel) -> R) -> Option<R> {
        self.inner.cores.get(core).map(|model| f(&mut *model.lock()))
    }

    fn raise(&self, core: usize, cause: IntStatus) {
        if !cause.is_empty() {
            self.inner.irq.raise(core);
        }
    }

    /// Executes the current buffer of `core`. Returns `true` if it made progress.
    pub fn step(&self, core: usize) -> bool {
        let dma = self.inner.dma.lock().clone();
        let Some((progressed, cause)) = self.with_core(core, |model| model.step(dma.as_deref()))
        else {
            return false;
        };
        if cause.intersects(IntStatus::STOPPED) {
            debug!("sim core{core} stopped: {cause:?}");
        }
        self.raise(core, cause);
        progressed
    }

    /// Steps every core once. Returns `true` if any made progress.
    pub fn step_all(&self) -> bool {
        let mut progressed = false;
        for core in 0..self.inner.cores.len() {
            progressed |= self.step(core);
        }
        progressed
    }

    /// Alternates hardware steps with the device's bottom halves until
    /// neither has anything left to do. Returns the rounds it took.
    pub fn settle(&self, device: &Device) -> usize {
        for round in 0..SETTLE_LIMIT {
            let stepped = self.step_all();
            let serviced = device.run_until_idle();
            if !stepped && !serviced {
                return round;
            }
        }
        warn!("simulation did not settle within {SETTLE_LIMIT} rounds");
        SETTLE_LIMIT
    }

    /// Keeps `core` busy without progress until it is aborted or reset.
    pub fn stall(&self, core: usize) {
        self.with_core(core, |model| model.stalled = true);
    }

    pub fn unstall(&self, core: usize) {
        self.with_core(core, |model| model.stalled = false);
    }

    /// Makes `core` ignore abort and skip requests until its next reset.
    pub fn ignore_abort(&self, core: usize) {
        self.with_core(core, |model| model.ignore_abort = true);
    }

    /// The next step of `core` stops with a bus error.
    pub fn inject_bus_error(&self, core: usize) {
        self.with_core(core, |model| model.pending_fault = Some(IntStatus::BUS_ERR));
    }

    /// The next step of `core` stops with a hardware timeout.
    pub fn inject_timeout(&self, core: usize) {
        self.with_core(core, |model| model.pending_fault = Some(IntStatus::TIMEOUT));
    }

    /// Makes the next `count` power-up requests fail.
    pub fn fail_power_acquire(&self, count: u32) {
        self.inner.power.lock().fail_next = count;
    }

    pub fn reg(&self, core: usize, reg: usize) -> u32 {
        self.with_core(core, |model| model.read(reg)).unwrap_or(0)
    }

    pub fn is_busy(&self, core: usize) -> bool {
        self.with_core(core, |model| model.busy()).unwrap_or(false)
    }

    pub fn is_waiting_data(&self, core: usize) -> bool {
        self.with_core(core, |model| model.state().contains(HwState::WAIT_DATA))
            .unwrap_or(false)
    }

    /// Data credits `core` has not consumed yet.
    pub fn credits(&self, core: usize) -> u32 {
        self.with_core(core, |model| model.credits()).unwrap_or(0)
    }

    /// Bus addresses of the buffers `core` ran to their end, in order.
    pub fn executed(&self, core: usize) -> Vec<u64> {
        self.with_core(core, |model| model.executed.clone())
            .unwrap_or_default()
    }

    pub fn irq(&self) -> &SimIrq {
        &self.inner.irq
    }

    pub fn power_refs(&self) -> u32 {
        self.inner.power.lock().refs
    }

    /// Times the domain came up from off.
    pub fn power_ups(&self) -> u32 {
        self.inner.power.lock().power_ups
    }

    pub fn subsystem_resets(&self) -> u32 {
        self.inner.power.lock().subsystem_resets
    }
}

impl std::fmt::Debug for SimHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHardware")
            .field("cores", &self.inner.cores.len())
            .field("power_refs", &self.power_refs())
            .finish()
    }
}

/// Register window of one simulated core.
struct SimRegs {
    hw: SimHardware,
    core: usize,
}

impl RegisterBlock for SimRegs {
    fn read(&self, reg: usize) -> u32 {
        self.hw.reg(self.core, reg)
    }

    fn write(&self, reg: usize, value: u32) {
        if let Some(cause) = self.hw.with_core(self.core, |model| model.write(reg, value)) {
            self.hw.raise(self.core, cause);
        }
    }
}

impl Platform for SimHardware {
    fn core_count(&self) -> usize {
        self.inner.cores.len()
    }

    fn registers(&self, core: usize) -> HalResult<Arc<dyn RegisterBlock>> {
        if core >= self.inner.cores.len() {
            return Err(HalError::NoSuchCore(core));
        }
        Ok(Arc::new(SimRegs {
            hw: self.clone(),
            core,
        }))
    }

    fn power(&self) -> Arc<dyn PowerDomain> {
        Arc::new(self.clone())
    }

    fn interrupts(&self) -> Arc<dyn InterruptController> {
        Arc::clone(&self.inner.irq) as Arc<dyn InterruptController>
    }

    fn map_dma(&self, region: Arc<DmaRegion>) -> HalResult<()> {
        *self.inner.dma.lock() = Some(region);
        Ok(())
    }
}
