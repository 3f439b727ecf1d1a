//! Device configuration.
//!
//! Sizing of the buffer pool, the core roster and every timing constant the
//! scheduler uses. Build one with [`DeviceConfig::builder`]; the device
//! validates it during initialization.

use std::time::Duration;

use mcq_hal::isa::INSTR_WORDS;
use mcq_hal::regs::REG_COUNT;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::encoder::ENCODER_OVERHEAD;
use crate::error::{CqError, CqResult};
use crate::memory::STATUS_DUMP;
use crate::types::ModuleClass;

/// Default bus address of the shared command region.
pub const DEFAULT_DMA_BASE: u64 = 0x1000_0000;

/// One core of the command processor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoreConfig {
    pub class: ModuleClass,
    /// Written to the core's config register after every power-up.
    pub static_config: u32,
}

impl CoreConfig {
    pub fn new(class: ModuleClass) -> Self {
        Self {
            class,
            static_config: 0x1,
        }
    }

    pub fn with_static_config(mut self, value: u32) -> Self {
        self.static_config = value;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct DeviceConfig {
    pub name: String,
    /// Number of buffer slots in the pool.
    pub slots: usize,
    /// Words per instruction buffer.
    pub cmd_words: usize,
    /// Words per status buffer.
    pub status_words: usize,
    /// Words per core register-snapshot buffer.
    pub snapshot_words: usize,
    pub dma_base: u64,
    pub cores: Vec<CoreConfig>,
    /// Outstanding workload a session may hold before reserve blocks.
    pub session_quota: u32,
    /// Accumulated workload after which a linked buffer requests an interrupt.
    pub irq_coalesce_workload: u32,
    pub tick_ms: u64,
    pub watchdog_ticks_per_buffer: u64,
    /// Fixed watchdog window used instead of the per-buffer one on hardware
    /// with a shared bus arbiter.
    pub hw_arbiter_timeout_ticks: Option<u64>,
    pub slice_timeout_ticks: u64,
    pub abort_timeout_ms: u64,
    /// Hardware timeouts tolerated per buffer before it is given up.
    pub max_timeout_restarts: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "mcq".to_owned(),
            slots: 16,
            cmd_words: 256,
            status_words: 16,
            snapshot_words: 16,
            dma_base: DEFAULT_DMA_BASE,
            cores: vec![
                CoreConfig::new(ModuleClass::DECODER),
                CoreConfig::new(ModuleClass::DECODER),
            ],
            session_quota: 64,
            irq_coalesce_workload: 4,
            tick_ms: 10,
            watchdog_ticks_per_buffer: 50,
            hw_arbiter_timeout_ticks: None,
            slice_timeout_ticks: 20,
            abort_timeout_ms: 50,
            max_timeout_restarts: 3,
        }
    }
}

impl DeviceConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::default()
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }

    /// Instructions a client may place in one buffer.
    pub fn payload_capacity(&self) -> usize {
        (self.cmd_words / INSTR_WORDS).saturating_sub(ENCODER_OVERHEAD)
    }

    /// Total words of the shared region.
    pub fn region_words(&self) -> usize {
        self.slots * (self.cmd_words + self.status_words) + self.cores.len() * self.snapshot_words
    }

    pub fn validate(&self) -> CqResult<()> {
        if self.slots == 0 || self.slots > u16::MAX as usize {
            return Err(invalid(format!("slot count {} out of range", self.slots)));
        }
        if self.cores.is_empty() || self.cores.len() > 32 {
            return Err(invalid(format!("core count {} out of range", self.cores.len())));
        }
        if self.cmd_words % INSTR_WORDS != 0 || self.payload_capacity() == 0 {
            return Err(invalid(format!("cmd_words {} too small or unaligned", self.cmd_words)));
        }
        if self.status_words < STATUS_DUMP + REG_COUNT {
            return Err(invalid(format!(
                "status_words {} cannot hold a register dump",
                self.status_words
            )));
        }
        if self.snapshot_words < REG_COUNT {
            return Err(invalid(format!(
                "snapshot_words {} cannot hold a register dump",
                self.snapshot_words
            )));
        }
        if self.dma_base == 0 || self.dma_base % 8 != 0 {
            return Err(invalid(format!("dma_base {:#x} must be non-zero and 8-byte aligned", self.dma_base)));
        }
        let end = self.dma_base + self.region_words() as u64 * 4;
        if end > u32::MAX as u64 {
            return Err(invalid(format!("shared region ends at {end:#x}, beyond 32-bit bus reach")));
        }
        if self.session_quota == 0 || self.irq_coalesce_workload == 0 {
            return Err(invalid("session_quota and irq_coalesce_workload must be non-zero".to_owned()));
        }
        if self.tick_ms == 0 || self.watchdog_ticks_per_buffer == 0 || self.slice_timeout_ticks == 0 {
            return Err(invalid("tick and timer periods must be non-zero".to_owned()));
        }
        if self.hw_arbiter_timeout_ticks == Some(0) {
            return Err(invalid("hw_arbiter_timeout_ticks must be non-zero".to_owned()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> CqError {
    CqError::Config(msg)
}

/// Builder for ergonomic device configuration construction.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfigBuilder {
    config: DeviceConfig,
    cores: Vec<CoreConfig>,
}

impl DeviceConfigBuilder {
    /// Sets the device name used in log lines.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn slots(mut self, slots: usize) -> Self {
        self.config.slots = slots;
        self
    }

    /// Sets per-slot buffer sizes in words.
    ///
    /// # Parameters
    /// - `cmd`: instruction buffer words (two per instruction)
    /// - `status`: status buffer words, at least one plus the register count
    pub fn buffer_words(mut self, cmd: usize, status: usize) -> Self {
        self.config.cmd_words = cmd;
        self.config.status_words = status;
        self
    }

    pub fn snapshot_words(mut self, words: usize) -> Self {
        self.config.snapshot_words = words;
        self
    }

    pub fn dma_base(mut self, base: u64) -> Self {
        self.config.dma_base = base;
        self
    }

    /// Adds a core. The first call replaces the default roster.
    pub fn core(mut self, core: CoreConfig) -> Self {
        self.cores.push(core);
        self
    }

    /// Adds `count` cores of `class` with the default static configuration.
    pub fn cores(mut self, class: ModuleClass, count: usize) -> Self {
        self.cores
            .extend(std::iter::repeat(CoreConfig::new(class)).take(count));
        self
    }

    pub fn session_quota(mut self, quota: u32) -> Self {
        self.config.session_quota = quota;
        self
    }

    pub fn irq_coalesce_workload(mut self, workload: u32) -> Self {
        self.config.irq_coalesce_workload = workload;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick_ms = tick.as_millis() as u64;
        self
    }

    pub fn watchdog_ticks_per_buffer(mut self, ticks: u64) -> Self {
        self.config.watchdog_ticks_per_buffer = ticks;
        self
    }

    pub fn hw_arbiter_timeout_ticks(mut self, ticks: u64) -> Self {
        self.config.hw_arbiter_timeout_ticks = Some(ticks);
        self
    }

    pub fn slice_timeout_ticks(mut self, ticks: u64) -> Self {
        self.config.slice_timeout_ticks = ticks;
        self
    }

    pub fn abort_timeout(mut self, timeout: Duration) -> Self {
        self.config.abort_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_timeout_restarts(mut self, restarts: u32) -> Self {
        self.config.max_timeout_restarts = restarts;
        self
    }

    /// Builds the configuration. Validation happens at device init.
    pub fn build(mut self) -> DeviceConfig {
        if !self.cores.is_empty() {
            self.config.cores = self.cores;
        }
        self.config
    }
}
