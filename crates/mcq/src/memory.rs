//! Layout of the DMA region shared with the cores.
//!
//! The region holds three sub-regions back to back: instruction buffers,
//! status buffers (one per slot) and register-snapshot buffers (one per
//! core). Each is an array of fixed-size entries, so slot `i`'s buffer sits
//! at `sub_region_base + i * entry_size`.

use mcq_hal::isa::{Instr, INSTR_BYTES};
use mcq_hal::DmaRegion;

use crate::config::DeviceConfig;
use crate::error::CqResult;
use crate::sync::Arc;

/// Status word holding the buffer address stamped by the opening probe.
pub const STATUS_STARTED: usize = 0;
/// First status word of the register dump written by the closing probe.
pub const STATUS_DUMP: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    base: u64,
    slots: usize,
    cores: usize,
    cmd_words: usize,
    status_words: usize,
    snapshot_words: usize,
}

impl PoolLayout {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            base: config.dma_base,
            slots: config.slots,
            cores: config.cores.len(),
            cmd_words: config.cmd_words,
            status_words: config.status_words,
            snapshot_words: config.snapshot_words,
        }
    }

    pub fn total_words(&self) -> usize {
        self.slots * (self.cmd_words + self.status_words) + self.cores * self.snapshot_words
    }

    pub fn cmd_addr(&self, slot: usize) -> u64 {
        self.base + (slot * self.cmd_words * 4) as u64
    }

    pub fn status_addr(&self, slot: usize) -> u64 {
        self.status_base() + (slot * self.status_words * 4) as u64
    }

    pub fn snapshot_addr(&self, core: usize) -> u64 {
        self.snapshot_base() + (core * self.snapshot_words * 4) as u64
    }

    /// Instructions that fit in one instruction buffer.
    pub fn cmd_capacity(&self) -> usize {
        self.cmd_words * 4 / INSTR_BYTES as usize
    }

    /// Maps a bus address back to the slot whose instruction buffer starts there.
    pub fn slot_at(&self, addr: u64) -> Option<usize> {
        let stride = (self.cmd_words * 4) as u64;
        if addr < self.base || addr >= self.status_base() || (addr - self.base) % stride != 0 {
            return None;
        }
        Some(((addr - self.base) / stride) as usize)
    }

    fn status_base(&self) -> u64 {
        self.base + (self.slots * self.cmd_words * 4) as u64
    }

    fn snapshot_base(&self) -> u64 {
        self.status_base() + (self.slots * self.status_words * 4) as u64
    }
}

/// The shared region together with its layout.
pub(crate) struct PoolMemory {
    layout: PoolLayout,
    region: Arc<DmaRegion>,
}

impl PoolMemory {
    pub(crate) fn new(layout: PoolLayout) -> Self {
        let region = Arc::new(DmaRegion::new(layout.base, layout.total_words()));
        Self { layout, region }
    }

    pub(crate) fn region(&self) -> &Arc<DmaRegion> {
        &self.region
    }

    /// Writes one instruction. The operand word lands before the opcode
    /// word, so a core never sees a new opcode paired with a stale operand.
    pub(crate) fn write_instr(&self, slot: usize, index: usize, instr: Instr) -> CqResult<()> {
        let addr = self.layout.cmd_addr(slot) + index as u64 * INSTR_BYTES;
        let [w0, w1] = instr.encode();
        self.region.write(addr + 4, w1)?;
        self.region.write(addr, w0)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn read_instr(&self, slot: usize, index: usize) -> CqResult<Option<Instr>> {
        let addr = self.layout.cmd_addr(slot) + index as u64 * INSTR_BYTES;
        let words = [self.region.read(addr)?, self.region.read(addr + 4)?];
        Ok(Instr::decode(words))
    }

    pub(crate) fn status_word(&self, slot: usize, word: usize) -> u32 {
        self.region
            .read(self.layout.status_addr(slot) + word as u64 * 4)
            .unwrap_or(0)
    }

    pub(crate) fn clear_status(&self, slot: usize) -> CqResult<()> {
        let base = self.layout.status_addr(slot);
        for word in 0..self.layout.status_words {
            self.region.write(base + word as u64 * 4, 0)?;
        }
        Ok(())
    }

    pub(crate) fn write_snapshot(&self, core: usize, words: &[u32]) -> CqResult<()> {
        let base = self.layout.snapshot_addr(core);
        for (i, word) in words.iter().take(self.layout.snapshot_words).enumerate() {
            self.region.write(base + i as u64 * 4, *word)?;
        }
        Ok(())
    }

    pub(crate) fn read_snapshot(&self, core: usize) -> Vec<u32> {
        let base = self.layout.snapshot_addr(core);
        (0..self.layout.snapshot_words)
            .map(|i| self.region.read(base + i as u64 * 4).unwrap_or(0))
            .collect()
    }
}
