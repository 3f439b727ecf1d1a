//! DMA-visible memory shared between the driver and the cores.

use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use crate::error::{HalError, HalResult};

/// A word-addressed memory region mapped at a fixed bus address.
///
/// Both sides access words atomically, so a single-word store (such as
/// flipping a jump instruction to ready) is observed whole or not at all.
pub struct DmaRegion {
    base: u64,
    words: Box<[AtomicU32]>,
}

impl DmaRegion {
    /// Allocates `len_words` zeroed words mapped at bus address `base`.
    pub fn new(base: u64, len_words: usize) -> Self {
        let words = (0..len_words).map(|_| AtomicU32::new(0)).collect();
        Self { base, words }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// One past the last mapped byte address.
    pub fn end(&self) -> u64 {
        self.base + (self.words.len() as u64) * 4
    }

    /// Returns `true` if `words` consecutive words starting at `addr` are mapped.
    pub fn contains(&self, addr: u64, words: usize) -> bool {
        addr >= self.base && addr % 4 == 0 && addr + (words as u64) * 4 <= self.end()
    }

    pub fn read(&self, addr: u64) -> HalResult<u32> {
        let idx = self.index(addr)?;
        Ok(self.words[idx].load(Ordering::SeqCst))
    }

    pub fn write(&self, addr: u64, value: u32) -> HalResult<()> {
        let idx = self.index(addr)?;
        self.words[idx].store(value, Ordering::SeqCst);
        Ok(())
    }

    fn index(&self, addr: u64) -> HalResult<usize> {
        if self.contains(addr, 1) {
            Ok(((addr - self.base) / 4) as usize)
        } else {
            Err(HalError::BusFault(addr))
        }
    }
}

impl core::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len_words", &self.words.len())
            .finish()
    }
}
