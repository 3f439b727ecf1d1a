//! Reference-counted access to the shared power domain.
//!
//! Cores take a reference while they have work. The domain is acquired on
//! the first reference and released with the last. Every fresh power-up
//! bumps a generation counter; a core whose recorded generation is stale has
//! lost its static configuration and must be reprogrammed.

use log::{debug, warn};
use mcq_hal::PowerDomain;

use crate::error::CqResult;
use crate::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct PowerRefs {
    refs: u32,
    generation: u64,
}

pub(crate) struct PowerManager {
    domain: Arc<dyn PowerDomain>,
    state: Mutex<PowerRefs>,
}

impl PowerManager {
    pub(crate) fn new(domain: Arc<dyn PowerDomain>) -> Self {
        Self {
            domain,
            state: Mutex::new(PowerRefs::default()),
        }
    }

    /// Takes a reference. Returns the generation the caller is running in.
    pub(crate) fn acquire(&self) -> CqResult<u64> {
        let mut state = self.state.lock();
        if state.refs == 0 {
            self.domain.acquire()?;
            state.generation += 1;
            debug!("power domain up (generation {})", state.generation);
        }
        state.refs += 1;
        Ok(state.generation)
    }

    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        match state.refs {
            0 => warn!("power release without a matching acquire"),
            1 => {
                state.refs = 0;
                self.domain.release();
                debug!("power domain down");
            }
            _ => state.refs -= 1,
        }
    }

    pub(crate) fn is_on(&self) -> bool {
        self.state.lock().refs > 0
    }

    pub(crate) fn request_subsystem_reset(&self) {
        warn!("requesting subsystem reset");
        self.domain.request_subsystem_reset();
    }
}
