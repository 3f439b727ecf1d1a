//! Simulated power domain shared by every core.

use log::{debug, warn};
use mcq_hal::{HalError, HalResult, PowerDomain};

use crate::SimHardware;

#[derive(Debug, Default)]
pub(crate) struct PowerModel {
    pub(crate) refs: u32,
    pub(crate) power_ups: u32,
    /// Upcoming acquires that fail.
    pub(crate) fail_next: u32,
    pub(crate) subsystem_resets: u32,
}

impl PowerDomain for SimHardware {
    fn acquire(&self) -> HalResult<()> {
        let mut power = self.inner.power.lock();
        if power.fail_next > 0 {
            power.fail_next -= 1;
            warn!("sim: power acquire failed (injected)");
            return Err(HalError::PowerFailure);
        }
        if power.refs == 0 {
            power.power_ups += 1;
            debug!("sim: power domain up");
        }
        power.refs += 1;
        Ok(())
    }

    fn release(&self) {
        {
            let mut power = self.inner.power.lock();
            match power.refs {
                0 => {
                    warn!("sim: unbalanced power release");
                    return;
                }
                1 => power.refs = 0,
                _ => {
                    power.refs -= 1;
                    return;
                }
            }
        }
        debug!("sim: power domain down");
        for core in &self.inner.cores {
            core.lock().power_off();
        }
    }

    fn request_subsystem_reset(&self) {
        warn!("sim: subsystem reset requested");
        self.inner.power.lock().subsystem_resets += 1;
    }
}
