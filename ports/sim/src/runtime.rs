//! Threaded host runtime.
//!
//! Runs a [`Device`] against a [`SimHardware`] the way a kernel would:
//!
//! - one deferred worker per core, sleeping until its top half queued
//!   status and then running the bottom half;
//! - a hardware thread stepping the simulated cores;
//! - a ticker driving the watchdog and slice timers at a fixed period,
//!   scheduled against absolute deadlines so it does not drift.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};
use mcq::{CoreId, Device};

use crate::SimHardware;

/// How long a worker sleeps before re-checking the running flag.
const WORKER_POLL: Duration = Duration::from_millis(5);
/// Pause of the hardware thread when no core made progress.
const HW_IDLE: Duration = Duration::from_micros(200);

pub struct SimRuntime {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SimRuntime {
    /// Spawns the worker, hardware and ticker threads.
    pub fn start(device: Device, hw: SimHardware, tick: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::with_capacity(device.core_count() + 2);

        for index in 0..device.core_count() {
            let core = CoreId(index as u8);
            let device = device.clone();
            let running = Arc::clone(&running);
            threads.push(thread::spawn(move || {
                while running.load(Ordering::Acquire) {
                    if device.wait_for_irq(core, WORKER_POLL) {
                        device.service_core(core);
                    }
                }
                debug!("{core}: worker stopped");
            }));
        }

        {
            let running = Arc::clone(&running);
            threads.push(thread::spawn(move || {
                while running.load(Ordering::Acquire) {
                    if !hw.step_all() {
                        thread::sleep(HW_IDLE);
                    }
                }
            }));
        }

        {
            let running = Arc::clone(&running);
            let device = device.clone();
            threads.push(thread::spawn(move || {
                let mut next_tick = Instant::now();
                while running.load(Ordering::Acquire) {
                    next_tick += tick;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    }
                    device.tick();
                }
            }));
        }

        info!(
            "sim runtime started: {} workers, tick {:?}",
            device.core_count(),
            tick
        );
        Self { running, threads }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops every thread and waits for them. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        info!("sim runtime stopped");
    }
}

impl Drop for SimRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
