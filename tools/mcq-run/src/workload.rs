//! Synthetic client workload.
//!
//! Each client thread opens its own session, keeps a small window of
//! buffers in flight and collects completions as they arrive. A stop request
//! (Ctrl-C) cancels whatever a client still has queued through its owner tag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use mcq::{
    CoreId, CoreMask, CqError, Device, DeviceConfig, Instr, ModuleClass, OwnerTag, Priority,
    ReserveRequest, Session, WaitTarget,
};
use mcq_sim::{SimHardware, SimRuntime};

use crate::report::Report;

const RESERVE_TIMEOUT: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub jobs: usize,
    pub sessions: usize,
    /// Every n-th job of a session is submitted at high priority.
    pub high_every: Option<usize>,
    /// Core that hangs on its first buffer until the watchdog steps in.
    pub stall_core: Option<u8>,
    /// Buffers a session keeps in flight before it waits for one.
    pub window: usize,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            jobs: 64,
            sessions: 2,
            high_every: None,
            stall_core: None,
            window: 4,
        }
    }
}

impl Workload {
    fn priority(&self, job: usize) -> Priority {
        match self.high_every {
            Some(n) if n > 0 && (job + 1) % n == 0 => Priority::High,
            _ => Priority::Normal,
        }
    }

    /// Jobs assigned to client `index`; the remainder goes to the first ones.
    pub(crate) fn share(&self, index: usize) -> usize {
        let sessions = self.sessions.max(1);
        self.jobs / sessions + usize::from(index < self.jobs % sessions)
    }
}

/// Runs `workload` on a freshly simulated device and reports the outcome.
pub fn run(config: DeviceConfig, workload: &Workload, stop: &AtomicBool) -> Result<Report> {
    if workload.sessions == 0 {
        bail!("at least one session is required");
    }
    let class = config
        .cores
        .first()
        .map(|core| core.class)
        .context("configuration has no cores")?;
    let hw = SimHardware::new(config.cores.len());
    let tick = config.tick();
    let device = Device::init(config, &hw).context("device initialisation failed")?;

    if let Some(core) = workload.stall_core {
        if usize::from(core) >= device.core_count() {
            bail!("--stall-core {core}: device has {} cores", device.core_count());
        }
        hw.stall(usize::from(core));
        info!("core{core} will hang until recovered");
    }

    let mut runtime = SimRuntime::start(device.clone(), hw.clone(), tick);
    let started = Instant::now();

    let outcomes: Vec<Result<Report>> = thread::scope(|s| {
        let handles: Vec<_> = (0..workload.sessions)
            .map(|index| {
                let device = &device;
                s.spawn(move || drive_session(device, class, index, workload, stop))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("client thread panicked"))
                    .and_then(|outcome| outcome)
            })
            .collect()
    });

    runtime.stop();
    let mut report = Report::new(device.core_count());
    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(part) => report.merge(&part),
            Err(err) => {
                warn!("client failed: {err:#}");
                first_error.get_or_insert(err);
            }
        }
    }
    for index in 0..device.core_count() {
        let core = CoreId(index as u8);
        if let Some(counts) = device.recovery_counts(core) {
            report.record_recovery(core, counts);
        }
    }
    report.record_pool(device.pool_stats());
    report.elapsed_ms = started.elapsed().as_millis();
    device.shutdown();

    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

fn drive_session(
    device: &Device,
    class: ModuleClass,
    index: usize,
    workload: &Workload,
    stop: &AtomicBool,
) -> Result<Report> {
    let session = device.open_session()?;
    let tag = OwnerTag(index as u64);
    let mut report = Report::new(device.core_count());
    let mut in_flight = 0usize;

    for job in 0..workload.share(index) {
        if stop.load(Ordering::Relaxed) {
            report.interrupted = true;
            let cancelled = session.cancel_by_owner(tag)?;
            debug!("{}: stopping, {cancelled} buffers cancelled", session.id());
            break;
        }
        let payload = [
            Instr::RegWrite {
                reg: 2,
                value: job as u32,
            },
            Instr::Nop,
        ];
        let req = ReserveRequest::new(class, workload.priority(job), payload.len()).owner(tag);
        // Completed buffers hold their slots until collected, so drain one
        // before blocking on a full pool.
        let id = loop {
            match session.try_reserve(&req) {
                Ok(id) => break id,
                Err(CqError::Busy) if in_flight > 0 => {
                    collect(&session, &mut report)?;
                    in_flight -= 1;
                }
                Err(CqError::Busy) => {
                    break session
                        .reserve(&req, RESERVE_TIMEOUT)
                        .with_context(|| format!("{}: reserving job {job}", session.id()))?
                }
                Err(err) => return Err(err.into()),
            }
        };
        session.write_commands(id, &payload)?;
        session.submit(id, CoreMask::ALL)?;
        report.submitted += 1;
        in_flight += 1;

        if in_flight >= workload.window.max(1) {
            collect(&session, &mut report)?;
            in_flight -= 1;
        }
    }

    while in_flight > 0 {
        collect(&session, &mut report)?;
        in_flight -= 1;
    }
    Ok(report)
}

fn collect(session: &Session, report: &mut Report) -> Result<()> {
    let done = session
        .wait(WaitTarget::Any, WAIT_TIMEOUT)
        .with_context(|| format!("{}: waiting for a completion", session.id()))?;
    if !done.tag.is_ok() {
        debug!("{}: {} finished {}", session.id(), done.id, done.tag);
    }
    report.record(&done);
    session.release(done.id)?;
    Ok(())
}
