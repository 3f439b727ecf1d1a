//! Device lifecycle and client entry points.
//!
//! [`Device`] is a cheap handle; clones share one instance. It owns the
//! shared DMA region, the buffer arena, one [`Core`] per configured core and
//! the session registry. Ports drive it through three calls:
//!
//! - interrupts reach the per-core top half registered at init;
//! - [`Device::service_core`] runs a core's bottom half;
//! - [`Device::tick`] advances the watchdog and slice timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use mcq_hal::regs::REG_DATA_READY;
use mcq_hal::{Instr, InterruptController, Platform};

use crate::config::DeviceConfig;
use crate::cores::{AbortReason, Core, CoreState, RecoveryCounts};
use crate::encoder::CommandEncoder;
use crate::error::{CqError, CqResult};
use crate::memory::{PoolLayout, PoolMemory};
use crate::pool::{Arena, PoolStats, Released, Reservation, SlotFlags, SlotState};
use crate::power::PowerManager;
use crate::session::{ReserveRequest, Session, SessionRegistry, SessionShared};
use crate::sync::{Arc, Condvar, IrqLock, Mutex};
use crate::trace::{TraceHook, Tracer};
use crate::types::{BufferId, Completion, CoreId, OwnerTag, ResultTag, WaitTarget};

pub(crate) struct DeviceShared {
    pub(crate) config: DeviceConfig,
    pub(crate) layout: PoolLayout,
    pub(crate) mem: PoolMemory,
    pub(crate) encoder: CommandEncoder,
    pub(crate) arena: IrqLock<Arena>,
    /// Paired with `pool_cv` so a freed slot never slips past a waiter.
    pool_gate: Mutex<()>,
    pool_cv: Condvar,
    pub(crate) cores: Vec<Arc<Core>>,
    pub(crate) power: PowerManager,
    pub(crate) sessions: SessionRegistry,
    interrupts: Arc<dyn InterruptController>,
    pub(crate) tracer: Tracer,
    shutdown: AtomicBool,
}

impl DeviceShared {
    fn new(config: DeviceConfig, platform: &dyn Platform, trace: Option<TraceHook>) -> CqResult<Self> {
        config.validate()?;
        if platform.core_count() < config.cores.len() {
            return Err(CqError::Config(format!(
                "{} cores configured, platform has {}",
                config.cores.len(),
                platform.core_count()
            )));
        }

        let layout = PoolLayout::new(&config);
        let mem = PoolMemory::new(layout);
        platform.map_dma(Arc::clone(mem.region()))?;

        let mut cores = Vec::with_capacity(config.cores.len());
        for (i, core) in config.cores.iter().enumerate() {
            cores.push(Arc::new(Core::new(
                CoreId(i as u8),
                core.class,
                core.static_config,
                platform.registers(i)?,
                config.irq_coalesce_workload,
            )));
        }

        let interrupts = platform.interrupts();
        for (i, core) in cores.iter().enumerate() {
            let top = Arc::clone(core);
            if let Err(err) = interrupts.connect(i, Arc::new(move || top.top_half())) {
                for line in 0..i {
                    interrupts.disconnect(line);
                }
                return Err(err.into());
            }
        }

        Ok(Self {
            arena: IrqLock::new(Arena::new(config.slots, config.cores.len())),
            encoder: CommandEncoder::new(layout),
            layout,
            mem,
            pool_gate: Mutex::new(()),
            pool_cv: Condvar::new(),
            cores,
            power: PowerManager::new(platform.power()),
            sessions: SessionRegistry::new(),
            interrupts,
            tracer: Tracer::new(trace),
            shutdown: AtomicBool::new(false),
            config,
        })
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn check_running(&self) -> CqResult<()> {
        if self.is_shut_down() {
            Err(CqError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn notify_pool(&self) {
        let _gate = self.pool_gate.lock();
        self.pool_cv.notify_all();
    }

    fn core(&self, core: CoreId) -> Option<&Arc<Core>> {
        self.cores.get(core.index())
    }

    pub(crate) fn reserve(
        &self,
        session: &Arc<SessionShared>,
        req: &ReserveRequest,
        deadline: Option<Instant>,
    ) -> CqResult<BufferId> {
        self.check_running()?;
        if !self.cores.iter().any(|core| core.class == req.class) {
            return Err(CqError::NoCore(req.class));
        }
        let capacity = self.encoder.payload_capacity();
        if req.size > capacity {
            return Err(CqError::BadSize {
                len: req.size,
                capacity,
            });
        }
        let workload = req.workload.max(1);
        if workload > session.quota {
            return Err(CqError::QuotaExceeded {
                workload,
                quota: session.quota,
            });
        }

        self.charge_quota(session, workload, deadline)?;
        match self.take_slot(session, req, workload, deadline) {
            Ok(id) => {
                debug!("{}: reserved {} (workload {})", session.id, id, workload);
                Ok(id)
            }
            Err(err) => {
                session.refund(workload);
                Err(err)
            }
        }
    }

    fn charge_quota(
        &self,
        session: &SessionShared,
        workload: u32,
        deadline: Option<Instant>,
    ) -> CqResult<()> {
        let mut state = session.state.lock();
        loop {
            if state.closed {
                return Err(CqError::SessionClosed);
            }
            self.check_running()?;
            if std::mem::take(&mut state.interrupted) {
                return Err(CqError::Interrupted);
            }
            if let Some(total) = state
                .outstanding
                .checked_add(workload)
                .filter(|&total| total <= session.quota)
            {
                state.outstanding = total;
                return Ok(());
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    session.cv.wait_until(&mut state, deadline);
                }
                _ => return Err(CqError::Busy),
            }
        }
    }

    fn take_slot(
        &self,
        session: &Arc<SessionShared>,
        req: &ReserveRequest,
        workload: u32,
        deadline: Option<Instant>,
    ) -> CqResult<BufferId> {
        let mut gate = self.pool_gate.lock();
        loop {
            let reservation = Reservation {
                session: session.id,
                owner: Arc::downgrade(session),
                tag: req.owner,
                class: req.class,
                priority: req.priority,
                workload,
                streaming: req.streaming,
                len: req.size,
            };
            let allocated = self.arena.lock().alloc(reservation);
            if let Some(id) = allocated {
                return Ok(id);
            }
            self.check_running()?;
            if session.take_interrupt() {
                return Err(CqError::Interrupted);
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    self.pool_cv.wait_until(&mut gate, deadline);
                }
                _ => return Err(CqError::Busy),
            }
        }
    }

    pub(crate) fn write_commands(
        &self,
        session: &SessionShared,
        id: BufferId,
        payload: &[Instr],
    ) -> CqResult<()> {
        self.check_running()?;
        let (index, limit) = {
            let arena = self.arena.lock();
            let index = arena.owned(id, session.id)?;
            let slot = arena.slot(index);
            if slot.state != SlotState::Reserved {
                return Err(CqError::NotReserved(id));
            }
            (index, slot.reserved_len)
        };
        if payload.len() > limit {
            return Err(CqError::BadSize {
                len: payload.len(),
                capacity: limit,
            });
        }
        let terminated = self.encoder.write_payload(&self.mem, index, payload)?;

        let mut arena = self.arena.lock();
        arena.owned(id, session.id)?;
        let slot = arena.slot_mut(index);
        if slot.state != SlotState::Reserved {
            return Err(CqError::NotReserved(id));
        }
        slot.payload_len = payload.len();
        slot.flags.set(SlotFlags::TERMINATED, terminated);
        Ok(())
    }

    pub(crate) fn wait(
        &self,
        session: &SessionShared,
        target: WaitTarget,
        timeout: Duration,
    ) -> CqResult<Completion> {
        if let WaitTarget::Buffer(id) = target {
            let arena = self.arena.lock();
            let index = arena.owned(id, session.id)?;
            let slot = arena.slot(index);
            if slot.state == SlotState::Reserved {
                return Err(CqError::NotSubmitted(id));
            }
            if slot.flags.contains(SlotFlags::NEEDS_REMOVAL) {
                return Err(CqError::AlreadyReleased(id));
            }
        }

        let deadline = Instant::now() + timeout;
        let mut state = session.state.lock();
        loop {
            let found = match target {
                WaitTarget::Buffer(id) => state.done.iter().position(|c| c.id == id),
                WaitTarget::Any => (!state.done.is_empty()).then_some(0),
            };
            if let Some(completion) = found.and_then(|pos| state.done.remove(pos)) {
                return Ok(completion);
            }
            self.check_running()?;
            if state.closed {
                return Err(CqError::SessionClosed);
            }
            if std::mem::take(&mut state.interrupted) {
                return Err(CqError::Interrupted);
            }
            if Instant::now() >= deadline {
                return Err(CqError::Timeout);
            }
            session.cv.wait_until(&mut state, deadline);
        }
    }

    pub(crate) fn release(&self, session: &SessionShared, id: BufferId) -> CqResult<()> {
        let (outcome, workload) = self.arena.lock().release(id, session.id)?;
        session.settle(id, workload);
        if outcome == Released::Freed {
            self.notify_pool();
        }
        debug!("{}: released {} ({:?})", session.id, id, outcome);
        Ok(())
    }

    pub(crate) fn feed(&self, session: &SessionShared, id: BufferId) -> CqResult<()> {
        self.check_running()?;
        let (index, core) = {
            let arena = self.arena.lock();
            let index = arena.owned(id, session.id)?;
            let slot = arena.slot(index);
            if slot.state != SlotState::Linked {
                return Err(CqError::NotSubmitted(id));
            }
            if !slot.streaming() {
                return Err(CqError::BadCommand("feed on a non-streaming buffer"));
            }
            (index, slot.core)
        };
        let Some(core) = core.and_then(|core| self.core(core)) else {
            return Err(CqError::NotSubmitted(id));
        };
        core.regs.write(REG_DATA_READY, 1);
        let mut ctx = core.ctx.lock();
        if ctx.slice_target == Some(index) {
            ctx.slice.arm(self.config.slice_timeout_ticks);
        }
        Ok(())
    }

    pub(crate) fn wait_owner_drained(
        &self,
        session: &SessionShared,
        tag: OwnerTag,
        timeout: Duration,
    ) -> CqResult<bool> {
        let queued = || {
            self.arena.lock().slots.iter().any(|slot| {
                slot.state == SlotState::Linked
                    && slot.session == Some(session.id)
                    && slot.tag == Some(tag)
            })
        };
        let deadline = Instant::now() + timeout;
        let mut state = session.state.lock();
        loop {
            if !queued() {
                return Ok(true);
            }
            self.check_running()?;
            if std::mem::take(&mut state.interrupted) {
                return Err(CqError::Interrupted);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            session.cv.wait_until(&mut state, deadline);
        }
    }

    pub(crate) fn close_session(&self, session: &SessionShared) {
        {
            let mut state = session.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        session.wake();

        let id = session.id;
        let cancelled = self.cancel_where(|slot| slot.session == Some(id));
        let freed = {
            let mut arena = self.arena.lock();
            let mut freed = 0;
            for index in arena.owned_by(id) {
                if arena.slot(index).state == SlotState::Linked {
                    arena.slot_mut(index).flags.insert(SlotFlags::NEEDS_REMOVAL);
                } else {
                    arena.free(index);
                    freed += 1;
                }
            }
            freed
        };
        if freed > 0 {
            self.notify_pool();
        }
        self.sessions.remove(id);
        debug!("{id} closed: {cancelled} cancelled, {freed} freed");
    }

    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("{}: shutting down", self.config.name);
        for core in &self.cores {
            let mut guard = core.ctx.lock();
            let ctx = &mut *guard;
            self.service(core, ctx);
            if !core.quiescent()
                && !self.abort_and_wait(core, ctx, AbortReason::Shutdown)
                && !self.reset_core(core, ctx)
            {
                warn!("{}: did not stop cleanly", core.id);
            }
            self.fail_queue(core, ctx, ResultTag::Aborted);
            self.go_idle(core, ctx);
            self.set_state(core, ctx, CoreState::PoweredOff);
        }
        self.sessions.wake_all();
        self.notify_pool();
        for core in &self.cores {
            self.interrupts.disconnect(core.id.index());
        }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            for core in &self.cores {
                self.interrupts.disconnect(core.id.index());
            }
        }
    }
}

/// Builder for a [`Device`].
pub struct DeviceBuilder {
    config: DeviceConfig,
    trace: Option<TraceHook>,
}

impl DeviceBuilder {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            trace: None,
        }
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Validates the configuration, maps the shared region and hooks up the
    /// interrupt lines. Cores stay powered off until they get work.
    pub fn build(self, platform: &dyn Platform) -> CqResult<Device> {
        let shared = DeviceShared::new(self.config, platform, self.trace)?;
        info!(
            "{}: {} cores, {} slots, shared region {:#x}..{:#x}",
            shared.config.name,
            shared.cores.len(),
            shared.config.slots,
            shared.mem.region().base(),
            shared.mem.region().end()
        );
        Ok(Device {
            shared: Arc::new(shared),
        })
    }
}

/// Handle to one command processor.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    pub fn builder(config: DeviceConfig) -> DeviceBuilder {
        DeviceBuilder::new(config)
    }

    /// Shorthand for `Device::builder(config).build(platform)`.
    pub fn init(config: DeviceConfig, platform: &dyn Platform) -> CqResult<Self> {
        DeviceBuilder::new(config).build(platform)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub fn layout(&self) -> &PoolLayout {
        &self.shared.layout
    }

    pub fn core_count(&self) -> usize {
        self.shared.cores.len()
    }

    /// Opens a session with the configured default quota.
    pub fn open_session(&self) -> CqResult<Session> {
        self.open_session_with_quota(self.shared.config.session_quota)
    }

    pub fn open_session_with_quota(&self, quota: u32) -> CqResult<Session> {
        self.shared.check_running()?;
        if quota == 0 {
            return Err(CqError::Config("session quota must be non-zero".to_owned()));
        }
        let shared = self.shared.sessions.open(quota);
        Ok(Session::new(Arc::clone(&self.shared), shared))
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Runs the bottom half of `core`. Returns `true` if any status was processed.
    pub fn service_core(&self, core: CoreId) -> bool {
        let Some(core) = self.shared.core(core) else {
            return false;
        };
        let mut ctx = core.ctx.lock();
        self.shared.service(core, &mut ctx)
    }

    /// Blocks up to `timeout` until `core` has status pending for its bottom half.
    pub fn wait_for_irq(&self, core: CoreId, timeout: Duration) -> bool {
        match self.shared.core(core) {
            Some(core) => core.irq.wait_until(Instant::now() + timeout),
            None => false,
        }
    }

    /// Services every core until no status is pending. Returns `true` if
    /// anything was processed.
    pub fn run_until_idle(&self) -> bool {
        let mut any = false;
        loop {
            let mut progressed = false;
            for core in &self.shared.cores {
                progressed |= self.service_core(core.id);
            }
            if !progressed {
                return any;
            }
            any = true;
        }
    }

    /// Advances the watchdog and slice timers by one tick.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Stops every core, fails whatever is queued, powers down and wakes
    /// every blocked client with `Shutdown`. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.arena.lock().stats()
    }

    pub fn core_state(&self, core: CoreId) -> Option<CoreState> {
        let core = self.shared.core(core)?;
        let state = core.ctx.lock().state;
        Some(match state {
            CoreState::Idle if !self.shared.power.is_on() => CoreState::PoweredOff,
            other => other,
        })
    }

    pub fn recovery_counts(&self, core: CoreId) -> Option<RecoveryCounts> {
        Some(self.shared.core(core)?.ctx.lock().recovery)
    }

    /// Buffers currently linked on `core`.
    pub fn queue_depth(&self, core: CoreId) -> usize {
        match self.shared.core(core) {
            Some(core) => self.shared.arena.lock().queue_len(core.id),
            None => 0,
        }
    }

    /// Register snapshot captured on the last command or bus error of `core`.
    pub fn core_snapshot(&self, core: CoreId) -> Option<Vec<u32>> {
        self.shared.core(core)?;
        Some(self.shared.mem.read_snapshot(core.index()))
    }

    /// Bus address of the instruction buffer behind `id`.
    pub fn buffer_addr(&self, id: BufferId) -> CqResult<u64> {
        let index = self.shared.arena.lock().resolve(id)?;
        Ok(self.shared.layout.cmd_addr(index))
    }

    /// Watchdog ticks left on `core`, `None` when disarmed.
    pub fn watchdog_remaining(&self, core: CoreId) -> Option<u64> {
        let core = self.shared.core(core)?;
        let ctx = core.ctx.lock();
        ctx.watchdog.is_armed().then(|| ctx.watchdog.remaining())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.shared.config.name)
            .field("cores", &self.shared.cores.len())
            .field("slots", &self.shared.config.slots)
            .finish()
    }
}
