//! Client sessions.
//!
//! A session owns the buffers it reserves, is charged their workload against
//! its quota until it releases them, and receives their completions on its
//! own done list. Closing (or dropping) a session cancels whatever it still
//! has queued and frees the rest.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use log::debug;

use crate::device::DeviceShared;
use crate::error::CqResult;
use crate::sync::{Arc, Condvar, Mutex};
use crate::types::{
    BufferId, Completion, CoreId, CoreMask, ModuleClass, OwnerTag, Priority, SessionId, WaitTarget,
};
use mcq_hal::Instr;

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) outstanding: u32,
    pub(crate) done: VecDeque<Completion>,
    pub(crate) interrupted: bool,
    pub(crate) closed: bool,
}

pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) quota: u32,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) cv: Condvar,
}

impl SessionShared {
    pub(crate) fn deliver(&self, completion: Completion) {
        self.state.lock().done.push_back(completion);
        self.cv.notify_all();
    }

    /// Returns `workload` to the quota and drops any undelivered completion of `id`.
    pub(crate) fn settle(&self, id: BufferId, workload: u32) {
        {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(workload);
            state.done.retain(|c| c.id != id);
        }
        self.cv.notify_all();
    }

    /// Returns `workload` to the quota after a reservation fell through.
    pub(crate) fn refund(&self, workload: u32) {
        {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(workload);
        }
        self.cv.notify_all();
    }

    /// Wakes every waiter. Taken under the state lock so a waiter between
    /// its check and its sleep cannot miss it.
    pub(crate) fn wake(&self) {
        let _state = self.state.lock();
        self.cv.notify_all();
    }

    /// Consumes a pending interrupt request, if any.
    pub(crate) fn take_interrupt(&self) -> bool {
        std::mem::take(&mut self.state.lock().interrupted)
    }
}

/// Live sessions, for broadcast wakeups.
pub(crate) struct SessionRegistry {
    next_id: AtomicU32,
    sessions: Mutex<HashMap<SessionId, Weak<SessionShared>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn open(&self, quota: u32) -> Arc<SessionShared> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(SessionShared {
            id,
            quota,
            state: Mutex::new(SessionState::default()),
            cv: Condvar::new(),
        });
        self.sessions.lock().insert(id, Arc::downgrade(&shared));
        debug!("{id} opened with quota {quota}");
        shared
    }

    pub(crate) fn remove(&self, id: SessionId) {
        self.sessions.lock().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub(crate) fn wake_all(&self) {
        let live: Vec<Arc<SessionShared>> = self
            .sessions
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for session in live {
            session.wake();
        }
    }
}

/// Parameters of a buffer reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub class: ModuleClass,
    pub priority: Priority,
    /// Payload instructions the client intends to write.
    pub size: usize,
    /// Abstract cost charged against quota and used for load balancing.
    pub workload: u32,
    pub owner: Option<OwnerTag>,
    pub streaming: bool,
}

impl ReserveRequest {
    pub fn new(class: ModuleClass, priority: Priority, size: usize) -> Self {
        Self {
            class,
            priority,
            size,
            workload: 1,
            owner: None,
            streaming: false,
        }
    }

    pub fn workload(mut self, workload: u32) -> Self {
        self.workload = workload.max(1);
        self
    }

    pub fn owner(mut self, tag: OwnerTag) -> Self {
        self.owner = Some(tag);
        self
    }

    /// Marks the buffer as consuming streamed data under the slice timer.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

/// A client's handle on the device.
pub struct Session {
    device: Arc<DeviceShared>,
    shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(device: Arc<DeviceShared>, shared: Arc<SessionShared>) -> Self {
        Self { device, shared }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn quota(&self) -> u32 {
        self.shared.quota
    }

    /// Workload currently charged to this session.
    pub fn outstanding(&self) -> u32 {
        self.shared.state.lock().outstanding
    }

    /// Reserves a buffer without waiting; `Busy` if none is available.
    pub fn try_reserve(&self, req: &ReserveRequest) -> CqResult<BufferId> {
        self.device.reserve(&self.shared, req, None)
    }

    /// Reserves a buffer, waiting up to `timeout` for a slot and for quota.
    pub fn reserve(&self, req: &ReserveRequest, timeout: Duration) -> CqResult<BufferId> {
        self.device
            .reserve(&self.shared, req, Some(Instant::now() + timeout))
    }

    /// Writes the payload of a reserved buffer.
    pub fn write_commands(&self, id: BufferId, payload: &[Instr]) -> CqResult<()> {
        self.device.write_commands(&self.shared, id, payload)
    }

    /// Queues a written buffer on a core allowed by `affinity`. Returns the core.
    pub fn submit(&self, id: BufferId, affinity: CoreMask) -> CqResult<CoreId> {
        self.device.submit(&self.shared, id, affinity)
    }

    /// Waits for a completion; `Timeout` is retryable.
    pub fn wait(&self, target: WaitTarget, timeout: Duration) -> CqResult<Completion> {
        self.device.wait(&self.shared, target, timeout)
    }

    pub fn release(&self, id: BufferId) -> CqResult<()> {
        self.device.release(&self.shared, id)
    }

    /// Cancels every queued buffer of this session carrying `tag`.
    pub fn cancel_by_owner(&self, tag: OwnerTag) -> CqResult<usize> {
        self.device.check_running()?;
        let id = self.shared.id;
        Ok(self
            .device
            .cancel_where(|slot| slot.session == Some(id) && slot.tag == Some(tag)))
    }

    /// Waits until no buffer of this session carrying `tag` is queued.
    pub fn wait_owner_drained(&self, tag: OwnerTag, timeout: Duration) -> CqResult<bool> {
        self.device.wait_owner_drained(&self.shared, tag, timeout)
    }

    /// Signals that more data arrived for a streaming buffer.
    pub fn feed(&self, id: BufferId) -> CqResult<()> {
        self.device.feed(&self.shared, id)
    }

    /// Makes the next (or current) blocking call return `Interrupted`.
    pub fn interrupt(&self) {
        self.shared.state.lock().interrupted = true;
        self.shared.wake();
        self.device.notify_pool();
    }

    /// Cancels what is queued and frees every buffer this session holds.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.device.close_session(&self.shared);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("quota", &self.shared.quota)
            .finish()
    }
}
