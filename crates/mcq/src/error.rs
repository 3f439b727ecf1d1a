//! Error type shared by every client-facing operation.

use mcq_hal::HalError;
use thiserror::Error;

use crate::types::{BufferId, ModuleClass};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CqError {
    /// No slot or quota became available in time.
    #[error("no buffer slot or session quota available")]
    Busy,
    #[error("timed out waiting for completion")]
    Timeout,
    #[error("wait interrupted")]
    Interrupted,
    #[error("invalid buffer {0}")]
    InvalidBuffer(BufferId),
    #[error("buffer {0} is owned by another session")]
    NotOwner(BufferId),
    #[error("buffer {0} is not in the reserved state")]
    NotReserved(BufferId),
    #[error("buffer {0} was never submitted")]
    NotSubmitted(BufferId),
    #[error("buffer {0} was already released")]
    AlreadyReleased(BufferId),
    #[error("payload of {len} instructions exceeds capacity of {capacity}")]
    BadSize { len: usize, capacity: usize },
    #[error("malformed command stream: {0}")]
    BadCommand(&'static str),
    #[error("workload {workload} can never fit session quota {quota}")]
    QuotaExceeded { workload: u32, quota: u32 },
    #[error("no core serves {0}")]
    NoCore(ModuleClass),
    #[error("affinity mask {0:#x} selects no eligible core")]
    BadAffinity(u32),
    #[error("session closed")]
    SessionClosed,
    #[error("device shut down")]
    Shutdown,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("hardware: {0}")]
    Hal(#[from] HalError),
}

impl CqError {
    /// Returns `true` for outcomes where repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::Timeout | Self::Interrupted)
    }
}

pub type CqResult<T> = Result<T, CqError>;
