//! Shared power domain of the command-processor subsystem.

use crate::error::HalResult;

/// Power domain shared by every core of the subsystem.
///
/// Calls are balanced by the driver: `release` only follows a successful
/// `acquire`.
pub trait PowerDomain: Send + Sync {
    /// Power the subsystem up (or keep it up).
    fn acquire(&self) -> HalResult<()>;

    /// Drop one power reference.
    fn release(&self);

    /// Ask the platform for a full subsystem reset. Last-resort recovery
    /// when a core does not come back from a hard reset.
    fn request_subsystem_reset(&self);
}
