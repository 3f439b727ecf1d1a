//! Common error types for HAL operations

use core::fmt;

/// HAL operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Core index outside the platform's core range
    NoSuchCore(usize),
    /// Interrupt line already has a handler attached
    AlreadyConnected(usize),
    /// Power domain refused to come up
    PowerFailure,
    /// Address outside the mapped DMA region
    BusFault(u64),
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchCore(core) => write!(f, "no such core: {}", core),
            Self::AlreadyConnected(line) => write!(f, "interrupt line {} already connected", line),
            Self::PowerFailure => write!(f, "power domain failure"),
            Self::BusFault(addr) => write!(f, "bus fault at {:#x}", addr),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;
