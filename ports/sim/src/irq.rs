//! Simulated interrupt controller.
//!
//! One line per core. A raise runs the attached handler on the raising
//! thread; raises on the same line are serialized, as a real controller
//! masks a line while its handler runs.

use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use mcq_hal::{HalError, HalResult, InterruptController, IrqHandler};
use parking_lot::Mutex;

struct Line {
    handler: Mutex<Option<IrqHandler>>,
    dispatch: Mutex<()>,
    raised: AtomicU64,
}

pub struct SimIrq {
    lines: Vec<Line>,
}

impl SimIrq {
    pub(crate) fn new(lines: usize) -> Self {
        Self {
            lines: (0..lines)
                .map(|_| Line {
                    handler: Mutex::new(None),
                    dispatch: Mutex::new(()),
                    raised: AtomicU64::new(0),
                })
                .collect(),
        }
    }

    /// Delivers an interrupt on `line`.
    pub(crate) fn raise(&self, line: usize) {
        let Some(entry) = self.lines.get(line) else {
            return;
        };
        let _masked = entry.dispatch.lock();
        entry.raised.fetch_add(1, Ordering::Relaxed);
        let handler = entry.handler.lock().clone();
        match handler {
            Some(handler) => handler(),
            None => trace!("irq {line}: no handler attached"),
        }
    }

    /// Interrupts raised on `line` so far.
    pub fn raised(&self, line: usize) -> u64 {
        self.lines
            .get(line)
            .map_or(0, |entry| entry.raised.load(Ordering::Relaxed))
    }
}

impl InterruptController for SimIrq {
    fn connect(&self, line: usize, handler: IrqHandler) -> HalResult<()> {
        let entry = self.lines.get(line).ok_or(HalError::NoSuchCore(line))?;
        let mut slot = entry.handler.lock();
        if slot.is_some() {
            return Err(HalError::AlreadyConnected(line));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn disconnect(&self, line: usize) {
        if let Some(entry) = self.lines.get(line) {
            entry.handler.lock().take();
        }
    }

    fn is_connected(&self, line: usize) -> bool {
        self.lines
            .get(line)
            .map_or(false, |entry| entry.handler.lock().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn second_connect_on_a_line_is_refused() {
        let irq = SimIrq::new(2);
        irq.connect(0, Arc::new(|| {})).unwrap();
        assert_eq!(
            irq.connect(0, Arc::new(|| {})),
            Err(HalError::AlreadyConnected(0))
        );
        assert_eq!(irq.connect(5, Arc::new(|| {})), Err(HalError::NoSuchCore(5)));
        irq.disconnect(0);
        assert!(!irq.is_connected(0));
    }

    #[test]
    fn raise_runs_the_attached_handler() {
        let irq = SimIrq::new(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        irq.connect(
            0,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        irq.raise(0);
        irq.raise(0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(irq.raised(0), 2);
    }
}
