use std::sync::Weak;

use mcq_hal::Instr;

use crate::config::DeviceConfig;
use crate::encoder::CommandEncoder;
use crate::memory::{PoolLayout, PoolMemory};
use crate::pool::{Arena, Reservation};
use crate::types::{BufferId, CoreId, ModuleClass, Priority, SessionId};

mod config;
mod encoder;
mod queue;

const CORE0: CoreId = CoreId(0);
const CORE1: CoreId = CoreId(1);

/// Pool memory, encoder and arena for a small two-core device.
struct Fixture {
    layout: PoolLayout,
    mem: PoolMemory,
    encoder: CommandEncoder,
    arena: Arena,
}

impl Fixture {
    fn new(slots: usize) -> Self {
        let config = DeviceConfig::builder()
            .slots(slots)
            .buffer_words(32, 16)
            .build();
        config.validate().unwrap();
        let layout = PoolLayout::new(&config);
        Self {
            layout,
            mem: PoolMemory::new(layout),
            encoder: CommandEncoder::new(layout),
            arena: Arena::new(slots, config.cores.len()),
        }
    }

    fn reserve(&mut self, session: u32) -> BufferId {
        self.arena.alloc(reservation(session)).unwrap()
    }

    /// Reserves a slot and encodes a two-instruction payload into it.
    fn encoded(&mut self, session: u32) -> usize {
        let id = self.reserve(session);
        let index = id.slot();
        let payload = [Instr::Nop, Instr::RegWrite { reg: 1, value: 2 }];
        let terminated = self.encoder.write_payload(&self.mem, index, &payload).unwrap();
        let encoded = self
            .encoder
            .finalize(&self.mem, index, payload.len(), terminated)
            .unwrap();
        self.arena.slot_mut(index).encoded = Some(encoded);
        index
    }
}

fn reservation(session: u32) -> Reservation {
    Reservation {
        session: SessionId(session),
        owner: Weak::new(),
        tag: None,
        class: ModuleClass::DECODER,
        priority: Priority::Normal,
        workload: 1,
        streaming: false,
        len: 4,
    }
}
