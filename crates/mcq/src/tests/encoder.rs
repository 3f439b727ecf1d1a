use mcq_hal::isa::{Instr, JumpFlags};
use mcq_hal::regs::{REG_COUNT, REG_CUR_ADDR};

use super::Fixture;
use crate::encoder::{Encoded, IrqCoalescer, ENCODER_OVERHEAD};
use crate::error::CqError;
use crate::memory::{STATUS_DUMP, STATUS_STARTED};
use crate::types::Priority;

#[test]
fn wraps_payload_with_probes_and_unready_jump() {
    let mut fx = Fixture::new(2);
    let index = fx.encoded(1);
    let status = fx.layout.status_addr(index);

    let encoded = fx.arena.slot(index).encoded.unwrap();
    assert_eq!(encoded, Encoded { len: 5, jump: Some(4) });
    assert_eq!(encoded.len_words(), 10);

    let instr = |i| fx.mem.read_instr(index, i).unwrap().unwrap();
    assert_eq!(
        instr(0),
        Instr::ReadStatus {
            reg: REG_CUR_ADDR as u8,
            count: 1,
            dst: (status + STATUS_STARTED as u64 * 4) as u32,
        }
    );
    assert_eq!(instr(1), Instr::Nop);
    assert_eq!(
        instr(3),
        Instr::ReadStatus {
            reg: 0,
            count: REG_COUNT as u8,
            dst: (status + STATUS_DUMP as u64 * 4) as u32,
        }
    );
    assert_eq!(
        instr(4),
        Instr::Jump {
            flags: JumpFlags::empty(),
            target: 0,
        }
    );
}

#[test]
fn terminated_payload_keeps_end_last() {
    let fx = Fixture::new(2);
    let payload = [Instr::Nop, Instr::End];
    let terminated = fx.encoder.write_payload(&fx.mem, 0, &payload).unwrap();
    assert!(terminated);

    let encoded = fx.encoder.finalize(&fx.mem, 0, payload.len(), true).unwrap();
    assert_eq!(encoded, Encoded { len: 4, jump: None });
    assert!(matches!(
        fx.mem.read_instr(0, 2).unwrap(),
        Some(Instr::ReadStatus { reg: 0, .. })
    ));
    assert_eq!(fx.mem.read_instr(0, 3).unwrap(), Some(Instr::End));
}

#[test]
fn rejects_jumps_misplaced_end_and_oversize() {
    let fx = Fixture::new(1);
    let jump = [Instr::Jump {
        flags: JumpFlags::READY,
        target: 0,
    }];
    assert!(matches!(
        fx.encoder.write_payload(&fx.mem, 0, &jump),
        Err(CqError::BadCommand(_))
    ));
    assert!(matches!(
        fx.encoder.write_payload(&fx.mem, 0, &[Instr::End, Instr::Nop]),
        Err(CqError::BadCommand(_))
    ));

    let capacity = fx.layout.cmd_capacity() - ENCODER_OVERHEAD;
    assert_eq!(fx.encoder.payload_capacity(), capacity);
    let big = vec![Instr::Nop; capacity + 1];
    assert_eq!(
        fx.encoder.write_payload(&fx.mem, 0, &big),
        Err(CqError::BadSize {
            len: capacity + 1,
            capacity,
        })
    );
}

#[test]
fn done_once_dump_carries_own_address() {
    let mut fx = Fixture::new(2);
    let index = fx.encoded(1);
    assert!(!fx.encoder.is_done(&fx.mem, index));

    let own = fx.layout.cmd_addr(index) as u32;
    let status = fx.layout.status_addr(index);
    fx.mem
        .region()
        .write(status + (STATUS_DUMP + REG_CUR_ADDR) as u64 * 4, own)
        .unwrap();
    assert!(fx.encoder.is_done(&fx.mem, index));

    fx.encoder.rearm(&fx.mem, index).unwrap();
    assert!(!fx.encoder.is_done(&fx.mem, index));
}

#[test]
fn patched_jump_points_at_successor() {
    let mut fx = Fixture::new(2);
    let first = fx.encoded(1);
    let second = fx.encoded(1);
    let encoded = fx.arena.slot(first).encoded.unwrap();

    fx.encoder
        .patch_jump(&fx.mem, first, &encoded, Some(second), true)
        .unwrap();
    assert_eq!(
        fx.mem.read_instr(first, 4).unwrap(),
        Some(Instr::Jump {
            flags: JumpFlags::READY | JumpFlags::IRQ,
            target: fx.layout.cmd_addr(second) as u32,
        })
    );
}

#[test]
fn coalescer_requests_irq_per_threshold_and_for_high_priority() {
    let mut coalescer = IrqCoalescer::new(3);
    assert!(!coalescer.on_link(1, Priority::Normal));
    assert!(!coalescer.on_link(1, Priority::Normal));
    assert!(coalescer.on_link(1, Priority::Normal));

    assert!(!coalescer.on_link(1, Priority::Normal));
    assert!(coalescer.on_link(1, Priority::High));
    assert!(!coalescer.on_link(2, Priority::Normal));
    assert!(coalescer.on_link(5, Priority::Normal));
}
