use mcq_hal::isa::{Instr, JumpFlags};

use super::{Fixture, CORE0, CORE1};
use crate::queue;

fn jump_of(fx: &Fixture, index: usize) -> Instr {
    let at = fx.arena.slot(index).encoded.unwrap().jump.unwrap();
    fx.mem.read_instr(index, at).unwrap().unwrap()
}

fn ready_to(fx: &Fixture, next: usize) -> Instr {
    Instr::Jump {
        flags: JumpFlags::READY,
        target: fx.layout.cmd_addr(next) as u32,
    }
}

fn unready() -> Instr {
    Instr::Jump {
        flags: JumpFlags::empty(),
        target: 0,
    }
}

#[test]
fn tail_links_chain_in_order() {
    let mut fx = Fixture::new(4);
    let a = fx.encoded(1);
    let b = fx.encoded(1);
    let c = fx.encoded(1);
    for index in [a, b, c] {
        queue::link_tail(&mut fx.arena, &fx.mem, &fx.encoder, CORE0, index).unwrap();
    }

    assert_eq!(fx.arena.nodes(CORE0), vec![a, b, c]);
    assert_eq!(fx.arena.queue_len(CORE0), 3);
    assert_eq!(fx.arena.queue_len(CORE1), 0);
    assert_eq!(jump_of(&fx, a), ready_to(&fx, b));
    assert_eq!(jump_of(&fx, b), ready_to(&fx, c));
    assert_eq!(jump_of(&fx, c), unready());
}

#[test]
fn insert_before_rewires_both_neighbours() {
    let mut fx = Fixture::new(4);
    let a = fx.encoded(1);
    let b = fx.encoded(1);
    let urgent = fx.encoded(2);
    queue::link_tail(&mut fx.arena, &fx.mem, &fx.encoder, CORE0, a).unwrap();
    queue::link_tail(&mut fx.arena, &fx.mem, &fx.encoder, CORE0, b).unwrap();

    queue::link_before(&mut fx.arena, &fx.mem, &fx.encoder, CORE0, urgent, b).unwrap();
    assert_eq!(fx.arena.nodes(CORE0), vec![a, urgent, b]);
    assert_eq!(jump_of(&fx, a), ready_to(&fx, urgent));
    assert_eq!(jump_of(&fx, urgent), ready_to(&fx, b));
}

#[test]
fn insert_before_head_becomes_head() {
    let mut fx = Fixture::new(4);
    let a = fx.encoded(1);
    let urgent = fx.encoded(1);
    queue::link_tail(&mut fx.arena, &fx.mem, &fx.encoder, CORE1, a).unwrap();
    queue::link_before(&mut fx.arena, &fx.mem, &fx.encoder, CORE1, urgent, a).unwrap();

    assert_eq!(fx.arena.head(CORE1), Some(urgent));
    assert_eq!(fx.arena.tail(CORE1), Some(a));
}

#[test]
fn unlink_bridges_and_moves_tail() {
    let mut fx = Fixture::new(4);
    let a = fx.encoded(1);
    let b = fx.encoded(1);
    let c = fx.encoded(1);
    for index in [a, b, c] {
        queue::link_tail(&mut fx.arena, &fx.mem, &fx.encoder, CORE0, index).unwrap();
    }

    queue::unlink(&mut fx.arena, &fx.mem, &fx.encoder, b).unwrap();
    assert_eq!(fx.arena.nodes(CORE0), vec![a, c]);
    assert_eq!(jump_of(&fx, a), ready_to(&fx, c));

    queue::unlink(&mut fx.arena, &fx.mem, &fx.encoder, c).unwrap();
    assert_eq!(fx.arena.tail(CORE0), Some(a));
    assert_eq!(jump_of(&fx, a), unready());

    queue::unlink(&mut fx.arena, &fx.mem, &fx.encoder, a).unwrap();
    assert_eq!(fx.arena.head(CORE0), None);
    assert_eq!(fx.arena.queue_len(CORE0), 0);
}
