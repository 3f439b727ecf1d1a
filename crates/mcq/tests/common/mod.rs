//! Shared rig for the integration tests: a device on simulated hardware.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{LevelFilter, Log, Metadata, Record};
use mcq::trace::{TraceHook, TraceResult};
use mcq::{
    BufferId, Completion, CoreMask, Device, DeviceConfig, DeviceConfigBuilder, Instr, ModuleClass,
    Priority, ReserveRequest, Session, WaitTarget,
};
use mcq_sim::SimHardware;
use once_cell::sync::Lazy;

pub const WAIT: Duration = Duration::from_millis(200);

struct StderrLogger;

static STDERR: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("[{:5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<()> = Lazy::new(|| {
    let level = match std::env::var("MCQ_TEST_LOG").as_deref() {
        Ok("trace") => LevelFilter::Trace,
        Ok("debug") => LevelFilter::Debug,
        Ok(_) => LevelFilter::Info,
        Err(_) => LevelFilter::Off,
    };
    if log::set_logger(&STDERR).is_ok() {
        log::set_max_level(level);
    }
});

/// Small device: 8 slots, short buffers, quick aborts.
pub fn config(cores: usize) -> DeviceConfigBuilder {
    DeviceConfig::builder()
        .slots(8)
        .buffer_words(64, 16)
        .cores(ModuleClass::DECODER, cores)
        .abort_timeout(Duration::from_millis(20))
}

pub fn rig(config: DeviceConfig) -> (SimHardware, Device) {
    Lazy::force(&LOGGER);
    let hw = SimHardware::new(config.cores.len());
    let device = Device::init(config, &hw).unwrap();
    (hw, device)
}

/// Like [`rig`], with every trace record id collected.
pub fn traced_rig(config: DeviceConfig) -> (SimHardware, Device, Arc<Mutex<Vec<u8>>>) {
    Lazy::force(&LOGGER);
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let hook: TraceHook = Arc::new(
        move |record: u8, _payload: &[u8], _stamp: bool| -> TraceResult {
            sink.lock().unwrap().push(record);
            Ok(())
        },
    );
    let hw = SimHardware::new(config.cores.len());
    let device = Device::builder(config)
        .with_trace_hook(hook)
        .build(&hw)
        .unwrap();
    (hw, device, records)
}

pub fn normal() -> ReserveRequest {
    ReserveRequest::new(ModuleClass::DECODER, Priority::Normal, 4)
}

pub fn high() -> ReserveRequest {
    ReserveRequest::new(ModuleClass::DECODER, Priority::High, 4)
}

pub fn payload() -> Vec<Instr> {
    vec![Instr::RegWrite { reg: 2, value: 0x40 }, Instr::Nop]
}

/// Reserves, fills and submits one buffer.
pub fn submit(session: &Session, req: &ReserveRequest, mask: CoreMask) -> BufferId {
    submit_with(session, req, &payload(), mask)
}

pub fn submit_with(
    session: &Session,
    req: &ReserveRequest,
    commands: &[Instr],
    mask: CoreMask,
) -> BufferId {
    let id = session.try_reserve(req).unwrap();
    session.write_commands(id, commands).unwrap();
    session.submit(id, mask).unwrap();
    id
}

pub fn wait_for(session: &Session, id: BufferId) -> Completion {
    session.wait(WaitTarget::Buffer(id), WAIT).unwrap()
}

/// Ticks until `done` holds, at most `limit` times. Returns the ticks used.
pub fn tick_until(device: &Device, limit: usize, done: impl Fn() -> bool) -> usize {
    for ticks in 0..limit {
        if done() {
            return ticks;
        }
        device.tick();
    }
    assert!(done(), "condition not reached within {limit} ticks");
    limit
}
