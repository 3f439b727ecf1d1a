use std::time::Duration;

use mcq::{CoreMask, Device, DeviceConfig, Instr, ModuleClass, Priority, ReserveRequest, WaitTarget};
use mcq_sim::{SimHardware, SimRuntime};

#[test]
fn threaded_runtime_completes_submitted_work() {
    let hw = SimHardware::new(2);
    let config = DeviceConfig::builder().slots(8).build();
    let device = Device::init(config, &hw).unwrap();
    let mut runtime = SimRuntime::start(device.clone(), hw.clone(), Duration::from_millis(5));

    let session = device.open_session().unwrap();
    let req = ReserveRequest::new(ModuleClass::DECODER, Priority::Normal, 2);
    let mut ids = Vec::new();
    for _ in 0..6 {
        let id = session.reserve(&req, Duration::from_secs(1)).unwrap();
        session
            .write_commands(id, &[Instr::RegWrite { reg: 3, value: 9 }, Instr::Nop])
            .unwrap();
        session.submit(id, CoreMask::ALL).unwrap();
        ids.push(id);
    }

    for id in &ids {
        let done = session
            .wait(WaitTarget::Buffer(*id), Duration::from_secs(5))
            .unwrap();
        assert!(done.tag.is_ok());
        session.release(*id).unwrap();
    }

    runtime.stop();
    assert!(!runtime.is_running());
    assert_eq!(device.pool_stats().free, 8);
    device.shutdown();
}
