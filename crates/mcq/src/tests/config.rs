use crate::config::{CoreConfig, DeviceConfig};
use crate::error::CqError;
use crate::memory::PoolLayout;
use crate::types::ModuleClass;

#[test]
fn defaults_are_valid() {
    let config = DeviceConfig::default();
    config.validate().unwrap();
    assert_eq!(config.cores.len(), 2);
    assert_eq!(config.payload_capacity(), 128 - 3);
}

#[test]
fn first_core_replaces_default_roster() {
    let config = DeviceConfig::builder()
        .core(CoreConfig::new(ModuleClass::ENCODER).with_static_config(0x55))
        .cores(ModuleClass::DECODER, 2)
        .build();
    assert_eq!(config.cores.len(), 3);
    assert_eq!(config.cores[0].class, ModuleClass::ENCODER);
    assert_eq!(config.cores[0].static_config, 0x55);
    assert_eq!(config.cores[2].class, ModuleClass::DECODER);
}

#[test]
fn rejects_status_buffer_too_small_for_dump() {
    let config = DeviceConfig::builder().buffer_words(64, 4).build();
    assert!(matches!(config.validate(), Err(CqError::Config(_))));
}

#[test]
fn rejects_region_beyond_bus_reach() {
    let config = DeviceConfig::builder()
        .dma_base(0xffff_0000)
        .slots(64)
        .build();
    assert!(matches!(config.validate(), Err(CqError::Config(_))));
}

#[test]
fn rejects_empty_pool_and_zero_periods() {
    assert!(DeviceConfig::builder().slots(0).build().validate().is_err());
    assert!(DeviceConfig::builder()
        .slice_timeout_ticks(0)
        .build()
        .validate()
        .is_err());
}

#[test]
fn layout_maps_addresses_back_to_slots() {
    let config = DeviceConfig::builder().slots(4).buffer_words(32, 16).build();
    let layout = PoolLayout::new(&config);
    assert_eq!(layout.cmd_addr(0), config.dma_base);
    assert_eq!(layout.cmd_addr(2), config.dma_base + 2 * 32 * 4);
    assert_eq!(layout.status_addr(0), config.dma_base + 4 * 32 * 4);
    assert_eq!(layout.slot_at(layout.cmd_addr(3)), Some(3));
    assert_eq!(layout.slot_at(layout.cmd_addr(3) + 8), None);
    assert_eq!(layout.slot_at(layout.status_addr(0)), None);
    assert_eq!(layout.total_words(), config.region_words());
}
