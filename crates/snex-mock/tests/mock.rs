use std::sync::Arc;

use snex_core::memory::Deadline;
use snex_core::{
    AddressSpace, DeviceError, DeviceRegistry, DeviceUri, DriverRegistry, MappingMode,
    MemoryReadRequest, MemoryWriteRequest,
};
use snex_mock::MockDriver;

fn registry() -> DeviceRegistry {
    let drivers = Arc::new(DriverRegistry::new());
    drivers.register(Arc::new(MockDriver::new())).unwrap();
    drivers.seal();
    DeviceRegistry::new(drivers)
}

#[tokio::test]
async fn wram_written_via_bus_reads_back_linearly() {
    let registry = registry();
    let uri = DeviceUri::parse("mock://0").unwrap();

    registry
        .single_write(
            &uri,
            MappingMode::LoRom,
            MemoryWriteRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x7E_0010,
                data: vec![1, 2, 3, 4],
            },
            Deadline::NONE,
        )
        .await
        .unwrap();

    // Same bytes through the linear view: both addresses resolve to the one
    // WRAM region of the image.
    let response = registry
        .single_read(
            &uri,
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::FxPakPro,
                request_address: 0xF5_0010,
                size: 4,
            },
            Deadline::NONE,
        )
        .await
        .unwrap();
    assert_eq!(response.data, vec![1, 2, 3, 4]);
    assert_eq!(response.device_address, 0xF5_0010);
}

#[tokio::test]
async fn lorom_bus_rom_addresses_land_in_linear_rom() {
    let registry = registry();
    let uri = DeviceUri::parse("mock://0").unwrap();

    registry
        .single_write(
            &uri,
            MappingMode::LoRom,
            MemoryWriteRequest {
                request_space: AddressSpace::FxPakPro,
                request_address: 0x00_0000,
                data: vec![0xCA, 0xFE],
            },
            Deadline::NONE,
        )
        .await
        .unwrap();

    let response = registry
        .single_read(
            &uri,
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x80_8000,
                size: 2,
            },
            Deadline::NONE,
        )
        .await
        .unwrap();
    assert_eq!(response.data, vec![0xCA, 0xFE]);
    assert_eq!(response.device_address, 0x00_0000);
}

#[tokio::test]
async fn reset_zeroes_the_image() {
    let registry = registry();
    let uri = DeviceUri::parse("mock://0").unwrap();

    registry
        .single_write(
            &uri,
            MappingMode::LoRom,
            MemoryWriteRequest {
                request_space: AddressSpace::FxPakPro,
                request_address: 0xF5_0000,
                data: vec![0xFF; 8],
            },
            Deadline::NONE,
        )
        .await
        .unwrap();

    registry.reset(&uri, Deadline::NONE).await.unwrap();

    let response = registry
        .single_read(
            &uri,
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::FxPakPro,
                request_address: 0xF5_0000,
                size: 8,
            },
            Deadline::NONE,
        )
        .await
        .unwrap();
    assert_eq!(response.data, vec![0; 8]);
}

#[tokio::test]
async fn slots_are_independent_devices() {
    let registry = registry();
    let zero = DeviceUri::parse("mock://0").unwrap();
    let one = DeviceUri::parse("mock://1").unwrap();

    registry
        .single_write(
            &zero,
            MappingMode::LoRom,
            MemoryWriteRequest {
                request_space: AddressSpace::FxPakPro,
                request_address: 0,
                data: vec![0x42],
            },
            Deadline::NONE,
        )
        .await
        .unwrap();

    let other = registry
        .single_read(
            &one,
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::FxPakPro,
                request_address: 0,
                size: 1,
            },
            Deadline::NONE,
        )
        .await
        .unwrap();
    assert_eq!(other.data, vec![0]);
}

#[tokio::test]
async fn pause_is_unavailable() {
    let registry = registry();
    let uri = DeviceUri::parse("mock://0").unwrap();
    assert!(matches!(
        registry.pause_toggle(&uri, Deadline::NONE).await,
        Err(DeviceError::CapabilityUnavailable(_))
    ));
}

#[tokio::test]
async fn non_numeric_slot_is_rejected() {
    let registry = registry();
    let uri = DeviceUri::parse("mock://zero").unwrap();
    assert!(matches!(
        registry.open_or_reuse(&uri).await,
        Err(DeviceError::InvalidUri { .. })
    ));
}
