#![forbid(unsafe_code)]

//! SNES address-space translation.
//!
//! The console exposes three views of memory: the 24-bit CPU bus
//! (`SnesABus`), the flat linear view used by cartridge-interface hardware
//! (`FxPakPro`), and an untranslated passthrough (`Raw`). Translation between
//! the bus and the linear view depends on how the cartridge projects ROM into
//! the bus, which is what [`MappingMode`] captures.
//!
//! [`translate`] is pure and total: it either yields a translated address or
//! fails with [`AddressOutOfRange`]. It never truncates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod header;
pub mod regions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpace {
    /// Flat linear device view (ROM, SRAM, WRAM, … at fixed offsets).
    FxPakPro,
    /// The console CPU's 24-bit bank:offset view.
    SnesABus,
    /// No translation; addresses pass through untouched.
    Raw,
}

impl core::fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            AddressSpace::FxPakPro => "fxpakpro",
            AddressSpace::SnesABus => "snesabus",
            AddressSpace::Raw => "raw",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    #[default]
    Unknown,
    LoRom,
    HiRom,
    ExHiRom,
    Sa1,
}

impl MappingMode {
    pub fn is_unknown(self) -> bool {
        matches!(self, MappingMode::Unknown)
    }
}

impl core::fmt::Display for MappingMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            MappingMode::Unknown => "unknown",
            MappingMode::LoRom => "lorom",
            MappingMode::HiRom => "hirom",
            MappingMode::ExHiRom => "exhirom",
            MappingMode::Sa1 => "sa1",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("address {address:#08x} in {space} has no {target} equivalent under {mode} mapping")]
pub struct AddressOutOfRange {
    pub address: u32,
    pub space: AddressSpace,
    pub target: AddressSpace,
    pub mode: MappingMode,
}

/// Translate `address` from `from` to `to` under `mode`.
///
/// `Raw` on either side, or `from == to`, is the identity. Mapping mode only
/// affects the ROM and SRAM projections; WRAM and the fixed linear regions
/// translate the same way under every mode.
pub fn translate(
    address: u32,
    from: AddressSpace,
    mode: MappingMode,
    to: AddressSpace,
) -> Result<u32, AddressOutOfRange> {
    if from == to || from == AddressSpace::Raw || to == AddressSpace::Raw {
        return Ok(address);
    }

    let fail = AddressOutOfRange {
        address,
        space: from,
        target: to,
        mode,
    };

    match (from, to) {
        (AddressSpace::SnesABus, AddressSpace::FxPakPro) => {
            bus_to_linear(address, mode).ok_or(fail)
        }
        (AddressSpace::FxPakPro, AddressSpace::SnesABus) => {
            linear_to_bus(address, mode).ok_or(fail)
        }
        _ => unreachable!("identity cases handled above"),
    }
}

fn bus_to_linear(address: u32, mode: MappingMode) -> Option<u32> {
    if address > 0xFF_FFFF {
        return None;
    }
    let bank = (address >> 16) as u8;
    let offset = address & 0xFFFF;

    // WRAM proper, then its low mirror in the system banks. These hold under
    // every mapping mode.
    if let 0x7E..=0x7F = bank {
        return Some(regions::WRAM.start + (address - 0x7E_0000));
    }
    let system_bank = matches!(bank, 0x00..=0x3F | 0x80..=0xBF);
    if system_bank && offset < 0x2000 {
        return Some(regions::WRAM.start + offset);
    }

    match mode {
        MappingMode::Unknown => None,
        MappingMode::LoRom => {
            let half_bank = bank & 0x7F;
            if (0x70..=0x7D).contains(&half_bank) && offset < 0x8000 {
                let sram = ((u32::from(bank) & 0x0F) << 15) | offset;
                return Some(regions::SRAM.start + sram);
            }
            // Banks 7E/7F were consumed by WRAM above; every remaining bank
            // projects ROM into its upper half.
            if offset >= 0x8000 {
                return Some(((u32::from(bank) & 0x7F) << 15) | (offset & 0x7FFF));
            }
            None
        }
        MappingMode::HiRom => {
            if system_bank && (0x6000..0x8000).contains(&offset) && (bank & 0x3F) >= 0x20 {
                let sram = ((u32::from(bank) & 0x1F) << 13) | (offset - 0x6000);
                return Some(regions::SRAM.start + sram);
            }
            if matches!(bank, 0x40..=0x7D | 0xC0..=0xFF) || (system_bank && offset >= 0x8000) {
                return Some(((u32::from(bank) & 0x3F) << 16) | offset);
            }
            None
        }
        MappingMode::ExHiRom => {
            if system_bank && (0x6000..0x8000).contains(&offset) && (bank & 0x3F) >= 0x20 {
                let sram = ((u32::from(bank) & 0x1F) << 13) | (offset - 0x6000);
                return Some(regions::SRAM.start + sram);
            }
            let low = ((u32::from(bank) & 0x3F) << 16) | offset;
            match bank {
                // Banks C0-FF carry the first 4 MiB; 40-7D carry the rest.
                0xC0..=0xFF => Some(low),
                0x40..=0x7D => Some(0x40_0000 | low),
                0x80..=0xBF if offset >= 0x8000 => Some(low),
                0x00..=0x3F if offset >= 0x8000 => Some(0x40_0000 | low),
                _ => None,
            }
        }
        MappingMode::Sa1 => {
            // MMC bank registers at reset: CXB=0, DXB=1, EXB=2, FXB=3.
            if let 0x40..=0x43 = bank {
                let bwram = ((u32::from(bank) & 0x03) << 16) | offset;
                return Some(regions::SRAM.start + bwram);
            }
            if bank >= 0xC0 {
                let block = u32::from((bank >> 4) & 0x03);
                return Some(block * 0x10_0000 + (((u32::from(bank) & 0x0F) << 16) | offset));
            }
            if system_bank && offset >= 0x8000 {
                let block = match bank {
                    0x00..=0x1F => 0,
                    0x20..=0x3F => 1,
                    0x80..=0x9F => 2,
                    _ => 3,
                };
                let in_block = ((u32::from(bank) & 0x1F) << 15) | (offset & 0x7FFF);
                return Some(block * 0x10_0000 + in_block);
            }
            None
        }
    }
}

fn linear_to_bus(address: u32, mode: MappingMode) -> Option<u32> {
    if regions::WRAM.contains(&address) {
        return Some(0x7E_0000 + (address - regions::WRAM.start));
    }

    if regions::SRAM.contains(&address) {
        let rel = address - regions::SRAM.start;
        return match mode {
            MappingMode::LoRom => {
                // Fourteen 32 KiB pages in banks 70-7D.
                (rel < 0xE << 15).then(|| ((0x70 + (rel >> 15)) << 16) | (rel & 0x7FFF))
            }
            MappingMode::HiRom | MappingMode::ExHiRom => {
                (rel < 0x20 << 13).then(|| ((0xA0 + (rel >> 13)) << 16) | (0x6000 + (rel & 0x1FFF)))
            }
            MappingMode::Sa1 => {
                (rel < 0x4_0000).then(|| ((0x40 + (rel >> 16)) << 16) | (rel & 0xFFFF))
            }
            MappingMode::Unknown => None,
        };
    }

    if regions::ROM.contains(&address) {
        return match mode {
            MappingMode::LoRom => (address < 0x40_0000)
                .then(|| ((0x80 + (address >> 15)) << 16) | 0x8000 | (address & 0x7FFF)),
            MappingMode::HiRom | MappingMode::Sa1 => {
                (address < 0x40_0000).then(|| ((0xC0 + (address >> 16)) << 16) | (address & 0xFFFF))
            }
            MappingMode::ExHiRom => {
                if address < 0x40_0000 {
                    Some(((0xC0 + (address >> 16)) << 16) | (address & 0xFFFF))
                } else if address < 0x7E_0000 {
                    let rel = address - 0x40_0000;
                    Some(((0x40 + (rel >> 16)) << 16) | (rel & 0xFFFF))
                } else if address < 0x80_0000 && (address & 0xFFFF) >= 0x8000 {
                    // The last two banks of the high half only surface in the
                    // upper halves of system banks 3E-3F.
                    let rel = address - 0x40_0000;
                    Some(((rel >> 16) << 16) | (address & 0xFFFF))
                } else {
                    None
                }
            }
            MappingMode::Unknown => None,
        };
    }

    // VRAM, APURAM, CGRAM, OAM, MSU and the command window have no A-bus
    // window; they exist only in the linear view.
    None
}
