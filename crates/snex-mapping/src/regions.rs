//! Fixed regions of the FX Pak Pro linear address space.

use core::ops::Range;

pub const ROM: Range<u32> = 0x00_0000..0xE0_0000;
pub const SRAM: Range<u32> = 0xE0_0000..0xF0_0000;
pub const MSU: Range<u32> = 0xF0_0000..0xF5_0000;
pub const WRAM: Range<u32> = 0xF5_0000..0xF7_0000;
pub const VRAM: Range<u32> = 0xF7_0000..0xF9_0000;
pub const APURAM: Range<u32> = 0xF9_0000..0xFA_0000;
pub const CGRAM: Range<u32> = 0xFA_0000..0xFA_0200;
pub const OAM: Range<u32> = 0xFA_0200..0xFA_0420;
pub const CMD: Range<u32> = 0xFB_0000..0xFC_0000;
