//! FX Pak Pro USB command framing.
//!
//! Every command is a 512-byte block starting with `USBA`, an opcode, a
//! space selector and flags. Vectored memory ops (VGET/VPUT) carry up to
//! eight `(size u8, addr u24be)` tuples at offset 32 and move their data
//! phase in 64-byte frames.

pub const CMD_LEN: usize = 512;
pub const BLOCK_LEN: usize = 64;

/// Offset of the first VGET/VPUT tuple inside the command block.
pub const TUPLE_OFFSET: usize = 32;
pub const MAX_TUPLES: usize = 8;
/// The tuple size field is a single byte.
pub const MAX_TUPLE_LEN: u32 = 255;

pub mod opcode {
    pub const VGET: u8 = 0x02;
    pub const VPUT: u8 = 0x03;
    pub const RESET: u8 = 0x08;
    pub const BOOT: u8 = 0x09;
    pub const INFO: u8 = 0x0B;
    pub const MENU_RESET: u8 = 0x0C;
}

pub mod space {
    pub const FILE: u8 = 0x00;
    pub const SNES: u8 = 0x01;
    pub const MSU: u8 = 0x02;
    pub const CMD: u8 = 0x03;
}

pub mod flags {
    pub const NONE: u8 = 0x00;
    pub const NORESP: u8 = 0x40;
    pub const DATA64B: u8 = 0x80;
}

fn header(op: u8, sp: u8, fl: u8) -> [u8; CMD_LEN] {
    let mut cmd = [0u8; CMD_LEN];
    cmd[..4].copy_from_slice(b"USBA");
    cmd[4] = op;
    cmd[5] = sp;
    cmd[6] = fl;
    cmd
}

fn with_tuples(mut cmd: [u8; CMD_LEN], tuples: &[(u32, u8)]) -> [u8; CMD_LEN] {
    assert!(tuples.len() <= MAX_TUPLES, "too many tuples per command");
    for (i, (addr, size)) in tuples.iter().enumerate() {
        let at = TUPLE_OFFSET + i * 4;
        cmd[at] = *size;
        cmd[at + 1] = ((addr >> 16) & 0xFF) as u8;
        cmd[at + 2] = ((addr >> 8) & 0xFF) as u8;
        cmd[at + 3] = (addr & 0xFF) as u8;
    }
    cmd
}

/// A vectored read of up to eight `(addr, size)` tuples.
pub fn vget(tuples: &[(u32, u8)]) -> [u8; CMD_LEN] {
    with_tuples(
        header(opcode::VGET, space::SNES, flags::DATA64B | flags::NORESP),
        tuples,
    )
}

/// A vectored write of up to eight `(addr, size)` tuples; the data phase
/// follows in 64-byte frames.
pub fn vput(tuples: &[(u32, u8)]) -> [u8; CMD_LEN] {
    with_tuples(
        header(opcode::VPUT, space::SNES, flags::DATA64B | flags::NORESP),
        tuples,
    )
}

/// A bare control command (RESET, BOOT, MENU_RESET, INFO).
pub fn control(op: u8) -> [u8; CMD_LEN] {
    header(op, space::SNES, flags::NORESP)
}

/// Data phases travel in whole 64-byte frames.
pub fn padded_len(total: usize) -> usize {
    total.div_ceil(BLOCK_LEN) * BLOCK_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vget_layout() {
        let cmd = vget(&[(0xF5_0010, 0x10), (0x00_FFC0, 0x40)]);
        assert_eq!(&cmd[..4], b"USBA");
        assert_eq!(cmd[4], opcode::VGET);
        assert_eq!(cmd[5], space::SNES);
        assert_eq!(cmd[6], flags::DATA64B | flags::NORESP);
        assert_eq!(&cmd[32..36], &[0x10, 0xF5, 0x00, 0x10]);
        assert_eq!(&cmd[36..40], &[0x40, 0x00, 0xFF, 0xC0]);
        // Unused tuples stay zero.
        assert!(cmd[40..64].iter().all(|b| *b == 0));
    }

    #[test]
    fn padding_rounds_up_to_frames() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 64);
        assert_eq!(padded_len(64), 64);
        assert_eq!(padded_len(65), 128);
        assert_eq!(padded_len(2040), 2048);
    }

    #[test]
    #[should_panic(expected = "too many tuples")]
    fn more_than_eight_tuples_is_a_bug() {
        let tuples = [(0u32, 1u8); 9];
        let _ = vget(&tuples);
    }
}
