//! Cartridge header inspection.
//!
//! Every mapping mode places a 32-byte header at the top of its first bank,
//! which the console sees at bus `$00:FFC0`. In the linear view the header
//! sits at a mode-specific ROM offset. Detection reads the candidate
//! locations and scores each against the mode it would imply; the best
//! non-zero score wins.

use crate::MappingMode;

/// Length of the header area a driver should read for scoring.
pub const HEADER_LEN: usize = 0x40;

/// Bus address of the active cartridge header, whatever the mapping.
pub const BUS_HEADER_ADDR: u32 = 0x00_FFC0;

/// Linear ROM offset of the header for each detectable mapping mode.
pub fn linear_header_addr(mode: MappingMode) -> Option<u32> {
    match mode {
        MappingMode::LoRom | MappingMode::Sa1 => Some(0x00_7FC0),
        MappingMode::HiRom => Some(0x00_FFC0),
        MappingMode::ExHiRom => Some(0x40_FFC0),
        MappingMode::Unknown => None,
    }
}

// Header field offsets, relative to the start of the 0x40-byte area.
const TITLE: core::ops::Range<usize> = 0x00..0x15;
const MAP_MODE: usize = 0x15;
const COMPLEMENT: usize = 0x1C;
const CHECKSUM: usize = 0x1E;

// Map-mode byte with the speed bit masked off.
fn expected_map_byte(mode: MappingMode) -> Option<u8> {
    match mode {
        MappingMode::LoRom => Some(0x20),
        MappingMode::HiRom => Some(0x21),
        MappingMode::Sa1 => Some(0x23),
        MappingMode::ExHiRom => Some(0x25),
        MappingMode::Unknown => None,
    }
}

/// Score how plausible `header` is as the cartridge header of a `mode` image.
///
/// Zero means "not a header at all"; anything above is a relative confidence.
pub fn score_header(header: &[u8], mode: MappingMode) -> u32 {
    if header.len() < 0x20 {
        return 0;
    }

    let mut score = 0u32;

    let checksum = u16::from_le_bytes([header[CHECKSUM], header[CHECKSUM + 1]]);
    let complement = u16::from_le_bytes([header[COMPLEMENT], header[COMPLEMENT + 1]]);
    if checksum ^ complement == 0xFFFF {
        score += 8;
    }

    score += header[TITLE]
        .iter()
        .filter(|b| (0x20..0x7F).contains(*b))
        .count() as u32;

    if let Some(expected) = expected_map_byte(mode) {
        if header[MAP_MODE] & 0xEF == expected {
            score += 4;
        }
    }

    score
}

/// Pick the best-scoring mode among `(mode, header bytes)` candidates.
pub fn detect_from_candidates<'a>(
    candidates: impl IntoIterator<Item = (MappingMode, &'a [u8])>,
) -> Option<MappingMode> {
    candidates
        .into_iter()
        .map(|(mode, header)| (score_header(header, mode), mode))
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, mode)| mode)
}

/// Detect the mapping mode from the single header the console exposes at
/// [`BUS_HEADER_ADDR`].
pub fn detect_from_bus_header(header: &[u8]) -> Option<MappingMode> {
    detect_from_candidates(
        [
            MappingMode::LoRom,
            MappingMode::HiRom,
            MappingMode::ExHiRom,
            MappingMode::Sa1,
        ]
        .into_iter()
        .map(|mode| (mode, header)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_header(map_byte: u8) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[TITLE].copy_from_slice(b"SNEX TEST CARTRIDGE  ");
        header[MAP_MODE] = map_byte;
        let checksum = 0x1234u16;
        header[COMPLEMENT..COMPLEMENT + 2].copy_from_slice(&(!checksum).to_le_bytes());
        header[CHECKSUM..CHECKSUM + 2].copy_from_slice(&checksum.to_le_bytes());
        header
    }

    #[test]
    fn scores_each_mode_from_its_map_byte() {
        for (map_byte, mode) in [
            (0x20, MappingMode::LoRom),
            (0x21, MappingMode::HiRom),
            (0x23, MappingMode::Sa1),
            (0x25, MappingMode::ExHiRom),
            // FastROM variants set the speed bit.
            (0x30, MappingMode::LoRom),
            (0x31, MappingMode::HiRom),
        ] {
            let header = synth_header(map_byte);
            assert_eq!(
                detect_from_bus_header(&header),
                Some(mode),
                "map byte {map_byte:#04x}"
            );
        }
    }

    #[test]
    fn garbage_scores_zero() {
        let junk = [0xFFu8; HEADER_LEN];
        for mode in [MappingMode::LoRom, MappingMode::HiRom] {
            assert_eq!(score_header(&junk, mode), 0);
        }
        assert_eq!(detect_from_bus_header(&junk), None);
    }

    #[test]
    fn short_reads_score_zero() {
        assert_eq!(score_header(&[0u8; 4], MappingMode::LoRom), 0);
    }
}
