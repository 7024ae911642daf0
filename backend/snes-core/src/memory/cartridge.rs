//! Cartridge loading and ROM address mapping.

use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use crc::Crc;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use thiserror::Error;
use yaze_common::video::TimingMode;

pub(crate) const CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

const LOROM_HEADER_ADDR: usize = 0x007FC0;
const HIROM_HEADER_ADDR: usize = 0x00FFC0;
const EXHIROM_HEADER_ADDR: usize = 0x40FFC0;

const HEADER_MAP_OFFSET: usize = 0x15;
const HEADER_SRAM_OFFSET: usize = 0x18;
const HEADER_REGION_OFFSET: usize = 0x19;

const LOROM_RESET_VECTOR: usize = 0x7FFC;
const HIROM_RESET_VECTOR: usize = 0xFFFC;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("ROM too small to contain a header: {0} bytes")]
    RomTooSmall(usize),
    #[error("header bytes do not identify a LoROM/HiROM/ExHiROM mapping")]
    InvalidRomMapping,
}

/// ROM bytes wrapped so that save states skip them: a state encodes no ROM
/// contents and decodes to an empty image that the caller re-attaches.
#[derive(Debug, Clone, Default)]
pub struct Rom(pub Box<[u8]>);

impl Deref for Rom {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Encode for Rom {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        _encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        Ok(())
    }
}

impl<Context> Decode<Context> for Rom {
    fn decode<D: Decoder<Context = Context>>(_decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Self::default())
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for Rom {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        _decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Ok(Self::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CartridgeType {
    LoRom,
    HiRom,
    ExHiRom,
}

impl Display for CartridgeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoRom => write!(f, "LoROM"),
            Self::HiRom => write!(f, "HiROM"),
            Self::ExHiRom => write!(f, "ExHiROM"),
        }
    }
}

/// Mirroring mask for ROM reads. Non-power-of-two images mirror the tail
/// within the next power of two below the remainder.
#[derive(Debug, Clone, Copy, Encode, Decode)]
pub enum RomAddressMask {
    PowerOfTwo { mask: u32 },
    NonPowerOfTwo { primary_mask: u32, secondary_mask: u32 },
}

impl RomAddressMask {
    fn from_rom_len(rom_len: u32) -> Self {
        if rom_len.count_ones() == 1 {
            return Self::PowerOfTwo { mask: rom_len - 1 };
        }

        let primary_mask = 1 << rom_len.ilog2();
        let secondary_log2 = (rom_len & !primary_mask).ilog2();
        let secondary_mask = (1 << secondary_log2) - 1;
        Self::NonPowerOfTwo { primary_mask, secondary_mask }
    }

    fn mask(self, rom_addr: u32) -> u32 {
        match self {
            Self::PowerOfTwo { mask } => rom_addr & mask,
            Self::NonPowerOfTwo { primary_mask, secondary_mask } => {
                if rom_addr & primary_mask == 0 {
                    rom_addr & (primary_mask - 1)
                } else {
                    primary_mask | (rom_addr & secondary_mask)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Cartridge {
    rom: Rom,
    sram: Box<[u8]>,
    mapping: CartridgeType,
    mask: RomAddressMask,
    checksum: u32,
    timing_mode: TimingMode,
}

impl Cartridge {
    pub fn create(rom: Box<[u8]>) -> Result<Self, CartridgeError> {
        // Older ROM images carry a 512-byte copier header; strip it
        if rom.len() & 0x7FFF == 0x0200 {
            let stripped = rom[0x200..].to_vec().into_boxed_slice();
            return Self::create(stripped);
        }

        let mapping = guess_cartridge_type(&rom)?;

        let header_addr = match mapping {
            CartridgeType::LoRom => LOROM_HEADER_ADDR,
            CartridgeType::HiRom => HIROM_HEADER_ADDR,
            CartridgeType::ExHiRom => EXHIROM_HEADER_ADDR,
        };

        let timing_mode = region_to_timing_mode(rom[header_addr + HEADER_REGION_OFFSET]);

        // SRAM size byte is a kilobytes power of two
        let sram_header_byte = rom[header_addr + HEADER_SRAM_OFFSET];
        let sram_len = if sram_header_byte == 0 { 0 } else { 1 << (10 + sram_header_byte) };
        let sram = vec![0; sram_len].into_boxed_slice();

        let mask = RomAddressMask::from_rom_len(rom.len() as u32);
        let checksum = CRC.checksum(&rom);

        log::info!(
            "Loaded {mapping} image: {} bytes, CRC32 {checksum:08X}, {} bytes SRAM, {timing_mode}",
            rom.len(),
            sram_len
        );

        Ok(Self { rom: Rom(rom), sram, mapping, mask, checksum, timing_mode })
    }

    pub fn read(&self, address: u32) -> Option<u8> {
        let mapped = match self.mapping {
            CartridgeType::LoRom => lorom_map_address(address, self.mask, self.sram.len() as u32),
            CartridgeType::HiRom | CartridgeType::ExHiRom => {
                hirom_map_address(address, self.mask, self.sram.len() as u32)
            }
        };

        match mapped {
            CartridgeAddress::Rom(rom_addr) => self.rom.get(rom_addr as usize).copied(),
            CartridgeAddress::Sram(sram_addr) => self.sram.get(sram_addr as usize).copied(),
            CartridgeAddress::None => None,
        }
    }

    pub fn write(&mut self, address: u32, value: u8) {
        let mapped = match self.mapping {
            CartridgeType::LoRom => lorom_map_address(address, self.mask, self.sram.len() as u32),
            CartridgeType::HiRom | CartridgeType::ExHiRom => {
                hirom_map_address(address, self.mask, self.sram.len() as u32)
            }
        };

        if let CartridgeAddress::Sram(sram_addr) = mapped {
            if let Some(slot) = self.sram.get_mut(sram_addr as usize) {
                *slot = value;
            }
        }
    }

    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    #[must_use]
    pub fn timing_mode(&self) -> TimingMode {
        self.timing_mode
    }

    #[must_use]
    pub fn mapping(&self) -> CartridgeType {
        self.mapping
    }

    #[must_use]
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn take_rom(&mut self) -> Box<[u8]> {
        std::mem::take(&mut self.rom.0)
    }

    pub fn set_rom(&mut self, rom: Box<[u8]>) {
        self.rom = Rom(rom);
    }

    /// Header name field, for logs and state descriptions.
    #[must_use]
    pub fn title(&self) -> String {
        let header_addr = match self.mapping {
            CartridgeType::LoRom => LOROM_HEADER_ADDR,
            CartridgeType::HiRom => HIROM_HEADER_ADDR,
            CartridgeType::ExHiRom => EXHIROM_HEADER_ADDR,
        };
        self.rom[header_addr..header_addr + 21]
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { ' ' })
            .collect::<String>()
            .trim()
            .into()
    }
}

fn guess_cartridge_type(rom: &[u8]) -> Result<CartridgeType, CartridgeError> {
    if rom.len() < 0x8000 {
        return Err(CartridgeError::RomTooSmall(rom.len()));
    }

    if rom.len() < 0x10000 {
        // A HiROM image under 64KB could not hold the interrupt vectors
        return Ok(CartridgeType::LoRom);
    }

    if rom.len() >= 0x410000 {
        // $25/$35 are ExHiROM with and without FastROM
        let map_byte = rom[EXHIROM_HEADER_ADDR + HEADER_MAP_OFFSET];
        if map_byte == 0x25 || map_byte == 0x35 {
            return Ok(CartridgeType::ExHiRom);
        }
    }

    let mut lorom_points = 0;
    let mut hirom_points = 0;

    let lorom_map_byte = rom[LOROM_HEADER_ADDR + HEADER_MAP_OFFSET];
    if lorom_map_byte == 0x20 || lorom_map_byte == 0x30 {
        lorom_points += 1;
    }

    let hirom_map_byte = rom[HIROM_HEADER_ADDR + HEADER_MAP_OFFSET];
    if hirom_map_byte == 0x21 || hirom_map_byte == 0x31 {
        hirom_points += 1;
    }

    let lorom_vector = u16::from_le_bytes([rom[LOROM_RESET_VECTOR], rom[LOROM_RESET_VECTOR + 1]]);
    if lorom_vector >= 0x8000 && seems_like_valid_reset_vector(rom, lorom_vector & 0x7FFF) {
        lorom_points += 1;
    }

    let hirom_vector = u16::from_le_bytes([rom[HIROM_RESET_VECTOR], rom[HIROM_RESET_VECTOR + 1]]);
    if seems_like_valid_reset_vector(rom, hirom_vector) {
        hirom_points += 1;
    }

    match lorom_points.cmp(&hirom_points) {
        Ordering::Less => Ok(CartridgeType::HiRom),
        Ordering::Greater => Ok(CartridgeType::LoRom),
        Ordering::Equal => Err(CartridgeError::InvalidRomMapping),
    }
}

const CLC_OPCODE: u8 = 0x18;
const SEI_OPCODE: u8 = 0x78;

fn seems_like_valid_reset_vector(rom: &[u8], vector: u16) -> bool {
    // Nearly every game starts its reset handler with SEI or CLC
    let vector = vector as usize;
    vector < rom.len() && (rom[vector] == CLC_OPCODE || rom[vector] == SEI_OPCODE)
}

fn region_to_timing_mode(region_byte: u8) -> TimingMode {
    match region_byte {
        // Japan / USA / South Korea / Canada / Brazil
        0x00 | 0x01 | 0x0D | 0x0F | 0x10 => TimingMode::Ntsc,
        // Europe, Australia, and the remaining Asian regions
        0x02..=0x0C | 0x11 => TimingMode::Pal,
        _ => {
            log::warn!("Unrecognized region byte {region_byte:02X}; defaulting to NTSC");
            TimingMode::Ntsc
        }
    }
}

enum CartridgeAddress {
    None,
    Rom(u32),
    Sram(u32),
}

fn lorom_map_address(address: u32, mask: RomAddressMask, sram_len: u32) -> CartridgeAddress {
    let bank = address >> 16;
    let offset = address & 0xFFFF;
    match (bank, offset) {
        (0x00..=0x3F | 0x80..=0xBF | 0x70..=0x7D | 0xF0..=0xFF, 0x8000..=0xFFFF)
        | (0x40..=0x6F | 0xC0..=0xEF, _) => {
            // A23 and A15 are ignored; A16-22 shift down one
            let rom_addr = ((address & 0x7F0000) >> 1) | (address & 0x007FFF);
            CartridgeAddress::Rom(mask.mask(rom_addr))
        }
        (0x70..=0x7D | 0xF0..=0xFF, 0x0000..=0x7FFF) => {
            if sram_len != 0 {
                CartridgeAddress::Sram(address & (sram_len - 1))
            } else {
                let rom_addr = ((address & 0x7F0000) >> 1) | (address & 0x007FFF);
                CartridgeAddress::Rom(mask.mask(rom_addr))
            }
        }
        _ => CartridgeAddress::None,
    }
}

fn hirom_map_address(address: u32, mask: RomAddressMask, sram_len: u32) -> CartridgeAddress {
    let bank = address >> 16;
    let offset = address & 0xFFFF;
    match (bank, offset) {
        (0x40..=0x7D | 0xC0..=0xFF, _) | (0x00..=0x3F | 0x80..=0xBF, 0x8000..=0xFFFF) => {
            CartridgeAddress::Rom(mask.mask(address & 0x3FFFFF))
        }
        (0x20..=0x3F | 0xA0..=0xBF, 0x6000..=0x7FFF) if sram_len != 0 => {
            let sram_addr = ((bank & 0x1F) << 13) | (offset & 0x1FFF);
            CartridgeAddress::Sram(sram_addr & (sram_len - 1))
        }
        _ => CartridgeAddress::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lorom_image() -> Box<[u8]> {
        let mut rom = vec![0_u8; 0x10000];
        rom[LOROM_HEADER_ADDR + HEADER_MAP_OFFSET] = 0x20;
        rom[LOROM_HEADER_ADDR + HEADER_REGION_OFFSET] = 0x01;
        rom[LOROM_RESET_VECTOR] = 0x00;
        rom[LOROM_RESET_VECTOR + 1] = 0x80;
        rom[0x0000] = SEI_OPCODE;
        rom.into_boxed_slice()
    }

    fn hirom_image() -> Box<[u8]> {
        let mut rom = vec![0_u8; 0x10000];
        rom[HIROM_HEADER_ADDR + HEADER_MAP_OFFSET] = 0x21;
        rom[HIROM_HEADER_ADDR + HEADER_REGION_OFFSET] = 0x00;
        rom[HIROM_RESET_VECTOR] = 0x00;
        rom[HIROM_RESET_VECTOR + 1] = 0x80;
        rom[0x8000] = CLC_OPCODE;
        rom.into_boxed_slice()
    }

    #[test]
    fn detects_lorom_from_header_and_vector() {
        let cartridge = Cartridge::create(lorom_image()).unwrap();
        assert_eq!(cartridge.mapping(), CartridgeType::LoRom);
        assert_eq!(cartridge.timing_mode(), TimingMode::Ntsc);
    }

    #[test]
    fn detects_hirom_from_header_and_vector() {
        let cartridge = Cartridge::create(hirom_image()).unwrap();
        assert_eq!(cartridge.mapping(), CartridgeType::HiRom);
    }

    #[test]
    fn rejects_undecidable_header() {
        let rom = vec![0_u8; 0x10000].into_boxed_slice();
        assert!(matches!(Cartridge::create(rom), Err(CartridgeError::InvalidRomMapping)));
    }

    #[test]
    fn strips_copier_header() {
        let mut rom = vec![0_u8; 0x10200];
        rom[0x200 + LOROM_HEADER_ADDR + HEADER_MAP_OFFSET] = 0x20;
        rom[0x200 + LOROM_RESET_VECTOR] = 0x00;
        rom[0x200 + LOROM_RESET_VECTOR + 1] = 0x80;
        rom[0x200] = SEI_OPCODE;
        let cartridge = Cartridge::create(rom.into_boxed_slice()).unwrap();
        assert_eq!(cartridge.rom().len(), 0x10000);
        assert_eq!(cartridge.rom()[0], SEI_OPCODE);
    }

    #[test]
    fn lorom_bank_mapping() {
        let mut rom = lorom_image().into_vec();
        rom[0x0123] = 0xAB; // bank $00, $8123
        rom[0x8456] = 0xCD; // bank $01, $8456
        let cartridge = Cartridge::create(rom.into_boxed_slice()).unwrap();

        assert_eq!(cartridge.read(0x008123), Some(0xAB));
        assert_eq!(cartridge.read(0x018456), Some(0xCD));
        // Mirrors in the upper banks
        assert_eq!(cartridge.read(0x808123), Some(0xAB));
        // System area is not the cartridge's
        assert!(cartridge.read(0x001000).is_none());
    }

    #[test]
    fn checksum_is_stable_across_loads() {
        let rom = lorom_image();
        let a = Cartridge::create(rom.clone()).unwrap().checksum();
        let b = Cartridge::create(rom).unwrap().checksum();
        assert_eq!(a, b);
    }
}
