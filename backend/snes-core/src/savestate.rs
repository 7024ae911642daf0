//! Versioned save states: a magic-tagged little-endian dump of the whole
//! machine (CPU, WRAM, PPU memories, APU including ARAM and the DSP voice
//! state), plus a small metadata sidecar used for ROM compatibility checks.
//! The ROM image itself is never serialized; loading re-attaches the live
//! cartridge bytes.

use crate::api::Snes;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STATE_MAGIC: [u8; 4] = *b"YZST";
pub const STATE_FORMAT_VERSION: u8 = 1;

/// Metadata format version inside the sidecar.
pub const METADATA_VERSION: u32 = 1;

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file missing: {0}")]
    Missing(PathBuf),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("state encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("state decoding failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("not a state file (bad magic)")]
    BadMagic,
    #[error("unsupported state format version {0}")]
    UnsupportedVersion(u8),
    #[error("state was taken from a different ROM (state CRC {state_crc:08X}, ROM CRC {rom_crc:08X})")]
    Incompatible { state_crc: u32, rom_crc: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StateMetadata {
    pub version: u32,
    pub rom_checksum: u32,
    /// 0 = US, 1 = JP, 2 = EU
    pub region: u8,
    pub room_id: i32,
    /// Game module byte from WRAM `$7E0010` at capture time.
    pub game_module: u8,
    pub description: String,
}

impl StateMetadata {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        Ok(bincode::encode_to_vec(self, bincode_config())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let (metadata, _) = bincode::decode_from_slice(bytes, bincode_config())?;
        Ok(metadata)
    }
}

impl Snes {
    /// Serializes the full machine state.
    pub fn save_state(&self) -> Result<Vec<u8>, StateError> {
        let mut out = Vec::with_capacity(512 * 1024);
        out.extend_from_slice(&STATE_MAGIC);
        out.push(STATE_FORMAT_VERSION);
        bincode::encode_into_std_write(self, &mut out, bincode_config())?;
        Ok(out)
    }

    /// Restores a previously saved state. The state's embedded ROM checksum
    /// must match the currently loaded ROM; on mismatch the console is left
    /// untouched and `Incompatible` is returned.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        let Some((header, payload)) = bytes.split_at_checked(5) else {
            return Err(StateError::BadMagic);
        };
        if header[..4] != STATE_MAGIC {
            return Err(StateError::BadMagic);
        }
        if header[4] != STATE_FORMAT_VERSION {
            return Err(StateError::UnsupportedVersion(header[4]));
        }

        // Decode into a scratch console first so a rejected or corrupt state
        // never mutates the live one
        let (mut decoded, _): (Snes, usize) =
            bincode::decode_from_slice(payload, bincode_config())?;

        let state_crc = decoded.sys.memory.cartridge.checksum();
        let rom_crc = self.rom_checksum();
        if state_crc != rom_crc {
            return Err(StateError::Incompatible { state_crc, rom_crc });
        }

        let rom = self.sys.memory.cartridge.take_rom();
        decoded.sys.memory.cartridge.set_rom(rom);
        *self = decoded;
        Ok(())
    }

    pub fn save_state_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StateError> {
        let bytes = self.save_state()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_state_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), StateError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StateError::Missing(path.into()));
        }
        let bytes = std::fs::read(path)?;
        self.load_state(&bytes)
    }
}

pub fn write_metadata_file<P: AsRef<Path>>(
    path: P,
    metadata: &StateMetadata,
) -> Result<(), StateError> {
    std::fs::write(path, metadata.to_bytes()?)?;
    Ok(())
}

pub fn read_metadata_file<P: AsRef<Path>>(path: P) -> Result<StateMetadata, StateError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(StateError::Missing(path.into()));
    }
    let bytes = std::fs::read(path)?;
    StateMetadata::from_bytes(&bytes)
}
