//! Baseline save-state management: on-disk caching keyed by ROM checksum,
//! and TAS-style state generation that boots the game and navigates to a
//! target room by driving the controller registers (with a WRAM teleport
//! shortcut).

use crate::api::Snes;
use crate::input::SnesButton;
use crate::render::{wram_addresses, RenderError, STATE_PHASE_FRAME_BUDGET};
use crate::savestate::{
    read_metadata_file, write_metadata_file, StateError, StateMetadata, METADATA_VERSION,
};
use std::path::{Path, PathBuf};
use yaze_common::video::TimingMode;

// ALTTP module bytes at $7E0010
const MODULE_INTRO: u8 = 0x00;
const MODULE_FILE_SELECT: u8 = 0x01;
const MODULE_NAME_ENTRY: u8 = 0x04;
const MODULE_LOAD_FILE: u8 = 0x05;
const MODULE_UNDERWORLD_LOAD: u8 = 0x06;
const MODULE_UNDERWORLD: u8 = 0x07;
const MODULE_OVERWORLD: u8 = 0x09;
const MODULE_ATTRACT: u8 = 0x14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateType {
    RoomLoaded,
    OverworldLoaded,
    BlankCanvas,
}

impl StateType {
    fn prefix(self) -> &'static str {
        match self {
            Self::RoomLoaded => "room",
            Self::OverworldLoaded => "overworld",
            Self::BlankCanvas => "blank",
        }
    }
}

pub struct StateManager {
    state_directory: PathBuf,
    rom_checksum: u32,
}

impl StateManager {
    #[must_use]
    pub fn new(state_directory: PathBuf, rom_checksum: u32) -> Self {
        Self { state_directory, rom_checksum }
    }

    #[must_use]
    pub fn state_directory(&self) -> &Path {
        &self.state_directory
    }

    #[must_use]
    pub fn state_path(&self, state_type: StateType, context_id: i32) -> PathBuf {
        self.state_directory.join(format!("{}_{context_id:04x}.state", state_type.prefix()))
    }

    #[must_use]
    pub fn metadata_path(&self, state_type: StateType, context_id: i32) -> PathBuf {
        self.state_directory.join(format!("{}_{context_id:04x}.state.meta", state_type.prefix()))
    }

    #[must_use]
    pub fn has_cached_state(&self, state_type: StateType, context_id: i32) -> bool {
        self.state_path(state_type, context_id).exists()
    }

    /// Loads a cached baseline state after verifying the metadata sidecar's
    /// ROM checksum; an incompatible state leaves the console untouched.
    pub fn load_state(
        &self,
        snes: &mut Snes,
        state_type: StateType,
        context_id: i32,
    ) -> Result<(), RenderError> {
        let metadata_path = self.metadata_path(state_type, context_id);
        if metadata_path.exists() {
            let metadata = read_metadata_file(&metadata_path)?;
            if metadata.rom_checksum != self.rom_checksum {
                return Err(RenderError::State(StateError::Incompatible {
                    state_crc: metadata.rom_checksum,
                    rom_crc: self.rom_checksum,
                }));
            }
        }

        snes.load_state_file(self.state_path(state_type, context_id))?;
        Ok(())
    }

    pub fn save_state(
        &self,
        snes: &Snes,
        state_type: StateType,
        context_id: i32,
        description: String,
    ) -> Result<(), RenderError> {
        std::fs::create_dir_all(&self.state_directory).map_err(StateError::Io)?;

        let path = self.state_path(state_type, context_id);
        snes.save_state_file(&path)?;

        let metadata = StateMetadata {
            version: METADATA_VERSION,
            rom_checksum: self.rom_checksum,
            region: if snes.timing_mode() == TimingMode::Pal { 2 } else { 0 },
            room_id: context_id,
            game_module: game_module(snes),
            description,
        };
        write_metadata_file(self.metadata_path(state_type, context_id), &metadata)?;

        log::info!("saved baseline state {}", path.display());
        Ok(())
    }

    pub fn metadata(
        &self,
        state_type: StateType,
        context_id: i32,
    ) -> Result<StateMetadata, StateError> {
        read_metadata_file(self.metadata_path(state_type, context_id))
    }

    /// Boots the game from reset and captures a fully-loaded state for
    /// `room_id`. Slow; meant to be run once per room and cached.
    pub fn generate_room_state(
        &self,
        snes: &mut Snes,
        room_id: i32,
    ) -> Result<(), RenderError> {
        log::info!("generating baseline state for room {room_id:#06X}");

        snes.reset(true);
        self.boot_to_file_select(snes)?;
        self.start_new_game(snes)?;
        self.navigate_to_room(snes, room_id)?;

        self.save_state(snes, StateType::RoomLoaded, room_id, format!("Room {room_id:#06X}"))
    }

    /// Drives Start through the Intro/Attract screens until File Select.
    fn boot_to_file_select(&self, snes: &mut Snes) -> Result<(), RenderError> {
        for frame in 0..STATE_PHASE_FRAME_BUDGET {
            snes.run_frame();
            let module = game_module(snes);

            if module == MODULE_FILE_SELECT {
                log::debug!("file select reached after {frame} frames");
                return Ok(());
            }

            // Tap Start during Intro and Attract; input is only sampled once
            // the logo sequence is past its first seconds
            let pressing = frame % 60 < 10 && (module == MODULE_ATTRACT || (module == MODULE_INTRO && frame > 300));
            snes.set_button_state(0, SnesButton::Start, pressing);
        }

        Err(RenderError::DeadlineExceeded("boot to file select"))
    }

    /// File 1 + default name: A on File Select, Start then A through Name
    /// Entry. If Name Entry refuses to advance, force the Load File module.
    fn start_new_game(&self, snes: &mut Snes) -> Result<(), RenderError> {
        release_all(snes);

        for frame in 0..STATE_PHASE_FRAME_BUDGET {
            snes.run_frame();
            let module = game_module(snes);

            match module {
                MODULE_UNDERWORLD | MODULE_OVERWORLD => {
                    log::debug!("in-game after {frame} frames");
                    return Ok(());
                }
                MODULE_FILE_SELECT => {
                    snes.set_button_state(0, SnesButton::A, frame % 60 < 10);
                }
                MODULE_NAME_ENTRY => {
                    if frame > 400 {
                        // Stuck: skip the screen by forcing the load module
                        snes.write(wram_addresses::GAME_MODULE, MODULE_LOAD_FILE);
                        continue;
                    }
                    let cycle = frame % 120;
                    snes.set_button_state(0, SnesButton::Start, cycle < 20);
                    snes.set_button_state(0, SnesButton::A, (60..80).contains(&cycle));
                }
                _ => {
                    release_all(snes);
                }
            }
        }

        Err(RenderError::DeadlineExceeded("start new game"))
    }

    fn navigate_to_room(&self, snes: &mut Snes, room_id: i32) -> Result<(), RenderError> {
        match self.teleport_via_wram(snes, room_id) {
            Ok(()) => Ok(()),
            Err(error) => {
                log::debug!("WRAM teleport failed ({error}); falling back to TAS navigation");
                self.navigate_via_tas(snes, room_id)
            }
        }
    }

    /// Writes the target room and the Underworld Load module straight into
    /// WRAM, then waits for the room to finish loading.
    fn teleport_via_wram(&self, snes: &mut Snes, room_id: i32) -> Result<(), RenderError> {
        release_all(snes);

        let indoor = room_id < 0x128;
        snes.write(wram_addresses::INDOOR_FLAG, u8::from(indoor));
        snes.write(wram_addresses::GAME_MODULE, MODULE_UNDERWORLD_LOAD);

        // Park Link in the middle of the room
        snes.write(wram_addresses::LINK_X, 0x80);
        snes.write(wram_addresses::LINK_X + 1, 0x00);
        snes.write(wram_addresses::LINK_Y, 0x80);
        snes.write(wram_addresses::LINK_Y + 1, 0x00);

        for frame in 0..STATE_PHASE_FRAME_BUDGET {
            // The loader rewrites the room id during transitions; pin it
            snes.write(wram_addresses::ROOM_ID, room_id as u8);
            snes.write(wram_addresses::ROOM_ID + 1, (room_id >> 8) as u8);
            snes.write(wram_addresses::INDOOR_FLAG, u8::from(indoor));

            snes.run_frame();

            if is_room_fully_loaded(snes) && current_room(snes) == room_id {
                log::debug!("teleport to room {room_id:#06X} settled after {frame} frames");
                return Ok(());
            }
        }

        Err(RenderError::DeadlineExceeded("WRAM room teleport"))
    }

    /// Best-effort fallback: run frames and accept whatever room loads.
    fn navigate_via_tas(&self, snes: &mut Snes, room_id: i32) -> Result<(), RenderError> {
        for _ in 0..STATE_PHASE_FRAME_BUDGET {
            snes.run_frame();
            if is_room_fully_loaded(snes) {
                let loaded = current_room(snes);
                if loaded != room_id {
                    log::warn!(
                        "TAS navigation settled in room {loaded:#06X} instead of {room_id:#06X}"
                    );
                }
                return Ok(());
            }
        }

        Err(RenderError::DeadlineExceeded("TAS room navigation"))
    }
}

fn game_module(snes: &Snes) -> u8 {
    snes.peek_wram(wram_addresses::GAME_MODULE)
}

fn game_submodule(snes: &Snes) -> u8 {
    snes.peek_wram(wram_addresses::GAME_SUBMODULE)
}

fn current_room(snes: &Snes) -> i32 {
    i32::from(snes.peek_wram(wram_addresses::ROOM_ID))
        | (i32::from(snes.peek_wram(wram_addresses::ROOM_ID + 1)) << 8)
}

/// Module 7/9 with submodule 0 (gameplay) or $0F (stable spotlight) means
/// the room is done loading.
fn is_room_fully_loaded(snes: &Snes) -> bool {
    let module = game_module(snes);
    let submodule = game_submodule(snes);
    (module == MODULE_UNDERWORLD || module == MODULE_OVERWORLD)
        && (submodule == 0x00 || submodule == 0x0F)
}

fn release_all(snes: &mut Snes) {
    for button in [
        SnesButton::A,
        SnesButton::B,
        SnesButton::X,
        SnesButton::Y,
        SnesButton::L,
        SnesButton::R,
        SnesButton::Start,
        SnesButton::Select,
        SnesButton::Up,
        SnesButton::Down,
        SnesButton::Left,
        SnesButton::Right,
    ] {
        snes.set_button_state(0, button, false);
    }
}
