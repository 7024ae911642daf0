//! The render service proper: request/result types, room-context injection,
//! handler invocation with an opcode budget, and pixel extraction.

use crate::api::Snes;
use crate::memory::cartridge::CartridgeError;
use crate::render::states::{StateManager, StateType};
use crate::render::{
    convert_linear_8bpp_to_planar_4bpp, rom_addresses, snes_to_pc, wram_addresses, RenderError,
    HANDLER_OPCODE_BUDGET,
};
use std::path::PathBuf;
use wdc65816_emu::core::{Registers, StatusRegister};

const TRAP_ADDR: u16 = 0xFF00;
const TRAP_BANK: u8 = 0x01;
const STP_OPCODE: u8 = 0xDB;

const OUTPUT_WIDTH: usize = 256;
const OUTPUT_HEIGHT: usize = 224;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderTargetType {
    #[default]
    DungeonObject,
    Sprite,
    FullRoom,
}

/// One render request. Game-domain decoding (graphics blocksets, palette
/// groups) happens upstream; the service takes the prepared bytes.
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub target: RenderTargetType,
    /// Object id (0x000-0xFFF) or sprite id.
    pub entity_id: u32,
    /// Position in tile coordinates (0-63).
    pub x: u32,
    pub y: u32,
    /// Size parameter for scalable objects.
    pub size: u8,
    pub room_id: i32,
    /// Room graphics as 8bpp-linear tiles; converted to 4bpp planar and
    /// loaded at VRAM $0000.
    pub graphics: Vec<u8>,
    /// BGR15 palette entries, loaded into CGRAM from index 0.
    pub palette: Vec<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderResult {
    /// RGBA8888, `width * height * 4` bytes.
    pub rgba_pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub opcodes_executed: u32,
    pub handler_address: u16,
}

pub struct RenderService {
    snes: Snes,
    state_manager: StateManager,
}

impl RenderService {
    /// Builds a console from the ROM image and a state manager rooted at
    /// `state_directory`.
    ///
    /// # Errors
    ///
    /// Fails when the ROM cannot be mapped.
    pub fn new(rom: Vec<u8>, state_directory: PathBuf) -> Result<Self, CartridgeError> {
        let snes = Snes::new(rom)?;
        let state_manager = StateManager::new(state_directory, snes.rom_checksum());
        log::info!(
            "render service ready; ROM CRC32 {:08X}, states in {}",
            snes.rom_checksum(),
            state_manager.state_directory().display()
        );
        Ok(Self { snes, state_manager })
    }

    pub fn state_manager(&mut self) -> &mut StateManager {
        &mut self.state_manager
    }

    pub fn snes(&mut self) -> &mut Snes {
        &mut self.snes
    }

    pub fn render(&mut self, request: &RenderRequest) -> Result<RenderResult, RenderError> {
        match request.target {
            RenderTargetType::DungeonObject => self.render_dungeon_object(request),
            RenderTargetType::Sprite | RenderTargetType::FullRoom => {
                // Sprites and whole rooms ride the same machinery once their
                // handler tables are wired up; objects are the editor's
                // workhorse
                self.render_dungeon_object(request)
            }
        }
    }

    fn render_dungeon_object(
        &mut self,
        request: &RenderRequest,
    ) -> Result<RenderResult, RenderError> {
        // A baseline room state gives the handler the game context it
        // expects; fall back to a cold boot when none is cached
        if let Err(error) =
            self.state_manager.load_state(&mut self.snes, StateType::RoomLoaded, request.room_id)
        {
            log::debug!("no usable baseline state ({error}); using cold boot");
            self.snes.reset(true);
        }

        self.inject_room_context(request);
        self.clear_tilemap_buffers();
        self.initialize_tilemap_pointers();
        self.mock_apu_ports();

        let (data_offset, handler_addr) = self.lookup_handler(request.entity_id)?;
        let tilemap_pos = (request.y * 0x80 + request.x * 2) as u16;

        let opcodes_executed = self.execute_handler(handler_addr, data_offset, tilemap_pos)?;

        self.render_ppu_frame();

        Ok(RenderResult {
            rgba_pixels: self.extract_pixels(),
            width: OUTPUT_WIDTH as u32,
            height: OUTPUT_HEIGHT as u32,
            opcodes_executed,
            handler_address: handler_addr,
        })
    }

    /// Loads palette and graphics, points the BG layers at the standard
    /// dungeon VRAM layout, and stores the room id where the game keeps it.
    fn inject_room_context(&mut self, request: &RenderRequest) {
        for (i, &color) in request.palette.iter().enumerate().take(256) {
            self.snes.sys.ppu.cgram[i] = color & 0x7FFF;
        }

        let planar = convert_linear_8bpp_to_planar_4bpp(&request.graphics);
        for (i, chunk) in planar.chunks_exact(2).enumerate().take(0x8000) {
            self.snes.sys.ppu.vram[i] = u16::from_le_bytes([chunk[0], chunk[1]]);
        }

        self.snes.write(0x002105, 0x09); // BG mode 1, BG3 priority
        self.snes.write(0x002107, 0x40); // BG1 tilemap at VRAM $4000
        self.snes.write(0x002108, 0x48); // BG2 tilemap at VRAM $4800
        self.snes.write(0x00210B, 0x00); // BG1/BG2 tiles at VRAM $0000
        self.snes.write(0x00212C, 0x03); // main screen: BG1 + BG2
        self.snes.write(0x002100, 0x0F); // full brightness, blanking off

        self.snes.write(wram_addresses::ROOM_ID, request.room_id as u8);
        self.snes.write(wram_addresses::ROOM_ID + 1, (request.room_id >> 8) as u8);
    }

    fn clear_tilemap_buffers(&mut self) {
        for i in 0..wram_addresses::TILEMAP_BUFFER_SIZE {
            self.snes.write(wram_addresses::BG1_TILEMAP_BUFFER + i, 0x00);
            self.snes.write(wram_addresses::BG2_TILEMAP_BUFFER + i, 0x00);
        }
    }

    /// The drawing routines write through 11 long pointers in the zero page;
    /// aim them at the WRAM tilemap rows.
    fn initialize_tilemap_pointers(&mut self) {
        for (i, &zp_addr) in wram_addresses::TILEMAP_POINTERS.iter().enumerate() {
            let target = wram_addresses::BG1_TILEMAP_BUFFER
                + (i as u32) * wram_addresses::TILEMAP_ROW_STRIDE;
            self.snes.write(0x7E_0000 | u32::from(zp_addr), target as u8);
            self.snes.write(0x7E_0000 | u32::from(zp_addr + 1), (target >> 8) as u8);
            self.snes.write(0x7E_0000 | u32::from(zp_addr + 2), (target >> 16) as u8);
        }
    }

    /// Game code polls the sound driver's ready handshake; keep the mailbox
    /// answering without running the real upload.
    fn mock_apu_ports(&mut self) {
        self.snes.sys.apu.mock_output_port(0, 0xAA);
        self.snes.sys.apu.mock_output_port(1, 0xBB);
        self.snes.sys.apu.mock_output_port(2, 0x00);
        self.snes.sys.apu.mock_output_port(3, 0x00);
    }

    /// Resolves the object's data offset and handler address from the three
    /// type-partitioned ROM tables.
    fn lookup_handler(&self, object_id: u32) -> Result<(u16, u16), RenderError> {
        let (data_table, handler_table, index) = match object_id {
            0x000..=0x0FF => {
                (rom_addresses::TYPE1_DATA_TABLE, rom_addresses::TYPE1_HANDLER_TABLE, object_id)
            }
            0x100..=0x1FF => (
                rom_addresses::TYPE2_DATA_TABLE,
                rom_addresses::TYPE2_HANDLER_TABLE,
                object_id - 0x100,
            ),
            0x200..=0xFFF => (
                rom_addresses::TYPE3_DATA_TABLE,
                rom_addresses::TYPE3_HANDLER_TABLE,
                object_id - 0x200,
            ),
            _ => return Err(RenderError::ObjectIdOutOfRange(object_id)),
        };

        let rom = self.snes.rom();
        let data_pc = snes_to_pc(data_table + index * 2) as usize;
        let handler_pc = snes_to_pc(handler_table + index * 2) as usize;
        if data_pc + 1 >= rom.len() || handler_pc + 1 >= rom.len() {
            return Err(RenderError::ObjectIdOutOfRange(object_id));
        }

        let data_offset = u16::from_le_bytes([rom[data_pc], rom[data_pc + 1]]);
        let handler_addr = u16::from_le_bytes([rom[handler_pc], rom[handler_pc + 1]]);
        if handler_addr == 0 {
            return Err(RenderError::NoHandler(object_id as u16));
        }

        Ok((data_offset, handler_addr))
    }

    /// Runs the handler with the register contract the game's drawing
    /// routines expect, trapping the final RTL at a parked STP.
    fn execute_handler(
        &mut self,
        handler_addr: u16,
        data_offset: u16,
        tilemap_pos: u16,
    ) -> Result<u32, RenderError> {
        // STP at the trap address (a no-op on ROM, but the loop also watches
        // the program counter)
        self.snes.write((u32::from(TRAP_BANK) << 16) | u32::from(TRAP_ADDR), STP_OPCODE);

        // Return frame so the handler's RTL lands on the trap
        let mut sp = 0x01FF_u16;
        self.snes.write(0x01_0000 | u32::from(sp), TRAP_BANK);
        sp -= 1;
        self.snes.write(0x01_0000 | u32::from(sp), ((TRAP_ADDR - 1) >> 8) as u8);
        sp -= 1;
        self.snes.write(0x01_0000 | u32::from(sp), ((TRAP_ADDR - 1) & 0xFF) as u8);
        sp -= 1;

        let registers = Registers {
            a: 0,
            x: data_offset,
            y: tilemap_pos,
            s: sp,
            d: 0,
            pbr: TRAP_BANK,
            pc: handler_addr,
            dbr: 0x7E,
            // Native mode, 8-bit accumulator and index registers
            p: StatusRegister::from(0x30),
            emulation_mode: false,
        };
        self.snes.set_cpu_registers(registers);

        let mut opcodes = 0_u32;
        while opcodes < HANDLER_OPCODE_BUDGET {
            let (pbr, pc) = self.snes.cpu_position();
            if pbr == TRAP_BANK && pc == TRAP_ADDR {
                break;
            }
            if self.snes.cpu_stopped() {
                break;
            }

            // The sound driver handshake is polled inside tight loops; keep
            // the mock fresh
            if opcodes & 0x3F == 0 {
                self.snes.sys.apu.mock_output_port(0, 0xAA);
                self.snes.sys.apu.mock_output_port(1, 0xBB);
            }

            self.snes.run_opcode();
            opcodes += 1;
        }

        if opcodes >= HANDLER_OPCODE_BUDGET {
            return Err(RenderError::DeadlineExceeded("drawing handler opcode budget"));
        }

        log::debug!("handler ${handler_addr:04X} finished in {opcodes} opcodes");
        Ok(opcodes)
    }

    /// Copies the WRAM tilemap buffers into VRAM and renders one full frame
    /// without running the CPU.
    fn render_ppu_frame(&mut self) {
        for i in 0..0x800_u32 {
            let lsb = self.snes.read(wram_addresses::BG1_TILEMAP_BUFFER + i * 2);
            let msb = self.snes.read(wram_addresses::BG1_TILEMAP_BUFFER + i * 2 + 1);
            self.snes.sys.ppu.vram[0x4000 + i as usize] = u16::from_le_bytes([lsb, msb]);

            let lsb = self.snes.read(wram_addresses::BG2_TILEMAP_BUFFER + i * 2);
            let msb = self.snes.read(wram_addresses::BG2_TILEMAP_BUFFER + i * 2 + 1);
            self.snes.sys.ppu.vram[0x4800 + i as usize] = u16::from_le_bytes([lsb, msb]);
        }

        let ppu = &mut self.snes.sys.ppu;
        ppu.handle_frame_start();
        for line in 1..=(OUTPUT_HEIGHT as u16) {
            ppu.start_line(line);
            ppu.finish_line();
        }
        ppu.handle_vblank();
    }

    /// 256x224 RGBA from the freshly rendered field.
    fn extract_pixels(&self) -> Vec<u8> {
        let mut rgba = vec![0_u8; OUTPUT_WIDTH * OUTPUT_HEIGHT * 4];
        for y in 0..OUTPUT_HEIGHT {
            for x in 0..OUTPUT_WIDTH {
                let [b, g, r, a] = self.snes.sys.ppu.field_pixel(x, y);
                let idx = (y * OUTPUT_WIDTH + x) * 4;
                rgba[idx] = r;
                rgba[idx + 1] = g;
                rgba[idx + 2] = b;
                rgba[idx + 3] = a;
            }
        }
        rgba
    }
}
