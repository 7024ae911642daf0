//! Whole-console tests against a synthetic LoROM image: the PPU pixel
//! pipeline through the real bus, the APU boot handshake, save states, and
//! the headless render service.

use snes_core::api::Snes;
use snes_core::render::{RenderRequest, RenderService, StateManager, StateType};
use snes_core::savestate::StateError;
use test_log::test;

const LOROM_HEADER: usize = 0x7FC0;
const RESET_VECTOR: usize = 0x7FFC;
const NMI_VECTOR: usize = 0x7FFA;

/// 64KB LoROM image whose reset handler is SEI; STP, leaving the console
/// idling deterministically while tests poke registers from outside.
fn test_rom() -> Vec<u8> {
    let mut rom = vec![0_u8; 0x10000];
    rom[LOROM_HEADER + 0x15] = 0x20; // LoROM map byte
    rom[LOROM_HEADER + 0x19] = 0x01; // NTSC region
    rom[RESET_VECTOR] = 0x00;
    rom[RESET_VECTOR + 1] = 0x80;
    rom[NMI_VECTOR] = 0x10;
    rom[NMI_VECTOR + 1] = 0x80;
    // $8000: SEI; STP
    rom[0x0000] = 0x78;
    rom[0x0001] = 0xDB;
    // $8010 (NMI handler): RTI
    rom[0x0010] = 0x40;
    rom
}

fn parked_console() -> Snes {
    let mut snes = Snes::new(test_rom()).unwrap();
    snes.run_opcode(); // SEI
    snes.run_opcode(); // STP
    snes
}

/// Main-screen BGRA pixel at display coordinates (x, line 1..=224) of the
/// assembled output frame.
fn output_pixel(snes: &Snes, x: usize, line: usize) -> [u8; 4] {
    let size = snes.frame_size();
    let mut out = vec![0_u8; (size.width * size.height * 4) as usize];
    snes.put_pixels(&mut out);

    let dest_row = (line - 1) * 2 + 16;
    let base = dest_row * 2048 + x * 8 + 4;
    [out[base], out[base + 1], out[base + 2], out[base + 3]]
}

#[test]
fn forced_blank_renders_black() {
    let mut snes = parked_console();
    // Reset default is forced blank; paint the backdrop anyway
    snes.write(0x002121, 0x00);
    snes.write(0x002122, 0xFF);
    snes.write(0x002122, 0x7F);

    snes.run_frame();

    assert_eq!(output_pixel(&snes, 128, 112), [0, 0, 0, 0xFF]);
}

#[test]
fn backdrop_fills_the_screen_at_full_brightness() {
    let mut snes = parked_console();
    // CGRAM[0] = white, no layers enabled, blanking off at brightness 15
    snes.write(0x002121, 0x00);
    snes.write(0x002122, 0xFF);
    snes.write(0x002122, 0x7F);
    snes.write(0x002100, 0x0F);

    snes.run_frame();
    snes.run_frame();

    for (x, line) in [(0, 1), (128, 112), (255, 224)] {
        assert_eq!(output_pixel(&snes, x, line), [0xF8, 0xF8, 0xF8, 0xFF], "at ({x}, {line})");
    }
}

#[test]
fn color_math_adds_fixed_color_to_backdrop() {
    let mut snes = parked_console();
    // Backdrop red 10, fixed color blue 10, add on the backdrop layer
    snes.write(0x002121, 0x00);
    snes.write(0x002122, 0x0A);
    snes.write(0x002122, 0x00);
    snes.write(0x002131, 0x20); // math on the backdrop
    snes.write(0x002132, 0x8A); // fixed blue = 10
    snes.write(0x002100, 0x0F);

    snes.run_frame();
    snes.run_frame();

    // BGRA: blue from fixed color, red from CGRAM
    assert_eq!(output_pixel(&snes, 100, 100), [10 << 3, 0, 10 << 3, 0xFF]);
}

#[test]
fn mode7_identity_matrix_samples_the_expected_tile() {
    let mut snes = parked_console();

    // Identity matrix: A = D = $0100, B = C = 0; centers and scrolls zero
    snes.write(0x002105, 0x07);
    for (reg, low, high) in
        [(0x1B, 0x00, 0x01), (0x1C, 0x00, 0x00), (0x1D, 0x00, 0x00), (0x1E, 0x00, 0x01)]
    {
        snes.write(0x002100 + reg, low);
        snes.write(0x002100 + reg, high);
    }
    snes.write(0x00212C, 0x01); // BG1 on the main screen

    // Target pixel (x=10, line=9): tilemap cell (1, 1) -> tile 2, whose
    // pixel (2, 1) carries palette index 7
    let tile = 2_u16;
    let vram_map_entry = (9 / 8) * 128 + 10 / 8; // word $0081
    let vram_pixel = tile * 64 + (9 % 8) * 8 + (10 % 8);

    snes.write(0x002115, 0x00); // increment on low byte, +1
    // Tilemap low byte
    snes.write(0x002116, (vram_map_entry & 0xFF) as u8);
    snes.write(0x002117, (vram_map_entry >> 8) as u8);
    snes.write(0x002118, tile as u8);
    // Pixel data in the high byte
    snes.write(0x002115, 0x80); // increment on high byte
    snes.write(0x002116, (vram_pixel & 0xFF) as u8);
    snes.write(0x002117, (vram_pixel >> 8) as u8);
    snes.write(0x002119, 0x07);

    // Palette entry 7 = pure green
    snes.write(0x002121, 0x07);
    snes.write(0x002122, 0xE0);
    snes.write(0x002122, 0x03);

    snes.write(0x002100, 0x0F);

    snes.run_frame();
    snes.run_frame();

    assert_eq!(output_pixel(&snes, 10, 9), [0, 31 << 3, 0, 0xFF]);
    // A neighboring tile stays on the backdrop
    assert_eq!(output_pixel(&snes, 30, 40), [0, 0, 0, 0xFF]);
}

#[test]
fn vram_read_port_returns_the_stale_latch() {
    let mut snes = parked_console();

    // Low-byte increment: write each word high-then-low so the pointer only
    // advances after the word is complete
    snes.write(0x002115, 0x00);
    snes.write(0x002116, 0x00);
    snes.write(0x002117, 0x00);
    snes.write(0x002119, 0xAB); // word 0 = $ABCD
    snes.write(0x002118, 0xCD);
    snes.write(0x002119, 0x12); // word 1 = $1234
    snes.write(0x002118, 0x34);

    // Pointing at word 0 fills the latch from it
    snes.write(0x002116, 0x00);
    snes.write(0x002117, 0x00);

    // The first read returns the latch and refills it from the pointer
    // position before incrementing; the freshly latched word only appears
    // one access later
    assert_eq!(snes.read(0x002139), 0xCD);
    assert_eq!(snes.read(0x002139), 0xCD);
    assert_eq!(snes.read(0x002139), 0x34);
}

#[test]
fn hv_latch_via_software_trigger() {
    let mut snes = parked_console();

    // $2137 latches the counters (WRIO bit 7 is set out of reset); the
    // latched flag then shows in $213F and clears on read
    snes.read(0x002137);
    let stat78 = snes.read(0x00213F);
    assert_ne!(stat78 & 0x40, 0, "counter latch flag should be set");
    let stat78 = snes.read(0x00213F);
    assert_eq!(stat78 & 0x40, 0, "counter latch flag should have cleared");
}

#[test]
fn apu_boots_through_the_ipl_handshake() {
    let mut snes = Snes::new(test_rom()).unwrap();

    // The sound CPU comes out of reset at the IPL entry point
    assert_eq!(snes.spc_program_counter(), 0xFFC0);

    // A frame of lock-step execution is far more than the IPL needs to
    // clear zero page and signal readiness on the mailbox
    snes.run_opcode();
    snes.run_opcode();
    snes.run_frame();

    assert_eq!(snes.read(0x002140), 0xAA);
    assert_eq!(snes.read(0x002141), 0xBB);
}

#[test]
fn gpdma_fills_cgram() {
    let mut snes = parked_console();

    // DMA channel 0: 512 bytes from WRAM $7E1000 to $2122 (CGRAM data),
    // fixed B-bus address, incrementing A-bus
    for i in 0..512_u32 {
        // Palette entry n = n | (n << 8) pattern, with bit 15 clear
        let value = if i % 2 == 0 { (i / 2) as u8 } else { 0x00 };
        snes.write(0x7E1000 + i, value);
    }
    snes.write(0x002121, 0x00); // CGRAM address 0
    snes.write(0x004300, 0x00); // mode 0, A to B
    snes.write(0x004301, 0x22); // B-bus $2122
    snes.write(0x004302, 0x00);
    snes.write(0x004303, 0x10); // A address $1000
    snes.write(0x004304, 0x7E); // A bank $7E
    snes.write(0x004305, 0x00);
    snes.write(0x004306, 0x02); // 512 bytes
    snes.write(0x00420B, 0x01); // fire channel 0

    // Read palette entry 5 back through the CGRAM read port
    snes.write(0x002121, 0x05);
    let low = snes.read(0x00213B);
    assert_eq!(low, 5);
}

#[test]
fn save_state_round_trip_is_deterministic() {
    let mut snes = parked_console();
    snes.write(0x002121, 0x00);
    snes.write(0x002122, 0x1F); // red backdrop
    snes.write(0x002122, 0x00);
    snes.write(0x002100, 0x0F);
    snes.run_frame();

    let state = snes.save_state().unwrap();

    let advance = |console: &mut Snes| {
        // Mutate display state mid-run, then render more frames
        console.write(0x002122, 0xE0);
        console.write(0x002122, 0x03);
        console.run_frame();
        console.run_frame();
    };

    advance(&mut snes);
    let size = snes.frame_size();
    let mut reference = vec![0_u8; (size.width * size.height * 4) as usize];
    snes.put_pixels(&mut reference);

    // Restore and repeat the same steps; every output byte must match
    snes.load_state(&state).unwrap();
    advance(&mut snes);
    let mut replay = vec![0_u8; (size.width * size.height * 4) as usize];
    snes.put_pixels(&mut replay);

    assert_eq!(reference, replay);
}

#[test]
fn save_state_rejects_a_different_rom_without_mutation() {
    let mut donor = parked_console();
    let state = donor.save_state().unwrap();

    let mut other_rom = test_rom();
    other_rom[0x4000] = 0x99; // different image, different CRC
    let mut recipient = Snes::new(other_rom).unwrap();
    recipient.write(0x7E0100, 0x42);

    let result = recipient.load_state(&state);
    assert!(matches!(result, Err(StateError::Incompatible { .. })));
    // The rejected load must not have touched the console
    assert_eq!(recipient.peek_wram(0x0100), 0x42);
}

#[test]
fn wram_is_zero_initialized_and_mirrored() {
    let mut snes = parked_console();
    assert_eq!(snes.read(0x7E0000), 0);

    snes.write(0x7E0055, 0xA5);
    // The first 8KB mirror into the system area of every program bank
    assert_eq!(snes.read(0x000055), 0xA5);
    assert_eq!(snes.read(0x800055), 0xA5);

    snes.write(0x001FFF, 0x3C);
    assert_eq!(snes.read(0x7E1FFF), 0x3C);
}

#[test]
fn open_bus_returns_the_last_bus_value() {
    let mut snes = parked_console();
    // $4220 is unmapped; reading it returns whatever was last on the bus
    let first = snes.read(0x7E0000); // 0
    assert_eq!(snes.read(0x004220), first);

    snes.write(0x7E0000, 0x7D);
    let value = snes.read(0x7E0000);
    assert_eq!(value, 0x7D);
    assert_eq!(snes.read(0x004220), 0x7D);
}

#[test]
fn render_service_traps_a_handler_that_returns() {
    // Give the ROM real object tables: object 0 points at a handler that
    // writes a tile id through the first tilemap pointer and returns
    let mut rom = test_rom();

    // Type 1 tables live at $01:8000/$01:8200 -> file offsets $8000/$8200
    rom[0x8000] = 0x00; // data offset 0
    rom[0x8001] = 0x00;
    rom[0x8200] = 0x00; // handler at $9000
    rom[0x8201] = 0x90;

    // $01:9000: LDA #$5A; STA [$BF],Y; RTL
    rom[0x9000] = 0xA9;
    rom[0x9001] = 0x5A;
    rom[0x9002] = 0x97;
    rom[0x9003] = 0xBF;
    rom[0x9004] = 0x6B;

    let state_dir = std::env::temp_dir().join("snes-core-render-tests");
    let mut service = RenderService::new(rom, state_dir).unwrap();

    let request = RenderRequest { entity_id: 0, x: 4, y: 2, room_id: 0x12, ..Default::default() };
    let result = service.render(&request).unwrap();

    assert_eq!(result.width, 256);
    assert_eq!(result.height, 224);
    assert_eq!(result.handler_address, 0x9000);
    assert!(result.opcodes_executed < 16);

    // The handler stored $5A at BG1 tilemap buffer + tilemap position
    let tilemap_pos = 2 * 0x80 + 4 * 2;
    assert_eq!(service.snes().peek_wram(0x2000 + tilemap_pos), 0x5A);
}

#[test]
fn render_service_times_out_a_runaway_handler() {
    let mut rom = test_rom();
    rom[0x8000] = 0x00;
    rom[0x8001] = 0x00;
    rom[0x8200] = 0x00;
    rom[0x8201] = 0x90;
    // $01:9000: BRA $9000 (spin forever)
    rom[0x9000] = 0x80;
    rom[0x9001] = 0xFE;

    let state_dir = std::env::temp_dir().join("snes-core-render-tests");
    let mut service = RenderService::new(rom, state_dir).unwrap();

    let request = RenderRequest { entity_id: 0, ..Default::default() };
    let result = service.render(&request);
    assert!(matches!(result, Err(snes_core::render::RenderError::DeadlineExceeded(_))));
}

#[test]
fn state_manager_caches_and_validates_states() {
    let dir = std::env::temp_dir().join(format!("snes-core-states-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let mut snes = parked_console();
    let manager = StateManager::new(dir.clone(), snes.rom_checksum());

    assert!(!manager.has_cached_state(StateType::RoomLoaded, 0x12));

    snes.write(0x7E0010, 0x07); // pretend the game is in a loaded room
    manager.save_state(&snes, StateType::RoomLoaded, 0x12, "test room".into()).unwrap();
    assert!(manager.has_cached_state(StateType::RoomLoaded, 0x12));

    let metadata = manager.metadata(StateType::RoomLoaded, 0x12).unwrap();
    assert_eq!(metadata.rom_checksum, snes.rom_checksum());
    assert_eq!(metadata.game_module, 0x07);
    assert_eq!(metadata.room_id, 0x12);

    // Reload succeeds against the same ROM
    manager.load_state(&mut snes, StateType::RoomLoaded, 0x12).unwrap();

    // A manager keyed to a different checksum refuses the cached state
    let foreign = StateManager::new(dir.clone(), 0xDEAD_BEEF);
    let error = foreign.load_state(&mut snes, StateType::RoomLoaded, 0x12).unwrap_err();
    assert!(matches!(
        error,
        snes_core::render::RenderError::State(StateError::Incompatible { .. })
    ));

    let _ = std::fs::remove_dir_all(&dir);
}
