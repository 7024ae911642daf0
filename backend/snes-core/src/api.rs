//! The console: owns every component, routes 24-bit bus accesses, and
//! advances the master clock. The CPU drives time forward through its bus
//! accesses; the PPU catches up to the current horizontal position whenever
//! one of its registers is touched, and the APU runs in deterministic
//! lock-step derived from the master cycle counter.

use crate::apu::dsp::InterpolationMode;
use crate::apu::{Apu, SPC_CLOCK_HZ};
use crate::input::{ControllerPorts, SnesButton};
use crate::memory::cartridge::{Cartridge, CartridgeError};
use crate::memory::dma::DmaUnit;
use crate::memory::{CpuInternalRegisters, Memory};
use crate::ppu::{Ppu, OUTPUT_HEIGHT, OUTPUT_WIDTH};
use bincode::{Decode, Encode};
use wdc65816_emu::core::Wdc65816;
use wdc65816_emu::traits::BusInterface;
use yaze_common::num::GetBit;
use yaze_common::video::{FrameSize, TimingMode};

pub(crate) const NTSC_MASTER_CLOCK_HZ: u64 = 21_477_272;
pub(crate) const PAL_MASTER_CLOCK_HZ: u64 = 21_281_370;

const MCLKS_PER_SCANLINE: u16 = 1364;
const NTSC_LINES_PER_FRAME: u16 = 262;
const PAL_LINES_PER_FRAME: u16 = 312;

// Memory access speeds in master clocks
const FAST: u32 = 6;
const SLOW: u32 = 8;
const XSLOW: u32 = 12;

// The CPU stalls for 40 master clocks mid-scanline while DRAM refreshes
const WRAM_REFRESH_MCLK: u16 = 536;
const WRAM_REFRESH_CYCLES: u16 = 40;

// HDMA fires late in the visible portion of each scanline
const HDMA_MCLK: u16 = 1104;

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct System {
    pub(crate) memory: Memory,
    pub(crate) regs: CpuInternalRegisters,
    pub(crate) dma: DmaUnit,
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) joypads: ControllerPorts,
    timing_mode: TimingMode,
    // Master clock state
    cycles: u64,
    h_pos: u16,
    v_pos: u16,
    frame: u64,
}

impl System {
    fn new(cartridge: Cartridge) -> Self {
        let timing_mode = cartridge.timing_mode();
        Self {
            memory: Memory::new(cartridge),
            regs: CpuInternalRegisters::new(),
            dma: DmaUnit::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            joypads: ControllerPorts::new(),
            timing_mode,
            cycles: 0,
            h_pos: 0,
            v_pos: 0,
            frame: 0,
        }
    }

    fn master_clock_hz(&self) -> u64 {
        match self.timing_mode {
            TimingMode::Ntsc => NTSC_MASTER_CLOCK_HZ,
            TimingMode::Pal => PAL_MASTER_CLOCK_HZ,
        }
    }

    fn lines_per_frame(&self) -> u16 {
        match self.timing_mode {
            TimingMode::Ntsc => NTSC_LINES_PER_FRAME,
            TimingMode::Pal => PAL_LINES_PER_FRAME,
        }
    }

    pub(crate) fn pal_timing(&self) -> bool {
        self.timing_mode == TimingMode::Pal
    }

    #[inline]
    pub(crate) fn frame(&self) -> u64 {
        self.frame
    }

    /// Advances the master clock in 2-cycle steps, firing scanline events as
    /// their positions pass.
    pub(crate) fn run_cycles(&mut self, cycles: u32) {
        debug_assert!(cycles % 2 == 0);

        for _ in 0..cycles / 2 {
            self.cycles += 2;
            self.h_pos += 2;

            match self.h_pos {
                WRAM_REFRESH_MCLK => {
                    self.cycles += u64::from(WRAM_REFRESH_CYCLES);
                    self.h_pos += WRAM_REFRESH_CYCLES;
                }
                HDMA_MCLK => {
                    if !self.regs.in_vblank {
                        self.do_hdma();
                    }
                }
                _ => {}
            }

            self.check_hv_irq();
            self.regs.in_hblank = self.h_pos < 22 || self.h_pos >= 1096;

            if self.h_pos >= MCLKS_PER_SCANLINE {
                self.h_pos -= MCLKS_PER_SCANLINE;
                self.end_of_line();
            }
        }
    }

    fn check_hv_irq(&mut self) {
        let h_match = self.h_pos == self.regs.h_timer * 4;
        let fire = match (self.regs.h_irq_enabled, self.regs.v_irq_enabled) {
            (true, true) => self.v_pos == self.regs.v_timer && h_match,
            (true, false) => h_match,
            (false, true) => self.v_pos == self.regs.v_timer && self.h_pos == 0,
            (false, false) => false,
        };
        if fire {
            self.regs.irq_flag = true;
        }
    }

    fn end_of_line(&mut self) {
        // Complete any pixels the catch-up renderer still owes this line
        self.ppu.finish_line();

        self.v_pos += 1;
        if self.v_pos >= self.lines_per_frame() {
            self.v_pos = 0;
            self.frame += 1;

            self.regs.nmi_flag = false;
            self.regs.in_vblank = false;
            self.ppu.handle_frame_start();
            self.init_hdma();
            return;
        }

        let visible_lines = self.ppu.visible_lines();
        if self.v_pos >= 1 && self.v_pos <= visible_lines {
            self.ppu.start_line(self.v_pos);
        } else if self.v_pos == visible_lines + 1 {
            // Start of vblank: the frame's pixels are complete. Bring the
            // audio subsystem fully up to date and mark the ring-buffer
            // position for the host resampler before the game's NMI runs
            self.catch_up_apu();
            self.apu.new_frame();

            self.ppu.check_overscan();
            self.ppu.handle_vblank();
            self.regs.in_vblank = true;
            self.regs.nmi_flag = true;

            if self.regs.auto_joypad_enabled {
                self.regs.joypad_results = self.joypads.auto_read();
                self.regs.auto_joypad_busy = true;
            }
        } else if self.v_pos == visible_lines + 4 {
            self.regs.auto_joypad_busy = false;
        }
    }

    fn catch_up_apu(&mut self) {
        let target = self.cycles * SPC_CLOCK_HZ / self.master_clock_hz();
        self.apu.catch_up(target);
    }

    // --- bus dispatch ---

    fn access_cycles(&self, address: u32) -> u32 {
        let bank = (address >> 16) as u8;
        let offset = address as u16;
        match (bank, offset) {
            (0x00..=0x3F | 0x80..=0xBF, 0x0000..=0x1FFF) => SLOW,
            (0x00..=0x3F | 0x80..=0xBF, 0x2000..=0x3FFF) => FAST,
            (0x00..=0x3F | 0x80..=0xBF, 0x4000..=0x41FF) => XSLOW,
            (0x00..=0x3F | 0x80..=0xBF, 0x4200..=0x5FFF) => FAST,
            (0x00..=0x3F | 0x80..=0xBF, 0x6000..=0x7FFF) => SLOW,
            (0x80..=0xBF, 0x8000..=0xFFFF) | (0xC0..=0xFF, _) => {
                if self.regs.fast_rom {
                    FAST
                } else {
                    SLOW
                }
            }
            _ => SLOW,
        }
    }

    /// B-bus ($21xx) read, shared by the CPU path and DMA.
    pub(crate) fn read_b_bus(&mut self, address: u16) -> u8 {
        let value = match address {
            0x2100..=0x213F => {
                self.ppu.catch_up(self.h_pos);
                if address == 0x2137 {
                    // Software H/V latch, gated by WRIO bit 7
                    if self.regs.wrio_bit7() {
                        let (h, v) = (self.h_pos, self.v_pos);
                        self.ppu.latch_hv(h, v);
                    }
                    self.memory.cpu_open_bus()
                } else {
                    let pal = self.pal_timing();
                    let open_bus = self.memory.cpu_open_bus();
                    self.ppu.read((address & 0xFF) as u8, pal, open_bus)
                }
            }
            0x2140..=0x217F => {
                self.catch_up_apu();
                self.apu.read_port((address & 0x3) as u8)
            }
            0x2180 => self.memory.read_wram_port(),
            _ => self.memory.cpu_open_bus(),
        };
        self.memory.set_open_bus(value);
        value
    }

    pub(crate) fn write_b_bus(&mut self, address: u16, value: u8) {
        self.memory.set_open_bus(value);
        match address {
            0x2100..=0x213F => {
                self.ppu.catch_up(self.h_pos);
                let v_pos = self.v_pos;
                self.ppu.write((address & 0xFF) as u8, value, v_pos);
            }
            0x2140..=0x217F => {
                self.catch_up_apu();
                self.apu.write_port((address & 0x3) as u8, value);
            }
            0x2180 => self.memory.write_wram_port(value),
            0x2181 => self.memory.write_wram_port_address_low(value),
            0x2182 => self.memory.write_wram_port_address_mid(value),
            0x2183 => self.memory.write_wram_port_address_high(value),
            _ => {}
        }
    }

    /// A-bus read without cycle accounting, shared by the CPU path and DMA.
    pub(crate) fn read_a_bus(&mut self, address: u32) -> u8 {
        let bank = (address >> 16) as u8;
        let offset = address as u16;
        let value = match (bank, offset) {
            (0x7E..=0x7F, _) => self.memory.read_wram(address & 0x1FFFF),
            (0x00..=0x3F | 0x80..=0xBF, 0x0000..=0x1FFF) => self.memory.read_wram(address & 0x1FFF),
            (0x00..=0x3F | 0x80..=0xBF, 0x2100..=0x21FF) => return self.read_b_bus(offset),
            (0x00..=0x3F | 0x80..=0xBF, 0x4016 | 0x4017) => {
                let open_bus = self.memory.cpu_open_bus();
                let bit = self.joypads.read_serial(usize::from(offset & 1));
                (open_bus & 0xFC) | bit
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4200..=0x421F) => {
                let open_bus = self.memory.cpu_open_bus();
                self.regs.read_register(offset, open_bus).unwrap_or(open_bus)
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4300..=0x437F) => {
                self.dma.read_register(offset).unwrap_or(self.memory.cpu_open_bus())
            }
            _ => self
                .memory
                .cartridge
                .read(address)
                .unwrap_or(self.memory.cpu_open_bus()),
        };
        self.memory.set_open_bus(value);
        value
    }

    pub(crate) fn write_a_bus(&mut self, address: u32, value: u8) {
        let bank = (address >> 16) as u8;
        let offset = address as u16;
        match (bank, offset) {
            (0x7E..=0x7F, _) => {
                self.memory.set_open_bus(value);
                self.memory.write_wram(address & 0x1FFFF, value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x0000..=0x1FFF) => {
                self.memory.set_open_bus(value);
                self.memory.write_wram(address & 0x1FFF, value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2100..=0x21FF) => self.write_b_bus(offset, value),
            (0x00..=0x3F | 0x80..=0xBF, 0x4016) => {
                self.memory.set_open_bus(value);
                self.joypads.write_strobe(value.bit(0));
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4200) => {
                self.memory.set_open_bus(value);
                self.regs.nmi_enabled = value.bit(7);
                self.regs.v_irq_enabled = value.bit(5);
                self.regs.h_irq_enabled = value.bit(4);
                self.regs.auto_joypad_enabled = value.bit(0);
                if !(self.regs.h_irq_enabled || self.regs.v_irq_enabled) {
                    self.regs.irq_flag = false;
                }
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4201) => {
                self.memory.set_open_bus(value);
                if self.regs.write_wrio(value) {
                    let (h, v) = (self.h_pos, self.v_pos);
                    self.ppu.latch_hv(h, v);
                }
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x420B) => {
                self.memory.set_open_bus(value);
                self.do_gpdma(value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x420C) => {
                self.memory.set_open_bus(value);
                self.dma.write_hdma_enable(value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4202..=0x421F) => {
                self.memory.set_open_bus(value);
                self.regs.write_register(offset, value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4300..=0x437F) => {
                self.memory.set_open_bus(value);
                self.dma.write_register(offset, value);
            }
            _ => {
                self.memory.set_open_bus(value);
                self.memory.cartridge.write(address, value);
            }
        }
    }
}

impl BusInterface for System {
    #[inline]
    fn read(&mut self, address: u32) -> u8 {
        let address = address & Self::ADDRESS_MASK;
        self.run_cycles(self.access_cycles(address));
        self.read_a_bus(address)
    }

    #[inline]
    fn write(&mut self, address: u32, value: u8) {
        let address = address & Self::ADDRESS_MASK;
        self.run_cycles(self.access_cycles(address));
        self.write_a_bus(address, value);
    }

    #[inline]
    fn idle(&mut self, _waiting: bool) {
        self.run_cycles(FAST);
    }

    #[inline]
    fn nmi(&self) -> bool {
        self.regs.nmi_flag && self.regs.nmi_enabled
    }

    #[inline]
    fn irq(&self) -> bool {
        self.regs.irq_flag && (self.regs.h_irq_enabled || self.regs.v_irq_enabled)
    }
}

/// A full SNES. Drives one frame at a time for the editor's preview surfaces
/// and one opcode at a time for the headless render service.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Snes {
    pub(crate) cpu: Wdc65816,
    pub(crate) sys: System,
}

impl Snes {
    /// Builds a console around a ROM image and runs the reset vector fetch.
    ///
    /// # Errors
    ///
    /// Returns an error when the image is too small or its header does not
    /// identify a supported mapping.
    pub fn new(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let cartridge = Cartridge::create(rom.into_boxed_slice())?;
        let mut snes = Self { cpu: Wdc65816::new(), sys: System::new(cartridge) };
        snes.cpu.reset(&mut snes.sys);
        Ok(snes)
    }

    pub fn reset(&mut self, hard: bool) {
        if hard {
            self.sys.regs = CpuInternalRegisters::new();
            self.sys.dma = DmaUnit::new();
            self.sys.ppu.reset();
            self.sys.apu.reset();
            self.sys.joypads = ControllerPorts::new();
            self.sys.cycles = 0;
            self.sys.h_pos = 0;
            self.sys.v_pos = 0;
            self.sys.frame = 0;
        }
        self.cpu.reset(&mut self.sys);
    }

    /// Executes exactly one CPU instruction (or interrupt entry).
    pub fn run_opcode(&mut self) {
        self.cpu.run_opcode(&mut self.sys);
    }

    /// Runs CPU instructions until the start of the next vertical blank;
    /// at return the frame's pixels and audio are complete and the host can
    /// drain both.
    pub fn run_frame(&mut self) {
        while self.sys.regs.in_vblank {
            self.cpu.run_opcode(&mut self.sys);
        }
        while !self.sys.regs.in_vblank {
            self.cpu.run_opcode(&mut self.sys);
        }
    }

    /// Bus read at a 24-bit address, advancing the master clock like any
    /// other access.
    pub fn read(&mut self, address: u32) -> u8 {
        self.sys.read(address)
    }

    pub fn write(&mut self, address: u32, value: u8) {
        self.sys.write(address, value);
    }

    pub fn set_button_state(&mut self, player: usize, button: SnesButton, pressed: bool) {
        self.sys.joypads.set_button(player, button, pressed);
    }

    /// Copies the assembled 512x478 BGRA frame into `out`.
    pub fn put_pixels(&self, out: &mut [u8]) {
        self.sys.ppu.put_pixels(out);
    }

    #[must_use]
    pub fn frame_size(&self) -> FrameSize {
        FrameSize { width: OUTPUT_WIDTH as u32, height: OUTPUT_HEIGHT as u32 }
    }

    /// Resamples the frame's audio into `samples_per_frame` stereo frames
    /// (~533 for NTSC, ~641 for PAL).
    pub fn get_samples(&self, out: &mut [i16], samples_per_frame: usize) {
        let pal = self.sys.pal_timing();
        self.sys.apu.get_samples(out, samples_per_frame, pal);
    }

    /// Copies the frame's native 32 kHz samples; returns frames per channel.
    pub fn copy_native_frame(&self, out: &mut [i16]) -> usize {
        let pal = self.sys.pal_timing();
        self.sys.apu.copy_native_frame(out, pal)
    }

    pub fn set_audio_interpolation(&mut self, mode: InterpolationMode) {
        self.sys.apu.set_interpolation(mode);
    }

    pub fn set_audio_channel_mute(&mut self, channel: usize, mute: bool) {
        self.sys.apu.set_channel_mute(channel, mute);
    }

    #[must_use]
    pub fn timing_mode(&self) -> TimingMode {
        self.sys.timing_mode
    }

    #[must_use]
    pub fn rom_checksum(&self) -> u32 {
        self.sys.memory.cartridge.checksum()
    }

    #[must_use]
    pub fn cartridge_title(&self) -> String {
        self.sys.memory.cartridge.title()
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.sys.frame()
    }

    #[must_use]
    pub fn rom(&self) -> &[u8] {
        self.sys.memory.cartridge.rom()
    }

    /// WRAM read with no bus or clock side effects (for state polling).
    #[must_use]
    pub fn peek_wram(&self, address: u32) -> u8 {
        self.sys.memory.read_wram(address & 0x1FFFF)
    }

    /// Forces the CPU register file; the render service uses this to enter
    /// ROM routines directly.
    pub fn set_cpu_registers(&mut self, registers: wdc65816_emu::core::Registers) {
        self.cpu.set_registers(registers);
    }

    #[must_use]
    pub fn cpu_registers(&self) -> &wdc65816_emu::core::Registers {
        self.cpu.registers()
    }

    /// Current (program bank, program counter).
    #[must_use]
    pub fn cpu_position(&self) -> (u8, u16) {
        (self.cpu.registers().pbr, self.cpu.registers().pc)
    }

    #[must_use]
    pub fn cpu_stopped(&self) -> bool {
        self.cpu.stopped()
    }

    /// Sound CPU program counter, for boot and handshake diagnostics.
    #[must_use]
    pub fn spc_program_counter(&self) -> u16 {
        self.sys.apu.spc700().registers().pc
    }
}

pub use crate::apu::dsp::InterpolationMode as AudioInterpolationMode;
pub use crate::memory::cartridge::CartridgeError as LoadError;
