//! S-APU: the SPC700, its I/O page, three stage timers, the IPL ROM overlay,
//! and the S-DSP, run in lock-step behind a 4-byte mailbox.

mod bootrom;
pub(crate) mod dsp;
mod timer;

use crate::apu::dsp::{Dsp, InterpolationMode};
use crate::apu::timer::{FastTimer, SlowTimer};
use bincode::{Decode, Encode};
use spc700_emu::traits::BusInterface;
use spc700_emu::Spc700;
use yaze_common::boxedarray::BoxedArray;
use yaze_common::num::GetBit;

pub(crate) const AUDIO_RAM_LEN: usize = 64 * 1024;

pub(crate) type AudioRam = [u8; AUDIO_RAM_LEN];

// SPC700 clock: 32 cycles per 32 kHz DSP tick
pub(crate) const SPC_CLOCK_HZ: u64 = 32_040 * 32;
const CYCLES_PER_DSP_TICK: u64 = 32;

#[derive(Debug, Clone, Encode, Decode)]
struct ApuRegisters {
    ipl_mapped: bool,
    dsp_addr: u8,
    // Main CPU -> SPC700 ($2140-$2143 writes, $F4-$F7 reads)
    input_ports: [u8; 4],
    // SPC700 -> main CPU ($F4-$F7 writes, $2140-$2143 reads)
    output_ports: [u8; 4],
    aux_f8: u8,
    aux_f9: u8,
    timer_0: SlowTimer,
    timer_1: SlowTimer,
    timer_2: FastTimer,
}

impl ApuRegisters {
    fn new() -> Self {
        Self {
            ipl_mapped: true,
            dsp_addr: 0,
            input_ports: [0; 4],
            output_ports: [0; 4],
            aux_f8: 0,
            aux_f9: 0,
            timer_0: SlowTimer::new(),
            timer_1: SlowTimer::new(),
            timer_2: FastTimer::new(),
        }
    }

    fn read(&mut self, register: u8, dsp: &Dsp) -> u8 {
        match register {
            0x0 => {
                log::debug!("read from the unimplemented SPC test register");
                0x00
            }
            0x1 => {
                u8::from(self.timer_0.enabled())
                    | (u8::from(self.timer_1.enabled()) << 1)
                    | (u8::from(self.timer_2.enabled()) << 2)
                    | (u8::from(self.ipl_mapped) << 7)
            }
            0x2 => self.dsp_addr,
            0x3 => dsp.read(self.dsp_addr & 0x7F),
            0x4..=0x7 => self.input_ports[usize::from(register - 4)],
            0x8 => self.aux_f8,
            0x9 => self.aux_f9,
            0xA..=0xC => 0,
            0xD => self.timer_0.read_output(),
            0xE => self.timer_1.read_output(),
            _ => self.timer_2.read_output(),
        }
    }

    fn write(&mut self, register: u8, value: u8, dsp: &mut Dsp) {
        match register {
            0x0 => {
                log::debug!("write to the unimplemented SPC test register: {value:02X}");
            }
            0x1 => {
                // Control: timer enables, port clears, IPL overlay
                self.timer_0.set_enabled(value.bit(0));
                self.timer_1.set_enabled(value.bit(1));
                self.timer_2.set_enabled(value.bit(2));

                if value.bit(4) {
                    self.input_ports[0] = 0;
                    self.input_ports[1] = 0;
                }
                if value.bit(5) {
                    self.input_ports[2] = 0;
                    self.input_ports[3] = 0;
                }

                self.ipl_mapped = value.bit(7);
            }
            0x2 => {
                self.dsp_addr = value;
            }
            0x3 => {
                // The upper half of the DSP address space is read-only
                if self.dsp_addr < 0x80 {
                    dsp.write(self.dsp_addr, value);
                }
            }
            0x4..=0x7 => {
                self.output_ports[usize::from(register - 4)] = value;
            }
            0x8 => {
                self.aux_f8 = value;
            }
            0x9 => {
                self.aux_f9 = value;
            }
            0xA => self.timer_0.set_target(value),
            0xB => self.timer_1.set_target(value),
            0xC => self.timer_2.set_target(value),
            _ => {
                // Timer outputs are read-only
            }
        }
    }
}

struct Spc700Bus<'a> {
    ram: &'a mut BoxedArray<u8, AUDIO_RAM_LEN>,
    registers: &'a mut ApuRegisters,
    dsp: &'a mut Dsp,
    cycles: &'a mut u64,
}

impl Spc700Bus<'_> {
    /// One SPC clock: timers always tick, the DSP every 32 clocks.
    fn cycle(&mut self) {
        *self.cycles += 1;
        self.registers.timer_0.tick();
        self.registers.timer_1.tick();
        self.registers.timer_2.tick();
        if *self.cycles % CYCLES_PER_DSP_TICK == 0 {
            self.dsp.cycle(self.ram);
        }
    }
}

impl BusInterface for Spc700Bus<'_> {
    fn read(&mut self, address: u16) -> u8 {
        self.cycle();
        match address {
            0x00F0..=0x00FF => self.registers.read((address & 0xF) as u8, self.dsp),
            0xFFC0..=0xFFFF if self.registers.ipl_mapped => {
                bootrom::IPL_ROM[usize::from(address & 0x3F)]
            }
            _ => self.ram[usize::from(address)],
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        self.cycle();
        match address {
            0x00F0..=0x00FF => {
                self.registers.write((address & 0xF) as u8, value, self.dsp);
            }
            _ => {
                // The RAM under the IPL ROM is always writable
                self.ram[usize::from(address)] = value;
            }
        }
    }

    fn idle(&mut self) {
        self.cycle();
    }
}

macro_rules! spc700_bus {
    ($self:expr) => {
        Spc700Bus {
            ram: &mut $self.ram,
            registers: &mut $self.registers,
            dsp: &mut $self.dsp,
            cycles: &mut $self.cycles,
        }
    };
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Apu {
    spc700: Spc700,
    dsp: Dsp,
    ram: BoxedArray<u8, AUDIO_RAM_LEN>,
    registers: ApuRegisters,
    cycles: u64,
}

impl Apu {
    pub(crate) fn new() -> Self {
        let mut apu = Self {
            spc700: Spc700::new(),
            dsp: Dsp::new(),
            ram: BoxedArray::new(),
            registers: ApuRegisters::new(),
            cycles: 0,
        };
        apu.spc700.reset(&mut spc700_bus!(apu));
        apu
    }

    pub(crate) fn reset(&mut self) {
        self.registers = ApuRegisters::new();
        self.dsp.reset();
        self.cycles = 0;
        self.spc700.reset(&mut spc700_bus!(self));
    }

    /// Runs whole SPC700 opcodes until at least `target` SPC clocks have
    /// elapsed since power-on. The caller derives the target from the master
    /// clock, keeping both cores in deterministic lock-step.
    pub(crate) fn catch_up(&mut self, target: u64) {
        while self.cycles < target {
            self.spc700.run_opcode(&mut spc700_bus!(self));
        }
    }

    #[inline]
    pub(crate) fn cycles(&self) -> u64 {
        self.cycles
    }

    // --- main CPU mailbox ($2140-$2143) ---

    pub(crate) fn read_port(&self, port: u8) -> u8 {
        self.registers.output_ports[usize::from(port & 3)]
    }

    pub(crate) fn write_port(&mut self, port: u8, value: u8) {
        self.registers.input_ports[usize::from(port & 3)] = value;
    }

    /// Overrides an SPC-side output port; the render service uses this to
    /// fake the sound driver's ready handshake.
    pub(crate) fn mock_output_port(&mut self, port: u8, value: u8) {
        self.registers.output_ports[usize::from(port & 3)] = value;
    }

    // --- host audio ---

    pub(crate) fn new_frame(&mut self) {
        self.dsp.new_frame();
    }

    pub(crate) fn get_samples(&self, out: &mut [i16], samples_per_frame: usize, pal: bool) {
        self.dsp.get_samples(out, samples_per_frame, pal);
    }

    pub(crate) fn copy_native_frame(&self, out: &mut [i16], pal: bool) -> usize {
        self.dsp.copy_native_frame(out, pal)
    }

    pub(crate) fn set_interpolation(&mut self, mode: InterpolationMode) {
        self.dsp.interpolation = mode;
    }

    pub(crate) fn set_channel_mute(&mut self, ch: usize, mute: bool) {
        self.dsp.set_channel_mute(ch, mute);
    }

    pub(crate) fn spc700(&self) -> &Spc700 {
        &self.spc700
    }

    pub(crate) fn aram(&self) -> &AudioRam {
        &self.ram
    }

    pub(crate) fn aram_mut(&mut self) -> &mut AudioRam {
        &mut self.ram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_starts_at_ipl_entry() {
        let apu = Apu::new();
        assert_eq!(apu.spc700().registers().pc, 0xFFC0);
    }

    #[test]
    fn ipl_rom_reads_through_the_overlay() {
        let mut apu = Apu::new();
        let mut bus = spc700_bus!(apu);
        assert_eq!(bus.read(0xFFC0), 0xCD);

        // Writes land in the RAM underneath; unmapping exposes it
        bus.write(0xFFC0, 0x42);
        assert_eq!(bus.read(0xFFC0), 0xCD);
        bus.registers.ipl_mapped = false;
        assert_eq!(bus.read(0xFFC0), 0x42);
    }

    #[test]
    fn ipl_handshake_signals_ready() {
        let mut apu = Apu::new();

        // The IPL clears zero page and then writes $AA/$BB to ports 0/1
        apu.catch_up(4096);
        assert_eq!(apu.read_port(0), 0xAA);
        assert_eq!(apu.read_port(1), 0xBB);
    }

    #[test]
    fn ipl_upload_protocol_transfers_a_byte() {
        let mut apu = Apu::new();
        apu.catch_up(4096);
        assert_eq!(apu.read_port(0), 0xAA);

        // Begin transfer: destination $0300 in ports 2/3, $CC in port 0
        apu.write_port(1, 0x01);
        apu.write_port(2, 0x00);
        apu.write_port(3, 0x03);
        apu.write_port(0, 0xCC);

        // The IPL acknowledges by echoing $CC to port 0
        let mut acked = false;
        for _ in 0..64 {
            apu.catch_up(apu.cycles() + 64);
            if apu.read_port(0) == 0xCC {
                acked = true;
                break;
            }
        }
        assert!(acked, "IPL never acknowledged the transfer start");

        // First data byte at index 0
        apu.write_port(1, 0x5A);
        apu.write_port(0, 0x00);
        let mut echoed = false;
        for _ in 0..64 {
            apu.catch_up(apu.cycles() + 64);
            if apu.read_port(0) == 0x00 {
                echoed = true;
                break;
            }
        }
        assert!(echoed, "IPL never acknowledged the data byte");
        assert_eq!(apu.aram()[0x0300], 0x5A);
    }

    #[test]
    fn timer_2_counts_at_64khz() {
        let mut apu = Apu::new();
        // Unmap timers' gate via direct register writes through the bus
        let mut bus = spc700_bus!(apu);
        bus.write(0x00FC, 4); // timer 2 target
        bus.write(0x00F1, 0x84); // enable timer 2, keep IPL mapped

        // 16 SPC clocks per stage tick, 4 ticks per output increment
        for _ in 0..16 * 4 {
            bus.cycle();
        }
        assert_eq!(bus.registers.timer_2.read_output(), 1);
    }
}
