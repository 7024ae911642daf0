//! WRAM, the `$2180-$2183` WRAM data port, open bus, and the CPU I/O
//! register block at `$4200-$421F` (interrupt control, multiplier/divider,
//! auto-joypad results).

pub(crate) mod cartridge;
pub(crate) mod dma;

use crate::memory::cartridge::Cartridge;
use bincode::{Decode, Encode};
use yaze_common::boxedarray::BoxedArray;
use yaze_common::num::{GetBit, U16Ext};

pub(crate) const WRAM_LEN: usize = 128 * 1024;

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Memory {
    wram: BoxedArray<u8, WRAM_LEN>,
    wram_port_address: u32,
    open_bus: u8,
    pub(crate) cartridge: Cartridge,
}

impl Memory {
    pub(crate) fn new(cartridge: Cartridge) -> Self {
        Self { wram: BoxedArray::new(), wram_port_address: 0, open_bus: 0, cartridge }
    }

    #[inline]
    pub(crate) fn read_wram(&self, address: u32) -> u8 {
        self.wram[(address as usize) & (WRAM_LEN - 1)]
    }

    #[inline]
    pub(crate) fn write_wram(&mut self, address: u32, value: u8) {
        self.wram[(address as usize) & (WRAM_LEN - 1)] = value;
    }

    pub(crate) fn read_wram_port(&mut self) -> u8 {
        let value = self.read_wram(self.wram_port_address);
        self.wram_port_address = (self.wram_port_address + 1) & 0x1FFFF;
        value
    }

    pub(crate) fn write_wram_port(&mut self, value: u8) {
        self.write_wram(self.wram_port_address, value);
        self.wram_port_address = (self.wram_port_address + 1) & 0x1FFFF;
    }

    pub(crate) fn write_wram_port_address_low(&mut self, value: u8) {
        self.wram_port_address = (self.wram_port_address & 0x1FF00) | u32::from(value);
    }

    pub(crate) fn write_wram_port_address_mid(&mut self, value: u8) {
        self.wram_port_address = (self.wram_port_address & 0x100FF) | (u32::from(value) << 8);
    }

    pub(crate) fn write_wram_port_address_high(&mut self, value: u8) {
        self.wram_port_address = (self.wram_port_address & 0x0FFFF) | (u32::from(value & 1) << 16);
    }

    #[inline]
    pub(crate) fn cpu_open_bus(&self) -> u8 {
        self.open_bus
    }

    #[inline]
    pub(crate) fn set_open_bus(&mut self, value: u8) {
        self.open_bus = value;
    }

}

/// Interrupt and auto-joypad control plus the multiply/divide units.
#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct CpuInternalRegisters {
    // NMITIMEN ($4200)
    pub(crate) nmi_enabled: bool,
    pub(crate) h_irq_enabled: bool,
    pub(crate) v_irq_enabled: bool,
    pub(crate) auto_joypad_enabled: bool,
    // WRIO ($4201)
    wrio: u8,
    // Multiplier/divider inputs
    multiplicand: u8,
    dividend: u16,
    // H/V IRQ setpoints ($4207-$420A)
    pub(crate) h_timer: u16,
    pub(crate) v_timer: u16,
    // MEMSEL ($420D)
    pub(crate) fast_rom: bool,
    // Results
    divide_result: u16,
    multiply_result: u16,
    // Status flags
    pub(crate) nmi_flag: bool,
    pub(crate) irq_flag: bool,
    pub(crate) in_vblank: bool,
    pub(crate) in_hblank: bool,
    pub(crate) auto_joypad_busy: bool,
    // Auto-joypad capture ($4218-$421F)
    pub(crate) joypad_results: [u16; 4],
}

impl CpuInternalRegisters {
    pub(crate) fn new() -> Self {
        Self {
            nmi_enabled: false,
            h_irq_enabled: false,
            v_irq_enabled: false,
            auto_joypad_enabled: false,
            wrio: 0xFF,
            multiplicand: 0xFF,
            dividend: 0xFFFF,
            h_timer: 0x01FF,
            v_timer: 0x01FF,
            fast_rom: false,
            divide_result: 0,
            multiply_result: 0,
            nmi_flag: false,
            irq_flag: false,
            in_vblank: false,
            in_hblank: false,
            auto_joypad_busy: false,
            joypad_results: [0; 4],
        }
    }

    /// Registers with no cross-component side effects; `$4200`, `$4201`, and
    /// `$420B/$420C` are handled by the bus dispatch.
    pub(crate) fn write_register(&mut self, address: u16, value: u8) {
        match address & 0xFFFF {
            0x4202 => {
                self.multiplicand = value;
            }
            0x4203 => {
                // Multiplication completes in 8 machine cycles; reads after a
                // whole instruction always see the product
                self.multiply_result = u16::from(self.multiplicand) * u16::from(value);
            }
            0x4204 => {
                self.dividend.set_lsb(value);
            }
            0x4205 => {
                self.dividend.set_msb(value);
            }
            0x4206 => {
                if value == 0 {
                    self.divide_result = 0xFFFF;
                    self.multiply_result = self.dividend;
                } else {
                    self.divide_result = self.dividend / u16::from(value);
                    self.multiply_result = self.dividend % u16::from(value);
                }
            }
            0x4207 => {
                self.h_timer.set_lsb(value);
            }
            0x4208 => {
                self.h_timer.set_msb(value & 1);
            }
            0x4209 => {
                self.v_timer.set_lsb(value);
            }
            0x420A => {
                self.v_timer.set_msb(value & 1);
            }
            0x420D => {
                self.fast_rom = value.bit(0);
            }
            _ => {
                log::trace!("unhandled CPU register write {address:04X} = {value:02X}");
            }
        }
    }

    pub(crate) fn read_register(&mut self, address: u16, open_bus: u8) -> Option<u8> {
        match address & 0xFFFF {
            0x4210 => {
                // RDNMI: vblank NMI flag, cleared on read; low bits are the
                // CPU revision
                let value = (u8::from(self.nmi_flag) << 7) | (open_bus & 0x70) | 0x02;
                self.nmi_flag = false;
                Some(value)
            }
            0x4211 => {
                // TIMEUP: H/V IRQ flag, cleared on read
                let value = (u8::from(self.irq_flag) << 7) | (open_bus & 0x7F);
                self.irq_flag = false;
                Some(value)
            }
            0x4212 => {
                // HVBJOY
                Some(
                    (u8::from(self.in_vblank) << 7)
                        | (u8::from(self.in_hblank) << 6)
                        | (open_bus & 0x3E)
                        | u8::from(self.auto_joypad_busy),
                )
            }
            0x4213 => Some(self.wrio),
            0x4214 => Some(self.divide_result.lsb()),
            0x4215 => Some(self.divide_result.msb()),
            0x4216 => Some(self.multiply_result.lsb()),
            0x4217 => Some(self.multiply_result.msb()),
            0x4218..=0x421F => {
                let port = ((address - 0x4218) / 2) as usize;
                let result = self.joypad_results[port];
                Some(if address & 1 == 0 { result.lsb() } else { result.msb() })
            }
            _ => None,
        }
    }

    /// WRIO writes latch the PPU H/V counters on a falling edge of bit 7;
    /// returns true when that edge occurred.
    pub(crate) fn write_wrio(&mut self, value: u8) -> bool {
        let falling_edge = self.wrio.bit(7) && !value.bit(7);
        self.wrio = value;
        falling_edge
    }

    pub(crate) fn wrio_bit7(&self) -> bool {
        self.wrio.bit(7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::cartridge::Cartridge;

    fn test_memory() -> Memory {
        let mut rom = vec![0_u8; 0x10000];
        rom[0x7FC0 + 0x15] = 0x20;
        rom[0x7FFC] = 0x00;
        rom[0x7FFD] = 0x80;
        rom[0x0000] = 0x78;
        Memory::new(Cartridge::create(rom.into_boxed_slice()).unwrap())
    }

    #[test]
    fn wram_port_autoincrements_through_128k() {
        let mut memory = test_memory();
        memory.write_wram_port_address_low(0xFF);
        memory.write_wram_port_address_mid(0xFF);
        memory.write_wram_port_address_high(0x01);

        memory.write_wram_port(0xAB); // $1FFFF
        memory.write_wram_port(0xCD); // wraps to $00000

        assert_eq!(memory.read_wram(0x1FFFF), 0xAB);
        assert_eq!(memory.read_wram(0x00000), 0xCD);
    }

    #[test]
    fn multiplier_produces_16_bit_product() {
        let mut regs = CpuInternalRegisters::new();
        regs.write_register(0x4202, 0xFF);
        regs.write_register(0x4203, 0xFF);
        assert_eq!(regs.read_register(0x4216, 0).unwrap(), 0x01);
        assert_eq!(regs.read_register(0x4217, 0).unwrap(), 0xFE);
    }

    #[test]
    fn divider_reports_quotient_and_remainder() {
        let mut regs = CpuInternalRegisters::new();
        regs.write_register(0x4204, 0x39); // dividend $1239
        regs.write_register(0x4205, 0x12);
        regs.write_register(0x4206, 0x10); // divide by 16

        let quotient = u16::from(regs.read_register(0x4214, 0).unwrap())
            | (u16::from(regs.read_register(0x4215, 0).unwrap()) << 8);
        let remainder = u16::from(regs.read_register(0x4216, 0).unwrap())
            | (u16::from(regs.read_register(0x4217, 0).unwrap()) << 8);
        assert_eq!(quotient, 0x1239 / 16);
        assert_eq!(remainder, 0x1239 % 16);
    }

    #[test]
    fn divide_by_zero_saturates() {
        let mut regs = CpuInternalRegisters::new();
        regs.write_register(0x4204, 0x34);
        regs.write_register(0x4205, 0x12);
        regs.write_register(0x4206, 0x00);

        assert_eq!(regs.read_register(0x4214, 0).unwrap(), 0xFF);
        assert_eq!(regs.read_register(0x4215, 0).unwrap(), 0xFF);
        assert_eq!(regs.read_register(0x4216, 0).unwrap(), 0x34);
        assert_eq!(regs.read_register(0x4217, 0).unwrap(), 0x12);
    }

    #[test]
    fn rdnmi_clears_on_read() {
        let mut regs = CpuInternalRegisters::new();
        regs.nmi_flag = true;
        assert_ne!(regs.read_register(0x4210, 0).unwrap() & 0x80, 0);
        assert_eq!(regs.read_register(0x4210, 0).unwrap() & 0x80, 0);
    }

    #[test]
    fn wrio_reports_falling_edge_of_bit_7() {
        let mut regs = CpuInternalRegisters::new();
        assert!(!regs.write_wrio(0xFF));
        assert!(regs.write_wrio(0x00));
        assert!(!regs.write_wrio(0x00));
        assert!(!regs.write_wrio(0x80));
    }
}
