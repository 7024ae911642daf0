mod instructions;

use crate::traits::BusInterface;
use bincode::{Decode, Encode};
use yaze_common::num::GetBit;

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusRegister {
    pub carry: bool,
    pub zero: bool,
    pub irq_disabled: bool,
    pub decimal_mode: bool,
    // true = 8-bit index registers
    pub index_8bit: bool,
    // true = 8-bit accumulator/memory
    pub accumulator_8bit: bool,
    pub overflow: bool,
    pub negative: bool,
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self {
            carry: false,
            zero: false,
            irq_disabled: true,
            decimal_mode: false,
            index_8bit: true,
            accumulator_8bit: true,
            overflow: false,
            negative: false,
        }
    }
}

impl From<StatusRegister> for u8 {
    fn from(value: StatusRegister) -> Self {
        (u8::from(value.negative) << 7)
            | (u8::from(value.overflow) << 6)
            | (u8::from(value.accumulator_8bit) << 5)
            | (u8::from(value.index_8bit) << 4)
            | (u8::from(value.decimal_mode) << 3)
            | (u8::from(value.irq_disabled) << 2)
            | (u8::from(value.zero) << 1)
            | u8::from(value.carry)
    }
}

impl From<u8> for StatusRegister {
    fn from(value: u8) -> Self {
        Self {
            carry: value.bit(0),
            zero: value.bit(1),
            irq_disabled: value.bit(2),
            decimal_mode: value.bit(3),
            index_8bit: value.bit(4),
            accumulator_8bit: value.bit(5),
            overflow: value.bit(6),
            negative: value.bit(7),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    // Accumulator
    pub a: u16,
    // Index registers
    pub x: u16,
    pub y: u16,
    // Stack pointer
    pub s: u16,
    // Direct page pointer
    pub d: u16,
    // Program bank register
    pub pbr: u8,
    // Program counter
    pub pc: u16,
    // Data bank register
    pub dbr: u8,
    // Status register
    pub p: StatusRegister,
    // Emulation mode flag
    pub emulation_mode: bool,
}

impl Registers {
    fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            s: 0x01FF,
            d: 0,
            pbr: 0,
            pc: 0,
            dbr: 0,
            p: StatusRegister::default(),
            // The 65816 always powers on in emulation mode
            emulation_mode: true,
        }
    }

    pub(crate) fn set_zn(&mut self, value: u16, byte: bool) {
        if byte {
            self.p.zero = value & 0x00FF == 0;
            self.p.negative = value.bit(7);
        } else {
            self.p.zero = value == 0;
            self.p.negative = value.bit(15);
        }
    }

    /// Writes the status byte, re-applying the E-mode and X-flag invariants.
    pub(crate) fn set_status(&mut self, value: u8) {
        self.p = value.into();

        if self.emulation_mode {
            self.p.accumulator_8bit = true;
            self.p.index_8bit = true;
            self.s = 0x0100 | (self.s & 0x00FF);
        }

        if self.p.index_8bit {
            self.x &= 0x00FF;
            self.y &= 0x00FF;
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct State {
    last_nmi: bool,
    nmi_wanted: bool,
    irq_wanted: bool,
    int_wanted: bool,
    int_delay: bool,
    waiting: bool,
    stopped: bool,
    reset_wanted: bool,
}

const NATIVE_COP_VECTOR: u16 = 0xFFE4;
const NATIVE_BRK_VECTOR: u16 = 0xFFE6;
const NATIVE_NMI_VECTOR: u16 = 0xFFEA;
const NATIVE_IRQ_VECTOR: u16 = 0xFFEE;
const EMULATION_COP_VECTOR: u16 = 0xFFF4;
const EMULATION_NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const EMULATION_IRQ_VECTOR: u16 = 0xFFFE;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Wdc65816 {
    registers: Registers,
    state: State,
}

impl Wdc65816 {
    #[must_use]
    pub fn new() -> Self {
        Self { registers: Registers::new(), state: State::default() }
    }

    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.p.irq_disabled = true;
        self.registers.p.decimal_mode = false;
        self.registers.emulation_mode = true;
        self.registers.p.accumulator_8bit = true;
        self.registers.p.index_8bit = true;
        self.registers.x &= 0x00FF;
        self.registers.y &= 0x00FF;
        self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        self.registers.d = 0;
        self.registers.dbr = 0;
        self.registers.pbr = 0;

        self.state = State::default();

        let lsb = bus.read(RESET_VECTOR.into());
        let msb = bus.read(u32::from(RESET_VECTOR) + 1);
        self.registers.pc = u16::from_le_bytes([lsb, msb]);

        log::debug!("65816 reset; PC={:04X}", self.registers.pc);
    }

    /// Executes one full instruction (or takes a pending interrupt) and
    /// returns. All cycle costs are delivered through the bus.
    pub fn run_opcode<B: BusInterface>(&mut self, bus: &mut B) {
        if self.state.reset_wanted {
            self.state.reset_wanted = false;
            // Interrupt-like entry, except the stack pushes turn into reads
            bus.read(u24(self.registers.pbr, self.registers.pc));
            bus.idle(false);
            let mut sp = self.registers.s;
            for _ in 0..3 {
                bus.read((0x0100 | (sp & 0x00FF)).into());
                sp = sp.wrapping_sub(1);
            }
            self.registers.s = 0x0100 | (sp & 0x00FF);
            self.reset(bus);
            return;
        }

        if self.state.stopped {
            bus.idle(true);
            return;
        }

        if self.state.waiting {
            if bus.nmi() || bus.irq() || self.state.nmi_wanted {
                self.state.waiting = false;
                bus.idle(false);
                self.check_int(bus);
                bus.idle(false);
            } else {
                bus.idle(true);
            }
            return;
        }

        if self.state.int_wanted {
            // Dummy opcode fetch before trapping to the vector
            bus.read(u24(self.registers.pbr, self.registers.pc));
            self.do_interrupt(bus);
        } else {
            let opcode = self.read_opcode(bus);
            instructions::execute(self, opcode, bus);
        }
    }

    pub fn request_reset(&mut self) {
        self.state.reset_wanted = true;
    }

    #[inline]
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.state.stopped
    }

    #[inline]
    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    #[inline]
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn set_registers(&mut self, registers: Registers) {
        self.registers = registers;

        if self.registers.emulation_mode {
            // Stack is forced to page 1 in emulation mode
            self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        }
        self.state.stopped = false;
        self.state.waiting = false;
    }

    /// Samples the interrupt inputs and recomputes the pending latch; called
    /// on the final cycle of each instruction. NMI is edge-latched; IRQ is
    /// level-sensitive against the I flag. `int_delay` suppresses recognition
    /// for exactly one instruction after I-flag writes.
    pub(crate) fn check_int<B: BusInterface>(&mut self, bus: &B) {
        let nmi = bus.nmi();
        self.state.nmi_wanted |= nmi && !self.state.last_nmi;
        self.state.last_nmi = nmi;
        self.state.irq_wanted = bus.irq();

        self.state.int_wanted = (self.state.nmi_wanted
            || (self.state.irq_wanted && !self.registers.p.irq_disabled))
            && !self.state.int_delay;
        self.state.int_delay = false;
    }

    /// One-instruction interrupt recognition delay, scheduled by I-flag
    /// writes and by NMI-enable edge cases in the host system.
    pub fn delay_int(&mut self) {
        self.state.int_delay = true;
    }

    fn do_interrupt<B: BusInterface>(&mut self, bus: &mut B) {
        bus.idle(false);

        if !self.registers.emulation_mode {
            self.push_byte(bus, self.registers.pbr);
        }
        self.push_byte(bus, (self.registers.pc >> 8) as u8);
        self.push_byte(bus, self.registers.pc as u8);
        self.push_byte(bus, self.registers.p.into());

        self.registers.p.irq_disabled = true;
        self.registers.p.decimal_mode = false;
        self.registers.pbr = 0;
        self.state.int_wanted = false;

        let vector = if self.state.nmi_wanted {
            self.state.nmi_wanted = false;
            if self.registers.emulation_mode { EMULATION_NMI_VECTOR } else { NATIVE_NMI_VECTOR }
        } else if self.registers.emulation_mode {
            EMULATION_IRQ_VECTOR
        } else {
            NATIVE_IRQ_VECTOR
        };

        let lsb = bus.read(vector.into());
        let msb = bus.read(u32::from(vector) + 1);
        self.registers.pc = u16::from_le_bytes([lsb, msb]);

        log::trace!("interrupt taken, vector {vector:04X} -> PC {:04X}", self.registers.pc);
    }

    pub(crate) fn software_interrupt<B: BusInterface>(&mut self, bus: &mut B, cop: bool) {
        if !self.registers.emulation_mode {
            self.push_byte(bus, self.registers.pbr);
        }
        self.push_byte(bus, (self.registers.pc >> 8) as u8);
        self.push_byte(bus, self.registers.pc as u8);
        // BRK reads as B=1 in the emulation-mode status byte
        let status =
            u8::from(self.registers.p) | if self.registers.emulation_mode { 0x10 } else { 0 };
        self.push_byte(bus, status);

        self.registers.p.irq_disabled = true;
        self.registers.p.decimal_mode = false;
        self.registers.pbr = 0;

        let vector = match (cop, self.registers.emulation_mode) {
            (true, true) => EMULATION_COP_VECTOR,
            (true, false) => NATIVE_COP_VECTOR,
            (false, true) => EMULATION_IRQ_VECTOR,
            (false, false) => NATIVE_BRK_VECTOR,
        };

        self.check_int(bus);
        let lsb = bus.read(vector.into());
        let msb = bus.read(u32::from(vector) + 1);
        self.registers.pc = u16::from_le_bytes([lsb, msb]);
    }

    pub(crate) fn wait(&mut self) {
        self.state.waiting = true;
    }

    pub(crate) fn stop(&mut self) {
        self.state.stopped = true;
    }

    #[inline]
    pub(crate) fn read_opcode<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(u24(self.registers.pbr, self.registers.pc));
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    pub(crate) fn read_opcode_word<B: BusInterface>(&mut self, bus: &mut B, int_check: bool) -> u16 {
        let lsb = self.read_opcode(bus);
        if int_check {
            self.check_int(bus);
        }
        let msb = self.read_opcode(bus);
        u16::from_le_bytes([lsb, msb])
    }

    pub(crate) fn push_byte<B: BusInterface>(&mut self, bus: &mut B, value: u8) {
        bus.write(self.registers.s.into(), value);
        self.registers.s = self.registers.s.wrapping_sub(1);
        if self.registers.emulation_mode && self.registers.s & 0xFF00 != 0x0100 {
            // Stack escaped page 1; masked with a wrap per the error policy
            log::warn!("emulation-mode stack underflow at PC {:04X}", self.registers.pc);
            self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        }
    }

    pub(crate) fn pop_byte<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        self.registers.s = self.registers.s.wrapping_add(1);
        if self.registers.emulation_mode && self.registers.s & 0xFF00 != 0x0100 {
            log::warn!("emulation-mode stack overflow at PC {:04X}", self.registers.pc);
            self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        }
        bus.read(self.registers.s.into())
    }

    pub(crate) fn push_word<B: BusInterface>(&mut self, bus: &mut B, value: u16, int_check: bool) {
        self.push_byte(bus, (value >> 8) as u8);
        if int_check {
            self.check_int(bus);
        }
        self.push_byte(bus, value as u8);
    }

    pub(crate) fn pop_word<B: BusInterface>(&mut self, bus: &mut B, int_check: bool) -> u16 {
        let lsb = self.pop_byte(bus);
        if int_check {
            self.check_int(bus);
        }
        let msb = self.pop_byte(bus);
        u16::from_le_bytes([lsb, msb])
    }
}

impl Default for Wdc65816 {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
pub(crate) fn u24(bank: u8, address: u16) -> u32 {
    (u32::from(bank) << 16) | u32::from(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        memory: Vec<u8>,
        idle_cycles: u32,
        nmi_line: bool,
        irq_line: bool,
    }

    impl TestBus {
        fn new() -> Self {
            Self { memory: vec![0; 0x1000000], idle_cycles: 0, nmi_line: false, irq_line: false }
        }

        fn with_program(program: &[u8]) -> Self {
            let mut bus = Self::new();
            bus.memory[0xFFFC] = 0x00;
            bus.memory[0xFFFD] = 0x80;
            bus.memory[0x8000..0x8000 + program.len()].copy_from_slice(program);
            bus
        }
    }

    impl BusInterface for TestBus {
        fn read(&mut self, address: u32) -> u8 {
            self.memory[(address & 0xFFFFFF) as usize]
        }

        fn write(&mut self, address: u32, value: u8) {
            self.memory[(address & 0xFFFFFF) as usize] = value;
        }

        fn idle(&mut self, _waiting: bool) {
            self.idle_cycles += 1;
        }

        fn nmi(&self) -> bool {
            self.nmi_line
        }

        fn irq(&self) -> bool {
            self.irq_line
        }
    }

    fn boot(program: &[u8]) -> (Wdc65816, TestBus) {
        let mut bus = TestBus::with_program(program);
        let mut cpu = Wdc65816::new();
        cpu.reset(&mut bus);
        (cpu, bus)
    }

    #[test]
    fn reset_reads_emulation_vector() {
        let (cpu, _bus) = boot(&[0xEA]);
        assert_eq!(cpu.registers().pc, 0x8000);
        assert!(cpu.registers().emulation_mode);
        assert!(cpu.registers().p.accumulator_8bit);
        assert!(cpu.registers().p.index_8bit);
        assert_eq!(cpu.registers().s & 0xFF00, 0x0100);
    }

    #[test]
    fn emulation_mode_stack_wraps_within_page_1() {
        // LDA #$AB; PHA with SP=$0100 must write $0100 and leave SP=$01FF
        let (mut cpu, mut bus) = boot(&[0xA9, 0xAB, 0x48]);
        cpu.registers_mut().s = 0x0100;

        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);

        assert_eq!(bus.memory[0x0100], 0xAB);
        assert_eq!(cpu.registers().s, 0x01FF);
    }

    #[test]
    fn xce_enters_native_mode_and_back() {
        // CLC; XCE enters native mode
        let (mut cpu, mut bus) = boot(&[0x18, 0xFB, 0x38, 0xFB]);
        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);
        assert!(!cpu.registers().emulation_mode);
        assert!(cpu.registers().p.carry);

        // SEC; XCE back to emulation: M/X forced, stack repinned to page 1
        cpu.registers_mut().s = 0x1234;
        cpu.registers_mut().p.accumulator_8bit = false;
        cpu.registers_mut().p.index_8bit = false;
        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);
        assert!(cpu.registers().emulation_mode);
        assert!(cpu.registers().p.accumulator_8bit);
        assert!(cpu.registers().p.index_8bit);
        assert_eq!(cpu.registers().s, 0x0134);
    }

    #[test]
    fn adc_binary_and_decimal() {
        // CLC; ADC #$45 (A=$38, decimal) = $83
        let (mut cpu, mut bus) = boot(&[0x18, 0x69, 0x45]);
        cpu.registers_mut().a = 0x38;
        cpu.registers_mut().p.decimal_mode = true;
        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);
        assert_eq!(cpu.registers().a & 0x00FF, 0x83);
        assert!(!cpu.registers().p.carry);

        // Binary: $FF + $02 + carry-clear = $01 with carry out
        let (mut cpu, mut bus) = boot(&[0x18, 0x69, 0x02]);
        cpu.registers_mut().a = 0xFF;
        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);
        assert_eq!(cpu.registers().a & 0x00FF, 0x01);
        assert!(cpu.registers().p.carry);
    }

    #[test]
    fn sbc_decimal() {
        // SEC; SBC #$18 with A=$42 decimal = $24
        let (mut cpu, mut bus) = boot(&[0x38, 0xE9, 0x18]);
        cpu.registers_mut().a = 0x42;
        cpu.registers_mut().p.decimal_mode = true;
        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);
        assert_eq!(cpu.registers().a & 0x00FF, 0x24);
        assert!(cpu.registers().p.carry);
    }

    #[test]
    fn block_move_mvn_copies_until_a_wraps() {
        // Native mode, 16-bit X/Y assumed via register setup
        let (mut cpu, mut bus) = boot(&[0x54, 0x00, 0x00]);
        {
            let r = cpu.registers_mut();
            r.emulation_mode = false;
            r.p.index_8bit = false;
            r.a = 0x0002; // 3 bytes
            r.x = 0x2000;
            r.y = 0x3000;
        }
        bus.memory[0x2000..0x2003].copy_from_slice(&[0x11, 0x22, 0x33]);

        // MVN executes once per byte, rewinding PC until A == 0xFFFF
        for _ in 0..3 {
            cpu.run_opcode(&mut bus);
        }

        assert_eq!(&bus.memory[0x3000..0x3003], &[0x11, 0x22, 0x33]);
        assert_eq!(cpu.registers().a, 0xFFFF);
        assert_eq!(cpu.registers().x, 0x2003);
        assert_eq!(cpu.registers().y, 0x3003);
        assert_eq!(cpu.registers().pc, 0x8003);
    }

    #[test]
    fn nmi_vectors_through_fffa_in_emulation_mode() {
        let (mut cpu, mut bus) = boot(&[0xEA, 0xEA, 0xEA]);
        bus.memory[0xFFFA] = 0x00;
        bus.memory[0xFFFB] = 0x90;

        cpu.run_opcode(&mut bus); // NOP
        bus.nmi_line = true;
        cpu.run_opcode(&mut bus); // NOP's final cycle latches the edge
        cpu.run_opcode(&mut bus); // interrupt entry
        assert_eq!(cpu.registers().pc, 0x9000);
        assert!(cpu.registers().p.irq_disabled);
    }

    #[test]
    fn irq_masked_by_i_flag() {
        let (mut cpu, mut bus) = boot(&[0xEA, 0xEA, 0xEA, 0xEA]);
        bus.irq_line = true;
        for _ in 0..4 {
            cpu.run_opcode(&mut bus);
        }
        // Reset leaves I set, so execution never leaves the NOP run
        assert_eq!(cpu.registers().pc, 0x8004);
    }

    #[test]
    fn wai_parks_until_interrupt_edge() {
        let (mut cpu, mut bus) = boot(&[0xCB, 0xEA]);
        cpu.run_opcode(&mut bus); // WAI
        let pc_before = cpu.registers().pc;
        cpu.run_opcode(&mut bus);
        assert_eq!(cpu.registers().pc, pc_before);

        // IRQ edge resumes execution; with I set the interrupt is not taken
        bus.irq_line = true;
        cpu.run_opcode(&mut bus); // wake
        bus.irq_line = false;
        cpu.run_opcode(&mut bus); // NOP after WAI
        assert_eq!(cpu.registers().pc, 0x8002);
    }

    #[test]
    fn stp_halts_until_reset() {
        let (mut cpu, mut bus) = boot(&[0xDB, 0xEA]);
        cpu.run_opcode(&mut bus);
        assert!(cpu.stopped());
        let pc = cpu.registers().pc;
        bus.nmi_line = true;
        cpu.run_opcode(&mut bus);
        assert_eq!(cpu.registers().pc, pc);
    }

    #[test]
    fn rep_sep_flag_writes() {
        // Native mode: REP #$30 widens A and X; SEP #$20 narrows A again
        let (mut cpu, mut bus) = boot(&[0x18, 0xFB, 0xC2, 0x30, 0xE2, 0x20]);
        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);
        cpu.run_opcode(&mut bus);
        assert!(!cpu.registers().p.accumulator_8bit);
        assert!(!cpu.registers().p.index_8bit);
        cpu.run_opcode(&mut bus);
        assert!(cpu.registers().p.accumulator_8bit);
        assert!(!cpu.registers().p.index_8bit);
    }

    #[test]
    fn jsl_rtl_round_trip() {
        let (mut cpu, mut bus) = boot(&[0x18, 0xFB, 0x22, 0x00, 0x90, 0x02]);
        bus.memory[0x029000] = 0x6B; // RTL
        cpu.run_opcode(&mut bus); // CLC
        cpu.run_opcode(&mut bus); // XCE
        cpu.run_opcode(&mut bus); // JSL $029000
        assert_eq!(cpu.registers().pbr, 0x02);
        assert_eq!(cpu.registers().pc, 0x9000);
        cpu.run_opcode(&mut bus); // RTL
        assert_eq!(cpu.registers().pbr, 0x00);
        assert_eq!(cpu.registers().pc, 0x8006);
    }
}
