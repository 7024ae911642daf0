mod alu;
mod flow;
mod load;

use crate::core::{u24, Wdc65816};
use crate::traits::BusInterface;

/// Effective address of an operand as a (low byte, high byte) pair of 24-bit
/// bus addresses. Keeping both resolved up front lets 16-bit accesses honor
/// the bank-0 wrapping rules of direct page and stack addressing.
pub(crate) type AddressPair = (u32, u32);

fn adr_imm(cpu: &mut Wdc65816, byte: bool) -> AddressPair {
    let r = &mut cpu.registers;
    let low = u24(r.pbr, r.pc);
    r.pc = r.pc.wrapping_add(1);
    if byte {
        (low, low)
    } else {
        let high = u24(r.pbr, r.pc);
        r.pc = r.pc.wrapping_add(1);
        (low, high)
    }
}

fn adr_dp<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    let low = cpu.registers.d.wrapping_add(operand.into());
    (low.into(), low.wrapping_add(1).into())
}

/// Direct page indexing wraps within the page when in emulation mode with
/// DL=0; otherwise it is a plain 16-bit add in bank 0.
fn index_direct_page(cpu: &Wdc65816, operand: u8, index: u16) -> u16 {
    let d = cpu.registers.d;
    if cpu.registers.emulation_mode && d & 0x00FF == 0 {
        (d & 0xFF00) | (u16::from(operand).wrapping_add(index) & 0x00FF)
    } else {
        d.wrapping_add(operand.into()).wrapping_add(index)
    }
}

fn adr_dpx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    bus.idle(false);
    let low = index_direct_page(cpu, operand, cpu.registers.x);
    (low.into(), low.wrapping_add(1).into())
}

fn adr_dpy<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    bus.idle(false);
    let low = index_direct_page(cpu, operand, cpu.registers.y);
    (low.into(), low.wrapping_add(1).into())
}

fn read_dp_pointer<B: BusInterface>(bus: &mut B, pointer: u16) -> u16 {
    let lsb = bus.read(pointer.into());
    let msb = bus.read(pointer.wrapping_add(1).into());
    u16::from_le_bytes([lsb, msb])
}

fn adr_idp<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    let pointer = cpu.registers.d.wrapping_add(operand.into());
    let address = read_dp_pointer(bus, pointer);
    let low = u24(cpu.registers.dbr, address);
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_idx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    bus.idle(false);
    let pointer = index_direct_page(cpu, operand, cpu.registers.x);
    let lsb = bus.read(pointer.into());
    let msb = bus.read(index_direct_page(cpu, operand, cpu.registers.x.wrapping_add(1)).into());
    let low = u24(cpu.registers.dbr, u16::from_le_bytes([lsb, msb]));
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_idy<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, write: bool) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    let pointer = cpu.registers.d.wrapping_add(operand.into());
    let base = read_dp_pointer(bus, pointer);
    // Writes, 16-bit index, and page crossings each cost the indexing cycle
    let crosses = base & 0xFF00 != base.wrapping_add(cpu.registers.y) & 0xFF00;
    if write || !cpu.registers.p.index_8bit || crosses {
        bus.idle(false);
    }
    let low = (u24(cpu.registers.dbr, base) + u32::from(cpu.registers.y)) & B::ADDRESS_MASK;
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_idl<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    let pointer = cpu.registers.d.wrapping_add(operand.into());
    let b0 = bus.read(pointer.into());
    let b1 = bus.read(pointer.wrapping_add(1).into());
    let b2 = bus.read(pointer.wrapping_add(2).into());
    let low = u32::from_le_bytes([b0, b1, b2, 0]);
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_ily<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    if cpu.registers.d & 0x00FF != 0 {
        bus.idle(false);
    }
    let pointer = cpu.registers.d.wrapping_add(operand.into());
    let b0 = bus.read(pointer.into());
    let b1 = bus.read(pointer.wrapping_add(1).into());
    let b2 = bus.read(pointer.wrapping_add(2).into());
    let base = u32::from_le_bytes([b0, b1, b2, 0]);
    let low = (base + u32::from(cpu.registers.y)) & B::ADDRESS_MASK;
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_sr<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    bus.idle(false);
    let low = cpu.registers.s.wrapping_add(operand.into());
    (low.into(), low.wrapping_add(1).into())
}

fn adr_isy<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let operand = cpu.read_opcode(bus);
    bus.idle(false);
    let pointer = cpu.registers.s.wrapping_add(operand.into());
    let base = read_dp_pointer(bus, pointer);
    bus.idle(false);
    let low = (u24(cpu.registers.dbr, base) + u32::from(cpu.registers.y)) & B::ADDRESS_MASK;
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_abs<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let address = cpu.read_opcode_word(bus, false);
    let low = u24(cpu.registers.dbr, address);
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_abx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, write: bool) -> AddressPair {
    let base = cpu.read_opcode_word(bus, false);
    let crosses = base & 0xFF00 != base.wrapping_add(cpu.registers.x) & 0xFF00;
    if write || !cpu.registers.p.index_8bit || crosses {
        bus.idle(false);
    }
    let low = (u24(cpu.registers.dbr, base) + u32::from(cpu.registers.x)) & B::ADDRESS_MASK;
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_aby<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, write: bool) -> AddressPair {
    let base = cpu.read_opcode_word(bus, false);
    let crosses = base & 0xFF00 != base.wrapping_add(cpu.registers.y) & 0xFF00;
    if write || !cpu.registers.p.index_8bit || crosses {
        bus.idle(false);
    }
    let low = (u24(cpu.registers.dbr, base) + u32::from(cpu.registers.y)) & B::ADDRESS_MASK;
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_abl<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let address = cpu.read_opcode_word(bus, false);
    let bank = cpu.read_opcode(bus);
    let low = u24(bank, address);
    (low, (low + 1) & B::ADDRESS_MASK)
}

fn adr_alx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) -> AddressPair {
    let address = cpu.read_opcode_word(bus, false);
    let bank = cpu.read_opcode(bus);
    let low = (u24(bank, address) + u32::from(cpu.registers.x)) & B::ADDRESS_MASK;
    (low, (low + 1) & B::ADDRESS_MASK)
}

/// The shared 2-cycle tail of implied opcodes: if an interrupt is pending,
/// the idle cycle turns into a program fetch.
fn adr_imp<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.check_int(bus);
    if cpu.state.int_wanted {
        bus.read(u24(cpu.registers.pbr, cpu.registers.pc));
    } else {
        bus.idle(false);
    }
}

pub(crate) fn execute<B: BusInterface>(cpu: &mut Wdc65816, opcode: u8, bus: &mut B) {
    match opcode {
        0x00 => flow::brk(cpu, bus),
        0x01 => {
            let addr = adr_idx(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x02 => flow::cop(cpu, bus),
        0x03 => {
            let addr = adr_sr(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x04 => {
            let addr = adr_dp(cpu, bus);
            alu::tsb(cpu, bus, addr);
        }
        0x05 => {
            let addr = adr_dp(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x06 => {
            let addr = adr_dp(cpu, bus);
            alu::asl(cpu, bus, addr);
        }
        0x07 => {
            let addr = adr_idl(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x08 => {
            // php
            bus.idle(false);
            cpu.check_int(bus);
            cpu.push_byte(bus, cpu.registers.p.into());
        }
        0x09 => {
            let byte = cpu.registers.p.accumulator_8bit;
            let addr = adr_imm(cpu, byte);
            alu::ora(cpu, bus, addr);
        }
        0x0A => {
            // asl a
            adr_imp(cpu, bus);
            alu::asl_a(cpu);
        }
        0x0B => {
            // phd
            bus.idle(false);
            cpu.push_word(bus, cpu.registers.d, true);
        }
        0x0C => {
            let addr = adr_abs(cpu, bus);
            alu::tsb(cpu, bus, addr);
        }
        0x0D => {
            let addr = adr_abs(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x0E => {
            let addr = adr_abs(cpu, bus);
            alu::asl(cpu, bus, addr);
        }
        0x0F => {
            let addr = adr_abl(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x10 => {
            let negative = cpu.registers.p.negative;
            flow::do_branch(cpu, bus, !negative);
        }
        0x11 => {
            let addr = adr_idy(cpu, bus, false);
            alu::ora(cpu, bus, addr);
        }
        0x12 => {
            let addr = adr_idp(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x13 => {
            let addr = adr_isy(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x14 => {
            let addr = adr_dp(cpu, bus);
            alu::trb(cpu, bus, addr);
        }
        0x15 => {
            let addr = adr_dpx(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x16 => {
            let addr = adr_dpx(cpu, bus);
            alu::asl(cpu, bus, addr);
        }
        0x17 => {
            let addr = adr_ily(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x18 => {
            // clc
            adr_imp(cpu, bus);
            cpu.registers.p.carry = false;
        }
        0x19 => {
            let addr = adr_aby(cpu, bus, false);
            alu::ora(cpu, bus, addr);
        }
        0x1A => {
            // inc a
            adr_imp(cpu, bus);
            alu::inc_a(cpu);
        }
        0x1B => {
            // tcs
            adr_imp(cpu, bus);
            cpu.registers.s = if cpu.registers.emulation_mode {
                0x0100 | (cpu.registers.a & 0x00FF)
            } else {
                cpu.registers.a
            };
        }
        0x1C => {
            let addr = adr_abs(cpu, bus);
            alu::trb(cpu, bus, addr);
        }
        0x1D => {
            let addr = adr_abx(cpu, bus, false);
            alu::ora(cpu, bus, addr);
        }
        0x1E => {
            let addr = adr_abx(cpu, bus, true);
            alu::asl(cpu, bus, addr);
        }
        0x1F => {
            let addr = adr_alx(cpu, bus);
            alu::ora(cpu, bus, addr);
        }
        0x20 => flow::jsr(cpu, bus),
        0x21 => {
            let addr = adr_idx(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x22 => flow::jsl(cpu, bus),
        0x23 => {
            let addr = adr_sr(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x24 => {
            let addr = adr_dp(cpu, bus);
            alu::bit(cpu, bus, addr);
        }
        0x25 => {
            let addr = adr_dp(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x26 => {
            let addr = adr_dp(cpu, bus);
            alu::rol(cpu, bus, addr);
        }
        0x27 => {
            let addr = adr_idl(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x28 => {
            // plp
            bus.idle(false);
            bus.idle(false);
            cpu.check_int(bus);
            let value = cpu.pop_byte(bus);
            cpu.registers.set_status(value);
        }
        0x29 => {
            let byte = cpu.registers.p.accumulator_8bit;
            let addr = adr_imm(cpu, byte);
            alu::and(cpu, bus, addr);
        }
        0x2A => {
            // rol a
            adr_imp(cpu, bus);
            alu::rol_a(cpu);
        }
        0x2B => {
            // pld
            bus.idle(false);
            bus.idle(false);
            let value = cpu.pop_word(bus, true);
            cpu.registers.d = value;
            cpu.registers.set_zn(value, false);
        }
        0x2C => {
            let addr = adr_abs(cpu, bus);
            alu::bit(cpu, bus, addr);
        }
        0x2D => {
            let addr = adr_abs(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x2E => {
            let addr = adr_abs(cpu, bus);
            alu::rol(cpu, bus, addr);
        }
        0x2F => {
            let addr = adr_abl(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x30 => {
            let negative = cpu.registers.p.negative;
            flow::do_branch(cpu, bus, negative);
        }
        0x31 => {
            let addr = adr_idy(cpu, bus, false);
            alu::and(cpu, bus, addr);
        }
        0x32 => {
            let addr = adr_idp(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x33 => {
            let addr = adr_isy(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x34 => {
            let addr = adr_dpx(cpu, bus);
            alu::bit(cpu, bus, addr);
        }
        0x35 => {
            let addr = adr_dpx(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x36 => {
            let addr = adr_dpx(cpu, bus);
            alu::rol(cpu, bus, addr);
        }
        0x37 => {
            let addr = adr_ily(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x38 => {
            // sec
            adr_imp(cpu, bus);
            cpu.registers.p.carry = true;
        }
        0x39 => {
            let addr = adr_aby(cpu, bus, false);
            alu::and(cpu, bus, addr);
        }
        0x3A => {
            // dec a
            adr_imp(cpu, bus);
            alu::dec_a(cpu);
        }
        0x3B => {
            // tsc
            adr_imp(cpu, bus);
            cpu.registers.a = cpu.registers.s;
            cpu.registers.set_zn(cpu.registers.a, false);
        }
        0x3C => {
            let addr = adr_abx(cpu, bus, false);
            alu::bit(cpu, bus, addr);
        }
        0x3D => {
            let addr = adr_abx(cpu, bus, false);
            alu::and(cpu, bus, addr);
        }
        0x3E => {
            let addr = adr_abx(cpu, bus, true);
            alu::rol(cpu, bus, addr);
        }
        0x3F => {
            let addr = adr_alx(cpu, bus);
            alu::and(cpu, bus, addr);
        }
        0x40 => flow::rti(cpu, bus),
        0x41 => {
            let addr = adr_idx(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x42 => {
            // wdm: 2-byte nop
            cpu.check_int(bus);
            cpu.read_opcode(bus);
        }
        0x43 => {
            let addr = adr_sr(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x44 => flow::mvp(cpu, bus),
        0x45 => {
            let addr = adr_dp(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x46 => {
            let addr = adr_dp(cpu, bus);
            alu::lsr(cpu, bus, addr);
        }
        0x47 => {
            let addr = adr_idl(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x48 => load::pha(cpu, bus),
        0x49 => {
            let byte = cpu.registers.p.accumulator_8bit;
            let addr = adr_imm(cpu, byte);
            alu::eor(cpu, bus, addr);
        }
        0x4A => {
            // lsr a
            adr_imp(cpu, bus);
            alu::lsr_a(cpu);
        }
        0x4B => {
            // phk
            bus.idle(false);
            cpu.check_int(bus);
            cpu.push_byte(bus, cpu.registers.pbr);
        }
        0x4C => flow::jmp_abs(cpu, bus),
        0x4D => {
            let addr = adr_abs(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x4E => {
            let addr = adr_abs(cpu, bus);
            alu::lsr(cpu, bus, addr);
        }
        0x4F => {
            let addr = adr_abl(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x50 => {
            let overflow = cpu.registers.p.overflow;
            flow::do_branch(cpu, bus, !overflow);
        }
        0x51 => {
            let addr = adr_idy(cpu, bus, false);
            alu::eor(cpu, bus, addr);
        }
        0x52 => {
            let addr = adr_idp(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x53 => {
            let addr = adr_isy(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x54 => flow::mvn(cpu, bus),
        0x55 => {
            let addr = adr_dpx(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x56 => {
            let addr = adr_dpx(cpu, bus);
            alu::lsr(cpu, bus, addr);
        }
        0x57 => {
            let addr = adr_ily(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x58 => {
            // cli
            adr_imp(cpu, bus);
            cpu.registers.p.irq_disabled = false;
        }
        0x59 => {
            let addr = adr_aby(cpu, bus, false);
            alu::eor(cpu, bus, addr);
        }
        0x5A => load::phy(cpu, bus),
        0x5B => {
            // tcd
            adr_imp(cpu, bus);
            cpu.registers.d = cpu.registers.a;
            cpu.registers.set_zn(cpu.registers.d, false);
        }
        0x5C => flow::jmp_long(cpu, bus),
        0x5D => {
            let addr = adr_abx(cpu, bus, false);
            alu::eor(cpu, bus, addr);
        }
        0x5E => {
            let addr = adr_abx(cpu, bus, true);
            alu::lsr(cpu, bus, addr);
        }
        0x5F => {
            let addr = adr_alx(cpu, bus);
            alu::eor(cpu, bus, addr);
        }
        0x60 => flow::rts(cpu, bus),
        0x61 => {
            let addr = adr_idx(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x62 => flow::per(cpu, bus),
        0x63 => {
            let addr = adr_sr(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x64 => {
            let addr = adr_dp(cpu, bus);
            load::stz(cpu, bus, addr);
        }
        0x65 => {
            let addr = adr_dp(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x66 => {
            let addr = adr_dp(cpu, bus);
            alu::ror(cpu, bus, addr);
        }
        0x67 => {
            let addr = adr_idl(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x68 => load::pla(cpu, bus),
        0x69 => {
            let byte = cpu.registers.p.accumulator_8bit;
            let addr = adr_imm(cpu, byte);
            alu::adc(cpu, bus, addr);
        }
        0x6A => {
            // ror a
            adr_imp(cpu, bus);
            alu::ror_a(cpu);
        }
        0x6B => flow::rtl(cpu, bus),
        0x6C => flow::jmp_ind(cpu, bus),
        0x6D => {
            let addr = adr_abs(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x6E => {
            let addr = adr_abs(cpu, bus);
            alu::ror(cpu, bus, addr);
        }
        0x6F => {
            let addr = adr_abl(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x70 => {
            let overflow = cpu.registers.p.overflow;
            flow::do_branch(cpu, bus, overflow);
        }
        0x71 => {
            let addr = adr_idy(cpu, bus, false);
            alu::adc(cpu, bus, addr);
        }
        0x72 => {
            let addr = adr_idp(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x73 => {
            let addr = adr_isy(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x74 => {
            let addr = adr_dpx(cpu, bus);
            load::stz(cpu, bus, addr);
        }
        0x75 => {
            let addr = adr_dpx(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x76 => {
            let addr = adr_dpx(cpu, bus);
            alu::ror(cpu, bus, addr);
        }
        0x77 => {
            let addr = adr_ily(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x78 => {
            // sei
            adr_imp(cpu, bus);
            cpu.registers.p.irq_disabled = true;
        }
        0x79 => {
            let addr = adr_aby(cpu, bus, false);
            alu::adc(cpu, bus, addr);
        }
        0x7A => load::ply(cpu, bus),
        0x7B => {
            // tdc
            adr_imp(cpu, bus);
            cpu.registers.a = cpu.registers.d;
            cpu.registers.set_zn(cpu.registers.a, false);
        }
        0x7C => flow::jmp_iax(cpu, bus),
        0x7D => {
            let addr = adr_abx(cpu, bus, false);
            alu::adc(cpu, bus, addr);
        }
        0x7E => {
            let addr = adr_abx(cpu, bus, true);
            alu::ror(cpu, bus, addr);
        }
        0x7F => {
            let addr = adr_alx(cpu, bus);
            alu::adc(cpu, bus, addr);
        }
        0x80 => flow::do_branch(cpu, bus, true),
        0x81 => {
            let addr = adr_idx(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x82 => flow::brl(cpu, bus),
        0x83 => {
            let addr = adr_sr(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x84 => {
            let addr = adr_dp(cpu, bus);
            load::sty(cpu, bus, addr);
        }
        0x85 => {
            let addr = adr_dp(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x86 => {
            let addr = adr_dp(cpu, bus);
            load::stx(cpu, bus, addr);
        }
        0x87 => {
            let addr = adr_idl(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x88 => {
            // dey
            adr_imp(cpu, bus);
            let value = if cpu.registers.p.index_8bit {
                u16::from((cpu.registers.y as u8).wrapping_sub(1))
            } else {
                cpu.registers.y.wrapping_sub(1)
            };
            cpu.registers.y = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0x89 => alu::bit_imm(cpu, bus),
        0x8A => {
            // txa
            adr_imp(cpu, bus);
            let x = cpu.registers.x;
            load::transfer_to_a(cpu, x);
        }
        0x8B => {
            // phb
            bus.idle(false);
            cpu.check_int(bus);
            cpu.push_byte(bus, cpu.registers.dbr);
        }
        0x8C => {
            let addr = adr_abs(cpu, bus);
            load::sty(cpu, bus, addr);
        }
        0x8D => {
            let addr = adr_abs(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x8E => {
            let addr = adr_abs(cpu, bus);
            load::stx(cpu, bus, addr);
        }
        0x8F => {
            let addr = adr_abl(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x90 => {
            let carry = cpu.registers.p.carry;
            flow::do_branch(cpu, bus, !carry);
        }
        0x91 => {
            let addr = adr_idy(cpu, bus, true);
            load::sta(cpu, bus, addr);
        }
        0x92 => {
            let addr = adr_idp(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x93 => {
            let addr = adr_isy(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x94 => {
            let addr = adr_dpx(cpu, bus);
            load::sty(cpu, bus, addr);
        }
        0x95 => {
            let addr = adr_dpx(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x96 => {
            let addr = adr_dpy(cpu, bus);
            load::stx(cpu, bus, addr);
        }
        0x97 => {
            let addr = adr_ily(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0x98 => {
            // tya
            adr_imp(cpu, bus);
            let y = cpu.registers.y;
            load::transfer_to_a(cpu, y);
        }
        0x99 => {
            let addr = adr_aby(cpu, bus, true);
            load::sta(cpu, bus, addr);
        }
        0x9A => {
            // txs
            adr_imp(cpu, bus);
            cpu.registers.s = if cpu.registers.emulation_mode {
                0x0100 | (cpu.registers.x & 0x00FF)
            } else {
                cpu.registers.x
            };
        }
        0x9B => {
            // txy
            adr_imp(cpu, bus);
            let value =
                if cpu.registers.p.index_8bit { cpu.registers.x & 0x00FF } else { cpu.registers.x };
            cpu.registers.y = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0x9C => {
            let addr = adr_abs(cpu, bus);
            load::stz(cpu, bus, addr);
        }
        0x9D => {
            let addr = adr_abx(cpu, bus, true);
            load::sta(cpu, bus, addr);
        }
        0x9E => {
            let addr = adr_abx(cpu, bus, true);
            load::stz(cpu, bus, addr);
        }
        0x9F => {
            let addr = adr_alx(cpu, bus);
            load::sta(cpu, bus, addr);
        }
        0xA0 => {
            let byte = cpu.registers.p.index_8bit;
            let addr = adr_imm(cpu, byte);
            load::ldy(cpu, bus, addr);
        }
        0xA1 => {
            let addr = adr_idx(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xA2 => {
            let byte = cpu.registers.p.index_8bit;
            let addr = adr_imm(cpu, byte);
            load::ldx(cpu, bus, addr);
        }
        0xA3 => {
            let addr = adr_sr(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xA4 => {
            let addr = adr_dp(cpu, bus);
            load::ldy(cpu, bus, addr);
        }
        0xA5 => {
            let addr = adr_dp(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xA6 => {
            let addr = adr_dp(cpu, bus);
            load::ldx(cpu, bus, addr);
        }
        0xA7 => {
            let addr = adr_idl(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xA8 => {
            // tay
            adr_imp(cpu, bus);
            let value =
                if cpu.registers.p.index_8bit { cpu.registers.a & 0x00FF } else { cpu.registers.a };
            cpu.registers.y = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0xA9 => {
            let byte = cpu.registers.p.accumulator_8bit;
            let addr = adr_imm(cpu, byte);
            load::lda(cpu, bus, addr);
        }
        0xAA => {
            // tax
            adr_imp(cpu, bus);
            let value =
                if cpu.registers.p.index_8bit { cpu.registers.a & 0x00FF } else { cpu.registers.a };
            cpu.registers.x = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0xAB => {
            // plb
            bus.idle(false);
            bus.idle(false);
            cpu.check_int(bus);
            let value = cpu.pop_byte(bus);
            cpu.registers.dbr = value;
            cpu.registers.set_zn(value.into(), true);
        }
        0xAC => {
            let addr = adr_abs(cpu, bus);
            load::ldy(cpu, bus, addr);
        }
        0xAD => {
            let addr = adr_abs(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xAE => {
            let addr = adr_abs(cpu, bus);
            load::ldx(cpu, bus, addr);
        }
        0xAF => {
            let addr = adr_abl(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xB0 => {
            let carry = cpu.registers.p.carry;
            flow::do_branch(cpu, bus, carry);
        }
        0xB1 => {
            let addr = adr_idy(cpu, bus, false);
            load::lda(cpu, bus, addr);
        }
        0xB2 => {
            let addr = adr_idp(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xB3 => {
            let addr = adr_isy(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xB4 => {
            let addr = adr_dpx(cpu, bus);
            load::ldy(cpu, bus, addr);
        }
        0xB5 => {
            let addr = adr_dpx(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xB6 => {
            let addr = adr_dpy(cpu, bus);
            load::ldx(cpu, bus, addr);
        }
        0xB7 => {
            let addr = adr_ily(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xB8 => {
            // clv
            adr_imp(cpu, bus);
            cpu.registers.p.overflow = false;
        }
        0xB9 => {
            let addr = adr_aby(cpu, bus, false);
            load::lda(cpu, bus, addr);
        }
        0xBA => {
            // tsx
            adr_imp(cpu, bus);
            let value =
                if cpu.registers.p.index_8bit { cpu.registers.s & 0x00FF } else { cpu.registers.s };
            cpu.registers.x = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0xBB => {
            // tyx
            adr_imp(cpu, bus);
            let value =
                if cpu.registers.p.index_8bit { cpu.registers.y & 0x00FF } else { cpu.registers.y };
            cpu.registers.x = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0xBC => {
            let addr = adr_abx(cpu, bus, false);
            load::ldy(cpu, bus, addr);
        }
        0xBD => {
            let addr = adr_abx(cpu, bus, false);
            load::lda(cpu, bus, addr);
        }
        0xBE => {
            let addr = adr_aby(cpu, bus, false);
            load::ldx(cpu, bus, addr);
        }
        0xBF => {
            let addr = adr_alx(cpu, bus);
            load::lda(cpu, bus, addr);
        }
        0xC0 => {
            let byte = cpu.registers.p.index_8bit;
            let addr = adr_imm(cpu, byte);
            alu::cpy(cpu, bus, addr);
        }
        0xC1 => {
            let addr = adr_idx(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xC2 => {
            // rep
            let value = cpu.read_opcode(bus);
            cpu.check_int(bus);
            let status = u8::from(cpu.registers.p) & !value;
            cpu.registers.set_status(status);
            cpu.delay_int();
            bus.idle(false);
        }
        0xC3 => {
            let addr = adr_sr(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xC4 => {
            let addr = adr_dp(cpu, bus);
            alu::cpy(cpu, bus, addr);
        }
        0xC5 => {
            let addr = adr_dp(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xC6 => {
            let addr = adr_dp(cpu, bus);
            alu::dec(cpu, bus, addr);
        }
        0xC7 => {
            let addr = adr_idl(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xC8 => {
            // iny
            adr_imp(cpu, bus);
            let value = if cpu.registers.p.index_8bit {
                u16::from((cpu.registers.y as u8).wrapping_add(1))
            } else {
                cpu.registers.y.wrapping_add(1)
            };
            cpu.registers.y = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0xC9 => {
            let byte = cpu.registers.p.accumulator_8bit;
            let addr = adr_imm(cpu, byte);
            alu::cmp(cpu, bus, addr);
        }
        0xCA => {
            // dex
            adr_imp(cpu, bus);
            let value = if cpu.registers.p.index_8bit {
                u16::from((cpu.registers.x as u8).wrapping_sub(1))
            } else {
                cpu.registers.x.wrapping_sub(1)
            };
            cpu.registers.x = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0xCB => {
            // wai
            cpu.wait();
            bus.idle(true);
            bus.idle(true);
        }
        0xCC => {
            let addr = adr_abs(cpu, bus);
            alu::cpy(cpu, bus, addr);
        }
        0xCD => {
            let addr = adr_abs(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xCE => {
            let addr = adr_abs(cpu, bus);
            alu::dec(cpu, bus, addr);
        }
        0xCF => {
            let addr = adr_abl(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xD0 => {
            let zero = cpu.registers.p.zero;
            flow::do_branch(cpu, bus, !zero);
        }
        0xD1 => {
            let addr = adr_idy(cpu, bus, false);
            alu::cmp(cpu, bus, addr);
        }
        0xD2 => {
            let addr = adr_idp(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xD3 => {
            let addr = adr_isy(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xD4 => flow::pei(cpu, bus),
        0xD5 => {
            let addr = adr_dpx(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xD6 => {
            let addr = adr_dpx(cpu, bus);
            alu::dec(cpu, bus, addr);
        }
        0xD7 => {
            let addr = adr_ily(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xD8 => {
            // cld
            adr_imp(cpu, bus);
            cpu.registers.p.decimal_mode = false;
        }
        0xD9 => {
            let addr = adr_aby(cpu, bus, false);
            alu::cmp(cpu, bus, addr);
        }
        0xDA => load::phx(cpu, bus),
        0xDB => {
            // stp
            cpu.stop();
            bus.idle(true);
            bus.idle(true);
        }
        0xDC => flow::jmp_ial(cpu, bus),
        0xDD => {
            let addr = adr_abx(cpu, bus, false);
            alu::cmp(cpu, bus, addr);
        }
        0xDE => {
            let addr = adr_abx(cpu, bus, true);
            alu::dec(cpu, bus, addr);
        }
        0xDF => {
            let addr = adr_alx(cpu, bus);
            alu::cmp(cpu, bus, addr);
        }
        0xE0 => {
            let byte = cpu.registers.p.index_8bit;
            let addr = adr_imm(cpu, byte);
            alu::cpx(cpu, bus, addr);
        }
        0xE1 => {
            let addr = adr_idx(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xE2 => {
            // sep
            let value = cpu.read_opcode(bus);
            cpu.check_int(bus);
            let status = u8::from(cpu.registers.p) | value;
            cpu.registers.set_status(status);
            cpu.delay_int();
            bus.idle(false);
        }
        0xE3 => {
            let addr = adr_sr(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xE4 => {
            let addr = adr_dp(cpu, bus);
            alu::cpx(cpu, bus, addr);
        }
        0xE5 => {
            let addr = adr_dp(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xE6 => {
            let addr = adr_dp(cpu, bus);
            alu::inc(cpu, bus, addr);
        }
        0xE7 => {
            let addr = adr_idl(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xE8 => {
            // inx
            adr_imp(cpu, bus);
            let value = if cpu.registers.p.index_8bit {
                u16::from((cpu.registers.x as u8).wrapping_add(1))
            } else {
                cpu.registers.x.wrapping_add(1)
            };
            cpu.registers.x = value;
            cpu.registers.set_zn(value, cpu.registers.p.index_8bit);
        }
        0xE9 => {
            let byte = cpu.registers.p.accumulator_8bit;
            let addr = adr_imm(cpu, byte);
            alu::sbc(cpu, bus, addr);
        }
        0xEA => {
            // nop
            adr_imp(cpu, bus);
        }
        0xEB => {
            // xba
            bus.idle(false);
            cpu.check_int(bus);
            bus.idle(false);
            let value = cpu.registers.a.rotate_right(8);
            cpu.registers.a = value;
            cpu.registers.set_zn(value, true);
        }
        0xEC => {
            let addr = adr_abs(cpu, bus);
            alu::cpx(cpu, bus, addr);
        }
        0xED => {
            let addr = adr_abs(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xEE => {
            let addr = adr_abs(cpu, bus);
            alu::inc(cpu, bus, addr);
        }
        0xEF => {
            let addr = adr_abl(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xF0 => {
            let zero = cpu.registers.p.zero;
            flow::do_branch(cpu, bus, zero);
        }
        0xF1 => {
            let addr = adr_idy(cpu, bus, false);
            alu::sbc(cpu, bus, addr);
        }
        0xF2 => {
            let addr = adr_idp(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xF3 => {
            let addr = adr_isy(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xF4 => flow::pea(cpu, bus),
        0xF5 => {
            let addr = adr_dpx(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xF6 => {
            let addr = adr_dpx(cpu, bus);
            alu::inc(cpu, bus, addr);
        }
        0xF7 => {
            let addr = adr_ily(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
        0xF8 => {
            // sed
            adr_imp(cpu, bus);
            cpu.registers.p.decimal_mode = true;
        }
        0xF9 => {
            let addr = adr_aby(cpu, bus, false);
            alu::sbc(cpu, bus, addr);
        }
        0xFA => load::plx(cpu, bus),
        0xFB => {
            // xce
            adr_imp(cpu, bus);
            let carry = cpu.registers.p.carry;
            cpu.registers.p.carry = cpu.registers.emulation_mode;
            cpu.registers.emulation_mode = carry;
            let status = u8::from(cpu.registers.p);
            cpu.registers.set_status(status);
        }
        0xFC => flow::jsr_iax(cpu, bus),
        0xFD => {
            let addr = adr_abx(cpu, bus, false);
            alu::sbc(cpu, bus, addr);
        }
        0xFE => {
            let addr = adr_abx(cpu, bus, true);
            alu::inc(cpu, bus, addr);
        }
        0xFF => {
            let addr = adr_alx(cpu, bus);
            alu::sbc(cpu, bus, addr);
        }
    }
}
