//! Control flow: branches, jumps, subroutine calls, block moves, and the
//! software interrupt opcodes.

use crate::core::{u24, Wdc65816};
use crate::traits::BusInterface;

pub(crate) fn do_branch<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, taken: bool) {
    if !taken {
        cpu.check_int(bus);
    }
    let offset = cpu.read_opcode(bus);
    if taken {
        cpu.check_int(bus);
        // Taken branch costs one internal cycle
        bus.idle(false);
        cpu.registers.pc = cpu.registers.pc.wrapping_add_signed((offset as i8).into());
    }
}

pub(crate) fn brl<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let offset = cpu.read_opcode_word(bus, false);
    cpu.check_int(bus);
    bus.idle(false);
    cpu.registers.pc = cpu.registers.pc.wrapping_add_signed(offset as i16);
}

pub(crate) fn jmp_abs<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.registers.pc = cpu.read_opcode_word(bus, true);
}

pub(crate) fn jmp_long<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let address = cpu.read_opcode_word(bus, false);
    cpu.check_int(bus);
    let bank = cpu.read_opcode(bus);
    cpu.registers.pc = address;
    cpu.registers.pbr = bank;
}

pub(crate) fn jmp_ind<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    // Pointer lives in bank 0
    let pointer = cpu.read_opcode_word(bus, false);
    let lsb = bus.read(pointer.into());
    cpu.check_int(bus);
    let msb = bus.read(pointer.wrapping_add(1).into());
    cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
}

pub(crate) fn jmp_iax<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    // Pointer is indexed by X and lives in the program bank
    let base = cpu.read_opcode_word(bus, false);
    bus.idle(false);
    let pointer = base.wrapping_add(cpu.registers.x);
    let lsb = bus.read(u24(cpu.registers.pbr, pointer));
    cpu.check_int(bus);
    let msb = bus.read(u24(cpu.registers.pbr, pointer.wrapping_add(1)));
    cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
}

pub(crate) fn jmp_ial<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let pointer = cpu.read_opcode_word(bus, false);
    let lsb = bus.read(pointer.into());
    let msb = bus.read(u32::from(pointer.wrapping_add(1)));
    cpu.check_int(bus);
    let bank = bus.read(u32::from(pointer.wrapping_add(2)));
    cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
    cpu.registers.pbr = bank;
}

pub(crate) fn jsr<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let target = cpu.read_opcode_word(bus, false);
    bus.idle(false);
    let return_addr = cpu.registers.pc.wrapping_sub(1);
    cpu.push_word(bus, return_addr, true);
    cpu.registers.pc = target;
}

pub(crate) fn jsr_iax<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let adr_lsb = cpu.read_opcode(bus);
    let return_addr = cpu.registers.pc;
    cpu.push_word(bus, return_addr, false);
    let adr_msb = cpu.read_opcode(bus);
    bus.idle(false);
    let base = u16::from_le_bytes([adr_lsb, adr_msb]);
    let pointer = base.wrapping_add(cpu.registers.x);
    let lsb = bus.read(u24(cpu.registers.pbr, pointer));
    cpu.check_int(bus);
    let msb = bus.read(u24(cpu.registers.pbr, pointer.wrapping_add(1)));
    cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
}

pub(crate) fn jsl<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let target = cpu.read_opcode_word(bus, false);
    cpu.push_byte(bus, cpu.registers.pbr);
    bus.idle(false);
    let bank = cpu.read_opcode(bus);
    let return_addr = cpu.registers.pc.wrapping_sub(1);
    cpu.push_word(bus, return_addr, true);
    cpu.registers.pc = target;
    cpu.registers.pbr = bank;
}

pub(crate) fn rts<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    bus.idle(false);
    cpu.registers.pc = cpu.pop_word(bus, false).wrapping_add(1);
    cpu.check_int(bus);
    bus.idle(false);
}

pub(crate) fn rtl<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    bus.idle(false);
    cpu.registers.pc = cpu.pop_word(bus, false).wrapping_add(1);
    cpu.check_int(bus);
    cpu.registers.pbr = cpu.pop_byte(bus);
}

pub(crate) fn rti<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    bus.idle(false);
    let status = cpu.pop_byte(bus);
    cpu.registers.set_status(status);
    if cpu.registers.emulation_mode {
        cpu.registers.pc = cpu.pop_word(bus, true);
    } else {
        cpu.registers.pc = cpu.pop_word(bus, false);
        cpu.check_int(bus);
        cpu.registers.pbr = cpu.pop_byte(bus);
    }
}

pub(crate) fn brk<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    // Signature byte is fetched and discarded
    cpu.read_opcode(bus);
    cpu.software_interrupt(bus, false);
}

pub(crate) fn cop<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.read_opcode(bus);
    cpu.software_interrupt(bus, true);
}

pub(crate) fn pea<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let value = cpu.read_opcode_word(bus, false);
    cpu.push_word(bus, value, true);
}

pub(crate) fn pei<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let (low, high) = super::adr_dp(cpu, bus);
    let lsb = bus.read(low);
    let msb = bus.read(high);
    cpu.push_word(bus, u16::from_le_bytes([lsb, msb]), true);
}

pub(crate) fn per<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let offset = cpu.read_opcode_word(bus, false);
    bus.idle(false);
    let value = cpu.registers.pc.wrapping_add_signed(offset as i16);
    cpu.push_word(bus, value, true);
}

fn block_move<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, forward: bool) {
    let dest_bank = cpu.read_opcode(bus);
    let src_bank = cpu.read_opcode(bus);
    cpu.registers.dbr = dest_bank;

    let value = bus.read(u24(src_bank, cpu.registers.x));
    bus.write(u24(dest_bank, cpu.registers.y), value);

    cpu.registers.a = cpu.registers.a.wrapping_sub(1);
    if forward {
        cpu.registers.x = cpu.registers.x.wrapping_add(1);
        cpu.registers.y = cpu.registers.y.wrapping_add(1);
    } else {
        cpu.registers.x = cpu.registers.x.wrapping_sub(1);
        cpu.registers.y = cpu.registers.y.wrapping_sub(1);
    }
    if cpu.registers.p.index_8bit {
        cpu.registers.x &= 0x00FF;
        cpu.registers.y &= 0x00FF;
    }

    // One byte per execution; the opcode repeats itself until A wraps
    if cpu.registers.a != 0xFFFF {
        cpu.registers.pc = cpu.registers.pc.wrapping_sub(3);
    }

    cpu.check_int(bus);
    bus.idle(false);
    bus.idle(false);
}

pub(crate) fn mvn<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    block_move(cpu, bus, true);
}

pub(crate) fn mvp<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    block_move(cpu, bus, false);
}
