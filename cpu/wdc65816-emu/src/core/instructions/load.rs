//! Loads, stores, register transfers, and stack pushes/pulls.

use crate::core::instructions::AddressPair;
use crate::core::Wdc65816;
use crate::traits::BusInterface;
use yaze_common::num::U16Ext;

pub(crate) fn lda<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, (low, high): AddressPair) {
    if cpu.registers.p.accumulator_8bit {
        cpu.check_int(bus);
        let value = bus.read(low);
        cpu.registers.a.set_lsb(value);
        cpu.registers.set_zn(value.into(), true);
    } else {
        let lsb = bus.read(low);
        cpu.check_int(bus);
        let msb = bus.read(high);
        cpu.registers.a = u16::from_le_bytes([lsb, msb]);
        cpu.registers.set_zn(cpu.registers.a, false);
    }
}

pub(crate) fn ldx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, (low, high): AddressPair) {
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        let value = bus.read(low);
        cpu.registers.x = value.into();
        cpu.registers.set_zn(value.into(), true);
    } else {
        let lsb = bus.read(low);
        cpu.check_int(bus);
        let msb = bus.read(high);
        cpu.registers.x = u16::from_le_bytes([lsb, msb]);
        cpu.registers.set_zn(cpu.registers.x, false);
    }
}

pub(crate) fn ldy<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, (low, high): AddressPair) {
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        let value = bus.read(low);
        cpu.registers.y = value.into();
        cpu.registers.set_zn(value.into(), true);
    } else {
        let lsb = bus.read(low);
        cpu.check_int(bus);
        let msb = bus.read(high);
        cpu.registers.y = u16::from_le_bytes([lsb, msb]);
        cpu.registers.set_zn(cpu.registers.y, false);
    }
}

pub(crate) fn sta<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, (low, high): AddressPair) {
    if cpu.registers.p.accumulator_8bit {
        cpu.check_int(bus);
        bus.write(low, cpu.registers.a.lsb());
    } else {
        bus.write(low, cpu.registers.a.lsb());
        cpu.check_int(bus);
        bus.write(high, cpu.registers.a.msb());
    }
}

pub(crate) fn stx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, (low, high): AddressPair) {
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        bus.write(low, cpu.registers.x.lsb());
    } else {
        bus.write(low, cpu.registers.x.lsb());
        cpu.check_int(bus);
        bus.write(high, cpu.registers.x.msb());
    }
}

pub(crate) fn sty<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, (low, high): AddressPair) {
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        bus.write(low, cpu.registers.y.lsb());
    } else {
        bus.write(low, cpu.registers.y.lsb());
        cpu.check_int(bus);
        bus.write(high, cpu.registers.y.msb());
    }
}

pub(crate) fn stz<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, (low, high): AddressPair) {
    if cpu.registers.p.accumulator_8bit {
        cpu.check_int(bus);
        bus.write(low, 0);
    } else {
        bus.write(low, 0);
        cpu.check_int(bus);
        bus.write(high, 0);
    }
}

pub(crate) fn transfer_to_a(cpu: &mut Wdc65816, value: u16) {
    if cpu.registers.p.accumulator_8bit {
        cpu.registers.a.set_lsb(value.lsb());
        cpu.registers.set_zn(value & 0x00FF, true);
    } else {
        cpu.registers.a = value;
        cpu.registers.set_zn(value, false);
    }
}

pub(crate) fn pha<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    if cpu.registers.p.accumulator_8bit {
        cpu.check_int(bus);
        cpu.push_byte(bus, cpu.registers.a.lsb());
    } else {
        let a = cpu.registers.a;
        cpu.push_word(bus, a, true);
    }
}

pub(crate) fn phx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        cpu.push_byte(bus, cpu.registers.x.lsb());
    } else {
        let x = cpu.registers.x;
        cpu.push_word(bus, x, true);
    }
}

pub(crate) fn phy<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        cpu.push_byte(bus, cpu.registers.y.lsb());
    } else {
        let y = cpu.registers.y;
        cpu.push_word(bus, y, true);
    }
}

pub(crate) fn pla<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    bus.idle(false);
    if cpu.registers.p.accumulator_8bit {
        cpu.check_int(bus);
        let value = cpu.pop_byte(bus);
        cpu.registers.a.set_lsb(value);
        cpu.registers.set_zn(value.into(), true);
    } else {
        let value = cpu.pop_word(bus, true);
        cpu.registers.a = value;
        cpu.registers.set_zn(value, false);
    }
}

pub(crate) fn plx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    bus.idle(false);
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        let value = cpu.pop_byte(bus);
        cpu.registers.x = value.into();
        cpu.registers.set_zn(value.into(), true);
    } else {
        let value = cpu.pop_word(bus, true);
        cpu.registers.x = value;
        cpu.registers.set_zn(value, false);
    }
}

pub(crate) fn ply<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    bus.idle(false);
    bus.idle(false);
    if cpu.registers.p.index_8bit {
        cpu.check_int(bus);
        let value = cpu.pop_byte(bus);
        cpu.registers.y = value.into();
        cpu.registers.set_zn(value.into(), true);
    } else {
        let value = cpu.pop_word(bus, true);
        cpu.registers.y = value;
        cpu.registers.set_zn(value, false);
    }
}
