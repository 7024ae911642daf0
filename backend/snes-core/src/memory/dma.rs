//! General-purpose DMA and HDMA.
//!
//! GP DMA preempts the CPU for its whole byte count when `$420B` is written.
//! HDMA tables are latched at the top of the frame and fire once per visible
//! scanline.

use crate::api::System;
use bincode::{Decode, Encode};
use yaze_common::num::GetBit;

// B-bus offset pattern for each of the 8 transfer-unit modes
const TRANSFER_PATTERNS: [&[u8]; 8] = [
    &[0],
    &[0, 1],
    &[0, 0],
    &[0, 0, 1, 1],
    &[0, 1, 2, 3],
    &[0, 1, 0, 1],
    &[0, 0],
    &[0, 0, 1, 1],
];

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct DmaChannel {
    // DMAPx ($43x0)
    pub(crate) mode: u8,
    pub(crate) fixed: bool,
    pub(crate) decrement: bool,
    pub(crate) indirect: bool,
    pub(crate) from_b: bool,
    unused_control_bit: bool,
    // BBADx ($43x1)
    pub(crate) b_addr: u8,
    // A1Tx ($43x2-$43x4)
    pub(crate) a_addr: u16,
    pub(crate) a_bank: u8,
    // DASx ($43x5-$43x7): byte count, or the indirect HDMA address
    pub(crate) size: u16,
    pub(crate) indirect_bank: u8,
    // HDMA state ($43x8-$43xA)
    pub(crate) table_addr: u16,
    pub(crate) repeat_count: u8,
    unused_byte: u8,
    pub(crate) hdma_active: bool,
    pub(crate) do_transfer: bool,
    pub(crate) terminated: bool,
}

impl DmaChannel {
    fn new() -> Self {
        Self {
            mode: 7,
            fixed: true,
            decrement: true,
            indirect: true,
            from_b: true,
            unused_control_bit: true,
            b_addr: 0xFF,
            a_addr: 0xFFFF,
            a_bank: 0xFF,
            size: 0xFFFF,
            indirect_bank: 0xFF,
            table_addr: 0xFFFF,
            repeat_count: 0xFF,
            unused_byte: 0xFF,
            hdma_active: false,
            do_transfer: false,
            terminated: false,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct DmaUnit {
    pub(crate) channels: [DmaChannel; 8],
}

impl DmaUnit {
    pub(crate) fn new() -> Self {
        Self { channels: std::array::from_fn(|_| DmaChannel::new()) }
    }

    pub(crate) fn read_register(&self, address: u16) -> Option<u8> {
        let channel = &self.channels[((address >> 4) & 0x7) as usize];
        match address & 0xF {
            0x0 => Some(
                channel.mode
                    | (u8::from(channel.fixed) << 3)
                    | (u8::from(channel.decrement) << 4)
                    | (u8::from(channel.unused_control_bit) << 5)
                    | (u8::from(channel.indirect) << 6)
                    | (u8::from(channel.from_b) << 7),
            ),
            0x1 => Some(channel.b_addr),
            0x2 => Some(channel.a_addr as u8),
            0x3 => Some((channel.a_addr >> 8) as u8),
            0x4 => Some(channel.a_bank),
            0x5 => Some(channel.size as u8),
            0x6 => Some((channel.size >> 8) as u8),
            0x7 => Some(channel.indirect_bank),
            0x8 => Some(channel.table_addr as u8),
            0x9 => Some((channel.table_addr >> 8) as u8),
            0xA => Some(channel.repeat_count),
            0xB | 0xF => Some(channel.unused_byte),
            _ => None,
        }
    }

    pub(crate) fn write_register(&mut self, address: u16, value: u8) {
        let channel = &mut self.channels[((address >> 4) & 0x7) as usize];
        match address & 0xF {
            0x0 => {
                channel.mode = value & 0x07;
                channel.fixed = value.bit(3);
                channel.decrement = value.bit(4);
                channel.unused_control_bit = value.bit(5);
                channel.indirect = value.bit(6);
                channel.from_b = value.bit(7);
            }
            0x1 => channel.b_addr = value,
            0x2 => channel.a_addr = (channel.a_addr & 0xFF00) | u16::from(value),
            0x3 => channel.a_addr = (channel.a_addr & 0x00FF) | (u16::from(value) << 8),
            0x4 => channel.a_bank = value,
            0x5 => channel.size = (channel.size & 0xFF00) | u16::from(value),
            0x6 => channel.size = (channel.size & 0x00FF) | (u16::from(value) << 8),
            0x7 => channel.indirect_bank = value,
            0x8 => channel.table_addr = (channel.table_addr & 0xFF00) | u16::from(value),
            0x9 => channel.table_addr = (channel.table_addr & 0x00FF) | (u16::from(value) << 8),
            0xA => channel.repeat_count = value,
            0xB | 0xF => channel.unused_byte = value,
            _ => {}
        }
    }

    pub(crate) fn write_hdma_enable(&mut self, value: u8) {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            channel.hdma_active = value.bit(i as u8);
        }
    }
}

impl System {
    /// MDMAEN ($420B): run every selected channel to completion, in channel
    /// order, while the CPU stalls.
    pub(crate) fn do_gpdma(&mut self, enabled: u8) {
        if enabled == 0 {
            return;
        }

        // Transfer startup overhead
        self.run_cycles(8);

        for i in 0..8 {
            if !enabled.bit(i as u8) {
                continue;
            }
            self.run_cycles(8);

            log::trace!(
                "GP DMA channel {i}: mode {}, B ${:02X}, A ${:02X}{:04X}, {} bytes",
                self.dma.channels[i].mode,
                self.dma.channels[i].b_addr,
                self.dma.channels[i].a_bank,
                self.dma.channels[i].a_addr,
                self.dma.channels[i].size
            );

            let pattern = TRANSFER_PATTERNS[self.dma.channels[i].mode as usize];
            let mut pattern_idx = 0;
            loop {
                self.run_cycles(8);

                let channel = &self.dma.channels[i];
                let b_offset = pattern[pattern_idx % pattern.len()];
                let b_bus = 0x2100 | u16::from(channel.b_addr.wrapping_add(b_offset));
                let a_bus = (u32::from(channel.a_bank) << 16) | u32::from(channel.a_addr);

                if channel.from_b {
                    let value = self.read_b_bus(b_bus);
                    self.write_a_bus(a_bus, value);
                } else {
                    let value = self.read_a_bus(a_bus);
                    self.write_b_bus(b_bus, value);
                }

                let channel = &mut self.dma.channels[i];
                if !channel.fixed {
                    channel.a_addr = if channel.decrement {
                        channel.a_addr.wrapping_sub(1)
                    } else {
                        channel.a_addr.wrapping_add(1)
                    };
                }
                pattern_idx += 1;

                channel.size = channel.size.wrapping_sub(1);
                if channel.size == 0 {
                    break;
                }
            }
        }
    }

    /// Latches HDMA tables at the top of the frame.
    pub(crate) fn init_hdma(&mut self) {
        for i in 0..8 {
            if !self.dma.channels[i].hdma_active {
                self.dma.channels[i].do_transfer = false;
                continue;
            }

            let channel = &mut self.dma.channels[i];
            channel.terminated = false;
            channel.table_addr = channel.a_addr;

            self.reload_hdma_entry(i);
            self.dma.channels[i].do_transfer = true;
        }
    }

    /// One HDMA slot per visible scanline.
    pub(crate) fn do_hdma(&mut self) {
        for i in 0..8 {
            if !self.dma.channels[i].hdma_active || self.dma.channels[i].terminated {
                continue;
            }

            if self.dma.channels[i].do_transfer {
                let pattern = TRANSFER_PATTERNS[self.dma.channels[i].mode as usize];
                for (unit_idx, &b_offset) in pattern.iter().enumerate() {
                    self.run_cycles(8);

                    let channel = &self.dma.channels[i];
                    let b_bus = 0x2100 | u16::from(channel.b_addr.wrapping_add(b_offset));
                    let a_bus = if channel.indirect {
                        (u32::from(channel.indirect_bank) << 16)
                            | u32::from(channel.size.wrapping_add(unit_idx as u16))
                    } else {
                        (u32::from(channel.a_bank) << 16)
                            | u32::from(channel.table_addr.wrapping_add(unit_idx as u16))
                    };

                    if channel.from_b {
                        let value = self.read_b_bus(b_bus);
                        self.write_a_bus(a_bus, value);
                    } else {
                        let value = self.read_a_bus(a_bus);
                        self.write_b_bus(b_bus, value);
                    }
                }

                let unit_len = pattern.len() as u16;
                let channel = &mut self.dma.channels[i];
                if channel.indirect {
                    channel.size = channel.size.wrapping_add(unit_len);
                } else {
                    channel.table_addr = channel.table_addr.wrapping_add(unit_len);
                }
            }

            let channel = &mut self.dma.channels[i];
            channel.repeat_count = channel.repeat_count.wrapping_sub(1);
            if channel.repeat_count & 0x7F == 0 {
                self.reload_hdma_entry(i);
                self.dma.channels[i].do_transfer = true;
            } else {
                let repeat = self.dma.channels[i].repeat_count;
                self.dma.channels[i].do_transfer = repeat.bit(7);
            }
        }
    }

    fn reload_hdma_entry(&mut self, i: usize) {
        let channel = &self.dma.channels[i];
        let bank = channel.a_bank;
        let mut table_addr = channel.table_addr;

        let header = self.read_a_bus((u32::from(bank) << 16) | u32::from(table_addr));
        table_addr = table_addr.wrapping_add(1);

        let channel = &mut self.dma.channels[i];
        channel.repeat_count = header;
        channel.table_addr = table_addr;
        if header == 0 {
            channel.terminated = true;
            return;
        }

        if self.dma.channels[i].indirect {
            let bank = self.dma.channels[i].a_bank;
            let mut table_addr = self.dma.channels[i].table_addr;
            let lsb = self.read_a_bus((u32::from(bank) << 16) | u32::from(table_addr));
            table_addr = table_addr.wrapping_add(1);
            let msb = self.read_a_bus((u32::from(bank) << 16) | u32::from(table_addr));
            table_addr = table_addr.wrapping_add(1);

            let channel = &mut self.dma.channels[i];
            channel.size = u16::from_le_bytes([lsb, msb]);
            channel.table_addr = table_addr;
        }
    }
}
