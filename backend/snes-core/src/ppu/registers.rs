//! PPU control registers that hold pure rendering state. The data ports
//! (VRAM/OAM/CGRAM) and the latched counters live with their memories in the
//! parent module.

use bincode::{Decode, Encode};
use yaze_common::num::GetBit;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct BgLayer {
    pub(crate) h_scroll: u16,
    pub(crate) v_scroll: u16,
    pub(crate) tilemap_wider: bool,
    pub(crate) tilemap_taller: bool,
    pub(crate) tilemap_addr: u16,
    pub(crate) tile_addr: u16,
    pub(crate) big_tiles: bool,
    pub(crate) mosaic_enabled: bool,
}

/// Main/sub screen participation for BG1-4 and sprites.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct LayerEnable {
    pub(crate) main_screen: bool,
    pub(crate) sub_screen: bool,
    pub(crate) main_windowed: bool,
    pub(crate) sub_windowed: bool,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct WindowLayer {
    pub(crate) window1_enabled: bool,
    pub(crate) window1_inverted: bool,
    pub(crate) window2_enabled: bool,
    pub(crate) window2_inverted: bool,
    pub(crate) mask_logic: u8,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct Mode7 {
    // a, b, c, d
    pub(crate) matrix: [i16; 4],
    pub(crate) x_center: i16,
    pub(crate) y_center: i16,
    pub(crate) h_scroll: i16,
    pub(crate) v_scroll: i16,
    pub(crate) prev: u8,
    pub(crate) large_field: bool,
    pub(crate) char_fill: bool,
    pub(crate) x_flip: bool,
    pub(crate) y_flip: bool,
    pub(crate) ext_bg: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Registers {
    // INIDISP ($2100)
    pub(crate) forced_blank: bool,
    pub(crate) brightness: u8,
    // OBJSEL ($2101)
    pub(crate) obj_size: u8,
    pub(crate) obj_tile_addr1: u16,
    pub(crate) obj_tile_addr2: u16,
    // BGMODE ($2105)
    pub(crate) mode: u8,
    pub(crate) bg3_priority: bool,
    // MOSAIC ($2106)
    pub(crate) mosaic_size: u8,
    pub(crate) bg: [BgLayer; 4],
    // scroll write latches
    pub(crate) scroll_prev: u8,
    pub(crate) scroll_prev2: u8,
    pub(crate) m7: Mode7,
    // W12SEL-WOBJLOG ($2123-$212B); layers 0-3 are BG1-4, 4 sprites, 5 color
    pub(crate) windows: [WindowLayer; 6],
    pub(crate) window1_left: u8,
    pub(crate) window1_right: u8,
    pub(crate) window2_left: u8,
    pub(crate) window2_right: u8,
    // TM/TS/TMW/TSW ($212C-$212F)
    pub(crate) layers: [LayerEnable; 5],
    // CGWSEL/CGADSUB/COLDATA ($2130-$2132)
    pub(crate) clip_mode: u8,
    pub(crate) prevent_math_mode: u8,
    pub(crate) add_subscreen: bool,
    pub(crate) direct_color: bool,
    pub(crate) subtract_color: bool,
    pub(crate) half_color: bool,
    pub(crate) math_enabled: [bool; 6],
    pub(crate) fixed_color_r: u8,
    pub(crate) fixed_color_g: u8,
    pub(crate) fixed_color_b: u8,
    // SETINI ($2133)
    pub(crate) interlace: bool,
    pub(crate) obj_interlace: bool,
    pub(crate) overscan: bool,
    pub(crate) pseudo_hires: bool,
}

impl Registers {
    pub(crate) fn new() -> Self {
        Self {
            forced_blank: true,
            // Hardware comes up at full brightness
            brightness: 15,
            obj_size: 0,
            obj_tile_addr1: 0,
            obj_tile_addr2: 0,
            mode: 0,
            bg3_priority: false,
            mosaic_size: 1,
            bg: Default::default(),
            scroll_prev: 0,
            scroll_prev2: 0,
            m7: Mode7::default(),
            windows: Default::default(),
            window1_left: 0,
            window1_right: 0,
            window2_left: 0,
            window2_right: 0,
            layers: Default::default(),
            clip_mode: 0,
            prevent_math_mode: 0,
            add_subscreen: false,
            direct_color: false,
            subtract_color: false,
            half_color: false,
            math_enabled: [false; 6],
            fixed_color_r: 0,
            fixed_color_g: 0,
            fixed_color_b: 0,
            interlace: false,
            obj_interlace: false,
            overscan: false,
            pseudo_hires: false,
        }
    }

    /// Handles the pure-state control registers. `mosaic_startline` needs the
    /// current line, so MOSAIC writes report it back through the return value.
    pub(crate) fn write(&mut self, adr: u8, value: u8) -> RegisterWriteEffect {
        match adr {
            0x00 => {
                self.brightness = value & 0x0F;
                self.forced_blank = value.bit(7);
            }
            0x01 => {
                self.obj_size = value >> 5;
                self.obj_tile_addr1 = u16::from(value & 0x07) << 13;
                self.obj_tile_addr2 =
                    self.obj_tile_addr1 + ((u16::from(value & 0x18) + 8) << 9);
            }
            0x05 => {
                self.mode = value & 0x07;
                self.bg3_priority = value.bit(3);
                for (i, bg) in self.bg.iter_mut().enumerate() {
                    bg.big_tiles = value.bit(4 + i as u8);
                }
                log::trace!("BG mode {} (BG3 priority: {})", self.mode, self.bg3_priority);
            }
            0x06 => {
                for (i, bg) in self.bg.iter_mut().enumerate() {
                    bg.mosaic_enabled = value.bit(i as u8);
                }
                self.mosaic_size = (value >> 4) + 1;
                return RegisterWriteEffect::MosaicChanged;
            }
            0x07..=0x0A => {
                let bg = &mut self.bg[(adr - 0x07) as usize];
                bg.tilemap_wider = value.bit(0);
                bg.tilemap_taller = value.bit(1);
                bg.tilemap_addr = u16::from(value & 0xFC) << 8;
            }
            0x0B => {
                self.bg[0].tile_addr = u16::from(value & 0x0F) << 12;
                self.bg[1].tile_addr = u16::from(value & 0xF0) << 8;
            }
            0x0C => {
                self.bg[2].tile_addr = u16::from(value & 0x0F) << 12;
                self.bg[3].tile_addr = u16::from(value & 0xF0) << 8;
            }
            0x0D | 0x0F | 0x11 | 0x13 => {
                if adr == 0x0D {
                    // M7HOFS shares the write with BG1HOFS
                    self.m7.h_scroll = sign_extend_13(
                        (u16::from(value) << 8) | u16::from(self.m7.prev),
                    );
                    self.m7.prev = value;
                }
                let bg = &mut self.bg[((adr - 0x0D) / 2) as usize];
                bg.h_scroll = ((u16::from(value) << 8)
                    | u16::from(self.scroll_prev & 0xF8)
                    | u16::from(self.scroll_prev2 & 0x07))
                    & 0x3FF;
                self.scroll_prev = value;
                self.scroll_prev2 = value;
            }
            0x0E | 0x10 | 0x12 | 0x14 => {
                if adr == 0x0E {
                    self.m7.v_scroll = sign_extend_13(
                        (u16::from(value) << 8) | u16::from(self.m7.prev),
                    );
                    self.m7.prev = value;
                }
                let bg = &mut self.bg[((adr - 0x0E) / 2) as usize];
                bg.v_scroll = ((u16::from(value) << 8) | u16::from(self.scroll_prev)) & 0x3FF;
                self.scroll_prev = value;
            }
            0x1A => {
                self.m7.large_field = value.bit(7);
                self.m7.char_fill = value.bit(6);
                self.m7.y_flip = value.bit(1);
                self.m7.x_flip = value.bit(0);
            }
            0x1B..=0x1E => {
                // Full 16-bit matrix elements through the shared prev latch
                let word = (u16::from(value) << 8) | u16::from(self.m7.prev);
                self.m7.matrix[(adr - 0x1B) as usize] = word as i16;
                self.m7.prev = value;
            }
            0x1F => {
                self.m7.x_center =
                    sign_extend_13((u16::from(value) << 8) | u16::from(self.m7.prev));
                self.m7.prev = value;
            }
            0x20 => {
                self.m7.y_center =
                    sign_extend_13((u16::from(value) << 8) | u16::from(self.m7.prev));
                self.m7.prev = value;
            }
            0x23..=0x25 => {
                let pair = ((adr - 0x23) * 2) as usize;
                self.windows[pair].window1_inverted = value.bit(0);
                self.windows[pair].window1_enabled = value.bit(1);
                self.windows[pair].window2_inverted = value.bit(2);
                self.windows[pair].window2_enabled = value.bit(3);
                self.windows[pair + 1].window1_inverted = value.bit(4);
                self.windows[pair + 1].window1_enabled = value.bit(5);
                self.windows[pair + 1].window2_inverted = value.bit(6);
                self.windows[pair + 1].window2_enabled = value.bit(7);
            }
            0x26 => self.window1_left = value,
            0x27 => self.window1_right = value,
            0x28 => self.window2_left = value,
            0x29 => self.window2_right = value,
            0x2A => {
                for i in 0..4 {
                    self.windows[i].mask_logic = (value >> (2 * i)) & 0x03;
                }
            }
            0x2B => {
                self.windows[4].mask_logic = value & 0x03;
                self.windows[5].mask_logic = (value >> 2) & 0x03;
            }
            0x2C => {
                for (i, layer) in self.layers.iter_mut().enumerate() {
                    layer.main_screen = value.bit(i as u8);
                }
            }
            0x2D => {
                for (i, layer) in self.layers.iter_mut().enumerate() {
                    layer.sub_screen = value.bit(i as u8);
                }
            }
            0x2E => {
                for (i, layer) in self.layers.iter_mut().enumerate() {
                    layer.main_windowed = value.bit(i as u8);
                }
            }
            0x2F => {
                for (i, layer) in self.layers.iter_mut().enumerate() {
                    layer.sub_windowed = value.bit(i as u8);
                }
            }
            0x30 => {
                self.direct_color = value.bit(0);
                self.add_subscreen = value.bit(1);
                self.prevent_math_mode = (value >> 4) & 0x03;
                self.clip_mode = (value >> 6) & 0x03;
            }
            0x31 => {
                self.subtract_color = value.bit(7);
                self.half_color = value.bit(6);
                for (i, enabled) in self.math_enabled.iter_mut().enumerate() {
                    *enabled = value.bit(i as u8);
                }
            }
            0x32 => {
                if value.bit(7) {
                    self.fixed_color_b = value & 0x1F;
                }
                if value.bit(6) {
                    self.fixed_color_g = value & 0x1F;
                }
                if value.bit(5) {
                    self.fixed_color_r = value & 0x1F;
                }
            }
            0x33 => {
                self.interlace = value.bit(0);
                self.obj_interlace = value.bit(1);
                self.overscan = value.bit(2);
                self.pseudo_hires = value.bit(3);
                self.m7.ext_bg = value.bit(6);
            }
            _ => {}
        }

        RegisterWriteEffect::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegisterWriteEffect {
    None,
    /// MOSAIC was written; the caller re-anchors the mosaic start line.
    MosaicChanged,
}

fn sign_extend_13(value: u16) -> i16 {
    ((value << 3) as i16) >> 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_writes_go_through_the_shared_latch() {
        let mut registers = Registers::new();
        // BG1HOFS is built from the new byte plus two previous writes
        registers.write(0x0D, 0x34);
        registers.write(0x0D, 0x01);
        assert_eq!(registers.bg[0].h_scroll, 0x0134 & 0x3FF);
    }

    #[test]
    fn mode7_center_sign_extends_13_bits() {
        let mut registers = Registers::new();
        registers.write(0x1F, 0xFF);
        registers.write(0x1F, 0x1F);
        assert_eq!(registers.m7.x_center, -1);
    }

    #[test]
    fn fixed_color_writes_are_masked_per_component() {
        let mut registers = Registers::new();
        registers.write(0x32, 0xBF); // blue + green, intensity 31
        assert_eq!(registers.fixed_color_b, 31);
        assert_eq!(registers.fixed_color_g, 31);
        assert_eq!(registers.fixed_color_r, 0);
    }
}
