//! S-PPU: a per-pixel scanline renderer with catch-up. The bus invites the
//! PPU to render up to the current horizontal position whenever a PPU
//! register is touched, so mid-scanline register writes take effect from that
//! column onward.

mod registers;

use crate::ppu::registers::{RegisterWriteEffect, Registers};
use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};
use yaze_common::boxedarray::BoxedArray;
use yaze_common::num::GetBit;

pub(crate) const VRAM_LEN_WORDS: usize = 0x8000;
pub(crate) const CGRAM_LEN_WORDS: usize = 0x100;
pub(crate) const OAM_LEN_WORDS: usize = 0x100;
pub(crate) const HIGH_OAM_LEN: usize = 0x20;

// Two 512x4-byte fields of 239 lines each
const PIXEL_ROW_BYTES: usize = 512 * 4;
const FIELD_LINES: usize = 239;
const PIXEL_BUFFER_LEN: usize = PIXEL_ROW_BYTES * FIELD_LINES * 2;

pub(crate) const OUTPUT_WIDTH: usize = 512;
pub(crate) const OUTPUT_HEIGHT: usize = 478;

// Layer priority tables per mode. Indices 0-7 are modes 0-7, 8 is mode 1
// with the BG3-priority bit, 9 is mode 7 with ExtBG. Layers 0-3 are BG1-4,
// 4 is sprites, 5 is unused.
#[rustfmt::skip]
const LAYERS_PER_MODE: [[u8; 12]; 10] = [
    [4, 0, 1, 4, 0, 1, 4, 2, 3, 4, 2, 3],
    [4, 0, 1, 4, 0, 1, 4, 2, 4, 2, 5, 5],
    [4, 0, 4, 1, 4, 0, 4, 1, 5, 5, 5, 5],
    [4, 0, 4, 1, 4, 0, 4, 1, 5, 5, 5, 5],
    [4, 0, 4, 1, 4, 0, 4, 1, 5, 5, 5, 5],
    [4, 0, 4, 1, 4, 0, 4, 1, 5, 5, 5, 5],
    [4, 0, 4, 4, 0, 4, 5, 5, 5, 5, 5, 5],
    [4, 4, 4, 0, 4, 5, 5, 5, 5, 5, 5, 5],
    [2, 4, 0, 1, 4, 0, 1, 4, 4, 2, 5, 5],
    [4, 4, 1, 4, 0, 4, 1, 5, 5, 5, 5, 5],
];

#[rustfmt::skip]
const PRIORITIES_PER_MODE: [[u8; 12]; 10] = [
    [3, 1, 1, 2, 0, 0, 1, 1, 1, 0, 0, 0],
    [3, 1, 1, 2, 0, 0, 1, 1, 0, 0, 5, 5],
    [3, 1, 2, 1, 1, 0, 0, 0, 5, 5, 5, 5],
    [3, 1, 2, 1, 1, 0, 0, 0, 5, 5, 5, 5],
    [3, 1, 2, 1, 1, 0, 0, 0, 5, 5, 5, 5],
    [3, 1, 2, 1, 1, 0, 0, 0, 5, 5, 5, 5],
    [3, 1, 2, 1, 0, 0, 5, 5, 5, 5, 5, 5],
    [3, 2, 1, 0, 0, 5, 5, 5, 5, 5, 5, 5],
    [1, 3, 1, 1, 2, 0, 0, 1, 0, 0, 5, 5],
    [3, 2, 1, 1, 0, 0, 0, 5, 5, 5, 5, 5],
];

const LAYER_COUNT_PER_MODE: [usize; 10] = [12, 10, 8, 8, 8, 8, 6, 5, 10, 7];

#[rustfmt::skip]
const BIT_DEPTHS_PER_MODE: [[u8; 4]; 10] = [
    [2, 2, 2, 2],
    [4, 4, 2, 5],
    [4, 4, 5, 5],
    [8, 4, 5, 5],
    [8, 2, 5, 5],
    [4, 2, 5, 5],
    [4, 5, 5, 5],
    [8, 5, 5, 5],
    [4, 4, 2, 5],
    [8, 7, 5, 5],
];

const SPRITE_SIZES: [[u16; 2]; 8] =
    [[8, 16], [8, 32], [8, 64], [16, 32], [16, 64], [32, 64], [16, 32], [16, 32]];

#[derive(Debug, Clone)]
struct PixelBuffer(Box<[u8; PIXEL_BUFFER_LEN]>);

impl Default for PixelBuffer {
    fn default() -> Self {
        Self(
            vec![0; PIXEL_BUFFER_LEN]
                .into_boxed_slice()
                .try_into()
                .unwrap_or_else(|_| unreachable!()),
        )
    }
}

impl Deref for PixelBuffer {
    type Target = [u8; PIXEL_BUFFER_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PixelBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

// The frame buffer is scratch output; save states re-render instead of
// carrying a megabyte of pixels.
impl Encode for PixelBuffer {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        _encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        Ok(())
    }
}

impl<Context> Decode<Context> for PixelBuffer {
    fn decode<D: Decoder<Context = Context>>(_decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Self::default())
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for PixelBuffer {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        _decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Ok(Self::default())
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Ppu {
    // Memories
    pub(crate) vram: BoxedArray<u16, VRAM_LEN_WORDS>,
    pub(crate) cgram: BoxedArray<u16, CGRAM_LEN_WORDS>,
    oam: BoxedArray<u16, OAM_LEN_WORDS>,
    high_oam: [u8; HIGH_OAM_LEN],
    // VRAM port
    vram_pointer: u16,
    vram_increment_on_high: bool,
    vram_increment: u16,
    vram_remap_mode: u8,
    vram_read_buffer: u16,
    // CGRAM port
    cgram_pointer: u8,
    cgram_second_write: bool,
    cgram_buffer: u8,
    // OAM port
    oam_adr: u8,
    oam_adr_written: u8,
    oam_in_high: bool,
    oam_in_high_written: bool,
    oam_second_write: bool,
    oam_buffer: u8,
    // Sprite evaluation
    obj_priority_rotation: bool,
    time_over: bool,
    range_over: bool,
    obj_pixel_buffer: [u8; 256],
    obj_priority_buffer: [u8; 256],
    pub(crate) registers: Registers,
    // Mode 7 per-line accumulators
    m7_start_x: i32,
    m7_start_y: i32,
    // Counter latching
    h_count: u16,
    v_count: u16,
    h_count_second: bool,
    v_count_second: bool,
    counters_latched: bool,
    ppu1_open_bus: u8,
    ppu2_open_bus: u8,
    // Frame state
    pub(crate) even_frame: bool,
    frame_overscan: bool,
    frame_interlace: bool,
    mosaic_startline: u16,
    current_scanline: u16,
    last_rendered_x: u16,
    pixel_buffer: PixelBuffer,
}

impl Ppu {
    pub(crate) fn new() -> Self {
        Self {
            vram: BoxedArray::new(),
            cgram: BoxedArray::new(),
            oam: BoxedArray::new(),
            high_oam: [0; HIGH_OAM_LEN],
            vram_pointer: 0,
            vram_increment_on_high: false,
            vram_increment: 1,
            vram_remap_mode: 0,
            vram_read_buffer: 0,
            cgram_pointer: 0,
            cgram_second_write: false,
            cgram_buffer: 0,
            oam_adr: 0,
            oam_adr_written: 0,
            oam_in_high: false,
            oam_in_high_written: false,
            oam_second_write: false,
            oam_buffer: 0,
            obj_priority_rotation: false,
            time_over: false,
            range_over: false,
            obj_pixel_buffer: [0; 256],
            obj_priority_buffer: [0; 256],
            registers: Registers::new(),
            m7_start_x: 0,
            m7_start_y: 0,
            h_count: 0,
            v_count: 0,
            h_count_second: false,
            v_count_second: false,
            counters_latched: false,
            ppu1_open_bus: 0,
            ppu2_open_bus: 0,
            even_frame: false,
            frame_overscan: false,
            frame_interlace: false,
            mosaic_startline: 1,
            current_scanline: 0,
            last_rendered_x: 0,
            pixel_buffer: PixelBuffer::default(),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    // --- frame/line scheduling, driven by the master clock ---

    /// Called at (0, 0).
    pub(crate) fn handle_frame_start(&mut self) {
        self.mosaic_startline = 1;
        self.range_over = false;
        self.time_over = false;
        self.even_frame = !self.even_frame;
    }

    /// Called at the start of every visible scanline (1-224/239).
    pub(crate) fn start_line(&mut self, line: u16) {
        self.current_scanline = line;
        self.last_rendered_x = 0;

        self.obj_pixel_buffer.fill(0);
        if !self.registers.forced_blank {
            self.evaluate_sprites(line.wrapping_sub(1));
        }
        if self.registers.mode == 7 {
            self.calculate_mode7_starts(line);
        }
    }

    /// Renders pixels up to the current horizontal position (master clocks;
    /// one pixel per 4 clocks).
    pub(crate) fn catch_up(&mut self, h_pos: u16) {
        let target = (h_pos / 4).min(256);
        if self.current_scanline == 0 || target <= self.last_rendered_x {
            return;
        }

        for x in self.last_rendered_x..target {
            self.handle_pixel(x, self.current_scanline);
        }
        self.last_rendered_x = target;
    }

    pub(crate) fn finish_line(&mut self) {
        self.catch_up(1364);
        self.current_scanline = 0;
    }

    /// Samples the overscan flag at (0, 225).
    pub(crate) fn check_overscan(&mut self) -> bool {
        self.frame_overscan = self.registers.overscan;
        self.frame_overscan
    }

    /// Called at the start of vblank.
    pub(crate) fn handle_vblank(&mut self) {
        if !self.registers.forced_blank {
            self.oam_adr = self.oam_adr_written;
            self.oam_in_high = self.oam_in_high_written;
            self.oam_second_write = false;
        }
        self.frame_interlace = self.registers.interlace;
        self.current_scanline = 0;
    }

    pub(crate) fn visible_lines(&self) -> u16 {
        if self.registers.overscan { 239 } else { 224 }
    }

    pub(crate) fn latch_hv(&mut self, h_pos: u16, v_pos: u16) {
        self.h_count = h_pos / 4;
        self.v_count = v_pos;
        self.counters_latched = true;
    }

    // --- the per-pixel pipeline ---

    fn handle_pixel(&mut self, x: u16, y: u16) {
        let mut r = 0_i32;
        let mut g = 0_i32;
        let mut b = 0_i32;
        let mut r2 = 0_i32;
        let mut g2 = 0_i32;
        let mut b2 = 0_i32;

        let hires = self.registers.pseudo_hires || self.registers.mode == 5
            || self.registers.mode == 6;

        if !self.registers.forced_blank {
            let main_layer = self.get_pixel(x, y, false, &mut r, &mut g, &mut b);

            let color_window = self.get_window_state(5, x);
            if self.registers.clip_mode == 3
                || (self.registers.clip_mode == 2 && color_window)
                || (self.registers.clip_mode == 1 && !color_window)
            {
                r = 0;
                g = 0;
                b = 0;
            }

            let mut second_layer = 5_usize;
            let math_enabled = main_layer < 6
                && self.registers.math_enabled[main_layer]
                && !(self.registers.prevent_math_mode == 3
                    || (self.registers.prevent_math_mode == 2 && color_window)
                    || (self.registers.prevent_math_mode == 1 && !color_window));

            if (math_enabled && self.registers.add_subscreen) || hires {
                second_layer = self.get_pixel(x, y, true, &mut r2, &mut g2, &mut b2);
            }

            if math_enabled {
                let use_sub = self.registers.add_subscreen && second_layer != 5;
                let (sr, sg, sb) = if use_sub {
                    (r2, g2, b2)
                } else {
                    (
                        i32::from(self.registers.fixed_color_r),
                        i32::from(self.registers.fixed_color_g),
                        i32::from(self.registers.fixed_color_b),
                    )
                };
                if self.registers.subtract_color {
                    r -= sr;
                    g -= sg;
                    b -= sb;
                } else {
                    r += sr;
                    g += sg;
                    b += sb;
                }
                if self.registers.half_color && (second_layer != 5 || !self.registers.add_subscreen)
                {
                    r >>= 1;
                    g >>= 1;
                    b >>= 1;
                }
                r = r.clamp(0, 31);
                g = g.clamp(0, 31);
                b = b.clamp(0, 31);
            }

            if !hires {
                r2 = r;
                g2 = g;
                b2 = b;
            }
        }

        // Brightness scale, then 5-bit to 8-bit
        let brightness = i32::from(self.registers.brightness);
        r = r * brightness / 15;
        g = g * brightness / 15;
        b = b * brightness / 15;
        r2 = r2 * brightness / 15;
        g2 = g2 * brightness / 15;
        b2 = b2 * brightness / 15;

        let row = usize::from(y - 1) + if self.even_frame { 0 } else { FIELD_LINES };
        let base = row * PIXEL_ROW_BYTES + usize::from(x) * 8;
        let out = &mut self.pixel_buffer[base..base + 8];
        // Left pixel carries the sub screen in hi-res; BGRA byte order
        out[0] = (b2 << 3) as u8;
        out[1] = (g2 << 3) as u8;
        out[2] = (r2 << 3) as u8;
        out[3] = 0xFF;
        out[4] = (b << 3) as u8;
        out[5] = (g << 3) as u8;
        out[6] = (r << 3) as u8;
        out[7] = 0xFF;
    }

    /// Walks the mode's layer priority table and resolves the first opaque
    /// pixel. Returns the winning layer (0-3 BG, 4/6 sprites, 5 backdrop)
    /// and its color components.
    fn get_pixel(&self, x: u16, y: u16, sub: bool, r: &mut i32, g: &mut i32, b: &mut i32) -> usize {
        let mode = usize::from(self.registers.mode);
        let act_mode = if self.registers.mode == 1 && self.registers.bg3_priority {
            8
        } else if self.registers.mode == 7 && self.registers.m7.ext_bg {
            9
        } else {
            mode
        };

        let mut layer = 5_usize;
        let mut pixel = 0_i32;
        for i in 0..LAYER_COUNT_PER_MODE[act_mode] {
            let cur_layer = usize::from(LAYERS_PER_MODE[act_mode][i]);
            let cur_priority = PRIORITIES_PER_MODE[act_mode][i];

            let enable = &self.registers.layers[cur_layer.min(4)];
            let layer_active = if sub {
                enable.sub_screen
                    && (!enable.sub_windowed || !self.get_window_state(cur_layer, x))
            } else {
                enable.main_screen
                    && (!enable.main_windowed || !self.get_window_state(cur_layer, x))
            };

            if layer_active {
                pixel = if cur_layer < 4 {
                    let mut lx = i32::from(x);
                    let mut ly = i32::from(y);
                    if self.registers.bg[cur_layer].mosaic_enabled && self.registers.mosaic_size > 1
                    {
                        let size = i32::from(self.registers.mosaic_size);
                        lx -= lx % size;
                        ly -= (ly - i32::from(self.mosaic_startline)) % size;
                    }
                    if self.registers.mode == 7 {
                        self.get_pixel_for_mode7(lx, cur_layer, cur_priority != 0)
                    } else {
                        lx += i32::from(self.registers.bg[cur_layer].h_scroll);
                        if self.registers.mode == 5 || self.registers.mode == 6 {
                            lx *= 2;
                            lx += i32::from(
                                !(sub || self.registers.bg[cur_layer].mosaic_enabled),
                            );
                            if self.registers.interlace {
                                ly *= 2;
                                ly += i32::from(
                                    !(self.even_frame
                                        || self.registers.bg[cur_layer].mosaic_enabled),
                                );
                            }
                        }
                        ly += i32::from(self.registers.bg[cur_layer].v_scroll);
                        if matches!(self.registers.mode, 2 | 4 | 6) {
                            self.handle_offset_per_tile(cur_layer, &mut lx, &mut ly);
                        }
                        self.get_pixel_for_bg_layer(
                            lx & 0x3FF,
                            ly & 0x3FF,
                            cur_layer,
                            cur_priority != 0,
                        )
                    }
                } else {
                    // Sprite pixels come from the per-line buffer
                    if self.obj_priority_buffer[usize::from(x & 0xFF)] == cur_priority {
                        i32::from(self.obj_pixel_buffer[usize::from(x & 0xFF)])
                    } else {
                        0
                    }
                };
            } else {
                pixel = 0;
            }

            if pixel > 0 {
                layer = cur_layer;
                break;
            }
        }

        if self.registers.direct_color && layer < 4 && BIT_DEPTHS_PER_MODE[act_mode][layer] == 8 {
            *r = ((pixel & 0x07) << 2) | ((pixel & 0x100) >> 7);
            *g = ((pixel & 0x38) >> 1) | ((pixel & 0x200) >> 8);
            *b = ((pixel & 0xC0) >> 3) | ((pixel & 0x400) >> 8);
        } else {
            let color = self.cgram[(pixel & 0xFF) as usize];
            *r = i32::from(color & 0x1F);
            *g = i32::from((color >> 5) & 0x1F);
            *b = i32::from((color >> 10) & 0x1F);
        }

        if layer == 4 && pixel < 0xC0 {
            // Sprites with palettes 0-3 are exempt from color math
            layer = 6;
        }
        layer
    }

    fn get_pixel_for_bg_layer(&self, x: i32, y: i32, layer: usize, priority: bool) -> i32 {
        let bg = &self.registers.bg[layer];
        let mode = usize::from(self.registers.mode);

        let wide_tiles = bg.big_tiles || mode == 5 || mode == 6;
        let tile_bits_x = if wide_tiles { 4 } else { 3 };
        let tile_high_bit_x = if wide_tiles { 0x200 } else { 0x100 };
        let tile_bits_y = if bg.big_tiles { 4 } else { 3 };
        let tile_high_bit_y = if bg.big_tiles { 0x200 } else { 0x100 };

        let mut tilemap_adr = u32::from(bg.tilemap_addr)
            + ((((y >> tile_bits_y) & 0x1F) << 5) | ((x >> tile_bits_x) & 0x1F)) as u32;
        if x & tile_high_bit_x != 0 && bg.tilemap_wider {
            tilemap_adr += 0x400;
        }
        if y & tile_high_bit_y != 0 && bg.tilemap_taller {
            tilemap_adr += if bg.tilemap_wider { 0x800 } else { 0x400 };
        }
        let tile = self.vram[(tilemap_adr as usize) & 0x7FFF];

        if tile.bit(13) != priority {
            return 0;
        }
        let mut palette_num = i32::from((tile & 0x1C00) >> 10);

        let row = if tile.bit(15) { 7 - (y & 0x7) } else { y & 0x7 } as u32;
        let col = if tile.bit(14) { x & 0x7 } else { 7 - (x & 0x7) } as u32;
        let mut tile_num = u32::from(tile & 0x3FF);
        if wide_tiles && ((x & 8 != 0) != tile.bit(14)) {
            tile_num += 1;
        }
        if bg.big_tiles && ((y & 8 != 0) != tile.bit(15)) {
            tile_num += 0x10;
        }

        let bit_depth = u32::from(BIT_DEPTHS_PER_MODE[mode][layer]);
        if mode == 0 {
            palette_num += 8 * layer as i32;
        }

        let tile_base = u32::from(bg.tile_addr) + (tile_num & 0x3FF) * 4 * bit_depth + row;

        let mut palette_size = 4;
        let plane1 = self.vram[(tile_base as usize) & 0x7FFF];
        let mut pixel = (i32::from(plane1) >> col) & 1;
        pixel |= ((i32::from(plane1) >> (8 + col)) & 1) << 1;

        if bit_depth > 2 {
            palette_size = 16;
            let plane2 = self.vram[((tile_base + 8) as usize) & 0x7FFF];
            pixel |= ((i32::from(plane2) >> col) & 1) << 2;
            pixel |= ((i32::from(plane2) >> (8 + col)) & 1) << 3;
        }
        if bit_depth > 4 {
            palette_size = 256;
            let plane3 = self.vram[((tile_base + 16) as usize) & 0x7FFF];
            pixel |= ((i32::from(plane3) >> col) & 1) << 4;
            pixel |= ((i32::from(plane3) >> (8 + col)) & 1) << 5;
            let plane4 = self.vram[((tile_base + 24) as usize) & 0x7FFF];
            pixel |= ((i32::from(plane4) >> col) & 1) << 6;
            pixel |= ((i32::from(plane4) >> (8 + col)) & 1) << 7;
        }

        // Palette number rides in the upper bits for the shallow layers
        if pixel == 0 { 0 } else { palette_size * palette_num + pixel }
    }

    fn get_pixel_for_mode7(&self, x: i32, layer: usize, priority: bool) -> i32 {
        let m7 = &self.registers.m7;
        let rx = if m7.x_flip { 255 - x } else { x };
        let mut x_pos = (self.m7_start_x + i32::from(m7.matrix[0]) * rx) >> 8;
        let mut y_pos = (self.m7_start_y + i32::from(m7.matrix[2]) * rx) >> 8;

        let mut outside_map = x_pos < 0 || x_pos >= 1024 || y_pos < 0 || y_pos >= 1024;
        x_pos &= 0x3FF;
        y_pos &= 0x3FF;
        if !m7.large_field {
            outside_map = false;
        }

        let tile = if outside_map {
            0
        } else {
            u32::from(self.vram[((y_pos >> 3) * 128 + (x_pos >> 3)) as usize] & 0xFF)
        };
        let pixel = if outside_map && !m7.char_fill {
            0
        } else {
            i32::from(self.vram[(tile * 64 + ((y_pos & 7) * 8 + (x_pos & 7)) as u32) as usize] >> 8)
        };

        if layer == 1 {
            // ExtBG: bit 7 is the per-pixel priority
            if (pixel & 0x80 != 0) != priority {
                return 0;
            }
            return pixel & 0x7F;
        }
        pixel
    }

    fn get_window_state(&self, layer: usize, x: u16) -> bool {
        let window = &self.registers.windows[layer];
        if !window.window1_enabled && !window.window2_enabled {
            return false;
        }

        let x = x as u8;
        let test1 = x >= self.registers.window1_left && x <= self.registers.window1_right;
        let test2 = x >= self.registers.window2_left && x <= self.registers.window2_right;

        if window.window1_enabled && !window.window2_enabled {
            return window.window1_inverted != test1;
        }
        if !window.window1_enabled && window.window2_enabled {
            return window.window2_inverted != test2;
        }

        let test1 = window.window1_inverted != test1;
        let test2 = window.window2_inverted != test2;
        match window.mask_logic {
            0 => test1 || test2,
            1 => test1 && test2,
            2 => test1 != test2,
            _ => test1 == test2,
        }
    }

    /// Offset-per-tile (modes 2/4/6): BG3 tilemap entries displace BG1/BG2
    /// columns.
    fn handle_offset_per_tile(&self, layer: usize, lx: &mut i32, ly: &mut i32) {
        let x = *lx;
        let y = *ly;
        let h_scroll = i32::from(self.registers.bg[layer].h_scroll);

        let column = if self.registers.mode == 6 {
            ((x - (x & 0xF)) - ((h_scroll * 2) & !0xF)) >> 4
        } else {
            ((x - (x & 0x7)) - (h_scroll & !0x7)) >> 3
        };
        if column <= 0 {
            return;
        }

        let valid = if layer == 0 { 0x2000 } else { 0x4000 };
        let mut h_offset = i32::from(self.get_offset_value(column - 1, 0));
        let mut v_offset = 0;
        if self.registers.mode == 4 {
            if h_offset & 0x8000 != 0 {
                v_offset = h_offset;
                h_offset = 0;
            }
        } else {
            v_offset = i32::from(self.get_offset_value(column - 1, 1));
        }

        if self.registers.mode == 6 {
            if h_offset & valid != 0 {
                *lx = (((h_offset & 0x3F8) + column * 8) * 2) | (x & 0xF);
            }
        } else if h_offset & valid != 0 {
            *lx = ((h_offset & 0x3F8) + column * 8) | (x & 0x7);
        }
        if v_offset & valid != 0 {
            *ly = (v_offset & 0x3FF) + (y - i32::from(self.registers.bg[layer].v_scroll));
        }
    }

    fn get_offset_value(&self, col: i32, row: i32) -> u16 {
        let bg3 = &self.registers.bg[2];
        let x = col * 8 + i32::from(bg3.h_scroll);
        let y = row * 8 + i32::from(bg3.v_scroll);
        let tile_bits = if bg3.big_tiles { 4 } else { 3 };
        let tile_high_bit = if bg3.big_tiles { 0x200 } else { 0x100 };

        let mut tilemap_adr = u32::from(bg3.tilemap_addr)
            + ((((y >> tile_bits) & 0x1F) << 5) | ((x >> tile_bits) & 0x1F)) as u32;
        if x & tile_high_bit != 0 && bg3.tilemap_wider {
            tilemap_adr += 0x400;
        }
        if y & tile_high_bit != 0 && bg3.tilemap_taller {
            tilemap_adr += if bg3.tilemap_wider { 0x800 } else { 0x400 };
        }
        self.vram[(tilemap_adr as usize) & 0x7FFF]
    }

    /// Scans OAM for sprites on `line` and rasterizes up to 34 8-pixel
    /// slivers into the per-line buffers; sets the range/time flags beyond
    /// the hardware limits.
    fn evaluate_sprites(&mut self, line: u16) {
        let mut index = if self.obj_priority_rotation { self.oam_adr & 0xFE } else { 0 };
        let mut sprites_found = 0_usize;
        let mut tiles_found = 0_usize;
        let mut found_sprites = [0_u8; 32];

        for _ in 0..128 {
            let y = (self.oam[usize::from(index)] >> 8) as u8;
            let row = (line as u8).wrapping_sub(y);

            let size_select =
                (self.high_oam[usize::from(index >> 3)] >> ((index & 7) + 1)) & 1;
            let sprite_size = SPRITE_SIZES[usize::from(self.registers.obj_size)]
                [usize::from(size_select)];
            let sprite_height =
                if self.registers.obj_interlace { sprite_size / 2 } else { sprite_size };

            if u16::from(row) < sprite_height {
                let mut x = i32::from(self.oam[usize::from(index)] & 0xFF);
                x |= i32::from((self.high_oam[usize::from(index >> 3)] >> (index & 7)) & 1) << 8;
                if x > 255 {
                    x -= 512;
                }
                if x > -i32::from(sprite_size) {
                    sprites_found += 1;
                    if sprites_found > 32 {
                        self.range_over = true;
                        sprites_found = 32;
                        break;
                    }
                    found_sprites[sprites_found - 1] = index;
                }
            }
            index = index.wrapping_add(2);
        }

        // Back-to-front so earlier sprites win ties
        for i in (0..sprites_found).rev() {
            let index = found_sprites[i];
            let y = (self.oam[usize::from(index)] >> 8) as u8;
            let mut row = u16::from((line as u8).wrapping_sub(y));

            let size_select =
                (self.high_oam[usize::from(index >> 3)] >> ((index & 7) + 1)) & 1;
            let sprite_size = SPRITE_SIZES[usize::from(self.registers.obj_size)]
                [usize::from(size_select)];

            let mut x = i32::from(self.oam[usize::from(index)] & 0xFF);
            x |= i32::from((self.high_oam[usize::from(index >> 3)] >> (index & 7)) & 1) << 8;
            if x > 255 {
                x -= 512;
            }
            if x <= -i32::from(sprite_size) {
                continue;
            }

            if self.registers.obj_interlace {
                row = row * 2 + u16::from(!self.even_frame);
            }

            let attr = self.oam[usize::from(index) + 1];
            let tile = u32::from(attr & 0xFF);
            let palette = u32::from((attr & 0xE00) >> 9);
            let h_flipped = attr.bit(14);
            if attr.bit(15) {
                row = sprite_size - 1 - row;
            }

            let mut col = 0;
            while col < i32::from(sprite_size) {
                if col + x > -8 && col + x < 256 {
                    tiles_found += 1;
                    if tiles_found > 34 {
                        self.time_over = true;
                        break;
                    }

                    // Tiles wrap within their 16x16-tile page
                    let used_col =
                        if h_flipped { i32::from(sprite_size) - 1 - col } else { col } as u32;
                    let used_tile = ((((tile >> 4) + u32::from(row / 8)) << 4)
                        | (((tile & 0xF) + (used_col / 8)) & 0xF))
                        & 0xFF;

                    let obj_adr = if attr.bit(8) {
                        self.registers.obj_tile_addr2
                    } else {
                        self.registers.obj_tile_addr1
                    };
                    let tile_base = u32::from(obj_adr) + used_tile * 16 + u32::from(row & 0x7);
                    let plane1 = self.vram[(tile_base as usize) & 0x7FFF];
                    let plane2 = self.vram[((tile_base + 8) as usize) & 0x7FFF];

                    for px in 0..8_i32 {
                        let shift = if h_flipped { px } else { 7 - px } as u32;
                        let mut pixel = (u32::from(plane1) >> shift) & 1;
                        pixel |= ((u32::from(plane1) >> (8 + shift)) & 1) << 1;
                        pixel |= ((u32::from(plane2) >> shift) & 1) << 2;
                        pixel |= ((u32::from(plane2) >> (8 + shift)) & 1) << 3;

                        let screen_col = col + x + px;
                        if pixel > 0 && (0..256).contains(&screen_col) {
                            self.obj_pixel_buffer[screen_col as usize] =
                                (0x80 + 16 * palette + pixel) as u8;
                            self.obj_priority_buffer[screen_col as usize] =
                                ((attr & 0x3000) >> 12) as u8;
                        }
                    }
                }
                col += 8;
            }
            if tiles_found > 34 {
                break;
            }
        }
    }

    fn calculate_mode7_starts(&mut self, y: u16) {
        let m7 = &self.registers.m7;
        let h_scroll = i32::from(m7.h_scroll);
        let v_scroll = i32::from(m7.v_scroll);
        let x_center = i32::from(m7.x_center);
        let y_center = i32::from(m7.y_center);

        let mut clipped_h = h_scroll - x_center;
        let mut clipped_v = v_scroll - y_center;
        clipped_h = if clipped_h & 0x2000 != 0 { clipped_h | !1023 } else { clipped_h & 1023 };
        clipped_v = if clipped_v & 0x2000 != 0 { clipped_v | !1023 } else { clipped_v & 1023 };

        let mut y = i32::from(y);
        if self.registers.bg[0].mosaic_enabled && self.registers.mosaic_size > 1 {
            y -= (y - i32::from(self.mosaic_startline)) % i32::from(self.registers.mosaic_size);
        }
        let ry = if m7.y_flip { 255 - y } else { y };

        let a = i32::from(m7.matrix[0]);
        let b = i32::from(m7.matrix[1]);
        let c = i32::from(m7.matrix[2]);
        let d = i32::from(m7.matrix[3]);

        self.m7_start_x =
            ((a * clipped_h) & !63) + ((b * ry) & !63) + ((b * clipped_v) & !63) + (x_center << 8);
        self.m7_start_y =
            ((c * clipped_h) & !63) + ((d * ry) & !63) + ((d * clipped_v) & !63) + (y_center << 8);
    }

    // --- register ports ---

    fn vram_remapped_pointer(&self) -> u16 {
        let adr = self.vram_pointer;
        match self.vram_remap_mode {
            0 => adr,
            1 => (adr & 0xFF00) | ((adr & 0xE0) >> 5) | ((adr & 0x1F) << 3),
            2 => (adr & 0xFE00) | ((adr & 0x1C0) >> 6) | ((adr & 0x3F) << 3),
            _ => (adr & 0xFC00) | ((adr & 0x380) >> 7) | ((adr & 0x7F) << 3),
        }
    }

    pub(crate) fn read(&mut self, adr: u8, pal_timing: bool, open_bus: u8) -> u8 {
        match adr {
            0x04 | 0x05 | 0x06 | 0x08 | 0x09 | 0x0A | 0x14 | 0x15 | 0x16 | 0x18 | 0x19 | 0x1A
            | 0x24 | 0x25 | 0x26 | 0x28 | 0x29 | 0x2A => self.ppu1_open_bus,
            0x34..=0x36 => {
                // Mode 7 multiplication result
                let result =
                    i32::from(self.registers.m7.matrix[0]) * i32::from(self.registers.m7.matrix[1] >> 8);
                self.ppu1_open_bus = (result >> (8 * (adr - 0x34))) as u8;
                self.ppu1_open_bus
            }
            0x38 => {
                // OAMDATAREAD
                let value = if self.oam_in_high {
                    let v = self.high_oam
                        [usize::from((self.oam_adr & 0xF) << 1 | u8::from(self.oam_second_write))];
                    if self.oam_second_write {
                        self.oam_adr = self.oam_adr.wrapping_add(1);
                        if self.oam_adr == 0 {
                            self.oam_in_high = false;
                        }
                    }
                    v
                } else if !self.oam_second_write {
                    self.oam[usize::from(self.oam_adr)] as u8
                } else {
                    let v = (self.oam[usize::from(self.oam_adr)] >> 8) as u8;
                    self.oam_adr = self.oam_adr.wrapping_add(1);
                    if self.oam_adr == 0 {
                        self.oam_in_high = true;
                    }
                    v
                };
                self.oam_second_write = !self.oam_second_write;
                self.ppu1_open_bus = value;
                value
            }
            0x39 => {
                // VMDATALREAD: returns the latch, refills on low-byte mode
                let value = self.vram_read_buffer;
                if !self.vram_increment_on_high {
                    self.vram_read_buffer =
                        self.vram[usize::from(self.vram_remapped_pointer() & 0x7FFF)];
                    self.vram_pointer = self.vram_pointer.wrapping_add(self.vram_increment);
                }
                self.ppu1_open_bus = value as u8;
                value as u8
            }
            0x3A => {
                let value = self.vram_read_buffer;
                if self.vram_increment_on_high {
                    self.vram_read_buffer =
                        self.vram[usize::from(self.vram_remapped_pointer() & 0x7FFF)];
                    self.vram_pointer = self.vram_pointer.wrapping_add(self.vram_increment);
                }
                self.ppu1_open_bus = (value >> 8) as u8;
                (value >> 8) as u8
            }
            0x3B => {
                // CGDATAREAD
                let value = if !self.cgram_second_write {
                    self.cgram[usize::from(self.cgram_pointer)] as u8
                } else {
                    let v = ((self.cgram[usize::from(self.cgram_pointer)] >> 8) & 0x7F) as u8
                        | (self.ppu2_open_bus & 0x80);
                    self.cgram_pointer = self.cgram_pointer.wrapping_add(1);
                    v
                };
                self.cgram_second_write = !self.cgram_second_write;
                self.ppu2_open_bus = value;
                value
            }
            0x3C => {
                let value = if self.h_count_second {
                    ((self.h_count >> 8) as u8 & 1) | (self.ppu2_open_bus & 0xFE)
                } else {
                    self.h_count as u8
                };
                self.h_count_second = !self.h_count_second;
                self.ppu2_open_bus = value;
                value
            }
            0x3D => {
                let value = if self.v_count_second {
                    ((self.v_count >> 8) as u8 & 1) | (self.ppu2_open_bus & 0xFE)
                } else {
                    self.v_count as u8
                };
                self.v_count_second = !self.v_count_second;
                self.ppu2_open_bus = value;
                value
            }
            0x3E => {
                // STAT77: PPU1 version plus the sprite overflow flags
                let value = 0x01
                    | (self.ppu1_open_bus & 0x10)
                    | (u8::from(self.range_over) << 6)
                    | (u8::from(self.time_over) << 7);
                self.ppu1_open_bus = value;
                value
            }
            0x3F => {
                // STAT78: PPU2 version, PAL flag, latch status, field flag.
                // Reading clears the latch.
                let value = 0x03
                    | (u8::from(pal_timing) << 4)
                    | (self.ppu2_open_bus & 0x20)
                    | (u8::from(self.counters_latched) << 6)
                    | (u8::from(self.even_frame) << 7);
                self.counters_latched = false;
                self.h_count_second = false;
                self.v_count_second = false;
                self.ppu2_open_bus = value;
                value
            }
            _ => open_bus,
        }
    }

    pub(crate) fn write(&mut self, adr: u8, value: u8, v_pos: u16) {
        match adr {
            0x02 => {
                self.oam_adr = value;
                self.oam_adr_written = value;
                self.oam_in_high = self.oam_in_high_written;
                self.oam_second_write = false;
            }
            0x03 => {
                self.obj_priority_rotation = value.bit(7);
                self.oam_in_high = value.bit(0);
                self.oam_in_high_written = self.oam_in_high;
                self.oam_adr = self.oam_adr_written;
                self.oam_second_write = false;
            }
            0x04 => {
                // OAMDATA
                if self.oam_in_high {
                    self.high_oam
                        [usize::from((self.oam_adr & 0xF) << 1 | u8::from(self.oam_second_write))] =
                        value;
                    if self.oam_second_write {
                        self.oam_adr = self.oam_adr.wrapping_add(1);
                        if self.oam_adr == 0 {
                            self.oam_in_high = false;
                        }
                    }
                } else if !self.oam_second_write {
                    self.oam_buffer = value;
                } else {
                    self.oam[usize::from(self.oam_adr)] =
                        (u16::from(value) << 8) | u16::from(self.oam_buffer);
                    self.oam_adr = self.oam_adr.wrapping_add(1);
                    if self.oam_adr == 0 {
                        self.oam_in_high = true;
                    }
                }
                self.oam_second_write = !self.oam_second_write;
            }
            0x15 => {
                // VMAIN
                self.vram_increment = match value & 3 {
                    0 => 1,
                    1 => 32,
                    _ => 128,
                };
                self.vram_remap_mode = (value & 0x0C) >> 2;
                self.vram_increment_on_high = value.bit(7);
            }
            0x16 => {
                self.vram_pointer = (self.vram_pointer & 0xFF00) | u16::from(value);
                self.vram_read_buffer =
                    self.vram[usize::from(self.vram_remapped_pointer() & 0x7FFF)];
            }
            0x17 => {
                self.vram_pointer = (self.vram_pointer & 0x00FF) | (u16::from(value) << 8);
                self.vram_read_buffer =
                    self.vram[usize::from(self.vram_remapped_pointer() & 0x7FFF)];
            }
            0x18 => {
                let adr = usize::from(self.vram_remapped_pointer() & 0x7FFF);
                self.vram[adr] = (self.vram[adr] & 0xFF00) | u16::from(value);
                if !self.vram_increment_on_high {
                    self.vram_pointer = self.vram_pointer.wrapping_add(self.vram_increment);
                }
            }
            0x19 => {
                let adr = usize::from(self.vram_remapped_pointer() & 0x7FFF);
                self.vram[adr] = (self.vram[adr] & 0x00FF) | (u16::from(value) << 8);
                if self.vram_increment_on_high {
                    self.vram_pointer = self.vram_pointer.wrapping_add(self.vram_increment);
                }
            }
            0x21 => {
                self.cgram_pointer = value;
                self.cgram_second_write = false;
            }
            0x22 => {
                if !self.cgram_second_write {
                    self.cgram_buffer = value;
                } else {
                    self.cgram[usize::from(self.cgram_pointer)] =
                        (u16::from(value) << 8) | u16::from(self.cgram_buffer);
                    self.cgram_pointer = self.cgram_pointer.wrapping_add(1);
                }
                self.cgram_second_write = !self.cgram_second_write;
            }
            _ => {
                if self.registers.write(adr, value) == RegisterWriteEffect::MosaicChanged {
                    self.mosaic_startline = v_pos;
                }
            }
        }
    }

    // --- output ---

    /// Assembles the two rendered fields into a 512x478 BGRA frame.
    pub(crate) fn put_pixels(&self, out: &mut [u8]) {
        assert!(out.len() >= OUTPUT_WIDTH * OUTPUT_HEIGHT * 4);

        let lines = if self.frame_overscan { 239 } else { 224 };
        for y in 0..lines {
            let dest = y * 2 + if self.frame_overscan { 2 } else { 16 };
            let (y1, y2) = if self.frame_interlace {
                (y, y + FIELD_LINES)
            } else {
                let field = y + if self.even_frame { 0 } else { FIELD_LINES };
                (field, field)
            };

            out[dest * PIXEL_ROW_BYTES..(dest + 1) * PIXEL_ROW_BYTES].copy_from_slice(
                &self.pixel_buffer[y1 * PIXEL_ROW_BYTES..(y1 + 1) * PIXEL_ROW_BYTES],
            );
            out[(dest + 1) * PIXEL_ROW_BYTES..(dest + 2) * PIXEL_ROW_BYTES].copy_from_slice(
                &self.pixel_buffer[y2 * PIXEL_ROW_BYTES..(y2 + 1) * PIXEL_ROW_BYTES],
            );
        }

        out[0..2 * PIXEL_ROW_BYTES].fill(0);
        if !self.frame_overscan {
            out[2 * PIXEL_ROW_BYTES..16 * PIXEL_ROW_BYTES].fill(0);
            out[464 * PIXEL_ROW_BYTES..478 * PIXEL_ROW_BYTES].fill(0);
        }
    }

    /// Raw field pixels for headless extraction: returns the BGRA quad at
    /// (x, y) of the most recently rendered field.
    pub(crate) fn field_pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let row = y + if self.even_frame { 0 } else { FIELD_LINES };
        // Right pixel of the pair is the main-screen color
        let base = row * PIXEL_ROW_BYTES + x * 8 + 4;
        [
            self.pixel_buffer[base],
            self.pixel_buffer[base + 1],
            self.pixel_buffer[base + 2],
            self.pixel_buffer[base + 3],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ppu_with_backdrop(color: u16) -> Ppu {
        let mut ppu = Ppu::new();
        ppu.cgram[0] = color;
        ppu.registers.forced_blank = false;
        ppu.registers.brightness = 15;
        ppu
    }

    #[test]
    fn catch_up_applies_register_changes_mid_line() {
        let mut ppu = ppu_with_backdrop(0x001F); // red
        ppu.start_line(1);

        // Render the first 64 pixels, recolor the backdrop, then finish
        ppu.catch_up(64 * 4);
        ppu.cgram[0] = 0x7C00; // blue
        ppu.finish_line();

        let left = ppu.field_pixel(32, 0);
        let right = ppu.field_pixel(200, 0);
        assert_eq!(left, [0, 0, 31 << 3, 0xFF]);
        assert_eq!(right, [31 << 3, 0, 0, 0xFF]);
    }

    #[test]
    fn catch_up_is_idempotent_per_column() {
        let mut ppu = ppu_with_backdrop(0x001F);
        ppu.start_line(1);

        ppu.catch_up(100 * 4);
        // A second catch-up to the same column must not re-render with the
        // new palette
        ppu.cgram[0] = 0x03E0;
        ppu.catch_up(100 * 4);

        assert_eq!(ppu.field_pixel(99, 0), [0, 0, 31 << 3, 0xFF]);
    }

    #[test]
    fn forced_blank_overrides_everything() {
        let mut ppu = ppu_with_backdrop(0x7FFF);
        ppu.registers.forced_blank = true;
        ppu.start_line(1);
        ppu.finish_line();

        assert_eq!(ppu.field_pixel(128, 0), [0, 0, 0, 0xFF]);
    }

    #[test]
    fn brightness_scales_components() {
        let mut ppu = ppu_with_backdrop(0x7FFF);
        ppu.registers.brightness = 7;
        ppu.start_line(1);
        ppu.finish_line();

        let expected = ((31 * 7 / 15) << 3) as u8;
        assert_eq!(ppu.field_pixel(10, 0), [expected, expected, expected, 0xFF]);
    }

    #[test]
    fn vram_remap_mode_1_rotates_address_bits() {
        let mut ppu = Ppu::new();
        ppu.write(0x15, 0x04, 0); // remap mode 1
        ppu.write(0x16, 0x20, 0); // pointer $0020
        ppu.write(0x17, 0x00, 0);
        ppu.write(0x18, 0xAA, 0);

        // Mode 1: aaaaaaaaBBBccccc -> aaaaaaaacccccBBB
        let expected = ((0x20 & 0xE0) >> 5) | ((0x20 & 0x1F) << 3);
        assert_eq!(ppu.vram[expected as usize] & 0xFF, 0xAA);
    }

    #[test]
    fn window_single_range_and_inversion() {
        let mut ppu = Ppu::new();
        ppu.write(0x26, 0x40, 0); // window 1: $40-$80
        ppu.write(0x27, 0x80, 0);
        ppu.write(0x23, 0x02, 0); // BG1 window 1 enabled, not inverted

        assert!(!ppu.get_window_state(0, 0x3F));
        assert!(ppu.get_window_state(0, 0x40));
        assert!(ppu.get_window_state(0, 0x80));
        assert!(!ppu.get_window_state(0, 0x81));

        ppu.write(0x23, 0x03, 0); // inverted
        assert!(ppu.get_window_state(0, 0x3F));
        assert!(!ppu.get_window_state(0, 0x40));
    }

    #[test]
    fn window_xor_logic_combines_both_windows() {
        let mut ppu = Ppu::new();
        ppu.write(0x26, 0x10, 0);
        ppu.write(0x27, 0x40, 0);
        ppu.write(0x28, 0x30, 0);
        ppu.write(0x29, 0x60, 0);
        ppu.write(0x23, 0x0A, 0); // both windows on BG1
        ppu.write(0x2A, 0x02, 0); // BG1 mask logic: XOR

        assert!(ppu.get_window_state(0, 0x20)); // window 1 only
        assert!(!ppu.get_window_state(0, 0x38)); // overlap cancels
        assert!(ppu.get_window_state(0, 0x50)); // window 2 only
    }

    #[test]
    fn oam_port_writes_word_pairs() {
        let mut ppu = Ppu::new();
        ppu.write(0x02, 0x00, 0); // OAM address 0
        ppu.write(0x04, 0x34, 0); // low byte buffered
        ppu.write(0x04, 0x12, 0); // word committed on the high write

        assert_eq!(ppu.oam[0], 0x1234);
    }

    #[test]
    fn sprite_evaluation_sets_range_over_past_32_sprites() {
        let mut ppu = Ppu::new();
        ppu.registers.forced_blank = false;
        // 40 8x8 sprites on line 0, all at distinct columns
        for i in 0..40_usize {
            ppu.oam[i * 2] = (i as u16 * 6) & 0xFF; // y=0, x=i*6
            ppu.oam[i * 2 + 1] = 0;
        }
        ppu.start_line(1);
        assert!(ppu.range_over);
    }
}
