//! S-DSP: 8-voice BRR sample playback with ADSR/GAIN envelopes, pitch
//! modulation, a noise LFSR, and the echo FIR filter. One `cycle` per 32 kHz
//! sample tick; output lands in a 2048-sample stereo ring buffer that the
//! host drains once per video frame.

use crate::apu::AudioRam;
use bincode::{Decode, Encode};
use yaze_common::boxedarray::BoxedArray;
use yaze_common::num::GetBit;

const SAMPLE_BUFFER_LEN: usize = 0x800 * 2;

// Envelope/noise rate table: period and phase offset per rate value. Rate 0
// never fires.
const RATE_PERIODS: [u16; 32] = [
    0, 2048, 1536, 1280, 1024, 768, 640, 512, 384, 320, 256, 192, 160, 128, 96, 80, 64, 48, 40,
    32, 24, 20, 16, 12, 10, 8, 6, 5, 4, 3, 2, 1,
];

const RATE_OFFSETS: [u16; 32] = [
    0, 0, 1040, 536, 0, 1040, 536, 0, 1040, 536, 0, 1040, 536, 0, 1040, 536, 0, 1040, 536, 0,
    1040, 536, 0, 1040, 536, 0, 1040, 536, 0, 1040, 536, 0,
];

#[rustfmt::skip]
const GAUSS_TABLE: [i32; 512] = [
    0x000, 0x000, 0x000, 0x000, 0x000, 0x000, 0x000, 0x000, 0x000, 0x000, 0x000, 0x000, 0x000,
    0x000, 0x000, 0x000, 0x001, 0x001, 0x001, 0x001, 0x001, 0x001, 0x001, 0x001, 0x001, 0x001,
    0x001, 0x002, 0x002, 0x002, 0x002, 0x002, 0x002, 0x002, 0x003, 0x003, 0x003, 0x003, 0x003,
    0x004, 0x004, 0x004, 0x004, 0x004, 0x005, 0x005, 0x005, 0x005, 0x006, 0x006, 0x006, 0x006,
    0x007, 0x007, 0x007, 0x008, 0x008, 0x008, 0x009, 0x009, 0x009, 0x00a, 0x00a, 0x00a, 0x00b,
    0x00b, 0x00b, 0x00c, 0x00c, 0x00d, 0x00d, 0x00e, 0x00e, 0x00f, 0x00f, 0x00f, 0x010, 0x010,
    0x011, 0x011, 0x012, 0x013, 0x013, 0x014, 0x014, 0x015, 0x015, 0x016, 0x017, 0x017, 0x018,
    0x018, 0x019, 0x01a, 0x01b, 0x01b, 0x01c, 0x01d, 0x01d, 0x01e, 0x01f, 0x020, 0x020, 0x021,
    0x022, 0x023, 0x024, 0x024, 0x025, 0x026, 0x027, 0x028, 0x029, 0x02a, 0x02b, 0x02c, 0x02d,
    0x02e, 0x02f, 0x030, 0x031, 0x032, 0x033, 0x034, 0x035, 0x036, 0x037, 0x038, 0x03a, 0x03b,
    0x03c, 0x03d, 0x03e, 0x040, 0x041, 0x042, 0x043, 0x045, 0x046, 0x047, 0x049, 0x04a, 0x04c,
    0x04d, 0x04e, 0x050, 0x051, 0x053, 0x054, 0x056, 0x057, 0x059, 0x05a, 0x05c, 0x05e, 0x05f,
    0x061, 0x063, 0x064, 0x066, 0x068, 0x06a, 0x06b, 0x06d, 0x06f, 0x071, 0x073, 0x075, 0x076,
    0x078, 0x07a, 0x07c, 0x07e, 0x080, 0x082, 0x084, 0x086, 0x089, 0x08b, 0x08d, 0x08f, 0x091,
    0x093, 0x096, 0x098, 0x09a, 0x09c, 0x09f, 0x0a1, 0x0a3, 0x0a6, 0x0a8, 0x0ab, 0x0ad, 0x0af,
    0x0b2, 0x0b4, 0x0b7, 0x0ba, 0x0bc, 0x0bf, 0x0c1, 0x0c4, 0x0c7, 0x0c9, 0x0cc, 0x0cf, 0x0d2,
    0x0d4, 0x0d7, 0x0da, 0x0dd, 0x0e0, 0x0e3, 0x0e6, 0x0e9, 0x0ec, 0x0ef, 0x0f2, 0x0f5, 0x0f8,
    0x0fb, 0x0fe, 0x101, 0x104, 0x107, 0x10b, 0x10e, 0x111, 0x114, 0x118, 0x11b, 0x11e, 0x122,
    0x125, 0x129, 0x12c, 0x130, 0x133, 0x137, 0x13a, 0x13e, 0x141, 0x145, 0x148, 0x14c, 0x150,
    0x153, 0x157, 0x15b, 0x15f, 0x162, 0x166, 0x16a, 0x16e, 0x172, 0x176, 0x17a, 0x17d, 0x181,
    0x185, 0x189, 0x18d, 0x191, 0x195, 0x19a, 0x19e, 0x1a2, 0x1a6, 0x1aa, 0x1ae, 0x1b2, 0x1b7,
    0x1bb, 0x1bf, 0x1c3, 0x1c8, 0x1cc, 0x1d0, 0x1d5, 0x1d9, 0x1dd, 0x1e2, 0x1e6, 0x1eb, 0x1ef,
    0x1f3, 0x1f8, 0x1fc, 0x201, 0x205, 0x20a, 0x20f, 0x213, 0x218, 0x21c, 0x221, 0x226, 0x22a,
    0x22f, 0x233, 0x238, 0x23d, 0x241, 0x246, 0x24b, 0x250, 0x254, 0x259, 0x25e, 0x263, 0x267,
    0x26c, 0x271, 0x276, 0x27b, 0x280, 0x284, 0x289, 0x28e, 0x293, 0x298, 0x29d, 0x2a2, 0x2a6,
    0x2ab, 0x2b0, 0x2b5, 0x2ba, 0x2bf, 0x2c4, 0x2c9, 0x2ce, 0x2d3, 0x2d8, 0x2dc, 0x2e1, 0x2e6,
    0x2eb, 0x2f0, 0x2f5, 0x2fa, 0x2ff, 0x304, 0x309, 0x30e, 0x313, 0x318, 0x31d, 0x322, 0x326,
    0x32b, 0x330, 0x335, 0x33a, 0x33f, 0x344, 0x349, 0x34e, 0x353, 0x357, 0x35c, 0x361, 0x366,
    0x36b, 0x370, 0x374, 0x379, 0x37e, 0x383, 0x388, 0x38c, 0x391, 0x396, 0x39b, 0x39f, 0x3a4,
    0x3a9, 0x3ad, 0x3b2, 0x3b7, 0x3bb, 0x3c0, 0x3c5, 0x3c9, 0x3ce, 0x3d2, 0x3d7, 0x3dc, 0x3e0,
    0x3e5, 0x3e9, 0x3ed, 0x3f2, 0x3f6, 0x3fb, 0x3ff, 0x403, 0x408, 0x40c, 0x410, 0x415, 0x419,
    0x41d, 0x421, 0x425, 0x42a, 0x42e, 0x432, 0x436, 0x43a, 0x43e, 0x442, 0x446, 0x44a, 0x44e,
    0x452, 0x455, 0x459, 0x45d, 0x461, 0x465, 0x468, 0x46c, 0x470, 0x473, 0x477, 0x47a, 0x47e,
    0x481, 0x485, 0x488, 0x48c, 0x48f, 0x492, 0x496, 0x499, 0x49c, 0x49f, 0x4a2, 0x4a6, 0x4a9,
    0x4ac, 0x4af, 0x4b2, 0x4b5, 0x4b7, 0x4ba, 0x4bd, 0x4c0, 0x4c3, 0x4c5, 0x4c8, 0x4cb, 0x4cd,
    0x4d0, 0x4d2, 0x4d5, 0x4d7, 0x4d9, 0x4dc, 0x4de, 0x4e0, 0x4e3, 0x4e5, 0x4e7, 0x4e9, 0x4eb,
    0x4ed, 0x4ef, 0x4f1, 0x4f3, 0x4f5, 0x4f6, 0x4f8, 0x4fa, 0x4fb, 0x4fd, 0x4ff, 0x500, 0x502,
    0x503, 0x504, 0x506, 0x507, 0x508, 0x50a, 0x50b, 0x50c, 0x50d, 0x50e, 0x50f, 0x510, 0x511,
    0x511, 0x512, 0x513, 0x514, 0x514, 0x515, 0x516, 0x516, 0x517, 0x517, 0x517, 0x518, 0x518,
    0x518, 0x518, 0x518, 0x519, 0x519,
];

/// Host-side resampling algorithm for `get_samples`. The voice pipeline
/// itself always interpolates with the hardware's Gaussian kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum InterpolationMode {
    Linear,
    Cosine,
    Hermite,
    Cubic,
    #[default]
    Gaussian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum EnvelopePhase {
    Attack,
    Decay,
    Sustain,
    #[default]
    Release,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Voice {
    // Pitch
    pitch: u16,
    pitch_counter: u16,
    pitch_modulation: bool,
    // BRR decoding
    decode_buffer: [i16; 12],
    buffer_offset: u8,
    srcn: u8,
    decode_offset: u16,
    block_offset: u8,
    brr_header: u8,
    use_noise: bool,
    start_delay: u8,
    // Envelope: rates are attack, decay, sustain, gain
    adsr_rates: [u8; 4],
    phase: EnvelopePhase,
    sustain_level: u8,
    gain_sustain_level: u8,
    use_gain: bool,
    gain_mode: u8,
    direct_gain: bool,
    gain_value: u16,
    preclamp_gain: u16,
    gain: u16,
    // Key latches
    key_on: bool,
    key_off: bool,
    // Output
    sample_out: i16,
    volume_l: i8,
    volume_r: i8,
    echo_enable: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Dsp {
    // Raw register mirror; reads return the last written byte, with ENVX,
    // OUTX, and ENDX refreshed by the sample pipeline
    ram: [u8; 0x80],
    voices: [Voice; 8],
    counter: u16,
    dir_page: u16,
    even_cycle: bool,
    mute: bool,
    reset: bool,
    master_volume_l: i8,
    master_volume_r: i8,
    // Per-sample accumulators
    sample_out_l: i16,
    sample_out_r: i16,
    echo_out_l: i16,
    echo_out_r: i16,
    // Noise
    noise_sample: i16,
    noise_rate: u8,
    // Echo
    echo_writes: bool,
    echo_volume_l: i8,
    echo_volume_r: i8,
    feedback_volume: i8,
    echo_buffer_addr: u16,
    echo_delay: u16,
    echo_length: u16,
    echo_buffer_index: u16,
    fir_buffer_index: u8,
    fir_values: [i8; 8],
    fir_buffer_l: [i16; 8],
    fir_buffer_r: [i16; 8],
    // Output ring buffer (stereo interleaved)
    sample_buffer: BoxedArray<i16, SAMPLE_BUFFER_LEN>,
    sample_offset: u16,
    last_frame_boundary: u16,
    debug_mute: [bool; 8],
    pub(crate) interpolation: InterpolationMode,
}

fn clamp16(value: i32) -> i32 {
    value.clamp(-0x8000, 0x7FFF)
}

fn clip16(value: i32) -> i32 {
    (value as i16).into()
}

impl Dsp {
    pub(crate) fn new() -> Self {
        let mut dsp = Self {
            ram: [0; 0x80],
            voices: Default::default(),
            counter: 0,
            dir_page: 0,
            even_cycle: true,
            mute: true,
            reset: true,
            master_volume_l: 0,
            master_volume_r: 0,
            sample_out_l: 0,
            sample_out_r: 0,
            echo_out_l: 0,
            echo_out_r: 0,
            noise_sample: 0x4000,
            noise_rate: 0,
            echo_writes: false,
            echo_volume_l: 0,
            echo_volume_r: 0,
            feedback_volume: 0,
            echo_buffer_addr: 0,
            echo_delay: 0,
            echo_length: 0,
            echo_buffer_index: 0,
            fir_buffer_index: 0,
            fir_values: [0; 8],
            fir_buffer_l: [0; 8],
            fir_buffer_r: [0; 8],
            sample_buffer: BoxedArray::new(),
            sample_offset: 0,
            last_frame_boundary: 0,
            debug_mute: [false; 8],
            interpolation: InterpolationMode::default(),
        };
        // All end flags are set out of reset
        dsp.ram[0x7C] = 0xFF;
        dsp
    }

    pub(crate) fn reset(&mut self) {
        let interpolation = self.interpolation;
        *self = Self::new();
        self.interpolation = interpolation;
    }

    /// One 32 kHz sample tick.
    pub(crate) fn cycle(&mut self, aram: &mut AudioRam) {
        self.sample_out_l = 0;
        self.sample_out_r = 0;
        self.echo_out_l = 0;
        self.echo_out_r = 0;

        for ch in 0..8 {
            self.cycle_voice(ch, aram);
        }

        // Echo FIR also applies the master volume
        self.handle_echo(aram);

        self.counter = if self.counter == 0 { 30720 } else { self.counter - 1 };
        self.handle_noise();

        // Key on/off latches are sampled every other tick
        self.even_cycle = !self.even_cycle;

        if self.mute {
            self.sample_out_l = 0;
            self.sample_out_r = 0;
        }

        let offset = usize::from(self.sample_offset & 0x7FF) * 2;
        self.sample_buffer[offset] = self.sample_out_l;
        self.sample_buffer[offset + 1] = self.sample_out_r;
        self.sample_offset = (self.sample_offset + 1) & 0x7FF;
    }

    fn check_counter(&self, rate: u8) -> bool {
        if rate == 0 {
            return false;
        }
        (self.counter + RATE_OFFSETS[usize::from(rate)]) % RATE_PERIODS[usize::from(rate)] == 0
    }

    fn cycle_voice(&mut self, ch: usize, aram: &mut AudioRam) {
        let mut pitch = i32::from(self.voices[ch].pitch);
        if ch > 0 && self.voices[ch].pitch_modulation {
            pitch += ((i32::from(self.voices[ch - 1].sample_out) >> 5) * pitch) >> 10;
        }

        self.voices[ch].brr_header = aram[usize::from(self.voices[ch].decode_offset)];
        let mut sample_pointer = self.dir_page.wrapping_add(4 * u16::from(self.voices[ch].srcn));
        if self.voices[ch].start_delay == 0 {
            // Past the start block: the table's loop address applies
            sample_pointer = sample_pointer.wrapping_add(2);
        }
        let sample_addr = u16::from_le_bytes([
            aram[usize::from(sample_pointer)],
            aram[usize::from(sample_pointer.wrapping_add(1))],
        ]);

        if self.voices[ch].start_delay > 0 {
            if self.voices[ch].start_delay == 5 {
                // Freshly keyed on
                let voice = &mut self.voices[ch];
                voice.decode_offset = sample_addr;
                voice.block_offset = 1;
                voice.buffer_offset = 0;
                voice.brr_header = 0;
                self.ram[0x7C] &= !(1 << ch);
            }
            let voice = &mut self.voices[ch];
            voice.gain = 0;
            voice.start_delay -= 1;
            voice.pitch_counter = 0;
            if voice.start_delay > 0 && voice.start_delay < 4 {
                voice.pitch_counter = 0x4000;
            }
            pitch = 0;
        }

        let raw_sample = if self.voices[ch].use_noise {
            clip16(i32::from(self.noise_sample) * 2)
        } else {
            self.interpolate_voice(ch)
        };

        // 15-bit sample scaled by the 11-bit envelope; the low bit drops out
        let sample = ((raw_sample * i32::from(self.voices[ch].gain)) >> 11) & !1;

        if self.reset || self.voices[ch].brr_header & 0x03 == 1 {
            self.voices[ch].phase = EnvelopePhase::Release;
            self.voices[ch].gain = 0;
        }

        if self.even_cycle {
            if self.voices[ch].key_off {
                self.voices[ch].phase = EnvelopePhase::Release;
            }
            if self.voices[ch].key_on {
                self.voices[ch].start_delay = 5;
                self.voices[ch].phase = EnvelopePhase::Attack;
                self.voices[ch].key_on = false;
            }
        }

        if self.voices[ch].start_delay == 0 {
            self.handle_gain(ch);
        }

        if self.voices[ch].pitch_counter >= 0x4000 {
            self.decode_brr(ch, aram);

            let voice = &mut self.voices[ch];
            if voice.block_offset >= 7 {
                if voice.brr_header.bit(0) {
                    voice.decode_offset = sample_addr;
                    self.ram[0x7C] |= 1 << ch;
                } else {
                    voice.decode_offset = voice.decode_offset.wrapping_add(9);
                }
                voice.block_offset = 1;
            } else {
                voice.block_offset += 2;
            }
        }

        let voice = &mut self.voices[ch];
        voice.pitch_counter &= 0x3FFF;
        voice.pitch_counter =
            ((i32::from(voice.pitch_counter) + pitch) & 0xFFFF) as u16;
        if voice.pitch_counter > 0x7FFF {
            voice.pitch_counter = 0x7FFF;
        }

        self.ram[(ch << 4) | 8] = (self.voices[ch].gain >> 4) as u8;
        self.ram[(ch << 4) | 9] = (sample >> 8) as u8;
        self.voices[ch].sample_out = sample as i16;

        if !self.debug_mute[ch] {
            let volume_l = i32::from(self.voices[ch].volume_l);
            let volume_r = i32::from(self.voices[ch].volume_r);
            self.sample_out_l =
                clamp16(i32::from(self.sample_out_l) + ((sample * volume_l) >> 7)) as i16;
            self.sample_out_r =
                clamp16(i32::from(self.sample_out_r) + ((sample * volume_r) >> 7)) as i16;
            if self.voices[ch].echo_enable {
                self.echo_out_l =
                    clamp16(i32::from(self.echo_out_l) + ((sample * volume_l) >> 7)) as i16;
                self.echo_out_r =
                    clamp16(i32::from(self.echo_out_r) + ((sample * volume_r) >> 7)) as i16;
            }
        }
    }

    /// 4-tap Gaussian interpolation over the BRR decode ring.
    fn interpolate_voice(&self, ch: usize) -> i32 {
        let voice = &self.voices[ch];
        let pos = usize::from(voice.pitch_counter >> 12) + usize::from(voice.buffer_offset);
        let offset = usize::from((voice.pitch_counter >> 4) & 0xFF);

        let newest = i32::from(voice.decode_buffer[(pos + 3) % 12]);
        let old = i32::from(voice.decode_buffer[(pos + 2) % 12]);
        let older = i32::from(voice.decode_buffer[(pos + 1) % 12]);
        let oldest = i32::from(voice.decode_buffer[pos % 12]);

        let mut out = (GAUSS_TABLE[0x0FF - offset] * oldest) >> 11;
        out += (GAUSS_TABLE[0x1FF - offset] * older) >> 11;
        out += (GAUSS_TABLE[0x100 + offset] * old) >> 11;
        out = clip16(out) + ((GAUSS_TABLE[offset] * newest) >> 11);
        clamp16(out) & !1
    }

    fn handle_gain(&mut self, ch: usize) {
        let voice = &self.voices[ch];
        let mut new_gain = i32::from(voice.gain);
        let rate;

        if voice.phase == EnvelopePhase::Release {
            rate = 31;
            new_gain -= 8;
        } else if !voice.use_gain {
            match voice.phase {
                EnvelopePhase::Attack => {
                    rate = voice.adsr_rates[0];
                    new_gain += if rate == 31 { 1024 } else { 32 };
                }
                EnvelopePhase::Decay | EnvelopePhase::Sustain => {
                    rate = voice.adsr_rates
                        [if voice.phase == EnvelopePhase::Decay { 1 } else { 2 }];
                    new_gain -= ((new_gain - 1) >> 8) + 1;
                }
                EnvelopePhase::Release => unreachable!(),
            }
        } else if !voice.direct_gain {
            rate = voice.adsr_rates[3];
            match voice.gain_mode {
                0 => new_gain -= 32,
                1 => new_gain -= ((new_gain - 1) >> 8) + 1,
                2 => new_gain += 32,
                _ => new_gain += if voice.preclamp_gain < 0x600 { 32 } else { 8 },
            }
        } else {
            rate = 31;
            new_gain = i32::from(voice.gain_value);
        }

        let sustain_level =
            if voice.use_gain { voice.gain_sustain_level } else { voice.sustain_level };
        if self.voices[ch].phase == EnvelopePhase::Decay
            && (new_gain >> 8) as u8 == sustain_level
        {
            self.voices[ch].phase = EnvelopePhase::Sustain;
        }

        self.voices[ch].preclamp_gain = (new_gain & 0xFFFF) as u16;

        if !(0..=0x7FF).contains(&new_gain) {
            new_gain = new_gain.clamp(0, 0x7FF);
            if self.voices[ch].phase == EnvelopePhase::Attack {
                self.voices[ch].phase = EnvelopePhase::Decay;
            }
        }

        if self.check_counter(rate) {
            self.voices[ch].gain = new_gain as u16;
        }
    }

    /// Decodes the next group of 4 BRR nibbles into the voice's ring buffer.
    fn decode_brr(&mut self, ch: usize, aram: &AudioRam) {
        let voice = &mut self.voices[ch];
        let shift = voice.brr_header >> 4;
        let filter = (voice.brr_header & 0x0C) >> 2;
        let base = usize::from(voice.buffer_offset);

        let mut old =
            i32::from(voice.decode_buffer[if base == 0 { 11 } else { base - 1 }]) >> 1;
        let mut older =
            i32::from(voice.decode_buffer[if base == 0 { 10 } else { base - 2 }]) >> 1;

        let mut cur_byte = 0_u8;
        for i in 0..4 {
            let mut s;
            if i & 1 == 1 {
                s = i32::from(cur_byte & 0x0F);
            } else {
                cur_byte = aram[usize::from(
                    voice
                        .decode_offset
                        .wrapping_add(u16::from(voice.block_offset))
                        .wrapping_add(i as u16 >> 1),
                )];
                s = i32::from(cur_byte >> 4);
            }
            if s > 7 {
                s -= 16;
            }

            if shift <= 0x0C {
                s = (s << shift) >> 1;
            } else {
                // "Invalid" shifts collapse to 0 or -2048
                s = (s >> 3) << 12;
            }

            match filter {
                1 => s += old + (-old >> 4),
                2 => s += 2 * old + ((3 * -old) >> 5) - older + (older >> 4),
                3 => s += 2 * old + ((13 * -old) >> 6) - older + ((3 * older) >> 4),
                _ => {}
            }

            // Clamp to 16 bits, then clip to 15 by doubling
            voice.decode_buffer[base + i] = (clamp16(s) * 2) as i16;
            older = old;
            old = i32::from(voice.decode_buffer[base + i]) >> 1;
        }

        voice.buffer_offset += 4;
        if voice.buffer_offset >= 12 {
            voice.buffer_offset = 0;
        }
    }

    fn handle_noise(&mut self) {
        if self.check_counter(self.noise_rate) {
            let bit = (self.noise_sample & 1) ^ ((self.noise_sample >> 1) & 1);
            self.noise_sample = ((self.noise_sample >> 1) & 0x3FFF) | (bit << 14);
        }
    }

    fn handle_echo(&mut self, aram: &mut AudioRam) {
        self.fir_buffer_index = (self.fir_buffer_index + 1) & 0x7;

        let addr = self.echo_buffer_addr.wrapping_add(self.echo_buffer_index);
        let ram_sample = i16::from_le_bytes([
            aram[usize::from(addr)],
            aram[usize::from(addr.wrapping_add(1))],
        ]);
        self.fir_buffer_l[usize::from(self.fir_buffer_index)] = ram_sample >> 1;
        let ram_sample = i16::from_le_bytes([
            aram[usize::from(addr.wrapping_add(2))],
            aram[usize::from(addr.wrapping_add(3))],
        ]);
        self.fir_buffer_r[usize::from(self.fir_buffer_index)] = ram_sample >> 1;

        // 8-tap FIR over the echo history; clipped to 16 bits before the
        // final tap
        let mut sum_l = 0_i32;
        let mut sum_r = 0_i32;
        for i in 0..8 {
            let tap = usize::from((self.fir_buffer_index + i as u8 + 1) & 0x7);
            let coefficient = i32::from(self.fir_values[i]);
            sum_l += (i32::from(self.fir_buffer_l[tap]) * coefficient) >> 6;
            sum_r += (i32::from(self.fir_buffer_r[tap]) * coefficient) >> 6;
            if i == 6 {
                sum_l = clip16(sum_l);
                sum_r = clip16(sum_r);
            }
        }
        let sum_l = clamp16(sum_l) & !1;
        let sum_r = clamp16(sum_r) & !1;

        self.sample_out_l = clamp16(
            ((i32::from(self.sample_out_l) * i32::from(self.master_volume_l)) >> 7)
                + ((sum_l * i32::from(self.echo_volume_l)) >> 7),
        ) as i16;
        self.sample_out_r = clamp16(
            ((i32::from(self.sample_out_r) * i32::from(self.master_volume_r)) >> 7)
                + ((sum_r * i32::from(self.echo_volume_r)) >> 7),
        ) as i16;

        let echo_l = clamp16(
            i32::from(self.echo_out_l) + clip16((sum_l * i32::from(self.feedback_volume)) >> 7),
        ) & !1;
        let echo_r = clamp16(
            i32::from(self.echo_out_r) + clip16((sum_r * i32::from(self.feedback_volume)) >> 7),
        ) & !1;

        if self.echo_writes {
            let [l_lsb, l_msb] = (echo_l as i16).to_le_bytes();
            let [r_lsb, r_msb] = (echo_r as i16).to_le_bytes();
            aram[usize::from(addr)] = l_lsb;
            aram[usize::from(addr.wrapping_add(1))] = l_msb;
            aram[usize::from(addr.wrapping_add(2))] = r_lsb;
            aram[usize::from(addr.wrapping_add(3))] = r_msb;
        }

        if self.echo_buffer_index == 0 {
            self.echo_length = self.echo_delay * 4;
        }
        self.echo_buffer_index += 4;
        if self.echo_buffer_index >= self.echo_length {
            self.echo_buffer_index = 0;
        }
    }

    // --- register file ---

    pub(crate) fn read(&self, adr: u8) -> u8 {
        self.ram[usize::from(adr & 0x7F)]
    }

    pub(crate) fn write(&mut self, adr: u8, mut value: u8) {
        let ch = usize::from(adr >> 4);
        match adr & 0x0F {
            0x00 if ch < 8 => self.voices[ch].volume_l = value as i8,
            0x01 if ch < 8 => self.voices[ch].volume_r = value as i8,
            0x02 if ch < 8 => {
                self.voices[ch].pitch = (self.voices[ch].pitch & 0x3F00) | u16::from(value);
            }
            0x03 if ch < 8 => {
                self.voices[ch].pitch =
                    ((self.voices[ch].pitch & 0x00FF) | (u16::from(value) << 8)) & 0x3FFF;
            }
            0x04 if ch < 8 => self.voices[ch].srcn = value,
            0x05 if ch < 8 => {
                self.voices[ch].adsr_rates[0] = (value & 0x0F) * 2 + 1;
                self.voices[ch].adsr_rates[1] = ((value & 0x70) >> 4) * 2 + 16;
                self.voices[ch].use_gain = !value.bit(7);
            }
            0x06 if ch < 8 => {
                self.voices[ch].adsr_rates[2] = value & 0x1F;
                self.voices[ch].sustain_level = (value & 0xE0) >> 5;
            }
            0x07 if ch < 8 => {
                self.voices[ch].direct_gain = !value.bit(7);
                self.voices[ch].gain_mode = (value & 0x60) >> 5;
                self.voices[ch].adsr_rates[3] = value & 0x1F;
                self.voices[ch].gain_value = u16::from(value & 0x7F) * 16;
                self.voices[ch].gain_sustain_level = (value & 0xE0) >> 5;
            }
            0x0F if ch < 8 => self.fir_values[ch] = value as i8,
            _ => match adr {
                0x0C => self.master_volume_l = value as i8,
                0x1C => self.master_volume_r = value as i8,
                0x2C => self.echo_volume_l = value as i8,
                0x3C => self.echo_volume_r = value as i8,
                0x4C => {
                    for (i, voice) in self.voices.iter_mut().enumerate() {
                        voice.key_on = value.bit(i as u8);
                    }
                }
                0x5C => {
                    for (i, voice) in self.voices.iter_mut().enumerate() {
                        voice.key_off = value.bit(i as u8);
                    }
                }
                0x6C => {
                    self.reset = value.bit(7);
                    self.mute = value.bit(6);
                    self.echo_writes = !value.bit(5);
                    self.noise_rate = value & 0x1F;
                }
                0x7C => {
                    // Any ENDX write clears every flag
                    value = 0;
                }
                0x0D => self.feedback_volume = value as i8,
                0x2D => {
                    for (i, voice) in self.voices.iter_mut().enumerate() {
                        voice.pitch_modulation = value.bit(i as u8);
                    }
                }
                0x3D => {
                    for (i, voice) in self.voices.iter_mut().enumerate() {
                        voice.use_noise = value.bit(i as u8);
                    }
                }
                0x4D => {
                    for (i, voice) in self.voices.iter_mut().enumerate() {
                        voice.echo_enable = value.bit(i as u8);
                    }
                }
                0x5D => self.dir_page = u16::from(value) << 8,
                0x6D => self.echo_buffer_addr = u16::from(value) << 8,
                0x7D => {
                    // 2048-byte steps; a stereo sample pair is 4 bytes
                    self.echo_delay = u16::from(value & 0x0F) * 512;
                }
                _ => {}
            },
        }
        self.ram[usize::from(adr & 0x7F)] = value;
    }

    // --- host output ---

    /// Marks the current ring position as a video-frame boundary; the
    /// resampler reads one frame behind it.
    pub(crate) fn new_frame(&mut self) {
        self.last_frame_boundary = self.sample_offset;
    }

    /// Resamples the last frame's worth of native samples into
    /// `samples_per_frame` interleaved stereo output frames.
    pub(crate) fn get_samples(&self, out: &mut [i16], samples_per_frame: usize, pal_timing: bool) {
        // NTSC: 32040 Hz / 60.0988 frames -> ~533.1 samples per frame
        // PAL:  32040 Hz / 50.007 frames -> ~640.7 samples per frame
        let native_per_frame =
            if pal_timing { 32040.0 / 50.007 } else { 32040.0 / 60.0988 };
        let step = native_per_frame / samples_per_frame as f64;

        let mut location = f64::from(self.last_frame_boundary) - native_per_frame;
        while location < 0.0 {
            location += 0x800 as f64;
        }

        for i in 0..samples_per_frame {
            let idx = (location as usize) & 0x7FF;
            let frac = location - location.floor();

            let (left, right) = match self.interpolation {
                InterpolationMode::Linear => {
                    (self.interp_linear(idx, frac, 0), self.interp_linear(idx, frac, 1))
                }
                InterpolationMode::Cosine => {
                    (self.interp_cosine(idx, frac, 0), self.interp_cosine(idx, frac, 1))
                }
                InterpolationMode::Hermite => {
                    (self.interp_hermite(idx, frac, 0), self.interp_hermite(idx, frac, 1))
                }
                InterpolationMode::Cubic => {
                    (self.interp_cubic(idx, frac, 0), self.interp_cubic(idx, frac, 1))
                }
                InterpolationMode::Gaussian => {
                    (self.interp_gaussian(idx, frac, 0), self.interp_gaussian(idx, frac, 1))
                }
            };
            out[i * 2] = left;
            out[i * 2 + 1] = right;

            location += step;
        }
    }

    /// Copies the last frame's native samples without resampling; returns
    /// the per-channel frame count.
    pub(crate) fn copy_native_frame(&self, out: &mut [i16], pal_timing: bool) -> usize {
        let native_per_frame = if pal_timing { 641 } else { 534 };
        let start =
            usize::from(self.last_frame_boundary.wrapping_sub(native_per_frame as u16) & 0x7FF);

        for i in 0..native_per_frame {
            let idx = (start + i) & 0x7FF;
            out[i * 2] = self.sample_buffer[idx * 2];
            out[i * 2 + 1] = self.sample_buffer[idx * 2 + 1];
        }
        native_per_frame
    }

    fn ring(&self, idx: usize, channel: usize) -> i16 {
        self.sample_buffer[(idx & 0x7FF) * 2 + channel]
    }

    fn interp_linear(&self, idx: usize, frac: f64, channel: usize) -> i16 {
        let s0 = f64::from(self.ring(idx, channel));
        let s1 = f64::from(self.ring(idx + 1, channel));
        (s0 + frac * (s1 - s0)) as i16
    }

    fn interp_cosine(&self, idx: usize, frac: f64, channel: usize) -> i16 {
        let mu = (1.0 - (frac * std::f64::consts::PI).cos()) / 2.0;
        let s0 = f64::from(self.ring(idx, channel));
        let s1 = f64::from(self.ring(idx + 1, channel));
        (s0 * (1.0 - mu) + s1 * mu) as i16
    }

    fn interp_hermite(&self, idx: usize, frac: f64, channel: usize) -> i16 {
        let p0 = f64::from(self.ring(idx.wrapping_add(0x7FF), channel));
        let p1 = f64::from(self.ring(idx, channel));
        let p2 = f64::from(self.ring(idx + 1, channel));
        let p3 = f64::from(self.ring(idx + 2, channel));

        let c1 = (p2 - p0) * 0.5;
        let c2 = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
        let c3 = (p3 - p0) * 0.5 + 1.5 * (p1 - p2);

        let result = p1 + c1 * frac + c2 * frac * frac + c3 * frac * frac * frac;
        result.clamp(-32768.0, 32767.0) as i16
    }

    fn interp_cubic(&self, idx: usize, frac: f64, channel: usize) -> i16 {
        let p0 = f64::from(self.ring(idx.wrapping_add(0x7FF), channel));
        let p1 = f64::from(self.ring(idx, channel));
        let p2 = f64::from(self.ring(idx + 1, channel));
        let p3 = f64::from(self.ring(idx + 2, channel));

        let c1 = 0.5 * (p2 - p0);
        let c2 = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
        let c3 = 0.5 * (-p0 + 3.0 * p1 - 3.0 * p2 + p3);

        let result = p1 + c1 * frac + c2 * frac * frac + c3 * frac * frac * frac;
        result.clamp(-32768.0, 32767.0) as i16
    }

    fn interp_gaussian(&self, idx: usize, frac: f64, channel: usize) -> i16 {
        let offset = ((frac * 256.0) as usize) & 0xFF;
        let p0 = i32::from(self.ring(idx.wrapping_add(0x7FF), channel));
        let p1 = i32::from(self.ring(idx, channel));
        let p2 = i32::from(self.ring(idx + 1, channel));
        let p3 = i32::from(self.ring(idx + 2, channel));

        let mut out = (GAUSS_TABLE[0x0FF - offset] * p0) >> 11;
        out += (GAUSS_TABLE[0x1FF - offset] * p1) >> 11;
        out += (GAUSS_TABLE[0x100 + offset] * p2) >> 11;
        out = clip16(out) + ((GAUSS_TABLE[offset] * p3) >> 11);
        (clamp16(out) & !1) as i16
    }

    // --- debug access for the editor's audio tooling ---

    pub(crate) fn set_channel_mute(&mut self, ch: usize, mute: bool) {
        if ch < 8 {
            self.debug_mute[ch] = mute;
        }
    }

    pub(crate) fn channel_envelope(&self, ch: usize) -> u16 {
        self.voices[ch.min(7)].gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aram() -> Box<AudioRam> {
        vec![0_u8; 0x10000].into_boxed_slice().try_into().unwrap()
    }

    /// Writes a one-block BRR sample (end + loop clear) at `addr` and points
    /// directory entry 0 at it.
    fn setup_sample(aram: &mut AudioRam, addr: u16) {
        aram[0x0200] = (addr & 0xFF) as u8;
        aram[0x0201] = (addr >> 8) as u8;
        aram[0x0202] = (addr & 0xFF) as u8;
        aram[0x0203] = (addr >> 8) as u8;
        // Shift 12, filter 0, loop+end so the voice releases at block end
        aram[usize::from(addr)] = 0xC3;
        for i in 1..9 {
            aram[usize::from(addr) + i] = 0x77;
        }
    }

    fn dsp_with_sample(aram: &mut AudioRam) -> Dsp {
        let mut dsp = Dsp::new();
        dsp.write(0x6C, 0x00); // clear reset/mute
        dsp.write(0x5D, 0x02); // DIR = $0200
        setup_sample(aram, 0x0300);
        dsp.write(0x04, 0x00); // SRCN 0
        dsp.write(0x02, 0x00);
        dsp.write(0x03, 0x10); // pitch $1000 = 1:1
        dsp.write(0x05, 0x8F); // ADSR enable, fastest attack
        dsp.write(0x06, 0xE0);
        dsp
    }

    #[test]
    fn key_on_holds_envelope_for_five_ticks() {
        let mut aram = aram();
        let mut dsp = dsp_with_sample(&mut aram);

        dsp.write(0x4C, 0x01); // KON voice 0

        // The start delay swallows the first 5 ticks (plus the key-on
        // sampling tick); no envelope movement yet
        for _ in 0..5 {
            dsp.cycle(&mut aram);
            assert_eq!(dsp.channel_envelope(0), 0);
        }

        let mut rose = false;
        for _ in 0..64 {
            dsp.cycle(&mut aram);
            if dsp.channel_envelope(0) > 0 {
                rose = true;
                break;
            }
        }
        assert!(rose, "attack phase never raised the envelope");
    }

    #[test]
    fn envelope_never_exceeds_11_bits() {
        let mut aram = aram();
        let mut dsp = dsp_with_sample(&mut aram);
        dsp.write(0x4C, 0x01);

        for _ in 0..2048 {
            dsp.cycle(&mut aram);
            assert!(dsp.channel_envelope(0) <= 0x7FF);
        }
    }

    #[test]
    fn endx_write_clears_all_flags() {
        let mut dsp = Dsp::new();
        assert_eq!(dsp.read(0x7C), 0xFF);
        dsp.write(0x7C, 0xA5);
        assert_eq!(dsp.read(0x7C), 0x00);
    }

    #[test]
    fn register_mirror_returns_written_bytes() {
        let mut dsp = Dsp::new();
        dsp.write(0x0C, 0x55);
        assert_eq!(dsp.read(0x0C), 0x55);
        // $80-$FF mirrors $00-$7F on reads
        assert_eq!(dsp.read(0x8C), 0x55);
    }

    #[test]
    fn brr_filter_zero_decodes_shifted_nibbles() {
        let mut aram = aram();
        let mut dsp = Dsp::new();
        // Header: shift 1, filter 0
        aram[0x0100] = 0x10;
        aram[0x0101] = 0x7F; // nibbles +7, -1
        dsp.voices[0].decode_offset = 0x0100;
        dsp.voices[0].block_offset = 1;
        dsp.voices[0].brr_header = 0x10;

        dsp.decode_brr(0, &aram);

        // (7 << 1) >> 1 = 7, doubled by the 15-bit clip
        assert_eq!(dsp.voices[0].decode_buffer[0], 14);
        assert_eq!(dsp.voices[0].decode_buffer[1], -2);
    }

    #[test]
    fn noise_lfsr_advances_at_configured_rate() {
        let mut aram = aram();
        let mut dsp = Dsp::new();
        dsp.write(0x6C, 0x1F); // fastest noise rate, reset+mute still set
        let before = dsp.noise_sample;
        for _ in 0..4 {
            dsp.cycle(&mut aram);
        }
        assert_ne!(dsp.noise_sample, before);
    }
}
