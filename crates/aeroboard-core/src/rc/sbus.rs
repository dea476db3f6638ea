use super::serial::SerialFramer;
use heapless::Vec;

pub const FRAME_LEN: usize = 25;
pub const HEADER: u8 = 0x0F;
/// 16 proportional channels plus two digital ones from the flags byte
pub const NUM_CHANNELS: usize = 18;

const FLAGS_BYTE: usize = 23;
const FLAG_CH17: u8 = 1 << 0;
const FLAG_CH18: u8 = 1 << 1;
const FLAG_FRAME_LOST: u8 = 1 << 2;
const FLAG_FAILSAFE: u8 = 1 << 3;

/// 100 kbit/s, 8E2 plus start bit
const BITS_PER_BYTE: u8 = 12;
const GAP_BITS: u16 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbusFrame {
    pub channels: [u16; NUM_CHANNELS],
    pub failsafe: bool,
    pub frame_lost: bool,
}

/// Decode a 25 byte frame into channel values in µs.
pub fn sbus_decode(frame: &[u8; FRAME_LEN]) -> Option<SbusFrame> {
    if frame[0] != HEADER {
        return None;
    }

    let mut channels = [0u16; NUM_CHANNELS];
    for (ch, value) in channels.iter_mut().take(16).enumerate() {
        let mut raw = 0u16;
        for bit in 0..11 {
            let pos = ch * 11 + bit;
            if frame[1 + pos / 8] & (1 << (pos % 8)) != 0 {
                raw |= 1 << bit;
            }
        }
        *value = scale(raw);
    }

    let flags = frame[FLAGS_BYTE];
    channels[16] = if flags & FLAG_CH17 != 0 { 1998 } else { 998 };
    channels[17] = if flags & FLAG_CH18 != 0 { 1998 } else { 998 };

    Some(SbusFrame {
        channels,
        failsafe: flags & FLAG_FAILSAFE != 0,
        frame_lost: flags & FLAG_FRAME_LOST != 0,
    })
}

/// Maps 200..1800 onto 1000..2000 µs
fn scale(raw: u16) -> u16 {
    (raw as u32 * 5 / 8 + 875) as u16
}

/// Checks start, parity and both stop bits of a raw 12 bit pattern
fn unpack(raw: u16) -> Option<u8> {
    if raw & 1 != 0 || raw & 0xC00 != 0xC00 {
        return None;
    }
    let data = ((raw >> 1) & 0xFF) as u8;
    let parity = (raw >> 9) & 1;
    (data.count_ones() as u16 & 1 == parity).then_some(data)
}

/// SBUS frame reassembly for one line polarity.
pub struct SbusReceiver {
    framer: SerialFramer,
    bytes: Vec<u8, FRAME_LEN>,
    corrupt: bool,
}

impl Default for SbusReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl SbusReceiver {
    pub const fn new() -> Self {
        Self {
            framer: SerialFramer::new(BITS_PER_BYTE, GAP_BITS),
            bytes: Vec::new(),
            corrupt: false,
        }
    }

    pub fn reset(&mut self) {
        self.framer.reset();
        self.bytes.clear();
        self.corrupt = false;
    }

    /// Feed a logical low run followed by a logical high run, widths in µs.
    pub fn feed_pair(&mut self, low_us: u16, high_us: u16) -> Option<SbusFrame> {
        let low_bits = bits(low_us);
        let high_bits = bits(high_us);
        if low_bits == 0 || high_bits == 0 {
            self.reset();
            return None;
        }
        let mut frame = None;
        for (level, n) in [(false, low_bits), (true, high_bits)] {
            let Some(fed) = self.framer.feed(level, n) else {
                self.reset();
                return None;
            };
            if let Some(raw) = fed.byte {
                match unpack(raw) {
                    Some(b) if !self.corrupt => self.corrupt = self.bytes.push(b).is_err(),
                    _ => self.corrupt = true,
                }
            }
            if fed.gap {
                frame = self.end_frame();
            }
        }
        frame
    }

    fn end_frame(&mut self) -> Option<SbusFrame> {
        let frame = if !self.corrupt && self.bytes.len() == FRAME_LEN {
            let mut raw = [0u8; FRAME_LEN];
            raw.copy_from_slice(&self.bytes);
            sbus_decode(&raw)
        } else {
            None
        };
        self.bytes.clear();
        self.corrupt = false;
        frame
    }
}

/// 10 µs per bit, up to 4 µs early
fn bits(width_us: u16) -> u16 {
    ((width_us as u32 + 4) / 10) as u16
}

#[cfg(test)]
pub(crate) fn encode_frame(channels: &[u16; 16], flags: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = HEADER;
    for (ch, raw) in channels.iter().enumerate() {
        for bit in 0..11 {
            if raw & (1 << bit) != 0 {
                let pos = ch * 11 + bit;
                frame[1 + pos / 8] |= 1 << (pos % 8);
            }
        }
    }
    frame[FLAGS_BYTE] = flags;
    frame
}

/// Logical line runs of a frame followed by an idle gap
#[cfg(test)]
pub(crate) fn frame_runs(frame: &[u8; FRAME_LEN], runs: &mut std::vec::Vec<(bool, u16)>) {
    for b in frame {
        let parity = (b.count_ones() & 1) as u16;
        let raw = ((*b as u16) << 1) | (parity << 9) | 0xC00;
        super::serial::byte_runs(raw, BITS_PER_BYTE, runs);
    }
    super::serial::push_run(runs, true, 300);
}
