use super::serial::SerialFramer;
use super::sumd::{SumdDecoder, SumdFrame};
use heapless::Vec;

pub const FRAME_LEN: usize = 16;
pub const MAX_CHANNELS: usize = 12;

/// 115200 baud, 8N1
const BITS_PER_BYTE: u8 = 10;
const GAP_BITS: u16 = 10;
const BAUD: u32 = 115_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// DSM2 22 ms, 1024 steps
    Ten,
    /// DSM2 11 ms and DSMX, 2048 steps
    Eleven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsmFrame {
    /// µs, zero for channels not carried by this frame
    pub values: [u16; MAX_CHANNELS],
    pub count: u8,
}

/// Decode one satellite frame: fade count, system byte, seven channel words.
pub fn dsm_decode(frame: &[u8; FRAME_LEN]) -> Option<DsmFrame> {
    let resolution = match frame[1] {
        0x01 => Resolution::Ten,
        0x12 | 0xA2 | 0xB2 => Resolution::Eleven,
        _ => return None,
    };

    let mut out = DsmFrame {
        values: [0; MAX_CHANNELS],
        count: 0,
    };
    for word in frame[2..].chunks_exact(2) {
        let w = u16::from_be_bytes([word[0], word[1]]);
        if w == 0xFFFF {
            continue;
        }
        let (channel, value) = match resolution {
            Resolution::Ten => (((w >> 10) & 0x0F) as usize, (w & 0x3FF) << 1),
            Resolution::Eleven => (((w >> 11) & 0x0F) as usize, w & 0x7FF),
        };
        if channel >= MAX_CHANNELS {
            continue;
        }
        out.values[channel] = scale(value);
        out.count = out.count.max(channel as u8 + 1);
    }
    (out.count > 0).then_some(out)
}

/// 11 bit value to µs, centre 1024 at 1500
fn scale(value: u16) -> u16 {
    ((value as i32 - 1024) * 1000 / 1700 + 1500) as u16
}

/// What a DSM line pair produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SerialFrames {
    pub dsm: Option<DsmFrame>,
    pub sumd: Option<SumdFrame>,
}

/// Rebuilds 115200 baud bytes for both the DSM and the SUMD decoder.
pub struct DsmReceiver {
    framer: SerialFramer,
    bytes: Vec<u8, FRAME_LEN>,
    corrupt: bool,
    sumd: SumdDecoder,
}

impl Default for DsmReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl DsmReceiver {
    pub const fn new() -> Self {
        Self {
            framer: SerialFramer::new(BITS_PER_BYTE, GAP_BITS),
            bytes: Vec::new(),
            corrupt: false,
            sumd: SumdDecoder::new(),
        }
    }

    pub fn reset(&mut self) {
        self.framer.reset();
        self.bytes.clear();
        self.corrupt = false;
        self.sumd.reset();
    }

    /// Feed a low run followed by a high run, widths in µs. `dsm` and `sumd`
    /// select which decoders may run.
    pub fn feed_pair(&mut self, low_us: u16, high_us: u16, dsm: bool, sumd: bool) -> SerialFrames {
        let mut out = SerialFrames::default();
        let low_bits = bits(low_us);
        let high_bits = bits(high_us);
        if low_bits == 0 || high_bits == 0 {
            self.reset();
            return out;
        }

        for (level, n) in [(false, low_bits), (true, high_bits)] {
            let Some(fed) = self.framer.feed(level, n) else {
                self.reset();
                return out;
            };
            if let Some(raw) = fed.byte {
                // start bit low, stop bit high
                if raw & 1 != 0 || raw & 0x200 == 0 {
                    self.corrupt = true;
                    self.sumd.reset();
                } else {
                    let byte = ((raw >> 1) & 0xFF) as u8;
                    if sumd {
                        if let Some(frame) = self.sumd.feed(byte) {
                            out.sumd = Some(frame);
                        }
                    }
                    if self.bytes.push(byte).is_err() {
                        self.corrupt = true;
                    }
                }
            }
            if fed.gap {
                if dsm && !self.corrupt && self.bytes.len() == FRAME_LEN {
                    let mut raw = [0u8; FRAME_LEN];
                    raw.copy_from_slice(&self.bytes);
                    out.dsm = dsm_decode(&raw);
                }
                self.bytes.clear();
                self.corrupt = false;
            }
        }
        out
    }
}

/// 8.68 µs per bit, up to 4 µs early
fn bits(width_us: u16) -> u16 {
    ((width_us as u32 + 4) * BAUD / 1_000_000) as u16
}

/// Logical runs of `bytes` sent back to back as 8N1, followed by an idle gap
#[cfg(test)]
pub(crate) fn stream_runs(bytes: &[u8], runs: &mut std::vec::Vec<(bool, u16)>) {
    for b in bytes {
        super::serial::byte_runs(((*b as u16) << 1) | 0x200, BITS_PER_BYTE, runs);
    }
    super::serial::push_run(runs, true, 400);
}

/// Bit count to a capture width in µs that survives the 2 MHz capture
#[cfg(test)]
pub(crate) fn width_us(bits: u16) -> u16 {
    let ticks = (bits as u32 * 2_000_000 + BAUD / 2) / BAUD;
    (ticks / 2) as u16
}

#[cfg(test)]
pub(crate) fn encode_frame(system: u8, words: &[(u8, u16)]) -> [u8; FRAME_LEN] {
    let mut frame = [0xFFu8; FRAME_LEN];
    frame[0] = 0;
    frame[1] = system;
    for (i, (channel, value)) in words.iter().enumerate() {
        let w = ((*channel as u16) << 11) | (value & 0x7FF);
        frame[2 + i * 2..4 + i * 2].copy_from_slice(&w.to_be_bytes());
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_decode_eleven_bit_frame() {
        let frame = encode_frame(0xA2, &[(0, 1024), (1, 1024 + 340), (4, 1024 - 340)]);
        let decoded = dsm_decode(&frame).unwrap();
        assert_eq!(decoded.count, 5);
        assert_eq!(decoded.values[0], 1500);
        assert_eq!(decoded.values[1], 1700);
        assert_eq!(decoded.values[4], 1300);
        assert_eq!(decoded.values[2], 0);
    }

    #[test]
    fn test_decode_ten_bit_frame() {
        let mut frame = [0xFFu8; FRAME_LEN];
        frame[1] = 0x01;
        // channel 2, value 512 of 1024
        frame[2..4].copy_from_slice(&((2u16 << 10) | 512).to_be_bytes());
        let decoded = dsm_decode(&frame).unwrap();
        assert_eq!(decoded.count, 3);
        assert_eq!(decoded.values[2], 1500);
    }

    #[test]
    fn test_unknown_system_byte_is_rejected() {
        let frame = encode_frame(0x55, &[(0, 1024)]);
        assert!(dsm_decode(&frame).is_none());
    }

    #[test]
    fn test_capture_widths_round_trip_to_bits() {
        for n in 1..200 {
            assert_eq!(bits(width_us(n)), n, "{} bits", n);
        }
    }

    #[test]
    fn test_receiver_decodes_frame_after_gap() {
        let frame = encode_frame(0xB2, &[(0, 1024), (1, 1024), (2, 1024), (3, 1024), (4, 1024)]);
        let mut runs = Vec::new();
        stream_runs(&frame, &mut runs);
        let mut rx = DsmReceiver::new();
        let mut decoded = None;
        let mut iter = runs.iter();
        while let (Some((false, low)), Some((true, high))) = (iter.next(), iter.next()) {
            let out = rx.feed_pair(width_us(*low), width_us(*high), true, true);
            decoded = decoded.or(out.dsm);
        }
        assert_eq!(decoded.unwrap().count, 5);
    }
}
