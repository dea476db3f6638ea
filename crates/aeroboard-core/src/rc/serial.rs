//! Rebuilds asynchronous serial bytes from measured line runs.
//!
//! Levels are logical: the start bit is low, stop bits and idle are high.
//! Bytes come out as raw bit patterns, LSB first, start bit in bit 0.

/// What one run produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fed {
    pub byte: Option<u16>,
    /// The line has been idle long enough to end a frame
    pub gap: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SerialFramer {
    bits_per_byte: u8,
    gap_bits: u16,
    raw: u16,
    nbits: u8,
    in_byte: bool,
    idle: u16,
    gap_seen: bool,
}

impl SerialFramer {
    pub const fn new(bits_per_byte: u8, gap_bits: u16) -> Self {
        Self {
            bits_per_byte,
            gap_bits,
            raw: 0,
            nbits: 0,
            in_byte: false,
            idle: 0,
            gap_seen: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.bits_per_byte, self.gap_bits);
    }

    /// Feed one run of `bits` bit times at `level`. `None` on a line break
    /// (a low run spanning more than one byte).
    pub fn feed(&mut self, level: bool, bits: u16) -> Option<Fed> {
        let mut fed = Fed::default();
        let mut remaining = bits;

        while remaining > 0 {
            if !self.in_byte {
                if level {
                    self.idle = self.idle.saturating_add(remaining);
                    if self.idle > self.gap_bits && !self.gap_seen {
                        fed.gap = true;
                        self.gap_seen = true;
                    }
                    break;
                }
                self.in_byte = true;
                self.raw = 0;
                self.nbits = 0;
                self.idle = 0;
                self.gap_seen = false;
            }

            let take = remaining.min((self.bits_per_byte - self.nbits) as u16);
            if level {
                self.raw |= ((1u16 << take) - 1) << self.nbits;
            }
            self.nbits += take as u8;
            remaining -= take;

            if self.nbits == self.bits_per_byte {
                self.in_byte = false;
                if fed.byte.is_some() {
                    self.reset();
                    return None;
                }
                fed.byte = Some(self.raw);
            }
        }
        Some(fed)
    }
}

/// Append a run, merging it with the previous one at the same level.
#[cfg(test)]
pub(crate) fn push_run(runs: &mut std::vec::Vec<(bool, u16)>, level: bool, bits: u16) {
    match runs.last_mut() {
        Some((l, n)) if *l == level => *n += bits,
        _ => runs.push((level, bits)),
    }
}

/// Turn a byte into logical line runs, for building test streams.
#[cfg(test)]
pub(crate) fn byte_runs(raw: u16, bits_per_byte: u8, runs: &mut std::vec::Vec<(bool, u16)>) {
    for i in 0..bits_per_byte {
        push_run(runs, raw & (1 << i) != 0, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn uart_8n1(byte: u8) -> u16 {
        ((byte as u16) << 1) | 0x200
    }

    #[test]
    fn test_reassembles_back_to_back_bytes() {
        let mut runs = Vec::new();
        push_run(&mut runs, true, 20);
        for b in [0x55u8, 0x0F, 0xA8] {
            byte_runs(uart_8n1(b), 10, &mut runs);
        }
        push_run(&mut runs, true, 20);

        let mut framer = SerialFramer::new(10, 10);
        let mut bytes = Vec::new();
        let mut gaps = 0;
        for (level, bits) in runs {
            let fed = framer.feed(level, bits).unwrap();
            bytes.extend(fed.byte);
            gaps += fed.gap as u32;
        }
        assert_eq!(bytes, [uart_8n1(0x55), uart_8n1(0x0F), uart_8n1(0xA8)]);
        // leading idle and trailing idle
        assert_eq!(gaps, 2);
    }

    #[test]
    fn test_long_low_run_is_a_break() {
        let mut framer = SerialFramer::new(10, 10);
        assert!(framer.feed(false, 25).is_none());
    }
}
