//! Graupner SUMD byte stream decoder.

pub const HEADER: u8 = 0xA8;
const STATUS_VALID: u8 = 0x01;
const STATUS_FAILSAFE: u8 = 0x81;
pub const MAX_CHANNELS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumdFrame {
    pub values: [u16; MAX_CHANNELS],
    pub count: u8,
    pub failsafe: bool,
}

impl SumdFrame {
    pub fn channels(&self) -> &[u16] {
        &self.values[..self.count as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Status,
    Count,
    Data,
    CrcHigh,
    CrcLow,
}

pub struct SumdDecoder {
    state: State,
    crc: u16,
    crc_rx: u16,
    status: u8,
    count: u8,
    index: usize,
    data: [u8; MAX_CHANNELS * 2],
}

impl Default for SumdDecoder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn crc16(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ 0x1021
        } else {
            crc << 1
        };
    }
    crc
}

impl SumdDecoder {
    pub const fn new() -> Self {
        Self {
            state: State::Header,
            crc: 0,
            crc_rx: 0,
            status: 0,
            count: 0,
            index: 0,
            data: [0; MAX_CHANNELS * 2],
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Header;
    }

    /// Feed one byte. Returns a frame when its CRC checks out.
    pub fn feed(&mut self, byte: u8) -> Option<SumdFrame> {
        match self.state {
            State::Header => {
                if byte == HEADER {
                    self.crc = crc16(0, byte);
                    self.state = State::Status;
                }
            }
            State::Status => {
                if byte == STATUS_VALID || byte == STATUS_FAILSAFE {
                    self.crc = crc16(self.crc, byte);
                    self.status = byte;
                    self.state = State::Count;
                } else {
                    self.reset();
                }
            }
            State::Count => {
                if (2..=MAX_CHANNELS as u8).contains(&byte) {
                    self.crc = crc16(self.crc, byte);
                    self.count = byte;
                    self.index = 0;
                    self.state = State::Data;
                } else {
                    self.reset();
                }
            }
            State::Data => {
                self.crc = crc16(self.crc, byte);
                self.data[self.index] = byte;
                self.index += 1;
                if self.index == self.count as usize * 2 {
                    self.state = State::CrcHigh;
                }
            }
            State::CrcHigh => {
                self.crc_rx = (byte as u16) << 8;
                self.state = State::CrcLow;
            }
            State::CrcLow => {
                self.crc_rx |= byte as u16;
                self.reset();
                if self.crc_rx != self.crc {
                    return None;
                }
                let mut values = [0u16; MAX_CHANNELS];
                for (value, raw) in values.iter_mut().zip(self.data.chunks_exact(2)).take(self.count as usize) {
                    // transmitted in 1/8 µs
                    *value = u16::from_be_bytes([raw[0], raw[1]]) >> 3;
                }
                return Some(SumdFrame {
                    values,
                    count: self.count,
                    failsafe: self.status == STATUS_FAILSAFE,
                });
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) fn encode_frame(channels_us: &[u16], failsafe: bool) -> std::vec::Vec<u8> {
    let mut out = std::vec![
        HEADER,
        if failsafe { STATUS_FAILSAFE } else { STATUS_VALID },
        channels_us.len() as u8,
    ];
    for us in channels_us {
        out.extend_from_slice(&(us * 8).to_be_bytes());
    }
    let crc = out.iter().fold(0, |crc, b| crc16(crc, *b));
    out.extend_from_slice(&crc.to_be_bytes());
    out
}
