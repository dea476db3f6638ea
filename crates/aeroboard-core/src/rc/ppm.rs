use super::MAX_CHANNELS;

/// Periods at or above this are the frame sync gap
pub const SYNC_MIN_US: u16 = 2700;
pub const CHANNEL_MIN_US: u16 = 700;
pub const CHANNEL_MAX_US: u16 = 2300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpmEvent {
    /// Frame boundary. Carries the channel count when the frame that just
    /// ended had enough channels; its values are then in [`PpmDecoder::frame`].
    Sync(Option<u8>),
    Channel { index: u8, value: u16 },
    /// A channel-width pulse past the last supported channel
    Overflow,
    /// Not a PPM pulse
    Invalid,
}

/// PPM-sum decoder fed with full pulse periods in µs.
///
/// Channel values are held back until a sync closes a frame with at least
/// `min_channels` pulses, so a short burst never reaches the outputs.
#[derive(Debug, Clone, Copy)]
pub struct PpmDecoder {
    counter: u8,
    min_channels: u8,
    pending: [u16; MAX_CHANNELS],
    frame_len: u8,
}

impl PpmDecoder {
    pub const fn new(min_channels: u8) -> Self {
        Self {
            counter: 0,
            min_channels,
            pending: [0; MAX_CHANNELS],
            frame_len: 0,
        }
    }

    /// Channels of the last complete frame
    pub fn frame(&self) -> &[u16] {
        &self.pending[..self.frame_len as usize]
    }

    pub fn process(&mut self, period_us: u16) -> PpmEvent {
        if period_us >= SYNC_MIN_US {
            let complete = (self.counter >= self.min_channels).then_some(self.counter);
            if let Some(count) = complete {
                self.frame_len = count;
            }
            self.counter = 0;
            return PpmEvent::Sync(complete);
        }
        if period_us > CHANNEL_MIN_US && period_us < CHANNEL_MAX_US {
            if (self.counter as usize) >= MAX_CHANNELS {
                return PpmEvent::Overflow;
            }
            let index = self.counter;
            self.pending[index as usize] = period_us;
            self.frame_len = 0;
            self.counter += 1;
            return PpmEvent::Channel {
                index,
                value: period_us,
            };
        }
        PpmEvent::Invalid
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.frame_len = 0;
    }
}
