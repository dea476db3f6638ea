use aeroboard_hal::BusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    Bus(BusError),
    /// Identification register held an unsupported value
    WhoAmI(u8),
    /// The part did not come out of reset
    NotResponding,
    Calibration,
    /// `start` before a successful `init`
    NotInitialised,
}

impl From<BusError> for SensorError {
    fn from(e: BusError) -> Self {
        SensorError::Bus(e)
    }
}

pub type SensorResult<T> = Result<T, SensorError>;
