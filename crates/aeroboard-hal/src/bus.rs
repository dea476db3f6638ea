use embedded_hal::i2c::{self, I2c};
use embedded_hal::spi::{self, Operation, SpiDevice};

/// Read flag OR'ed into the register address on SPI reads.
pub const SPI_READ_FLAG: u8 = 0x80;

/// Failure of a single bus transaction. No partial-transfer information is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    Transfer,
    Nack,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusSpeed {
    Low,
    High,
}

/// Synchronous register access to a sensor.
pub trait RegisterBus {
    /// Read `buf.len()` consecutive registers starting at `reg`
    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Write a single register
    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError>;

    /// Read a single register
    fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.read_registers(reg, &mut value)?;
        Ok(value[0])
    }

    /// How many times a failed transaction is repeated before giving up
    fn set_retries(&mut self, retries: u8);

    /// Switch the bus clock. Buses without a speed setting ignore this.
    fn set_speed(&mut self, _speed: BusSpeed) {}
}

/// A bus that can start a block read whose completion is reported out of band,
/// typically by a DMA transfer-complete interrupt that hands the received bytes
/// to the driver.
pub trait BlockReadBus {
    fn start_block_read(&mut self, reg: u8, len: usize) -> Result<(), BusError>;
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read_registers(reg, buf)
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        (**self).write_register(reg, value)
    }

    fn set_retries(&mut self, retries: u8) {
        (**self).set_retries(retries)
    }

    fn set_speed(&mut self, speed: BusSpeed) {
        (**self).set_speed(speed)
    }
}

fn with_retries<T>(
    retries: u8,
    mut op: impl FnMut() -> Result<T, BusError>,
) -> Result<T, BusError> {
    let mut last = BusError::Transfer;
    for _ in 0..=retries {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => last = e,
        }
    }
    Err(last)
}

fn map_spi_error<E: spi::Error>(_e: E) -> BusError {
    BusError::Transfer
}

fn map_i2c_error<E: i2c::Error>(e: E) -> BusError {
    match e.kind() {
        i2c::ErrorKind::NoAcknowledge(_) => BusError::Nack,
        _ => BusError::Transfer,
    }
}

/// Register bus over an embedded-hal SPI device.
pub struct SpiRegisterBus<SPI> {
    spi: SPI,
    read_flag: u8,
    retries: u8,
}

impl<SPI: SpiDevice> SpiRegisterBus<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self {
            spi,
            read_flag: SPI_READ_FLAG,
            retries: 0,
        }
    }

    /// Some parts need auto-increment bits next to the read flag (0xC0 on HMC58x3)
    pub fn with_read_flag(mut self, read_flag: u8) -> Self {
        self.read_flag = read_flag;
        self
    }

    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> RegisterBus for SpiRegisterBus<SPI> {
    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let cmd = [reg | self.read_flag];
        let spi = &mut self.spi;
        with_retries(self.retries, || {
            spi.transaction(&mut [Operation::Write(&cmd), Operation::Read(&mut *buf)])
                .map_err(map_spi_error)
        })
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        let tx_buf = [reg, value];
        let spi = &mut self.spi;
        with_retries(self.retries, || spi.write(&tx_buf).map_err(map_spi_error))
    }

    fn set_retries(&mut self, retries: u8) {
        self.retries = retries;
    }
}

/// Register bus over an embedded-hal I2C bus with a fixed 7-bit address.
pub struct I2cRegisterBus<I2C> {
    i2c: I2C,
    address: u8,
    retries: u8,
}

impl<I2C: I2c> I2cRegisterBus<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            retries: 0,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2c> RegisterBus for I2cRegisterBus<I2C> {
    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let address = self.address;
        let i2c = &mut self.i2c;
        with_retries(self.retries, || {
            i2c.write_read(address, &[reg], &mut *buf).map_err(map_i2c_error)
        })
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        let address = self.address;
        let i2c = &mut self.i2c;
        with_retries(self.retries, || {
            i2c.write(address, &[reg, value]).map_err(map_i2c_error)
        })
    }

    fn set_retries(&mut self, retries: u8) {
        self.retries = retries;
    }
}
