use core::ops::ControlFlow;
use core::slice;
use core::time::Duration;

use embedded_hal::digital::v2::OutputPin;
use embedded_hal::spi::Mode;

use crate::bus;
use crate::clock::Clock;
use crate::config::Config;
use crate::retry::retry;
use crate::sd::command::{self, AppCommand, Command};
use crate::sd::response::{self, Response, R1};
use crate::sd::transfer::DUMMY_BYTE;

#[derive(Debug)]
pub enum Error<SPI, CS> {
    SPI(SPI),
    CS(CS),
}

pub type BUSError<SPI, CS> = bus::Error<Error<SPI, CS>>;

/// Synchronous byte transport to the card.
pub trait Transfer {
    type Error;

    /// `tx` only writes and discards what comes back, `rx` only clocks out
    /// `0xFF` fillers, both must then have the same length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;

    fn configure(&mut self, mode: Mode, hz: u32) -> Result<(), Self::Error>;
}

pub struct Bus<SPI, CS, C> {
    spi: SPI,
    cs: CS,
    clock: C,
    pub(crate) config: Config,
    pub(crate) crc: bool,
    pub(crate) speed: u32,
}

impl<SPI, CS, C: Clock> Clock for Bus<SPI, CS, C> {
    fn now(&mut self) -> Duration {
        self.clock.now()
    }

    fn relax(&mut self) {
        self.clock.relax()
    }
}

impl<E, F, SPI, CS, C> Bus<SPI, CS, C>
where
    SPI: Transfer<Error = E>,
    CS: OutputPin<Error = F>,
    C: Clock,
{
    pub fn new(spi: SPI, cs: CS, clock: C, config: Config) -> Self {
        Self { spi, cs, clock, config, crc: false, speed: 0 }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn crc_enabled(&self) -> bool {
        self.crc
    }

    /// Current clock rate in Hz, 0 until configured
    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Access to the underlying transport, e.g. to tune it further
    pub fn spi<R>(&mut self, f: impl FnOnce(&mut SPI) -> R) -> R {
        f(&mut self.spi)
    }

    pub fn release(self) -> (SPI, CS, C) {
        (self.spi, self.cs, self.clock)
    }

    pub(crate) fn select(&mut self) -> Result<(), BUSError<E, F>> {
        self.cs.set_low().map_err(|e| BUSError::BUS(Error::CS(e)))
    }

    pub(crate) fn deselect(&mut self) -> Result<(), BUSError<E, F>> {
        self.cs.set_high().map_err(|e| BUSError::BUS(Error::CS(e)))
    }

    pub(crate) fn set_speed(&mut self, hz: u32) -> Result<(), BUSError<E, F>> {
        let mode = self.config.mode;
        self.spi.configure(mode, hz).map_err(|e| BUSError::BUS(Error::SPI(e)))?;
        self.speed = hz;
        Ok(())
    }

    pub(crate) fn tx(&mut self, bytes: &[u8]) -> Result<(), BUSError<E, F>> {
        self.spi.transfer(bytes, &mut []).map_err(|e| BUSError::BUS(Error::SPI(e)))
    }

    pub(crate) fn rx(&mut self, buffer: &mut [u8]) -> Result<(), BUSError<E, F>> {
        self.spi.transfer(&[], buffer).map_err(|e| BUSError::BUS(Error::SPI(e)))
    }

    pub(crate) fn byte(&mut self) -> Result<u8, BUSError<E, F>> {
        let mut byte = DUMMY_BYTE;
        self.rx(slice::from_mut(&mut byte))?;
        Ok(byte)
    }

    /// Deselects and clocks one more byte so the card releases MISO
    pub(crate) fn finish(&mut self) -> Result<(), BUSError<E, F>> {
        self.deselect()?;
        self.tx(&[DUMMY_BYTE])
    }

    /// Polls until the card stops holding the data line low
    pub(crate) fn wait_not_busy(&mut self, retry_us: u32) -> Result<(), BUSError<E, F>> {
        retry(self, retry_us, |bus| match bus.byte() {
            Ok(DUMMY_BYTE) => ControlFlow::Break(Ok(())),
            Ok(_) => ControlFlow::Continue(Err(BUSError::Timeout)),
            Err(e) => ControlFlow::Break(Err(e)),
        })
    }

    fn wait_r1(&mut self, retry_us: u32) -> R1 {
        retry(self, retry_us, |bus| match bus.byte() {
            Ok(byte) if R1(byte).valid() => ControlFlow::Break(R1(byte)),
            Ok(_) => ControlFlow::Continue(response::INVALID),
            Err(_) => ControlFlow::Break(response::INVALID),
        })
    }

    /// Sends a command frame and returns the card's R1, `INVALID` when no valid R1 could
    /// be obtained within `retry_us`, whatever the reason.
    pub fn send_command(&mut self, index: u8, argument: u32, retry_us: u32) -> R1 {
        let frame = command::frame(index, argument, self.crc);
        let timeouts = self.config.timeouts;
        retry(self, retry_us, |bus| {
            trace!("CMD{} arg {:#010x}", index, argument);
            if bus.wait_not_busy(timeouts.not_busy).is_err() {
                debug!("CMD{}: card busy", index);
                return ControlFlow::Continue(response::INVALID);
            }
            if bus.tx(&frame).is_err() {
                return ControlFlow::Continue(response::INVALID);
            }
            if index == Command::StopTransmission.index() && bus.byte().is_err() {
                return ControlFlow::Continue(response::INVALID); // Stuff byte
            }
            let r1 = bus.wait_r1(timeouts.r1_polling);
            match r1.valid() {
                true => ControlFlow::Break(r1),
                false => ControlFlow::Continue(r1),
            }
        })
    }

    /// Sends APP_CMD then the application command, the latter only when APP_CMD succeeded.
    pub fn send_app_command(&mut self, index: u8, argument: u32, retry_us: u32) -> R1 {
        let r1 = self.send_command(Command::AppCommand.index(), 0, retry_us);
        if !r1.ok() {
            debug!("CMD55 failed with {:#04x}, skip ACMD{}", r1.0, index);
            return r1;
        }
        self.send_command(index, argument, retry_us)
    }

    /// Reads the bytes trailing R1, big endian
    fn response_ex(&mut self, r1: R1, size: usize) -> Result<Response, BUSError<E, F>> {
        let mut response = Response { r1, ..Default::default() };
        if size > 0 && r1.valid() {
            let mut buffer = [0u8; 4];
            self.rx(&mut buffer[4 - size..])?;
            response.ex = u32::from_be_bytes(buffer);
        }
        Ok(response)
    }

    pub(crate) fn command(&mut self, cmd: Command, retry_us: u32) -> Result<Response, BUSError<E, F>> {
        let r1 = self.send_command(cmd.index(), cmd.argument(), retry_us);
        self.response_ex(r1, cmd.expected_response_ex_size())
    }

    pub(crate) fn app_command(
        &mut self,
        cmd: AppCommand,
        retry_us: u32,
    ) -> Result<Response, BUSError<E, F>> {
        let r1 = self.send_app_command(cmd.index(), cmd.argument(), retry_us);
        self.response_ex(r1, cmd.expected_response_ex_size())
    }
}
