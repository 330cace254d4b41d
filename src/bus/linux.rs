use std::io;

use embedded_hal::spi::{Mode, Phase, Polarity};
use gpio::{sysfs::SysFsGpioOutput, GpioOut};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::bus::spi;
use crate::clock::std::Monotonic;
use crate::config::Config;
use crate::sd::transfer::DUMMY_BYTE;

pub struct SPI(pub Spidev);

impl spi::Transfer for SPI {
    type Error = io::Error;

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        match (tx.len(), rx.len()) {
            (0, 0) => Ok(()),
            (_, 0) => self.0.transfer(&mut SpidevTransfer::write(tx)),
            (0, size) => {
                let filler = vec![DUMMY_BYTE; size];
                self.0.transfer(&mut SpidevTransfer::read_write(&filler, rx))
            }
            (_, _) => self.0.transfer(&mut SpidevTransfer::read_write(tx, rx)),
        }
    }

    fn configure(&mut self, mode: Mode, hz: u32) -> io::Result<()> {
        let flags = match (mode.polarity, mode.phase) {
            (Polarity::IdleLow, Phase::CaptureOnFirstTransition) => SpiModeFlags::SPI_MODE_0,
            (Polarity::IdleLow, Phase::CaptureOnSecondTransition) => SpiModeFlags::SPI_MODE_1,
            (Polarity::IdleHigh, Phase::CaptureOnFirstTransition) => SpiModeFlags::SPI_MODE_2,
            (Polarity::IdleHigh, Phase::CaptureOnSecondTransition) => SpiModeFlags::SPI_MODE_3,
        };
        let options = SpidevOptions::new().bits_per_word(8).max_speed_hz(hz).mode(flags).build();
        self.0.configure(&options)
    }
}

pub struct GPIO(SysFsGpioOutput);

impl embedded_hal::digital::v2::OutputPin for GPIO {
    type Error = io::Error;

    fn set_high(&mut self) -> io::Result<()> {
        self.0.set_value(true)
    }

    fn set_low(&mut self) -> io::Result<()> {
        self.0.set_value(false)
    }
}

/// Opens a spidev device and a sysfs GPIO used as chip select, clock rate is set by `init`
pub fn spi(path: &str, cs: u16, config: Config) -> io::Result<spi::Bus<SPI, GPIO, Monotonic>> {
    let spi = SPI(Spidev::open(path)?);
    let cs = SysFsGpioOutput::open(cs)?;
    Ok(spi::Bus::new(spi, GPIO(cs), Monotonic::default(), config))
}
