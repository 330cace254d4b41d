//! # sdcard
//!
//! > SD card driver over SPI for embedded systems, `no_std` and fully synchronous
//!
//! ## Using this crate
//!
//! Assuming you already have `SPI` struct which implements `sdcard::bus::spi::Transfer`,
//! a chip select `OutputPin` and a monotonic `sdcard::clock::Clock`
//!
//! ```rust,ignore
//! let bus = sdcard::Bus::new(spi, cs, clock, sdcard::Config::default());
//! let mut sd = sdcard::SD::new(bus);
//! sd.init().map_err(|e| format!("{:?}", e))?;
//! debug!("Card: {:?}", sd.card());
//!
//! let mut buffer = [0u8; 512];
//! sd.read(0, slice::from_mut(&mut buffer).iter_mut()).map_err(|e| format!("{:?}", e))?;
//! let mbr = MasterBootRecord::from_bytes(&buffer).map_err(|e| format!("{:?}", e))?;
//! for partition in mbr.partition_table_entries().iter() {
//!     println!("{:?}", partition);
//! }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;

pub mod bus;
pub mod clock;
pub mod config;
pub mod init;
pub mod retry;
pub mod sd;
#[cfg(test)]
mod sim;

use embedded_hal::digital::v2::OutputPin;

pub use bus::spi::{BUSError, Bus, Transfer};
pub use bus::Error;
pub use clock::Clock;
pub use config::{Config, Timeouts};
pub use init::State;
pub use sd::registers::{SDStatus, CID, CSD};
pub use sd::{Card, BLOCK_SIZE};

/// Card handle, usable for transfers once `init` reached `State::Finish`
pub struct SD<SPI, CS, C> {
    bus: Bus<SPI, CS, C>,
    state: State,
    card: Card,
    cid: Option<CID>,
    csd: Option<CSD>,
    /// Outer `None` until SD status was read
    au_size: Option<Option<u32>>,
}

type LBA = u32;

impl<E, F, SPI, CS, C> SD<SPI, CS, C>
where
    SPI: Transfer<Error = E>,
    CS: OutputPin<Error = F>,
    C: Clock,
{
    pub fn new(bus: Bus<SPI, CS, C>) -> Self {
        Self { bus, state: State::Start, card: Card::Unknown, cid: None, csd: None, au_size: None }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Finish
    }

    pub fn card(&self) -> Card {
        self.card
    }

    pub fn cid(&self) -> Option<CID> {
        self.cid
    }

    pub fn csd(&self) -> Option<CSD> {
        self.csd
    }

    /// Number of 512-byte blocks
    pub fn num_blocks(&self) -> Option<u64> {
        self.csd.map(|csd| csd.num_blocks())
    }

    pub fn block_length(&self) -> Option<u32> {
        self.csd.map(|csd| csd.block_length())
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> Option<u64> {
        self.csd.map(|csd| csd.capacity())
    }

    pub fn bus<R>(&mut self, f: impl FnOnce(&mut Bus<SPI, CS, C>) -> R) -> R {
        f(&mut self.bus)
    }

    pub fn release(self) -> Bus<SPI, CS, C> {
        self.bus
    }

    fn address(&self, block: LBA, count: usize) -> Result<u32, BUSError<E, F>> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        let end = block as u64 + count as u64;
        if self.num_blocks().map(|num_blocks| end > num_blocks).unwrap_or(false) {
            warn!("Blocks {}..{} out of range", block, end);
            return Err(Error::InvalidArgument);
        }
        self.card.address(block).ok_or(Error::InvalidArgument)
    }

    pub fn read<'a, B>(&mut self, address: LBA, blocks: B) -> Result<(), BUSError<E, F>>
    where
        B: core::iter::ExactSizeIterator<Item = &'a mut [u8; BLOCK_SIZE]>,
    {
        let address = self.address(address, blocks.len())?;
        if blocks.len() == 0 {
            return Ok(());
        }
        debug!("Read {} blocks at {:#x}", blocks.len(), address);
        self.bus.read(address, blocks)
    }

    pub fn write<'a, B>(&mut self, address: LBA, blocks: B) -> Result<(), BUSError<E, F>>
    where
        B: core::iter::ExactSizeIterator<Item = &'a [u8; BLOCK_SIZE]>,
    {
        let address = self.address(address, blocks.len())?;
        if blocks.len() == 0 {
            return Ok(());
        }
        debug!("Write {} blocks at {:#x}", blocks.len(), address);
        self.bus.write(address, blocks)
    }

    /// Reads the 512-bit SD status with ACMD13, MMC does not support it
    pub fn sd_status(&mut self) -> Result<SDStatus, BUSError<E, F>> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        if matches!(self.card, Card::MMC) {
            return Err(Error::InvalidArgument);
        }
        let status = self.bus.read_sd_status()?;
        Ok(SDStatus::from(&status))
    }

    /// Allocation unit size in bytes, read once then cached until next init
    pub fn au_size(&mut self) -> Result<Option<u32>, BUSError<E, F>> {
        if let Some(size) = self.au_size {
            return Ok(size);
        }
        let size = self.sd_status()?.au_size();
        self.au_size = Some(size);
        Ok(size)
    }
}
