pub mod command;
pub mod crc;
pub mod registers;
pub mod response;
pub mod transfer;

pub const BLOCK_SIZE: usize = 512;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Card {
    Unknown,
    /// Version 1.x SD card, standard capacity
    SDv1,
    /// MMC answering CMD1 only
    MMC,
    /// Version 2.0+ standard capacity
    SDSC,
    /// Version 2.0+ high or extended capacity, block addressed
    SDHC,
}

impl Card {
    pub fn high_capacity(self) -> bool {
        matches!(self, Self::SDHC)
    }

    /// Transfer address of a 512-byte block, `None` when beyond byte addressing
    pub fn address(self, block: u32) -> Option<u32> {
        match self.high_capacity() {
            true => Some(block),
            false => block.checked_mul(BLOCK_SIZE as u32),
        }
    }
}
