use embedded_hal::digital::v2::OutputPin;

use crate::clock::Clock;
use crate::sd::{
    command::Command,
    crc::crc16,
    transfer::{Response, Token, DUMMY_BYTE},
    BLOCK_SIZE,
};

use super::bus::{BUSError, Bus, Transfer};

impl<E, F, SPI, CS, C> Bus<SPI, CS, C>
where
    SPI: Transfer<Error = E>,
    CS: OutputPin<Error = F>,
    C: Clock,
{
    /// Sends one data packet and waits until the card has programmed it
    fn write_block(&mut self, token: Token, block: &[u8]) -> Result<(), BUSError<E, F>> {
        let crc = crc16(block).to_be_bytes();
        self.tx(&[token as u8])?;
        self.tx(block)?;
        self.tx(&crc)?;
        let byte = self.byte()?;
        match Response::try_from(byte) {
            Some(Response::Accepted) => (),
            Some(Response::CRCError) => return Err(BUSError::DataCRC),
            Some(Response::WriteError) => return Err(BUSError::WriteRejected),
            None => return Err(BUSError::InvalidDataResponse(byte)),
        }
        self.wait_not_busy(self.config.timeouts.not_busy)
    }

    fn write_blocks<'a, B>(&mut self, address: u32, blocks: B) -> Result<(), BUSError<E, F>>
    where
        B: ExactSizeIterator<Item = &'a [u8; BLOCK_SIZE]>,
    {
        let num_blocks = blocks.len();
        let (cmd, token) = match num_blocks {
            1 => (Command::WriteBlock(address), Token::Start),
            _ => (Command::WriteMultipleBlock(address), Token::StartWriteMultipleBlock),
        };
        let r1 = self.command(cmd, self.config.timeouts.block_cmd)?.r1;
        if !r1.ok() {
            return Err(BUSError::from_r1(r1));
        }
        let mut result = Ok(());
        for (i, block) in blocks.enumerate() {
            result = self.write_block(token, block);
            if result.is_err() {
                warn!("Write aborted at block {} of {}", i, num_blocks);
                break;
            }
        }
        if num_blocks > 1 {
            self.tx(&[Token::Stop as u8])?;
            self.byte()?;
            let busy = self.wait_not_busy(self.config.timeouts.not_busy);
            result = result.and(busy);
        }
        result
    }

    pub(crate) fn write<'a, B>(&mut self, address: u32, blocks: B) -> Result<(), BUSError<E, F>>
    where
        B: ExactSizeIterator<Item = &'a [u8; BLOCK_SIZE]>,
    {
        self.tx(&[DUMMY_BYTE; 5])?;
        self.select()?;
        let result = self.write_blocks(address, blocks);
        self.finish().and(result)
    }
}
