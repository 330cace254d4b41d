use core::ops::ControlFlow;

use embedded_hal::digital::v2::OutputPin;

use crate::clock::Clock;
use crate::retry::retry;
use crate::sd::{
    command::{AppCommand, Command},
    crc::crc16,
    registers::SD_STATUS_SIZE,
    transfer::{Token, TokenError, DUMMY_BYTE},
    BLOCK_SIZE,
};

use super::bus::{BUSError, Bus, Transfer};

impl<E, F, SPI, CS, C> Bus<SPI, CS, C>
where
    SPI: Transfer<Error = E>,
    CS: OutputPin<Error = F>,
    C: Clock,
{
    fn wait_start_token(&mut self) -> Result<(), BUSError<E, F>> {
        let retry_us = self.config.timeouts.data_token;
        retry(self, retry_us, |bus| {
            let byte = match bus.byte() {
                Ok(byte) => byte,
                Err(e) => return ControlFlow::Break(Err(e)),
            };
            if byte == DUMMY_BYTE {
                return ControlFlow::Continue(Err(BUSError::NoToken));
            }
            match Token::try_from(byte) {
                Ok(Token::Start) => ControlFlow::Break(Ok(())),
                Ok(_) | Err(TokenError::NotToken) => ControlFlow::Continue(Err(BUSError::NoToken)),
                Err(e) => ControlFlow::Break(Err(BUSError::Token(e))),
            }
        })
    }

    /// Reads one data packet: start token, payload, CRC16
    pub(crate) fn read_block(&mut self, block: &mut [u8]) -> Result<(), BUSError<E, F>> {
        self.wait_start_token()?;
        self.rx(block)?;
        let mut crc = [0u8; 2];
        self.rx(&mut crc)?;
        if !self.crc {
            return Ok(());
        }
        let (card, host) = (u16::from_be_bytes(crc), crc16(block));
        if card != host {
            warn!("Data CRC mismatch, card {:#06x} host {:#06x}", card, host);
            return Err(BUSError::CRCMismatch { card, host });
        }
        Ok(())
    }

    /// Issues a register command (SEND_CID, SEND_CSD) and reads its data packet
    pub(crate) fn read_register(
        &mut self,
        cmd: Command,
        buffer: &mut [u8],
        retry_us: u32,
    ) -> Result<(), BUSError<E, F>> {
        let r1 = self.command(cmd, retry_us)?.r1;
        if !r1.ok() {
            return Err(BUSError::from_r1(r1));
        }
        self.read_block(buffer)
    }

    fn read_blocks<'a, B>(&mut self, address: u32, blocks: B) -> Result<(), BUSError<E, F>>
    where
        B: ExactSizeIterator<Item = &'a mut [u8; BLOCK_SIZE]>,
    {
        let num_blocks = blocks.len();
        let cmd = match num_blocks {
            1 => Command::ReadSingleBlock(address),
            _ => Command::ReadMultipleBlock(address),
        };
        let r1 = self.command(cmd, self.config.timeouts.block_cmd)?.r1;
        if !r1.ok() {
            return Err(BUSError::from_r1(r1));
        }
        let mut result = Ok(());
        for (i, block) in blocks.enumerate() {
            result = self.read_block(block);
            if result.is_err() {
                warn!("Read aborted at block {} of {}", i, num_blocks);
                break;
            }
        }
        if num_blocks > 1 {
            let retry_us = self.config.timeouts.block_cmd;
            let r1 = self.command(Command::StopTransmission, retry_us)?.r1;
            self.wait_not_busy(self.config.timeouts.not_busy)?;
            if result.is_ok() && !r1.ok() {
                return Err(BUSError::from_r1(r1));
            }
        }
        result
    }

    /// ACMD13, answered with R2 then a 64-byte data packet
    pub(crate) fn read_sd_status(&mut self) -> Result<[u8; SD_STATUS_SIZE], BUSError<E, F>> {
        let mut status = [0u8; SD_STATUS_SIZE];
        self.tx(&[DUMMY_BYTE; 5])?;
        self.select()?;
        let result = self.app_command(AppCommand::SDStatus, self.config.timeouts.block_cmd);
        let result = result.and_then(|response| {
            if !response.r1.ok() {
                return Err(BUSError::from_r1(response.r1));
            }
            if response.ex != 0 {
                debug!("SD status R2 {:#04x}", response.ex);
            }
            self.read_block(&mut status)
        });
        self.finish().and(result).map(|_| status)
    }

    pub(crate) fn read<'a, B>(&mut self, address: u32, blocks: B) -> Result<(), BUSError<E, F>>
    where
        B: ExactSizeIterator<Item = &'a mut [u8; BLOCK_SIZE]>,
    {
        self.tx(&[DUMMY_BYTE; 5])?;
        self.select()?;
        let result = self.read_blocks(address, blocks);
        self.finish().and(result)
    }
}

#[cfg(test)]
mod test {
    use crate::bus::Error;
    use crate::config::Config;
    use crate::sd::BLOCK_SIZE;
    use crate::sim::{Pin, SimCard, Ticker};

    use super::Bus;

    fn pattern(seed: u8) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        block
    }

    #[test]
    fn test_read_single_block() {
        let card = SimCard::new().with_block(3 * 512, pattern(3));
        let log = card.log();
        let mut bus = Bus::new(card, Pin::default(), Ticker::new(1), Config::default());
        bus.crc = true;
        let mut buffer = [0u8; BLOCK_SIZE];
        bus.read(3 * 512, core::iter::once(&mut buffer)).unwrap();
        assert_eq!(buffer, pattern(3));
        assert_eq!(log.indices(), [17]);
    }

    #[test]
    fn test_read_multiple_blocks() {
        let card = SimCard::new().with_block(0, pattern(0)).with_block(1, pattern(1));
        let log = card.log();
        let mut bus = Bus::new(card, Pin::default(), Ticker::new(1), Config::default());
        let mut buffers = [[0u8; BLOCK_SIZE]; 2];
        bus.read(0, buffers.iter_mut()).unwrap();
        assert_eq!(buffers, [pattern(0), pattern(1)]);
        assert_eq!(log.indices(), [18, 12]);
    }

    #[test]
    fn test_read_crc_mismatch() {
        let card = SimCard::new().with_block(0, pattern(7)).with_corrupt_read_crc();
        let log = card.log();
        let mut bus = Bus::new(card, Pin::default(), Ticker::new(1), Config::default());
        bus.crc = true;
        let mut buffers = [[0u8; BLOCK_SIZE]; 2];
        let result = bus.read(0, buffers.iter_mut());
        assert!(matches!(result, Err(Error::CRCMismatch { .. })));
        // Stop transmission is sent regardless
        assert_eq!(log.indices(), [18, 12]);
    }

    #[test]
    fn test_read_crc_ignored_when_disabled() {
        let card = SimCard::new().with_block(0, pattern(7)).with_corrupt_read_crc();
        let mut bus = Bus::new(card, Pin::default(), Ticker::new(1), Config::default());
        let mut buffer = [0u8; BLOCK_SIZE];
        bus.read(0, core::iter::once(&mut buffer)).unwrap();
        assert_eq!(buffer, pattern(7));
    }

    #[test]
    fn test_read_sd_status() {
        let mut status = [0u8; 64];
        status[0] = 0x80;
        status[63] = 0x3C;
        let card = SimCard::new().with_sd_status(status);
        let log = card.log();
        let mut bus = Bus::new(card, Pin::default(), Ticker::new(1), Config::default());
        bus.crc = true;
        assert_eq!(bus.read_sd_status().unwrap(), status);
        assert_eq!(log.indices(), [55, 13]);
    }

    #[test]
    fn test_read_error_token() {
        let card = SimCard::new().with_read_error_token(0x08);
        let mut bus = Bus::new(card, Pin::default(), Ticker::new(1), Config::default());
        let mut buffer = [0u8; BLOCK_SIZE];
        let result = bus.read(0, core::iter::once(&mut buffer));
        assert!(matches!(result, Err(Error::Token(crate::sd::transfer::TokenError::OutOfRange))));
    }
}
