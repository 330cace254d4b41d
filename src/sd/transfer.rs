/// Error token sent by the card instead of a start token
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TokenError {
    NotToken,
    Generic,
    CC,
    CardECC,
    OutOfRange,
    CardLocked,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Token {
    Start = 0xFE,
    StartWriteMultipleBlock = 0xFC,
    Stop = 0xFD,
}

impl TryFrom<u8> for Token {
    type Error = TokenError;

    fn try_from(byte: u8) -> Result<Token, TokenError> {
        if byte == 0xFE {
            return Ok(Token::Start);
        }
        if byte == 0xFC {
            return Ok(Token::StartWriteMultipleBlock);
        }
        if byte == 0xFD {
            return Ok(Token::Stop);
        }
        if byte & 0xE0 != 0 || byte == 0 {
            return Err(TokenError::NotToken);
        }
        // Lowest set bit wins
        match byte & byte.wrapping_neg() {
            0x10 => Err(TokenError::CardLocked),
            0x8 => Err(TokenError::OutOfRange),
            0x4 => Err(TokenError::CardECC),
            0x2 => Err(TokenError::CC),
            _ => Err(TokenError::Generic),
        }
    }
}

/// Filler clocked out while waiting for the card, and what an idle card drives
pub const DUMMY_BYTE: u8 = 0xFF;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Response {
    Accepted,
    CRCError,
    WriteError,
}

impl Response {
    /// Decodes the low nibble of a data response token
    pub fn try_from(byte: u8) -> Option<Self> {
        let value = match byte & 0x0F {
            0b0101 => Self::Accepted,
            0b1011 => Self::CRCError,
            0b1101 => Self::WriteError,
            _ => return None,
        };
        Some(value)
    }
}
