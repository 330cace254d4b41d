use crate::init::State;
use crate::sd::response::{self, R1};
use crate::sd::transfer::TokenError;

#[derive(Debug)]
pub enum Error<BUS> {
    BUS(BUS),
    /// No valid R1, probably no card
    NoResponse,
    /// R1 with error bits set
    Command(R1),
    /// No start token within expected duration
    NoToken,
    /// Data error token in place of start token
    Token(TokenError),
    CRCMismatch { card: u16, host: u16 },
    /// Card rejected written data on CRC
    DataCRC,
    /// Card failed to program accepted data
    WriteRejected,
    InvalidDataResponse(u8),
    /// Card busy beyond expected duration
    Timeout,
    UnsupportedCSD(u8),
    /// Card answered with something unexpected, e.g. CMD8 echo or OCR
    Generic,
    /// Card not initialized
    NotReady,
    InvalidArgument,
    /// Initialization failed in state, with the R1 the card answered if that was the cause
    Init(State, Option<R1>),
}

impl<BUS> Error<BUS> {
    /// Maps an R1 that is not `ok()` to the error it carries.
    pub(crate) fn from_r1(r1: R1) -> Self {
        match r1.valid() {
            false => Self::NoResponse,
            true => Self::Command(r1),
        }
    }

    /// The R1 carried by this error, `INVALID` standing for no response
    pub fn r1(&self) -> Option<R1> {
        match self {
            Self::NoResponse => Some(response::INVALID),
            Self::Command(r1) => Some(*r1),
            Self::Init(_, r1) => *r1,
            _ => None,
        }
    }

    /// Short description for logs, the transport error itself may not be `Debug`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BUS(_) => "bus error",
            Self::NoResponse => "no response",
            Self::Command(_) => "command rejected",
            Self::NoToken => "no start token",
            Self::Token(_) => "data error token",
            Self::CRCMismatch { .. } => "data CRC mismatch",
            Self::DataCRC => "data CRC rejected",
            Self::WriteRejected => "write rejected",
            Self::InvalidDataResponse(_) => "invalid data response",
            Self::Timeout => "timeout",
            Self::UnsupportedCSD(_) => "unsupported CSD",
            Self::Generic => "unexpected response",
            Self::NotReady => "not ready",
            Self::InvalidArgument => "invalid argument",
            Self::Init(..) => "init failed",
        }
    }
}

#[cfg(feature = "linux-spi")]
pub mod linux;
pub mod spi;
