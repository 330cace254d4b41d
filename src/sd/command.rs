use core::mem;

use super::crc::crc7;
use super::response;

pub const FRAME_SIZE: usize = 6;

/// Start bit 0, transmission bit 1 (host to card)
const FRAME_START: u8 = 0x40;
/// CRC byte of `40 00 00 00 00`
pub const CMD0_CRC: u8 = 0x95;
/// CRC byte of `48 00 00 01 AA`
pub const CMD8_CRC: u8 = 0x87;
/// Stop bit with an all-zero CRC, accepted while the card has CRC checking off
const NO_CRC: u8 = 0x01;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SendInterfaceCondition {
    pub pcie_1_2v_suppport: bool, // PCIe 1.2V
    pub pcie_availability: bool,
    pub voltage_supplied: bool, // 2.7-3.6V
    pub check_pattern: u8,
}

impl SendInterfaceCondition {
    pub fn spi() -> Self {
        Self { voltage_supplied: true, check_pattern: 0xAA, ..Default::default() }
    }
}

impl From<SendInterfaceCondition> for u32 {
    fn from(cond: SendInterfaceCondition) -> u32 {
        (cond.pcie_1_2v_suppport as u32) << 15
            | (cond.pcie_availability as u32) << 14
            | (cond.voltage_supplied as u32) << 8
            | cond.check_pattern as u32
    }
}

pub type Address = u32;

/// Commands sent after APP_CMD (CMD55).
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AppCommand {
    SDStatus,
    SDSendOpCond(bool), // host-capacity-support
}

impl AppCommand {
    pub fn index(self) -> u8 {
        match self {
            Self::SDStatus => 13,
            Self::SDSendOpCond(_) => 41,
        }
    }

    pub fn argument(self) -> u32 {
        match self {
            Self::SDStatus => 0,
            Self::SDSendOpCond(hcs) => (hcs as u32) << 30,
        }
    }

    pub fn expected_response_ex_size(self) -> usize {
        match self {
            Self::SDStatus => 1, // R2
            Self::SDSendOpCond(_) => 0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    GoIdleState,
    SendOpCond,
    SendIfCond(SendInterfaceCondition),
    SendCSD,
    SendCID,
    StopTransmission,
    SetBlockLen(u32),
    ReadSingleBlock(Address),
    ReadMultipleBlock(Address),
    WriteBlock(Address),
    WriteMultipleBlock(Address),
    AppCommand,
    ReadOCR,
    CRCOnOff(bool),
}

impl Command {
    pub fn index(self) -> u8 {
        match self {
            Self::GoIdleState => 0,
            Self::SendOpCond => 1,
            Self::SendIfCond(_) => 8,
            Self::SendCSD => 9,
            Self::SendCID => 10,
            Self::StopTransmission => 12,
            Self::SetBlockLen(_) => 16,
            Self::ReadSingleBlock(_) => 17,
            Self::ReadMultipleBlock(_) => 18,
            Self::WriteBlock(_) => 24,
            Self::WriteMultipleBlock(_) => 25,
            Self::AppCommand => 55,
            Self::ReadOCR => 58,
            Self::CRCOnOff(_) => 59,
        }
    }

    pub fn argument(self) -> u32 {
        match self {
            Self::GoIdleState
            | Self::SendOpCond
            | Self::SendCSD
            | Self::SendCID
            | Self::StopTransmission
            | Self::AppCommand
            | Self::ReadOCR => 0,
            Self::SendIfCond(cond) => cond.into(),
            Self::SetBlockLen(length) => length,
            Self::ReadSingleBlock(address)
            | Self::ReadMultipleBlock(address)
            | Self::WriteBlock(address)
            | Self::WriteMultipleBlock(address) => address,
            Self::CRCOnOff(on) => on as u32,
        }
    }

    /// Bytes following R1 in the response
    pub fn expected_response_ex_size(self) -> usize {
        match self {
            Self::SendIfCond(_) => mem::size_of::<response::R7>(),
            Self::ReadOCR => mem::size_of::<response::R3>(),
            _ => 0,
        }
    }
}

/// Encodes a command frame.
///
/// With `crc` off only CMD0 and CMD8 are CRC checked by the card, they get their
/// well known CRC bytes and every other command gets a bare stop bit.
pub fn frame(index: u8, argument: u32, crc: bool) -> [u8; FRAME_SIZE] {
    let bytes = u32::to_be_bytes(argument);
    let mut buffer = [FRAME_START | (index & 0x3F), bytes[0], bytes[1], bytes[2], bytes[3], 0];
    buffer[5] = match (crc, index) {
        (false, 0) => CMD0_CRC,
        (false, 8) => CMD8_CRC,
        (false, _) => NO_CRC,
        (true, _) => crc7(&buffer[..5]) << 1 | 1,
    };
    buffer
}
