use bitfield::Bit;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct R1(pub u8);

/// No valid R1 could be obtained, either the card never answered or the bus failed.
pub const INVALID: R1 = R1(0xFF);

impl Default for R1 {
    fn default() -> Self {
        INVALID
    }
}

#[derive(Copy, Clone, Debug)]
#[repr(u8)]
pub enum R1Status {
    InIdleState = 0,
    EraseReset,
    IllegalCommand,
    CommandCRCError,
    EraseSequenceError,
    AddressError,
    ParameterError,
}

const ERROR_MASK: u8 = 0b0111_1100;

impl R1 {
    pub fn valid(self) -> bool {
        !self.0.bit(7)
    }

    pub fn has(self, status: R1Status) -> bool {
        self.0.bit(status as usize)
    }

    pub fn idle(self) -> bool {
        self.has(R1Status::InIdleState)
    }

    pub fn param_error(self) -> bool {
        self.has(R1Status::ParameterError)
    }

    pub fn address_error(self) -> bool {
        self.has(R1Status::AddressError)
    }

    pub fn erase_seq_error(self) -> bool {
        self.has(R1Status::EraseSequenceError)
    }

    pub fn crc_error(self) -> bool {
        self.has(R1Status::CommandCRCError)
    }

    pub fn illegal_command(self) -> bool {
        self.has(R1Status::IllegalCommand)
    }

    pub fn any_error(self) -> bool {
        self.0 & ERROR_MASK != 0
    }

    /// Valid and free of error bits, idle or not.
    pub fn ok(self) -> bool {
        self.valid() && !self.any_error()
    }

    /// Highest priority error bit, if any.
    pub fn error(self) -> Option<R1Status> {
        let error = match self.0 & ERROR_MASK {
            0 => return None,
            bits if bits.bit(6) => R1Status::ParameterError,
            bits if bits.bit(5) => R1Status::AddressError,
            bits if bits.bit(4) => R1Status::EraseSequenceError,
            bits if bits.bit(3) => R1Status::CommandCRCError,
            _ => R1Status::IllegalCommand,
        };
        Some(error)
    }
}

/// OCR register following R1 of CMD58
#[derive(Copy, Clone, Default, Debug)]
#[repr(C)]
pub struct R3(pub u32);

pub mod ocr {
    pub const VOLTAGE_3_2_TO_3_3: u32 = 1 << 20;
    pub const VOLTAGE_3_3_TO_3_4: u32 = 1 << 21;
}

impl R3 {
    pub fn card_capacity_status(self) -> bool {
        self.0.bit(30)
    }

    /// Cleared while the card is still powering up
    pub fn power_up_status(self) -> bool {
        self.0.bit(31)
    }

    pub fn voltage_window(self) -> u32 {
        self.0 & 0x00FF_8000
    }
}

/// Interface condition echo following R1 of CMD8
#[derive(Copy, Clone, Default, Debug)]
pub struct R7(pub u32);

impl R7 {
    pub fn voltage_accepted(self) -> bool {
        self.0.bit(8) // only bit 8 meaningful, for now
    }

    pub fn echo_back_check_pattern(self) -> u8 {
        self.0 as u8
    }
}

#[derive(Copy, Clone, Default, Debug)]
pub struct Response {
    pub r1: R1,
    pub ex: u32,
}
