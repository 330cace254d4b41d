use bitfield::bitfield;

use super::BLOCK_SIZE;

/// Size of the CID and CSD registers when read as a data block
pub const REGISTER_SIZE: usize = 16;
/// Size of the SD status data block
pub const SD_STATUS_SIZE: usize = 64;

bitfield! {
    #[derive(Copy, Clone)]
    pub struct CSDv1(u128);
    impl Debug;
    pub u8, version, _: 127, 126;
    pub u8, max_read_data_block_length, _: 83, 80;
    pub u16, device_size, _: 73, 62;
    pub u8, device_size_multiplier, _: 49, 47;
}

impl CSDv1 {
    /// `(C_SIZE + 1) << (C_SIZE_MULT + 2)` blocks of `2^READ_BL_LEN` bytes
    pub fn capacity(&self) -> u64 {
        let blocks = (self.device_size() as u64 + 1) << (self.device_size_multiplier() + 2);
        blocks << self.max_read_data_block_length()
    }

    pub fn block_length(&self) -> u32 {
        1 << self.max_read_data_block_length()
    }
}

bitfield! {
    #[derive(Copy, Clone)]
    pub struct CSDv2(u128);
    impl Debug;
    pub u8, version, _: 127, 126;
    pub u32, device_size, _: 69, 48;
}

/// memory capacity = (C_SIZE + 1) * 1024 * 512 bytes
const CSD_V2_C_SIZE_BLOCK_MULT: u64 = 1024;

impl CSDv2 {
    pub fn capacity(&self) -> u64 {
        (self.device_size() as u64 + 1) * CSD_V2_C_SIZE_BLOCK_MULT * BLOCK_SIZE as u64
    }
}

#[derive(Copy, Clone, Debug)]
pub enum CSD {
    V1(CSDv1),
    V2(CSDv2),
}

impl TryFrom<[u8; REGISTER_SIZE]> for CSD {
    /// The unsupported structure version
    type Error = u8;

    fn try_from(bytes: [u8; REGISTER_SIZE]) -> Result<CSD, u8> {
        let value = u128::from_be_bytes(bytes);
        match bytes[0] >> 6 {
            0 => Ok(Self::V1(CSDv1(value))),
            1 => Ok(Self::V2(CSDv2(value))),
            version => Err(version),
        }
    }
}

impl CSD {
    /// Capacity in bytes
    pub fn capacity(&self) -> u64 {
        match self {
            Self::V1(csd) => csd.capacity(),
            Self::V2(csd) => csd.capacity(),
        }
    }

    /// Number of 512-byte sectors
    pub fn num_blocks(&self) -> u64 {
        self.capacity() / BLOCK_SIZE as u64
    }

    pub fn block_length(&self) -> u32 {
        match self {
            Self::V1(csd) => csd.block_length(),
            Self::V2(_) => BLOCK_SIZE as u32,
        }
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct CID(u128);
    impl Debug;
    pub u8, manufacturer_id, _: 127, 120;
    pub u16, oem_id, _: 119, 104;
    u64, product_name_raw, _: 103, 64;
    pub u8, product_revision, _: 63, 56;
    pub u32, serial_number, _: 55, 24;
    u8, manufacturing_year_raw, _: 19, 12;
    pub u8, manufacturing_month, _: 11, 8;
    pub u8, crc, _: 7, 1;
}

impl From<[u8; REGISTER_SIZE]> for CID {
    fn from(bytes: [u8; REGISTER_SIZE]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl CID {
    /// Five ASCII characters
    pub fn product_name(&self) -> [u8; 5] {
        let bytes = self.product_name_raw().to_be_bytes();
        [bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
    }

    pub fn manufacturing_year(&self) -> u16 {
        2000 + self.manufacturing_year_raw() as u16
    }
}

bitfield! {
    /// First 128 of the 512 SD status bits, the remainder is reserved
    #[derive(Copy, Clone)]
    pub struct SDStatus(u128);
    impl Debug;
    pub u8, data_bus_width, _: 127, 126;
    pub secured_mode, _: 125;
    pub u16, card_type, _: 111, 96;
    pub u32, size_of_protected_area, _: 95, 64;
    pub u8, speed_class, _: 63, 56;
    pub u8, performance_move, _: 55, 48;
    pub u8, au_size_code, _: 47, 44;
    pub u16, erase_size, _: 39, 24;
    pub u8, erase_timeout, _: 23, 18;
    pub u8, erase_offset, _: 17, 16;
    pub u8, uhs_speed_grade, _: 15, 12;
    pub u8, uhs_au_size, _: 11, 8;
}

impl From<&[u8; SD_STATUS_SIZE]> for SDStatus {
    fn from(bytes: &[u8; SD_STATUS_SIZE]) -> Self {
        let mut head = [0u8; 16];
        head.copy_from_slice(&bytes[..16]);
        Self(u128::from_be_bytes(head))
    }
}

const KIB: u32 = 1024;
const MIB: u32 = 1024 * KIB;

impl SDStatus {
    /// Allocation unit size in bytes, `None` when the card does not define one
    pub fn au_size(&self) -> Option<u32> {
        match self.au_size_code() {
            0 => None,
            code @ 1..=0xA => Some((16 * KIB) << (code - 1)),
            0xB => Some(12 * MIB),
            0xC => Some(16 * MIB),
            0xD => Some(24 * MIB),
            0xE => Some(32 * MIB),
            _ => Some(64 * MIB),
        }
    }
}
