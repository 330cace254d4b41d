use core::fmt;

use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0};

use crate::sd::response::ocr;

/// Retry windows in microseconds, 0 means a single attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// CMD0 while entering SPI mode. Each attempt also waits up to `not_busy` and
    /// `r1_polling`, so a silent card fails after `init_cmd0 + r1_polling + not_busy` at worst.
    pub init_cmd0: u32,
    /// Every other command of the init sequence
    pub init_cmd: u32,
    /// First R1 byte after a command frame
    pub r1_polling: u32,
    /// Start token of a data packet
    pub data_token: u32,
    /// Card holding the data line low
    pub not_busy: u32,
    /// Read/write block commands, not the whole transaction
    pub block_cmd: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init_cmd0: 100,
            init_cmd: 250_000,
            r1_polling: 100_000,
            data_token: 100_000,
            not_busy: 250_000,
            block_cmd: 100,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Config {
    pub timeouts: Timeouts,
    pub mode: Mode,
    /// Clock used during initialization, 100KHz to 400KHz
    pub pre_init_hz: u32,
    /// Clock set once the card is ready
    pub post_init_hz: u32,
    /// Argument of CRC_ON_OFF
    pub crc: bool,
    /// OCR voltage bits the host supplies, at least one must be reported by the card
    pub ocr_voltage_mask: u32,
    /// Dummy bytes clocked with chip select released, 8 clocks each
    pub power_up_bytes: usize,
    pub power_up_settle_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            mode: MODE_0,
            pre_init_hz: 400_000,
            post_init_hz: 10_000_000,
            crc: true,
            // TODO: confirm with board owners whether 3.3-3.4V should be part of the default mask
            ocr_voltage_mask: ocr::VOLTAGE_3_2_TO_3_3 | ocr::VOLTAGE_3_2_TO_3_3,
            power_up_bytes: 10,
            power_up_settle_us: 1000,
        }
    }
}

/// Conventional SPI mode number, CPOL << 1 | CPHA
fn mode_number(mode: Mode) -> u8 {
    let cpol = matches!(mode.polarity, Polarity::IdleHigh) as u8;
    let cpha = matches!(mode.phase, Phase::CaptureOnSecondTransition) as u8;
    cpol << 1 | cpha
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("timeouts", &self.timeouts)
            .field("mode", &mode_number(self.mode))
            .field("pre_init_hz", &self.pre_init_hz)
            .field("post_init_hz", &self.post_init_hz)
            .field("crc", &self.crc)
            .field("ocr_voltage_mask", &format_args!("{:#010x}", self.ocr_voltage_mask))
            .field("power_up_bytes", &self.power_up_bytes)
            .field("power_up_settle_us", &self.power_up_settle_us)
            .finish()
    }
}

impl Config {
    pub fn with_timeouts(self, timeouts: Timeouts) -> Self {
        Self { timeouts, ..self }
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        Self { mode, ..self }
    }

    pub fn with_speed(self, pre_init_hz: u32, post_init_hz: u32) -> Self {
        Self { pre_init_hz, post_init_hz, ..self }
    }

    pub fn with_crc(self, crc: bool) -> Self {
        Self { crc, ..self }
    }

    pub fn with_ocr_voltage_mask(self, ocr_voltage_mask: u32) -> Self {
        Self { ocr_voltage_mask, ..self }
    }
}
