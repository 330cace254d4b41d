//! Byte level SD card model for tests, answering in SPI mode like a real card would.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

use embedded_hal::digital::v2::OutputPin;
use embedded_hal::spi::Mode;

use crate::bus::spi::Transfer;
use crate::clock::Clock;
use crate::sd::crc::crc16;
use crate::sd::BLOCK_SIZE;

/// Clock advancing by a fixed step on every read
pub struct Ticker {
    now: Rc<Cell<u64>>,
    step: u64,
}

impl Ticker {
    pub fn new(step_us: u64) -> Self {
        Self { now: Rc::new(Cell::new(0)), step: step_us }
    }

    pub fn handle(&self) -> Rc<Cell<u64>> {
        self.now.clone()
    }
}

impl Clock for Ticker {
    fn now(&mut self) -> Duration {
        self.now.set(self.now.get() + self.step);
        Duration::from_micros(self.now.get())
    }
}

#[derive(Default)]
pub struct Pin(Rc<Cell<bool>>);

impl OutputPin for Pin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }
}

#[derive(Default)]
struct Record {
    frames: Vec<[u8; 6]>,
    written: HashMap<u32, [u8; BLOCK_SIZE]>,
    stopped: bool,
    speeds: Vec<u32>,
}

/// What the card saw, shared with the test after the card moved into a bus
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Record>>);

impl Log {
    pub fn frames(&self) -> Vec<[u8; 6]> {
        self.0.borrow().frames.clone()
    }

    pub fn indices(&self) -> Vec<u8> {
        self.0.borrow().frames.iter().map(|frame| frame[0] & 0x3F).collect()
    }

    pub fn written(&self, address: u32) -> Option<[u8; BLOCK_SIZE]> {
        self.0.borrow().written.get(&address).copied()
    }

    pub fn stopped(&self) -> bool {
        self.0.borrow().stopped
    }

    pub fn speeds(&self) -> Vec<u32> {
        self.0.borrow().speeds.clone()
    }
}

enum Input {
    Command(Vec<u8>),
    WriteToken { address: u32, multiple: bool },
    WriteData { address: u32, multiple: bool, data: Vec<u8> },
}

pub struct SimCard {
    out: VecDeque<u8>,
    input: Input,
    log: Log,
    idle: bool,
    app: bool,
    stuck: bool,
    streaming: Option<u32>,

    mute: bool,
    legacy: bool,
    mmc: bool,
    high_capacity: bool,
    busy_polls: usize,
    echo: Option<u8>,
    cmd55_r1: Option<u8>,
    rejected: HashMap<u8, u8>,
    ocr: Option<u32>,
    cid: [u8; 16],
    csd: [u8; 16],
    sd_status: [u8; 64],
    blocks: HashMap<u32, [u8; BLOCK_SIZE]>,
    corrupt_read_crc: bool,
    read_error_token: Option<u8>,
    write_response: u8,
    busy_bytes: usize,
    busy_forever: bool,
}

impl SimCard {
    /// A healthy high capacity card
    pub fn new() -> Self {
        Self {
            out: VecDeque::new(),
            input: Input::Command(Vec::new()),
            log: Log::default(),
            idle: false,
            app: false,
            stuck: false,
            streaming: None,
            mute: false,
            legacy: false,
            mmc: false,
            high_capacity: true,
            busy_polls: 0,
            echo: None,
            cmd55_r1: None,
            rejected: HashMap::new(),
            ocr: None,
            cid: [0u8; 16],
            csd: [0u8; 16],
            sd_status: [0u8; 64],
            blocks: HashMap::new(),
            corrupt_read_crc: false,
            read_error_token: None,
            write_response: 0xE5,
            busy_bytes: 0,
            busy_forever: false,
        }
    }

    pub fn log(&self) -> Log {
        self.log.clone()
    }

    /// Never drives the data line
    pub fn mute(self) -> Self {
        Self { mute: true, ..self }
    }

    /// Version 1.x card, CMD8 is illegal
    pub fn legacy(self) -> Self {
        Self { legacy: true, high_capacity: false, ..self }
    }

    /// MMC, CMD8 and ACMD41 are illegal
    pub fn mmc(self) -> Self {
        Self { legacy: true, mmc: true, high_capacity: false, ..self }
    }

    pub fn standard_capacity(self) -> Self {
        Self { high_capacity: false, ..self }
    }

    /// Stays idle for `polls` initialize commands
    pub fn with_busy_polls(self, polls: usize) -> Self {
        Self { busy_polls: polls, ..self }
    }

    pub fn with_echo(self, echo: u8) -> Self {
        Self { echo: Some(echo), ..self }
    }

    pub fn with_cmd55_r1(self, r1: u8) -> Self {
        Self { cmd55_r1: Some(r1), ..self }
    }

    /// Answers the standard command `index` with `r1` and nothing else
    pub fn with_rejected(mut self, index: u8, r1: u8) -> Self {
        self.rejected.insert(index, r1);
        self
    }

    pub fn with_ocr(self, ocr: u32) -> Self {
        Self { ocr: Some(ocr), ..self }
    }

    pub fn with_cid(self, cid: [u8; 16]) -> Self {
        Self { cid, ..self }
    }

    pub fn with_csd(self, csd: [u8; 16]) -> Self {
        Self { csd, ..self }
    }

    pub fn with_sd_status(self, sd_status: [u8; 64]) -> Self {
        Self { sd_status, ..self }
    }

    pub fn with_block(mut self, address: u32, block: [u8; BLOCK_SIZE]) -> Self {
        self.blocks.insert(address, block);
        self
    }

    pub fn with_corrupt_read_crc(self) -> Self {
        Self { corrupt_read_crc: true, ..self }
    }

    pub fn with_read_error_token(self, token: u8) -> Self {
        Self { read_error_token: Some(token), ..self }
    }

    pub fn with_write_response(self, response: u8) -> Self {
        Self { write_response: response, ..self }
    }

    pub fn with_busy_bytes(self, busy_bytes: usize) -> Self {
        Self { busy_bytes, ..self }
    }

    pub fn with_busy_forever(self) -> Self {
        Self { busy_forever: true, ..self }
    }

    fn step(&self) -> u32 {
        match self.high_capacity {
            true => 1,
            false => BLOCK_SIZE as u32,
        }
    }

    fn r1(&mut self, flags: u8) {
        let r1 = flags | self.idle as u8;
        self.out.extend([0xFF, r1]);
    }

    fn data(&mut self, data: &[u8]) {
        let mut crc = crc16(data);
        if self.corrupt_read_crc {
            crc ^= 0xFFFF;
        }
        self.out.extend([0xFF, 0xFE]);
        self.out.extend(data.iter().copied());
        self.out.extend(crc.to_be_bytes());
    }

    fn block(&self, address: u32) -> [u8; BLOCK_SIZE] {
        self.blocks.get(&address).copied().unwrap_or([0u8; BLOCK_SIZE])
    }

    fn next_out(&mut self) -> u8 {
        if let Some(byte) = self.out.pop_front() {
            return byte;
        }
        if self.stuck {
            return 0x00;
        }
        if let Some(address) = self.streaming {
            let block = self.block(address);
            self.data(&block);
            self.streaming = Some(address + self.step());
            return self.out.pop_front().unwrap_or(0xFF);
        }
        0xFF
    }

    fn busy(&mut self) {
        self.out.extend(core::iter::repeat(0x00).take(self.busy_bytes));
        if self.busy_forever {
            self.stuck = true;
        }
    }

    fn command(&mut self, frame: [u8; 6]) {
        self.log.0.borrow_mut().frames.push(frame);
        if self.mute {
            return;
        }
        let index = frame[0] & 0x3F;
        let argument = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let app = core::mem::replace(&mut self.app, false);
        if let (false, Some(&r1)) = (app, self.rejected.get(&index)) {
            self.out.extend([0xFF, r1]);
            return;
        }
        match (app, index) {
            (_, 0) => {
                self.idle = true;
                self.r1(0);
            }
            (_, 1) if self.mmc => self.initialize(),
            (_, 8) if self.legacy => self.r1(0x04),
            (_, 8) => {
                self.r1(0);
                let echo = self.echo.unwrap_or(argument as u8);
                self.out.extend([0x00, 0x00, ((argument >> 8) & 0xF) as u8, echo]);
            }
            (_, 9) => {
                self.r1(0);
                self.data(&self.csd.clone());
            }
            (_, 10) => {
                self.r1(0);
                self.data(&self.cid.clone());
            }
            (_, 12) => {
                self.out.clear();
                self.streaming = None;
                self.out.extend([0xFF, 0x00, 0x00, 0x00]);
            }
            (true, 13) => {
                self.r1(0);
                self.out.push_back(0x00);
                self.data(&self.sd_status.clone());
            }
            (_, 16) | (_, 59) => self.r1(0),
            (_, 17) => {
                self.r1(0);
                match self.read_error_token {
                    Some(token) => self.out.extend([0xFF, token]),
                    None => self.data(&self.block(argument)),
                }
            }
            (_, 18) => {
                self.r1(0);
                self.streaming = Some(argument);
            }
            (_, 24) | (_, 25) => {
                self.r1(0);
                self.input = Input::WriteToken { address: argument, multiple: index == 25 };
            }
            (true, 41) if !self.mmc => self.initialize(),
            (_, 55) => {
                self.app = true;
                match self.cmd55_r1 {
                    Some(r1) => self.out.extend([0xFF, r1]),
                    None => self.r1(0),
                }
            }
            (_, 58) => {
                self.r1(0);
                let ocr = self.ocr.unwrap_or_else(|| {
                    let ccs = (self.high_capacity as u32) << 30;
                    (!self.idle as u32) << 31 | ccs | 0x00FF_8000
                });
                self.out.extend(ocr.to_be_bytes());
            }
            _ => self.r1(0x04),
        }
    }

    fn initialize(&mut self) {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
        } else {
            self.idle = false;
        }
        self.r1(0);
    }

    fn write_data(&mut self, address: u32, multiple: bool, data: Vec<u8>) {
        self.out.push_back(self.write_response);
        if self.write_response & 0x0F == 0x05 {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&data[..BLOCK_SIZE]);
            self.log.0.borrow_mut().written.insert(address, block);
        }
        self.busy();
        self.input = match multiple {
            true => Input::WriteToken { address: address + self.step(), multiple },
            false => Input::Command(Vec::new()),
        };
    }

    fn process(&mut self, byte: u8) {
        let input = core::mem::replace(&mut self.input, Input::Command(Vec::new()));
        self.input = match input {
            Input::Command(mut frame) => {
                if !frame.is_empty() || byte & 0xC0 == 0x40 {
                    frame.push(byte);
                }
                if frame.len() == 6 {
                    let mut bytes = [0u8; 6];
                    bytes.copy_from_slice(&frame);
                    self.command(bytes);
                    return;
                }
                Input::Command(frame)
            }
            Input::WriteToken { address, multiple } => match (byte, multiple) {
                (0xFE, false) | (0xFC, true) => Input::WriteData { address, multiple, data: Vec::new() },
                (0xFD, true) => {
                    self.log.0.borrow_mut().stopped = true;
                    self.out.push_back(0xFF);
                    self.busy();
                    Input::Command(Vec::new())
                }
                _ => Input::WriteToken { address, multiple },
            },
            Input::WriteData { address, multiple, mut data } => {
                data.push(byte);
                if data.len() == BLOCK_SIZE + 2 {
                    self.write_data(address, multiple, data);
                    return;
                }
                Input::WriteData { address, multiple, data }
            }
        };
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        let out = self.next_out();
        self.process(byte);
        out
    }
}

impl Transfer for SimCard {
    type Error = Infallible;

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Infallible> {
        if tx.is_empty() {
            for byte in rx.iter_mut() {
                *byte = self.exchange(0xFF);
            }
            return Ok(());
        }
        for (i, &byte) in tx.iter().enumerate() {
            let out = self.exchange(byte);
            if let Some(slot) = rx.get_mut(i) {
                *slot = out;
            }
        }
        Ok(())
    }

    fn configure(&mut self, _mode: Mode, hz: u32) -> Result<(), Infallible> {
        self.log.0.borrow_mut().speeds.push(hz);
        Ok(())
    }
}
