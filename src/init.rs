use core::ops::ControlFlow;

use embedded_hal::digital::v2::OutputPin;

use crate::bus::spi::{BUSError, Bus, Transfer};
use crate::clock::Clock;
use crate::retry::{delay, retry};
use crate::sd::{
    command::{AppCommand, Command, SendInterfaceCondition},
    registers::{CID, CSD, REGISTER_SIZE},
    response::{R1, R3, R7},
    transfer::DUMMY_BYTE,
    Card, BLOCK_SIZE,
};
use crate::SD;

/// Initialization steps, in the order they are taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Start,
    PowerUpSequence,
    SendCmd0,
    SendCmd8,
    CardUnknown,
    SendAcmd41Hcs,
    SendCmd58,
    SendCmd16,
    EnableCrc,
    ReadCid,
    ReadCsd,
    SetMaxSpeed,
    Finish,
}

/// Repeats an initialize command until the card leaves idle state or rejects it
fn initialize<E, F, SPI, CS, C>(
    bus: &mut Bus<SPI, CS, C>,
    retry_us: u32,
    mut op: impl FnMut(&mut Bus<SPI, CS, C>) -> R1,
) -> R1
where
    SPI: Transfer<Error = E>,
    CS: OutputPin<Error = F>,
    C: Clock,
{
    retry(bus, retry_us, |bus| {
        let r1 = op(bus);
        match r1.valid() && (r1.any_error() || !r1.idle()) {
            true => ControlFlow::Break(r1),
            false => ControlFlow::Continue(r1),
        }
    })
}

fn ready(r1: R1) -> bool {
    r1.ok() && !r1.idle()
}

impl<E, F, SPI, CS, C> SD<SPI, CS, C>
where
    SPI: Transfer<Error = E>,
    CS: OutputPin<Error = F>,
    C: Clock,
{
    /// Runs the whole initialization sequence from `Start`, the card is ready on success.
    ///
    /// A failing step aborts the sequence with `Error::Init` naming that step and
    /// carrying the card's R1 when the card refused, nothing is retried beyond the
    /// step's own window.
    pub fn init(&mut self) -> Result<(), BUSError<E, F>> {
        let mut state = State::Start;
        self.state = state;
        while state != State::Finish {
            debug!("SD init {:?}", state);
            let next = match self.step(state) {
                Ok(next) => next,
                Err(e) => {
                    let r1 = e.r1();
                    match r1 {
                        Some(r1) => warn!("SD init failed in {:?}: {}, R1 {:#04x}", state, e.kind(), r1.0),
                        None => warn!("SD init failed in {:?}: {}", state, e.kind()),
                    }
                    self.bus.finish().ok();
                    return Err(BUSError::Init(state, r1));
                }
            };
            debug_assert!(next > state);
            state = next;
            self.state = state;
        }
        info!("SD ready, card {:?} capacity {} bytes", self.card, self.capacity().unwrap_or(0));
        Ok(())
    }

    /// Performs one state and returns the next one
    fn step(&mut self, state: State) -> Result<State, BUSError<E, F>> {
        let config = self.bus.config;
        let timeouts = config.timeouts;
        let next = match state {
            State::Start => {
                self.card = Card::Unknown;
                self.cid = None;
                self.csd = None;
                self.au_size = None;
                self.bus.crc = false;
                State::PowerUpSequence
            }
            State::PowerUpSequence => {
                self.bus.set_speed(config.pre_init_hz)?;
                // Supply minimum of 74 clock cycles without CS asserted.
                self.bus.deselect()?;
                for _ in 0..config.power_up_bytes {
                    self.bus.tx(&[DUMMY_BYTE])?;
                }
                delay(&mut self.bus, config.power_up_settle_us);
                State::SendCmd0
            }
            State::SendCmd0 => {
                self.bus.select()?;
                let cmd = Command::GoIdleState;
                let r1 = retry(&mut self.bus, timeouts.init_cmd0, |bus| {
                    let r1 = bus.send_command(cmd.index(), cmd.argument(), 0);
                    match r1.valid() && r1.idle() {
                        true => ControlFlow::Break(r1),
                        false => ControlFlow::Continue(r1),
                    }
                });
                if !(r1.valid() && r1.idle()) {
                    return Err(BUSError::from_r1(r1));
                }
                State::SendCmd8
            }
            State::SendCmd8 => {
                let cond = SendInterfaceCondition::spi();
                let response = self.bus.command(Command::SendIfCond(cond), timeouts.init_cmd)?;
                let r1 = response.r1;
                if r1.valid() && r1.illegal_command() {
                    debug!("CMD8 rejected, version 1.x card or MMC");
                    return Ok(State::CardUnknown);
                }
                if !r1.ok() {
                    return Err(BUSError::from_r1(r1));
                }
                let r7 = R7(response.ex);
                if !r7.voltage_accepted() || r7.echo_back_check_pattern() != cond.check_pattern {
                    warn!("CMD8 echo {:#010x} does not match", response.ex);
                    return Err(BUSError::Generic);
                }
                State::SendAcmd41Hcs
            }
            State::CardUnknown => {
                let cmd = AppCommand::SDSendOpCond(false);
                let r1 = initialize(&mut self.bus, timeouts.init_cmd, |bus| {
                    bus.send_app_command(cmd.index(), cmd.argument(), 0)
                });
                if ready(r1) {
                    self.card = Card::SDv1;
                    return Ok(State::SendCmd58);
                }
                debug!("ACMD41 failed with {:#04x}, trying CMD1", r1.0);
                let cmd = Command::SendOpCond;
                let r1 = initialize(&mut self.bus, timeouts.init_cmd, |bus| {
                    bus.send_command(cmd.index(), cmd.argument(), 0)
                });
                if !ready(r1) {
                    return Err(BUSError::from_r1(r1));
                }
                self.card = Card::MMC;
                State::SendCmd58
            }
            State::SendAcmd41Hcs => {
                let cmd = AppCommand::SDSendOpCond(true);
                let r1 = initialize(&mut self.bus, timeouts.init_cmd, |bus| {
                    bus.send_app_command(cmd.index(), cmd.argument(), 0)
                });
                if !ready(r1) {
                    return Err(match r1.valid() && r1.idle() {
                        true => BUSError::Timeout,
                        false => BUSError::from_r1(r1),
                    });
                }
                State::SendCmd58
            }
            State::SendCmd58 => {
                let response = self.bus.command(Command::ReadOCR, timeouts.init_cmd)?;
                if !response.r1.ok() {
                    return Err(BUSError::from_r1(response.r1));
                }
                let ocr = R3(response.ex);
                if !ocr.power_up_status() {
                    warn!("OCR {:#010x}: card still powering up", ocr.0);
                    return Err(BUSError::Generic);
                }
                if ocr.voltage_window() & config.ocr_voltage_mask == 0 {
                    warn!("OCR {:#010x}: supply voltage not supported", ocr.0);
                    return Err(BUSError::Generic);
                }
                match self.card {
                    Card::SDv1 | Card::MMC => State::SendCmd16,
                    _ if ocr.card_capacity_status() => {
                        self.card = Card::SDHC;
                        State::EnableCrc
                    }
                    _ => {
                        self.card = Card::SDSC;
                        State::SendCmd16
                    }
                }
            }
            State::SendCmd16 => {
                let cmd = Command::SetBlockLen(BLOCK_SIZE as u32);
                let r1 = self.bus.command(cmd, timeouts.init_cmd)?.r1;
                if !r1.ok() {
                    return Err(BUSError::from_r1(r1));
                }
                State::EnableCrc
            }
            State::EnableCrc => {
                let r1 = self.bus.command(Command::CRCOnOff(config.crc), timeouts.init_cmd)?.r1;
                if !r1.ok() {
                    return Err(BUSError::from_r1(r1));
                }
                self.bus.crc = config.crc;
                State::ReadCid
            }
            State::ReadCid => {
                let mut buffer = [0u8; REGISTER_SIZE];
                self.bus.read_register(Command::SendCID, &mut buffer, timeouts.init_cmd)?;
                self.cid = Some(CID::from(buffer));
                State::ReadCsd
            }
            State::ReadCsd => {
                let mut buffer = [0u8; REGISTER_SIZE];
                self.bus.read_register(Command::SendCSD, &mut buffer, timeouts.init_cmd)?;
                let csd = CSD::try_from(buffer).map_err(|version| {
                    warn!("Unsupported CSD structure version {}", version);
                    BUSError::UnsupportedCSD(version)
                })?;
                self.csd = Some(csd);
                State::SetMaxSpeed
            }
            State::SetMaxSpeed => {
                self.bus.finish()?;
                self.bus.set_speed(config.post_init_hz)?;
                State::Finish
            }
            State::Finish => State::Finish,
        };
        Ok(next)
    }
}
