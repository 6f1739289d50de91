use super::registers;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// A single register write produced from an inbound command.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct WriteRequest {
    pub address: u16,
    pub value: u16,
}

impl WriteRequest {
    /// Both halves must fit a register, nothing is ever truncated.
    pub fn new(address: i64, value: i64) -> Result<Self, Rejected> {
        Ok(Self {
            address: u16::try_from(address).map_err(|_| Rejected::AddressOutOfRange(address))?,
            value: u16::try_from(value).map_err(|_| Rejected::ValueOutOfRange(value))?,
        })
    }
}

impl fmt::Display for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x} <- {:#06x}", self.address, self.value)
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Command {
    Charge(i64),
    Discharge(i64),
    Auto,
    Standby,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Rejected {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("expected an integer power in watts, got {0:?}")]
    InvalidPayload(String),
    #[error("power {power} W outside of 1..={max_power} W")]
    PowerOutOfRange { power: i64, max_power: u32 },
    #[error("register address {0} outside of 0..=65535")]
    AddressOutOfRange(i64),
    #[error("register value {0} outside of 0..=65535")]
    ValueOutOfRange(i64),
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum CommandName {
    Charge,
    Discharge,
    Auto,
    Standby,
}

impl FromStr for CommandName {
    type Err = Rejected;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charge" => Ok(CommandName::Charge),
            "discharge" => Ok(CommandName::Discharge),
            "auto" => Ok(CommandName::Auto),
            "standby" => Ok(CommandName::Standby),
            _ => Err(Rejected::UnknownCommand(s.to_owned())),
        }
    }
}

impl Command {
    /// Builds a command from the topic suffix and message payload.
    ///
    /// The payload is only inspected for commands that carry a power.
    pub fn parse(name: &str, payload: &str) -> Result<Self, Rejected> {
        let power = || {
            payload
                .trim()
                .parse::<i64>()
                .map_err(|_| Rejected::InvalidPayload(payload.to_owned()))
        };

        Ok(match name.parse::<CommandName>()? {
            CommandName::Charge => Command::Charge(power()?),
            CommandName::Discharge => Command::Discharge(power()?),
            CommandName::Auto => Command::Auto,
            CommandName::Standby => Command::Standby,
        })
    }
}

pub struct CommandTranslator {
    max_power: u32,
}

impl CommandTranslator {
    pub fn new(max_power: u32) -> Self {
        Self { max_power }
    }

    fn check_power(&self, power: i64) -> Result<i64, Rejected> {
        if 0 < power && power <= i64::from(self.max_power) {
            Ok(power)
        } else {
            Err(Rejected::PowerOutOfRange { power, max_power: self.max_power })
        }
    }

    pub fn translate(&self, cmd: Command) -> Result<WriteRequest, Rejected> {
        match cmd {
            Command::Charge(power) => WriteRequest::new(registers::CHARGE.into(), self.check_power(power)?),
            Command::Discharge(power) => WriteRequest::new(registers::DISCHARGE.into(), self.check_power(power)?),
            Command::Auto => WriteRequest::new(registers::AUTO.into(), registers::MODE_ENABLE.into()),
            Command::Standby => WriteRequest::new(registers::STANDBY.into(), registers::MODE_ENABLE.into()),
        }
    }

    pub fn translate_message(&self, name: &str, payload: &str) -> Result<WriteRequest, Rejected> {
        self.translate(Command::parse(name, payload)?)
    }
}
