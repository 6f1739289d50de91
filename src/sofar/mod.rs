pub mod client;
pub mod codec;
pub mod command;
pub mod decode;
pub mod registers;

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Serialize, Debug, PartialEq, Eq, Copy, Clone)]
pub enum RunningState {
    #[serde(rename = "WaitState")]
    Waiting,
    #[serde(rename = "CheckState")]
    Checking,
    #[serde(rename = "NormalState")]
    Normal,
    #[serde(rename = "CheckDischargeState")]
    CheckDischarge,
    #[serde(rename = "DischargeState")]
    Discharging,
    #[serde(rename = "EPSState")]
    Eps,
    #[serde(rename = "FaultState")]
    Fault,
    #[serde(rename = "PermanentState")]
    Permanent,
    Unknown,
}

/// Interpreted content of the running state register.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct StateReading {
    pub valid: bool,
    pub state: RunningState,
    pub code: u16,
}

/// Code reported for any raw value outside the known state table.
pub const UNKNOWN_STATE_CODE: u16 = 9;

impl RunningState {
    const TABLE: [RunningState; 8] = [
        RunningState::Waiting,
        RunningState::Checking,
        RunningState::Normal,
        RunningState::CheckDischarge,
        RunningState::Discharging,
        RunningState::Eps,
        RunningState::Fault,
        RunningState::Permanent,
    ];

    pub fn interpret(raw: u16) -> StateReading {
        match Self::TABLE.get(usize::from(raw)) {
            Some(&state) => StateReading { valid: true, state, code: raw },
            None => StateReading::unknown(),
        }
    }
}

impl StateReading {
    pub const fn unknown() -> Self {
        Self { valid: false, state: RunningState::Unknown, code: UNKNOWN_STATE_CODE }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BatteryType {
    Darfon,
    Pylontech,
    Soltaro,
    SoltaroOrAlphaEss,
    General,
    Tele,
    Default,
    Unrecognized(u16),
}

impl From<u16> for BatteryType {
    fn from(code: u16) -> Self {
        use BatteryType::*;

        match code {
            0 => Darfon,
            1 => Pylontech,
            2 => Soltaro,
            3 => SoltaroOrAlphaEss,
            4 => General,
            80 => Tele,
            100 => Default,
            other => Unrecognized(other),
        }
    }
}

impl fmt::Display for BatteryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryType::Darfon => f.write_str("Darfon"),
            BatteryType::Pylontech => f.write_str("Pylontech"),
            BatteryType::Soltaro => f.write_str("Soltaro"),
            BatteryType::SoltaroOrAlphaEss => f.write_str("Soltaro or Alpha.ess"),
            BatteryType::General => f.write_str("General"),
            BatteryType::Tele => f.write_str("Tele"),
            BatteryType::Default => f.write_str("Default"),
            BatteryType::Unrecognized(code) => write!(f, "unrecognized({code})"),
        }
    }
}

impl Serialize for BatteryType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub type Volts = f64;
pub type Amps = f64;
pub type Watts = f64;
pub type KiloWattHours = f64;
pub type Hertz = f64;
pub type Celsius = u16;
pub type Percentage = u16;

#[derive(Serialize, Debug, PartialEq, Clone)]
pub struct OperationalMeasurements {
    pub grid_voltage: Volts,
    pub grid_current: Amps,
    pub grid_freq: Hertz,
    pub battery_power: i32,
    pub battery_voltage: Volts,
    pub battery_current: Amps,
    #[serde(rename = "batterySOC")]
    pub battery_soc: Percentage,
    pub bat_temperature: Celsius,
    pub feed_in_out_power: Watts,
    pub load_power: Watts,
    pub in_out_power: Watts,
    pub generation_power: Watts,
    pub today_generation: KiloWattHours,
    pub today_exported: KiloWattHours,
    pub today_purchase: KiloWattHours,
    pub today_consumption_of_load: u16,
    pub bat_cycles: u16,
    pub inverter_bus_voltage: Volts,
    pub llc_bus_voltage: Volts,
    pub generation_current: u16,
    pub inner_temperature: Celsius,
    pub heatsink_temperature: Celsius,
}

#[derive(Serialize, Debug, PartialEq, Clone)]
pub struct BatteryConfiguration {
    pub battery_type: BatteryType,
    pub battery_capacity: u16,
    pub max_charge_voltage: Volts,
    pub max_charge_current: Amps,
    pub over_voltage_protection: Volts,
    pub min_discharge_voltage: Volts,
    pub max_discharge_current: Amps,
    pub under_volt_protection_point: Volts,
    pub discharge_depth: u16,
    pub empty_battery_voltage: Volts,
    pub full_battery_voltage: Volts,
}

/// Everything read from the inverter during one poll cycle.
///
/// The blocks are `None` when the state was invalid or the read came back
/// absent or short; they are left out of the published payload entirely.
#[derive(Serialize, Debug, PartialEq, Clone)]
pub struct Snapshot {
    pub state: RunningState,
    pub running_state: u16,

    #[serde(flatten)]
    pub operational: Option<OperationalMeasurements>,
    #[serde(flatten)]
    pub battery: Option<BatteryConfiguration>,
}

impl Snapshot {
    pub fn from_state(reading: StateReading) -> Self {
        Self {
            state: reading.state,
            running_state: reading.code,
            operational: None,
            battery: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_states() {
        let expected = [
            RunningState::Waiting,
            RunningState::Checking,
            RunningState::Normal,
            RunningState::CheckDischarge,
            RunningState::Discharging,
            RunningState::Eps,
            RunningState::Fault,
            RunningState::Permanent,
        ];

        for (raw, state) in expected.into_iter().enumerate() {
            let raw = raw as u16;
            assert_eq!(RunningState::interpret(raw), StateReading { valid: true, state, code: raw });
        }
    }

    #[test]
    fn out_of_range_state_is_unknown() {
        for raw in [8, 9, 65535] {
            let reading = RunningState::interpret(raw);
            assert!(!reading.valid);
            assert_eq!(reading.state, RunningState::Unknown);
            assert_eq!(reading.code, 9);
        }
    }

    #[test]
    fn battery_type_lookup() {
        assert_eq!(BatteryType::from(80), BatteryType::Tele);
        assert_eq!(BatteryType::from(3).to_string(), "Soltaro or Alpha.ess");
        assert_eq!(BatteryType::from(200), BatteryType::Unrecognized(200));
        assert_eq!(BatteryType::from(200).to_string(), "unrecognized(200)");
    }

    #[test]
    fn state_only_snapshot_serializes_two_fields() {
        let snapshot = Snapshot::from_state(RunningState::interpret(42));
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json, serde_json::json!({ "state": "Unknown", "running_state": 9 }));
    }
}
