use super::{
    codec::{decode_scaled, decode_unsigned, Rounding, Signedness, ROUNDED},
    registers, BatteryConfiguration, BatteryType, OperationalMeasurements, Snapshot, StateReading,
};

fn unsigned(block: &[u16], index: usize, scale: f64) -> f64 {
    decode_scaled(block[index], scale, Signedness::Unsigned, ROUNDED)
}

fn signed(block: &[u16], index: usize, scale: f64) -> f64 {
    decode_scaled(block[index], scale, Signedness::Signed, ROUNDED)
}

fn is_complete(block: &[u16], expected: registers::RegisterBlock) -> bool {
    block.len() == usize::from(expected.count)
}

/// Decodes the 52 word block starting at the grid voltage register.
///
/// Returns `None` unless the block has exactly the expected length. Indices
/// without a mapping are reserved registers and are skipped.
pub fn decode_operational_block(block: &[u16]) -> Option<OperationalMeasurements> {
    if !is_complete(block, registers::OPERATIONAL) {
        return None;
    }

    Some(OperationalMeasurements {
        grid_voltage: unsigned(block, 0, 0.1),
        grid_current: signed(block, 1, 0.01),
        grid_freq: unsigned(block, 6, 0.01),
        battery_power: signed(block, 7, 10.0) as i32,
        battery_voltage: unsigned(block, 8, 0.01),
        battery_current: signed(block, 9, 0.01),
        battery_soc: decode_unsigned(block[10]),
        bat_temperature: decode_unsigned(block[11]),
        feed_in_out_power: signed(block, 12, 0.01),
        load_power: unsigned(block, 13, 0.01),
        in_out_power: decode_scaled(block[14], 0.01, Signedness::Signed, Rounding::Unrounded),
        generation_power: unsigned(block, 15, 0.01),
        today_exported: unsigned(block, 17, 0.01),
        today_generation: unsigned(block, 18, 0.01),
        today_purchase: unsigned(block, 20, 0.01),
        today_consumption_of_load: decode_scaled(block[21], 0.01, Signedness::Unsigned, Rounding::Decimals(0)) as u16,
        bat_cycles: decode_unsigned(block[38]),
        inverter_bus_voltage: unsigned(block, 39, 0.01),
        llc_bus_voltage: unsigned(block, 40, 0.01),
        generation_current: decode_unsigned(block[48]),
        inner_temperature: decode_unsigned(block[50]),
        heatsink_temperature: decode_unsigned(block[51]),
    })
}

/// Decodes the 13 word battery configuration block.
///
/// An unmapped battery type code yields [`BatteryType::Unrecognized`].
pub fn decode_battery_config_block(block: &[u16]) -> Option<BatteryConfiguration> {
    if !is_complete(block, registers::BATTERY_CONFIG) {
        return None;
    }

    Some(BatteryConfiguration {
        battery_type: BatteryType::from(block[0]),
        battery_capacity: decode_unsigned(block[1]),
        max_charge_voltage: unsigned(block, 3, 0.1),
        max_charge_current: unsigned(block, 4, 0.01),
        over_voltage_protection: unsigned(block, 5, 0.1),
        min_discharge_voltage: unsigned(block, 6, 0.1),
        max_discharge_current: unsigned(block, 7, 0.01),
        under_volt_protection_point: unsigned(block, 8, 0.1),
        discharge_depth: decode_unsigned(block[9]),
        empty_battery_voltage: unsigned(block, 11, 0.01),
        full_battery_voltage: unsigned(block, 12, 0.01),
    })
}

/// Assembles a snapshot from whatever blocks were read this cycle.
///
/// The register blocks are ignored unless the state reading is valid.
pub fn decode_snapshot(reading: StateReading, operational: Option<&[u16]>, battery: Option<&[u16]>) -> Snapshot {
    let mut snapshot = Snapshot::from_state(reading);

    if reading.valid {
        snapshot.operational = operational.and_then(decode_operational_block);
        snapshot.battery = battery.and_then(decode_battery_config_block);
    }

    snapshot
}
