//! Conversions from raw register words to physical quantities.

/// How a scaled value is rounded after the scale factor has been applied.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Rounding {
    /// Round half away from zero to the given number of decimal places.
    Decimals(i32),
    Unrounded,
}

pub const ROUNDED: Rounding = Rounding::Decimals(2);

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Signedness {
    Unsigned,
    Signed,
}

pub const fn decode_unsigned(word: u16) -> u16 {
    word
}

/// Two's-complement reinterpretation, `0xFFFF` is `-1`.
pub const fn decode_signed(word: u16) -> i16 {
    word as i16
}

pub fn decode_scaled(word: u16, scale: f64, signedness: Signedness, rounding: Rounding) -> f64 {
    let raw = match signedness {
        Signedness::Unsigned => f64::from(decode_unsigned(word)),
        Signedness::Signed => f64::from(decode_signed(word)),
    };

    round(raw * scale, rounding)
}

fn round(value: f64, rounding: Rounding) -> f64 {
    match rounding {
        Rounding::Decimals(places) => {
            let factor = 10f64.powi(places);
            (value * factor).round() / factor
        },
        Rounding::Unrounded => value,
    }
}
