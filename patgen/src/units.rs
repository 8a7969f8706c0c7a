use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[strum(ascii_case_insensitive)]
pub enum FreqUnit {
    #[strum(serialize = "mhz")]
    MHz,
    #[strum(serialize = "khz")]
    KHz,
    #[strum(serialize = "hz")]
    Hz,
}

impl FreqUnit {
    pub fn to_hz(self) -> u64 {
        match self {
            FreqUnit::MHz => 1_000_000,
            FreqUnit::KHz => 1_000,
            FreqUnit::Hz => 1,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[strum(ascii_case_insensitive)]
pub enum TimeUnit {
    #[strum(serialize = "ms")]
    Ms,
    #[strum(serialize = "us")]
    Us,
    #[strum(serialize = "ns")]
    Ns,
}

impl TimeUnit {
    pub fn to_ns(self) -> u64 {
        match self {
            TimeUnit::Ms => 1_000_000,
            TimeUnit::Us => 1_000,
            TimeUnit::Ns => 1,
        }
    }
}

static VALUE_UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*([a-zA-Z]+)$").unwrap());

/// Split `10ms` into (`10`, `ms`).
pub fn split_value_unit(s: &str) -> Result<(&str, &str), Error> {
    let caps = VALUE_UNIT
        .captures(s.trim())
        .ok_or_else(|| Error::ValueUnit(s.to_string()))?;
    let value = caps.get(1).unwrap().as_str();
    let unit = caps.get(2).unwrap().as_str();
    Ok((value, unit))
}

/// Parse `100mhz` into Hz.
pub fn parse_freq(s: &str) -> Result<u64, Error> {
    let (value, unit) = split_value_unit(s)?;
    let value: u64 = value.parse().map_err(|_| Error::Number(value.to_string()))?;
    let unit: FreqUnit = unit.parse().map_err(|_| Error::FreqUnit(unit.to_string()))?;
    Ok(value * unit.to_hz())
}

/// Parse `10ms` into ns.
pub fn parse_time(s: &str) -> Result<u64, Error> {
    let (value, unit) = split_value_unit(s)?;
    let value: u64 = value.parse().map_err(|_| Error::Number(value.to_string()))?;
    let unit: TimeUnit = unit.parse().map_err(|_| Error::TimeUnit(unit.to_string()))?;
    Ok(value * unit.to_ns())
}

pub fn is_freq_unit(s: &str) -> bool {
    s.parse::<FreqUnit>().is_ok()
}

pub fn is_time_unit(s: &str) -> bool {
    s.parse::<TimeUnit>().is_ok()
}
