use num_enum::IntoPrimitive;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::Error;

/// Config word flag bits driving the load protocol.
pub const PARAMETER_WRITE: u16 = 1 << 3;
pub const ADDRESS_RESET: u16 = 1 << 2;
pub const TABLE_RESET: u16 = 1 << 0;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    IntoPrimitive,
    EnumString,
    Display,
)]
#[repr(u8)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum ClockSelect {
    #[default]
    Auto,
    External,
    Internal,
    Direct,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    IntoPrimitive,
    EnumString,
    Display,
)]
#[repr(u8)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum AuxSelect {
    #[default]
    Normal,
    Delayed,
    Main,
    Ref,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    IntoPrimitive,
    EnumString,
    Display,
)]
#[repr(u8)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum DacMode {
    #[default]
    Static,
    Single,
    Half,
    Full,
}

impl DacMode {
    /// Whether this mode permits runtime updates of the given DAC channel.
    pub fn allows(self, chan: u8) -> bool {
        match self {
            DacMode::Static => false,
            DacMode::Single => chan == 0,
            DacMode::Half => chan <= 3,
            DacMode::Full => chan <= 7,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, IntoPrimitive,
)]
#[repr(u8)]
pub enum Polarity {
    #[default]
    Nim,
    Ttl,
}

impl Polarity {
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "nim" => Ok(Polarity::Nim),
            "1" | "ttl" => Ok(Polarity::Ttl),
            _ => Err(Error::Polarity(s.to_string())),
        }
    }
}

/// The hardware config word, sans the load protocol flag bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigWord {
    pub clock_select: ClockSelect,
    pub aux_select: AuxSelect,
    pub input_level: Polarity,
    pub dac_mode: DacMode,
    pub aux_polarity: Polarity,
    pub wide: bool,
}

impl ConfigWord {
    pub fn bits(&self) -> u16 {
        let mut bits = 0u16;
        if self.wide {
            bits |= (u8::from(self.dac_mode) as u16) << 11;
            bits |= (u8::from(self.aux_polarity) as u16) << 10;
        }
        bits |= (u8::from(self.clock_select) as u16) << 6;
        bits |= (u8::from(self.aux_select) as u16) << 4;
        bits |= (u8::from(self.input_level) as u16) << 1;
        bits
    }
}

/// The parameter preload register, in write order. The wide hardware carries
/// the input threshold and static DAC presets; the narrow one does not.
pub fn param_words(
    start_address: u16,
    input_threshold: u16,
    evars: [u16; 4],
    ivars: [u16; 4],
    dacs: [u16; 8],
    wide: bool,
) -> Vec<u16> {
    let mut words = vec![start_address];
    if wide {
        words.push(input_threshold);
    }
    words.extend(evars);
    words.extend(ivars);
    if wide {
        words.extend(dacs);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_parse() {
        assert_eq!("AUTO".parse::<ClockSelect>().unwrap(), ClockSelect::Auto);
        assert_eq!("direct".parse::<ClockSelect>().unwrap(), ClockSelect::Direct);
        assert_eq!("delayed".parse::<AuxSelect>().unwrap(), AuxSelect::Delayed);
        assert_eq!("full".parse::<DacMode>().unwrap(), DacMode::Full);
        assert!("hoge".parse::<DacMode>().is_err());
        assert_eq!(Polarity::parse("ttl").unwrap(), Polarity::Ttl);
        assert_eq!(Polarity::parse("0").unwrap(), Polarity::Nim);
        assert!(Polarity::parse("2").is_err());
    }

    #[test]
    fn config_bits() {
        let word = ConfigWord {
            clock_select: ClockSelect::External,
            aux_select: AuxSelect::Main,
            input_level: Polarity::Ttl,
            dac_mode: DacMode::Half,
            aux_polarity: Polarity::Ttl,
            wide: true,
        };
        assert_eq!(
            word.bits(),
            (2 << 11) | (1 << 10) | (1 << 6) | (2 << 4) | (1 << 1)
        );

        // narrow hardware masks the DAC and aux polarity fields out
        let narrow = ConfigWord { wide: false, ..word };
        assert_eq!(narrow.bits(), (1 << 6) | (2 << 4) | (1 << 1));
    }

    #[test]
    fn dac_gating() {
        assert!(!DacMode::Static.allows(0));
        assert!(DacMode::Single.allows(0));
        assert!(!DacMode::Single.allows(1));
        assert!(DacMode::Half.allows(3));
        assert!(!DacMode::Half.allows(4));
        assert!(DacMode::Full.allows(7));
    }

    #[test]
    fn param_register() {
        let narrow = param_words(3, 59000, [1, 2, 3, 4], [5, 6, 7, 8], [0; 8], false);
        assert_eq!(narrow, vec![3, 1, 2, 3, 4, 5, 6, 7, 8]);

        let wide = param_words(0, 59000, [0; 4], [0; 4], [9; 8], true);
        assert_eq!(wide.len(), 18);
        assert_eq!(wide[1], 59000);
        assert_eq!(wide[10..], [9; 8]);
    }
}
