pub mod config;
pub mod dac;
pub mod units;
pub mod word;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot split value and unit from `{0}`")]
    ValueUnit(String),

    #[error("Cannot parse `{0}` as a number")]
    Number(String),

    #[error("Unknown frequency unit: `{0}`")]
    FreqUnit(String),

    #[error("Unknown time unit: `{0}`")]
    TimeUnit(String),

    #[error("Undefined polarity `{0}` (use 0, 1, nim or ttl)")]
    Polarity(String),

    #[error("DAC voltage {0} V out of range (-10.3 < V < 10.3)")]
    VoltOutOfRange(f64),
}
