//! Shared field grammar for block bodies: comments, column splitting,
//! channel lists, DAC updates, durations.

use std::collections::{BTreeMap, BTreeSet};

use patgen::units;

pub type ChanSet = BTreeSet<u8>;
pub type DacUpdates = BTreeMap<u8, u16>;

pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Split a line at the first `#` into content and comment.
pub fn split_comment(line: &str) -> (&str, Option<&str>) {
    match line.split_once('#') {
        Some((code, comment)) => (code, Some(comment.trim())),
        None => (line, None),
    }
}

/// Lowercased columns split on commas, spaces and tabs, with the trailing
/// comment removed and returned separately.
pub fn cols(line: &str) -> (Vec<String>, Option<String>) {
    let (code, comment) = split_comment(line);
    let cols = code
        .to_ascii_lowercase()
        .split([',', ' ', '\t'])
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (cols, comment.map(String::from))
}

/// Re-join a value and its unit when they arrive as separate columns,
/// so `["100", "mhz", "auto"]` becomes `["100mhz", "auto"]`.
pub fn merge_unit_tokens(cols: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for col in cols {
        if (units::is_time_unit(&col) || units::is_freq_unit(&col)) && !out.is_empty() {
            out.last_mut().unwrap().push_str(&col);
        } else {
            out.push(col);
        }
    }
    out
}

/// Parse channel columns: single numbers and `n-m` ranges, de-duplicated.
pub fn parse_channels(cols: &[String]) -> Result<ChanSet, String> {
    let mut chans = ChanSet::new();
    for part in cols {
        match part.split_once('-') {
            Some((a, b)) => {
                let start: u8 = a
                    .parse()
                    .map_err(|_| format!("cannot parse channel range `{part}`"))?;
                let end: u8 = b
                    .parse()
                    .map_err(|_| format!("cannot parse channel range `{part}`"))?;
                chans.extend(start..=end);
            }
            None => {
                chans.insert(
                    part.parse()
                        .map_err(|_| format!("cannot parse channel `{part}`"))?,
                );
            }
        }
    }
    Ok(chans)
}

/// Parse DAC update columns: `chan:value` pairs, `value` a raw code or a
/// voltage literal (optional `v` suffix) through the DAC transfer function.
pub fn parse_dac_updates(cols: &[String]) -> Result<DacUpdates, String> {
    let mut updates = DacUpdates::new();
    for part in cols {
        let (ch, val) = part
            .split_once(':')
            .ok_or_else(|| format!("DAC update `{part}` must be `chan:value`"))?;
        let ch: u8 = ch
            .parse()
            .map_err(|_| format!("cannot parse DAC channel `{ch}`"))?;
        let code = if val.bytes().all(|b| b.is_ascii_digit()) {
            val.parse::<u16>()
                .map_err(|_| format!("DAC value `{val}` out of range"))?
        } else {
            let volt: f64 = val
                .trim_end_matches('v')
                .parse()
                .map_err(|_| format!("cannot parse DAC value `{val}`"))?;
            patgen::dac::volt_to_code(volt).map_err(|e| e.to_string())?
        };
        updates.insert(ch, code);
    }
    Ok(updates)
}

/// Pop a duration (`10ms` or `10 ms`) off the front of the columns, in ns.
pub fn parse_duration(cols: &mut Vec<String>) -> Result<u64, String> {
    let first = cols.first().ok_or("missing duration")?;
    match units::parse_time(first) {
        Ok(ns) => {
            cols.remove(0);
            Ok(ns)
        }
        Err(_) if cols.len() >= 2 => {
            let joined = format!("{}{}", cols[0], cols[1]);
            let ns = units::parse_time(&joined).map_err(|e| e.to_string())?;
            cols.drain(0..2);
            Ok(ns)
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Parse an external input designator `e1`-`e4` into its channel number.
pub fn parse_ext_input(col: &str) -> Result<u8, String> {
    match col {
        "e1" => Ok(1),
        "e2" => Ok(2),
        "e3" => Ok(3),
        "e4" => Ok(4),
        _ => Err(format!("external input `{col}` must be one of e1-e4")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns() {
        let (cols, comment) = cols("10ns CHAN 0, 2-4\t7 # fire");
        assert_eq!(cols, vec!["10ns", "chan", "0", "2-4", "7"]);
        assert_eq!(comment.as_deref(), Some("fire"));
    }

    #[test]
    fn channel_ranges() {
        let cols: Vec<String> = ["0", "2-4", "7", "2"].iter().map(|s| s.to_string()).collect();
        let chans = parse_channels(&cols).unwrap();
        assert_eq!(chans.into_iter().collect::<Vec<_>>(), vec![0, 2, 3, 4, 7]);
        assert!(parse_channels(&["x".to_string()]).is_err());
    }

    #[test]
    fn dac_updates() {
        let cols: Vec<String> = ["0:100", "3:2.5v"].iter().map(|s| s.to_string()).collect();
        let updates = parse_dac_updates(&cols).unwrap();
        assert_eq!(updates[&0], 100);
        assert_eq!(updates[&3], patgen::dac::volt_to_code(2.5).unwrap());
        assert!(parse_dac_updates(&["7".to_string()]).is_err());
    }

    #[test]
    fn durations() {
        let mut cols: Vec<String> = vec!["10ms".into(), "chan".into()];
        assert_eq!(parse_duration(&mut cols).unwrap(), 10_000_000);
        assert_eq!(cols, vec!["chan"]);

        let mut cols: Vec<String> = vec!["10".into(), "us".into(), "chan".into()];
        assert_eq!(parse_duration(&mut cols).unwrap(), 10_000);
        assert_eq!(cols, vec!["chan"]);

        let mut cols: Vec<String> = vec!["10xs".into()];
        assert!(parse_duration(&mut cols).is_err());
    }

    #[test]
    fn unit_merge() {
        let cols: Vec<String> = ["100", "mhz", "auto"].iter().map(|s| s.to_string()).collect();
        assert_eq!(merge_unit_tokens(cols), vec!["100mhz", "auto"]);
    }

    #[test]
    fn ext_inputs() {
        assert_eq!(parse_ext_input("e3").unwrap(), 3);
        assert!(parse_ext_input("e5").is_err());
    }
}
