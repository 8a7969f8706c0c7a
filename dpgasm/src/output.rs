//! Final artifact assembly: config words, parameter preload, program body.

use patgen::config::{self, ConfigWord, ADDRESS_RESET, PARAMETER_WRITE, TABLE_RESET};
use patgen::word::w16;

use crate::block::{ControlBlock, Program};
use crate::emit::Item;

#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub hex: bool,
    pub verbose: bool,
}

pub fn config_word(ctrl: &ControlBlock) -> ConfigWord {
    ConfigWord {
        clock_select: ctrl.clock_select,
        aux_select: ctrl.aux_select,
        input_level: ctrl.input_level,
        dac_mode: ctrl.dac_mode,
        aux_polarity: ctrl.aux_polarity,
        wide: ctrl.wide,
    }
}

pub fn assemble(prog: &Program, items: &[Item], origin: &str, opts: &Options) -> String {
    let ctrl = &prog.control;
    let bits = config_word(ctrl).bits();
    let mut out = String::new();

    out.push_str(&format!("#This file was generated by dpgasm using {}\n\n", origin));

    // hold the table, target the parameter RAM
    out.push_str("config ");
    out.push_str(&w16(bits | PARAMETER_WRITE | ADDRESS_RESET | TABLE_RESET, true, opts.hex));
    out.push('\n');

    // parameter preload, always decimal
    let params = config::param_words(
        ctrl.start_address,
        ctrl.input_threshold,
        ctrl.evars,
        ctrl.ivars,
        ctrl.dacs,
        ctrl.wide,
    );
    out.push_str("writew ");
    for (i, val) in params.iter().enumerate() {
        out.push_str(&w16(*val, i == params.len() - 1, false));
    }
    out.push('\n');

    // switch the write target to the pattern table
    out.push_str("config ");
    out.push_str(&w16(bits | ADDRESS_RESET | TABLE_RESET, true, opts.hex));
    out.push('\n');

    for item in items {
        match item {
            Item::Banner(text) => {
                out.push_str(&format!("\n# {}\n", text));
            }
            Item::Word(line) => {
                out.push_str("writew ");
                for word in &line.chan {
                    out.push_str(&w16(*word, false, opts.hex));
                }
                if let Some((value, mask)) = line.dac {
                    out.push_str(&w16(value, false, opts.hex));
                    out.push_str(&w16(mask, false, opts.hex));
                }
                // the time word stays decimal even in hex mode
                out.push_str(&w16(line.time, false, false));
                out.push_str(&w16(line.addr, true, opts.hex));
                out.push_str(&format!("\t# row {}", line.row));
                let comment = line.comment.trim();
                if !comment.is_empty() {
                    out.push_str(&format!(" # {}", comment));
                }
                out.push('\n');
            }
        }
    }

    out.push_str(&format!("\n\nconfig {} #Release hold", w16(bits, true, opts.hex)));
    out
}
