//! Second pass: walk the edges and emit one instruction word set per row.

use std::collections::HashSet;

use patgen::word::{chan_words, time_word, AddrWord, SpecialOp, TABLE_ROWS, TIME_SLOTS};

use crate::block::{Block, BranchBlock, LoopBlock, Program, SeqBlock, TriggerBlock, TriggerMode};
use crate::error::Error;
use crate::field::{ChanSet, DacUpdates};
use crate::layout::{ceil_div, seq_body_words, Layout};
use crate::parser::Edge;

/// Pseudo-target naming the check row of the enclosing loop.
pub const LOOP_CHECK: &str = "loop_check";

/// Where a jump lands: an ordinary block, or the check row of a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpTarget {
    Block(String),
    LoopCheck(String),
}

impl JumpTarget {
    fn of(id: &str, enclosing: Option<&str>) -> Result<JumpTarget, Error> {
        if id == LOOP_CHECK {
            match enclosing {
                Some(lp) => Ok(JumpTarget::LoopCheck(lp.to_string())),
                None => Err(Error::LoopCheckOutsideLoop),
            }
        } else {
            Ok(JumpTarget::Block(id.to_string()))
        }
    }
}

/// One emitted table row.
#[derive(Debug, Clone)]
pub struct Line {
    pub row: u16,
    pub chan: Vec<u16>,
    pub dac: Option<(u16, u16)>,
    pub time: u16,
    pub addr: u16,
    pub comment: String,
}

/// Program body item: a block banner comment, or an instruction row.
#[derive(Debug, Clone)]
pub enum Item {
    Banner(String),
    Word(Line),
}

pub struct Emitter<'a> {
    prog: &'a Program,
    layout: &'a Layout,
    row: u16,
    items: Vec<Item>,
    written: HashSet<String>,
    verbose: bool,
    warnings: Vec<String>,
}

impl<'a> Emitter<'a> {
    pub fn emit(
        prog: &'a Program,
        layout: &'a Layout,
        verbose: bool,
    ) -> Result<(Vec<Item>, Vec<String>), Error> {
        let mut emitter = Emitter {
            prog,
            layout,
            row: prog.control.start_address,
            items: Vec::new(),
            written: HashSet::new(),
            verbose,
            warnings: Vec::new(),
        };
        for edge in &prog.edges {
            emitter.emit_edge(edge, None)?;
        }
        Ok((emitter.items, emitter.warnings))
    }

    fn emit_edge(&mut self, edge: &Edge, enclosing: Option<&str>) -> Result<(), Error> {
        if edge.from == LOOP_CHECK {
            return Ok(());
        }
        if self.written.contains(edge.from.as_str()) {
            return Ok(());
        }
        let prog = self.prog;
        let block = prog.get(&edge.from)?;
        let expected = self.base() + self.layout.first_row(&edge.from)?;
        if self.row != expected {
            return Err(Error::RowMismatch(edge.from.clone(), self.row, expected));
        }
        self.written.insert(edge.from.clone());
        match block {
            Block::Seq(seq) => {
                let target = JumpTarget::of(&edge.to, enclosing)?;
                self.emit_seq(seq, &target)
            }
            Block::Trigger(trigger) => self.emit_trigger(trigger, edge, enclosing),
            Block::Loop(lp) => self.emit_loop(lp, &edge.to),
            Block::Branch(br) => self.emit_branch(br, enclosing),
            Block::Control(c) => Err(Error::UnresolvedBlock(c.id.clone())),
        }
    }

    fn base(&self) -> u16 {
        self.prog.control.start_address
    }

    fn resolve(&self, target: &JumpTarget) -> Result<u16, Error> {
        match target {
            JumpTarget::Block(id) => Ok(self.base() + self.layout.first_row(id)?),
            JumpTarget::LoopCheck(id) => Ok(self.base() + self.layout.last_row(id)? - 1),
        }
    }

    fn push(
        &mut self,
        block_id: &str,
        chans: &ChanSet,
        dac: &DacUpdates,
        time_ns: u64,
        addr: AddrWord,
        comment: String,
    ) -> Result<(), Error> {
        if self.row >= TABLE_ROWS {
            return Err(Error::TableOverflow(self.row as u64 + 1, TABLE_ROWS));
        }
        let line = Line {
            row: self.row,
            chan: chan_words(chans, self.prog.control.wide),
            dac: self.dac_words(block_id, dac)?,
            time: time_word(time_ns, self.prog.control.timestep_ns),
            addr: addr.encode(self.row),
            comment,
        };
        self.items.push(Item::Word(line));
        self.row += 1;
        Ok(())
    }

    fn dac_words(&self, block_id: &str, dac: &DacUpdates) -> Result<Option<(u16, u16)>, Error> {
        if !self.prog.control.wide {
            if dac.is_empty() {
                return Ok(None);
            }
            return Err(Error::DacOnNarrow(block_id.to_string()));
        }
        if dac.is_empty() {
            return Ok(Some((0, 0)));
        }
        let mode = self.prog.control.dac_mode;
        let mut mask = 0u16;
        let mut value = None;
        for (&ch, &val) in dac {
            if ch > 7 || !mode.allows(ch) {
                return Err(Error::DacRejected(block_id.to_string(), ch, mode));
            }
            match value {
                None => value = Some(val),
                Some(v) if v != val => {
                    return Err(Error::DacValueMismatch(block_id.to_string()))
                }
                _ => {}
            }
            mask |= 1 << ch;
        }
        Ok(Some((value.unwrap(), mask)))
    }

    fn emit_seq(&mut self, seq: &SeqBlock, target: &JumpTarget) -> Result<(), Error> {
        self.items
            .push(Item::Banner(format!("Sequence Block: {} ({})", seq.id, seq.name)));
        let step_ns = self.prog.control.timestep_ns;
        let max_step = step_ns * TIME_SLOTS;
        let last = seq.steps.len().saturating_sub(1);

        for (j, step) in seq.steps.iter().enumerate() {
            let is_last = j == last;
            let counter = step
                .use_ivar
                .map(|i| self.prog.control.ivars[i as usize])
                .unwrap_or(0);

            if counter > 0 {
                let ivar = step.use_ivar.unwrap();
                // a final counter step keeps one timestep back for the exit jump
                let time_ns = if is_last {
                    step.time_ns.saturating_sub(step_ns)
                } else {
                    step.time_ns
                };
                let body = seq_body_words(step.time_ns, max_step, counter);
                let (per_line, load_time) = balance(time_ns, counter, body, step_ns)
                    .ok_or_else(|| Error::TimeBalance(seq.id.clone(), step.time_ns))?;
                let ivar_note = if self.verbose {
                    format!(" (ivar {ivar})")
                } else {
                    String::new()
                };

                self.push(
                    &seq.id,
                    &step.chans,
                    &step.dac,
                    load_time,
                    AddrWord::Special(SpecialOp::Load { evars: 0, ivars: 1 << ivar }),
                    format!("Load ivar{}. {}", ivar_note, step.comment),
                )?;
                let dec_row = self.row;
                self.push(
                    &seq.id,
                    &step.chans,
                    &step.dac,
                    per_line,
                    AddrWord::Special(SpecialOp::DecIvar(ivar)),
                    format!("Decrement ivar{}. {}", ivar_note, step.comment),
                )?;
                for _ in 0..body - 2 {
                    self.push(
                        &seq.id,
                        &step.chans,
                        &step.dac,
                        per_line,
                        AddrWord::Next,
                        format!("Timing line for ivar{}. {}", ivar_note, step.comment),
                    )?;
                }
                self.push(
                    &seq.id,
                    &step.chans,
                    &step.dac,
                    per_line,
                    AddrWord::SpecialJump(SpecialOp::CheckIvar(ivar), dec_row),
                    format!(
                        "Check ivar{}, loop to {}. {}",
                        ivar_note, dec_row, step.comment
                    ),
                )?;
                if is_last {
                    let target_row = self.resolve(target)?;
                    self.push(
                        &seq.id,
                        &step.chans,
                        &step.dac,
                        step_ns,
                        AddrWord::Jump(target_row),
                        format!("End of counter step, to {}. {}", target_row, step.comment),
                    )?;
                }
            } else {
                let words = ceil_div(step.time_ns, max_step).max(1);
                let mut remaining = step.time_ns;
                for w in 0..words {
                    let line_time = remaining.min(max_step);
                    remaining -= line_time;
                    let addr = if is_last && w == words - 1 {
                        AddrWord::Jump(self.resolve(target)?)
                    } else {
                        AddrWord::Next
                    };
                    self.push(&seq.id, &step.chans, &step.dac, line_time, addr, step.comment.clone())?;
                }
            }
        }
        Ok(())
    }

    fn emit_trigger(
        &mut self,
        trigger: &TriggerBlock,
        edge: &Edge,
        enclosing: Option<&str>,
    ) -> Result<(), Error> {
        // the edge label names the exit this edge supplies; the other comes
        // from the block's own fields
        let (success_id, failure_id) = match edge.cond.as_deref() {
            Some("success") => (edge.to.clone(), trigger.failure.clone()),
            Some("failure") => (trigger.success.clone(), edge.to.clone()),
            _ => return Err(Error::TriggerEdgeLabel(trigger.id.clone())),
        };
        if success_id != trigger.success || failure_id != trigger.failure {
            return Err(Error::TriggerTargetMismatch(
                trigger.id.clone(),
                edge.cond.clone().unwrap_or_default(),
            ));
        }
        let success_row = self.resolve(&JumpTarget::of(&success_id, enclosing)?)?;
        let failure_row = self.resolve(&JumpTarget::of(&failure_id, enclosing)?)?;

        self.items.push(Item::Banner(format!(
            "Trigger Block: {} ({})",
            trigger.id, trigger.name
        )));
        let step_ns = self.prog.control.timestep_ns;
        let max_step = step_ns * TIME_SLOTS;
        let evar = trigger.ext_input - 1;
        let span_ns = match trigger.mode {
            TriggerMode::Count { span_ns, .. } => span_ns,
            TriggerMode::Rate(_) => step_ns,
        };
        // spans beyond one table row burn down through a helper ivar
        let helper = match trigger.mode {
            TriggerMode::Count { .. } if span_ns > max_step => {
                Some(self.find_good_ivar(span_ns, 2))
            }
            _ => None,
        };

        self.push(
            &trigger.id,
            &trigger.chans,
            &trigger.dac,
            step_ns,
            AddrWord::Special(SpecialOp::Load {
                evars: 1 << evar,
                ivars: helper.map(|i| 1 << i).unwrap_or(0),
            }),
            "Load evar (and ivar if used for time)".into(),
        )?;

        if let Some(ivar) = helper {
            let counter = self.prog.control.ivars[ivar as usize] as u64;
            if counter == 0 {
                return Err(Error::Field(
                    trigger.id.clone(),
                    "no non-zero ivar available for the trigger time span".into(),
                ));
            }
            let per_line = (span_ns / (counter * 2)).max(step_ns);
            let dec_row = self.row;
            self.push(
                &trigger.id,
                &trigger.chans,
                &trigger.dac,
                per_line,
                AddrWord::Special(SpecialOp::DecIvar(ivar)),
                "Decrement ivar for time span".into(),
            )?;
            self.push(
                &trigger.id,
                &trigger.chans,
                &trigger.dac,
                per_line,
                AddrWord::SpecialJump(SpecialOp::CheckIvar(ivar), dec_row),
                "Check ivar for time span, loop if non-zero".into(),
            )?;
        } else {
            let rem = span_ns.saturating_sub(step_ns);
            let d1 = (rem / 2).max(step_ns);
            let d2 = (rem - rem / 2).max(step_ns);
            self.push(
                &trigger.id,
                &trigger.chans,
                &trigger.dac,
                d1,
                AddrWord::Next,
                "Time delay part 1".into(),
            )?;
            self.push(
                &trigger.id,
                &trigger.chans,
                &trigger.dac,
                d2,
                AddrWord::Next,
                "Time delay part 2".into(),
            )?;
        }

        self.push(
            &trigger.id,
            &trigger.chans,
            &trigger.dac,
            step_ns,
            AddrWord::SpecialJump(SpecialOp::CheckEvar(evar), failure_row),
            format!("Check evar {}. If non-zero, goto {}", evar, failure_row),
        )?;
        self.push(
            &trigger.id,
            &trigger.chans,
            &trigger.dac,
            step_ns,
            AddrWord::Jump(success_row),
            format!("Evar {} is zero, goto {}", evar, success_row),
        )?;
        Ok(())
    }

    /// Pick the preloaded ivar that covers the span in the fewest rows per
    /// count. Warns when even the best one needs more than `max_lines`.
    fn find_good_ivar(&mut self, span_ns: u64, max_lines: u64) -> u8 {
        let max_step = self.prog.control.timestep_ns * TIME_SLOTS;
        let mut best = 0u8;
        let mut best_rows = f64::from(TABLE_ROWS);
        for (i, &val) in self.prog.control.ivars.iter().enumerate() {
            if val == 0 {
                continue;
            }
            let rows = span_ns as f64 / max_step as f64 / (val as f64 + 1.0);
            if rows < best_rows {
                best_rows = rows;
                best = i as u8;
            }
            if rows < max_lines as f64 {
                break;
            }
        }
        if best_rows >= max_lines as f64 {
            self.warnings.push(format!(
                "No ivar covers a {span_ns} ns span in under {max_lines} rows per count; \
                 using ivar {best} ({best_rows:.2} rows)"
            ));
        }
        best
    }

    fn emit_loop(&mut self, lp: &'a LoopBlock, after_id: &str) -> Result<(), Error> {
        self.items
            .push(Item::Banner(format!("Loop Block: {} ({})", lp.id, lp.name)));
        let step_ns = self.prog.control.timestep_ns;
        let ivar = lp.counter_var;

        self.push(
            &lp.id,
            &lp.chans,
            &lp.dac,
            step_ns,
            AddrWord::Special(SpecialOp::Load { evars: 0, ivars: 1 << ivar }),
            format!("Load ivar {}. {}", ivar, lp.comment),
        )?;
        let dec_row = self.row;
        self.push(
            &lp.id,
            &lp.chans,
            &lp.dac,
            step_ns,
            AddrWord::Special(SpecialOp::DecIvar(ivar)),
            format!("Decrement ivar {}. {}", ivar, lp.comment),
        )?;

        for edge in &lp.inner {
            self.emit_edge(edge, Some(&lp.id))?;
        }

        self.push(
            &lp.id,
            &lp.chans,
            &lp.dac,
            step_ns,
            AddrWord::SpecialJump(SpecialOp::CheckIvar(ivar), dec_row),
            format!("Check ivar {}. If non-zero, goto row {}. {}", ivar, dec_row, lp.comment),
        )?;
        let after_row = self.resolve(&JumpTarget::Block(after_id.to_string()))?;
        self.push(
            &lp.id,
            &lp.chans,
            &lp.dac,
            step_ns,
            AddrWord::Jump(after_row),
            format!("Ivar {} is zero. Goto row {}. {}", ivar, after_row, lp.comment),
        )?;
        Ok(())
    }

    fn emit_branch(&mut self, br: &BranchBlock, enclosing: Option<&str>) -> Result<(), Error> {
        let rows = self.layout.info(&br.id)?.num_rows;
        let time_ns = br.idle_ns.unwrap_or(self.prog.control.timestep_ns);
        let high_row = self.resolve(&JumpTarget::of(&br.high, enclosing)?)?;
        let comment = format!("Branch on ext input {}", br.ext_input);

        self.push(
            &br.id,
            &br.chans,
            &br.dac,
            time_ns,
            AddrWord::SpecialJump(SpecialOp::CheckInput(br.ext_input), high_row),
            format!("{}, if high go to {}", comment, high_row),
        )?;
        if rows == 2 {
            let low_row = self.resolve(&JumpTarget::of(&br.low, enclosing)?)?;
            self.push(
                &br.id,
                &br.chans,
                &br.dac,
                time_ns,
                AddrWord::Jump(low_row),
                format!("{}, if low go to {}", comment, low_row),
            )?;
        }
        Ok(())
    }
}

/// Split a counter step between the load word and the loop body so the body
/// divides the remaining time evenly: bump the load dwell one timestep at a
/// time until `(time - load) / counter` splits across the body words.
fn balance(time_ns: u64, counter: u16, body_words: u64, step_ns: u64) -> Option<(u64, u64)> {
    let quantum = counter as u64 * step_ns * body_words;
    let mut load = step_ns;
    while load <= time_ns {
        let rem = time_ns - load;
        if rem % quantum == 0 {
            return Some((rem / (counter as u64 * body_words), load));
        }
        load += step_ns;
    }
    None
}
