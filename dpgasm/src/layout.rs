//! Row accounting and address assignment over the global edge sequence.

use indexmap::IndexMap;

use patgen::word::{TABLE_ROWS, TIME_SLOTS};

use crate::block::{Block, BranchBlock, Program, SeqBlock};
use crate::error::Error;
use crate::parser::Edge;

use crate::emit::LOOP_CHECK;

#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutInfo {
    pub num_rows: u16,
    pub first_row: Option<u16>,
    pub last_row: Option<u16>,
}

#[derive(Debug, Default)]
pub struct Layout {
    rows: IndexMap<String, LayoutInfo>,
    pub warnings: Vec<String>,
}

impl Layout {
    /// Count rows for every block, then walk the edges assigning addresses.
    pub fn resolve(prog: &Program) -> Result<Layout, Error> {
        let mut layout = Layout::default();
        for (id, block) in &prog.blocks {
            let num = layout.count_rows(prog, block)?;
            if num > TABLE_ROWS as u64 {
                return Err(Error::TableOverflow(num, TABLE_ROWS));
            }
            layout.rows.insert(
                id.clone(),
                LayoutInfo { num_rows: num as u16, first_row: None, last_row: None },
            );
        }
        layout.assign(prog)?;
        Ok(layout)
    }

    pub fn info(&self, id: &str) -> Result<&LayoutInfo, Error> {
        self.rows
            .get(id)
            .ok_or_else(|| Error::UnresolvedBlock(id.to_string()))
    }

    pub fn first_row(&self, id: &str) -> Result<u16, Error> {
        self.info(id)?
            .first_row
            .ok_or_else(|| Error::UnresolvedBlock(id.to_string()))
    }

    pub fn last_row(&self, id: &str) -> Result<u16, Error> {
        self.info(id)?
            .last_row
            .ok_or_else(|| Error::UnresolvedBlock(id.to_string()))
    }

    fn count_rows(&mut self, prog: &Program, block: &Block) -> Result<u64, Error> {
        match block {
            Block::Seq(seq) => Ok(self.count_seq(prog, seq)),
            Block::Trigger(_) => Ok(5),
            Block::Loop(_) => Ok(4),
            Block::Branch(br) => Ok(branch_rows(br, &prog.edges)),
            Block::Control(c) => Err(Error::UnresolvedBlock(c.id.clone())),
        }
    }

    fn count_seq(&mut self, prog: &Program, seq: &SeqBlock) -> u64 {
        let max_step = prog.control.timestep_ns * TIME_SLOTS;
        let last = seq.steps.len().saturating_sub(1);
        let mut rows = 0u64;
        for (j, step) in seq.steps.iter().enumerate() {
            let counter = step
                .use_ivar
                .map(|i| prog.control.ivars[i as usize])
                .unwrap_or(0);
            if counter > 0 {
                rows += 1 + seq_body_words(step.time_ns, max_step, counter);
                if j == last {
                    // explicit exit jump after the counter loop
                    rows += 1;
                }
            } else {
                let words = ceil_div(step.time_ns, max_step).max(1);
                if words > 4 {
                    self.warnings.push(format!(
                        "Sequence step in `{}` uses {} rows. Consider counter-based timing.",
                        seq.id, words
                    ));
                }
                rows += words;
            }
        }
        rows
    }

    /// One walk over the global edges. Unplaced blocks land at the cursor;
    /// loops reserve two rows on each side of their nested body.
    fn assign(&mut self, prog: &Program) -> Result<(), Error> {
        let mut cursor: u16 = 0;
        for edge in &prog.edges {
            self.place(prog, &edge.from, &mut cursor)?;
            self.place(prog, &edge.to, &mut cursor)?;
        }
        Ok(())
    }

    fn place(&mut self, prog: &Program, id: &str, cursor: &mut u16) -> Result<(), Error> {
        let block = prog.get(id)?;
        if self.info(id)?.first_row.is_some() {
            return Ok(());
        }
        let first = *cursor;
        match block {
            Block::Loop(lp) => {
                // claim the slot before walking the body, so self-references
                // inside the loop cannot place it twice
                self.rows[id].first_row = Some(first);
                *cursor += 2; // load, decrement
                for edge in &lp.inner {
                    if edge.from != LOOP_CHECK {
                        self.place(prog, &edge.from, cursor)?;
                    }
                    if edge.to != LOOP_CHECK {
                        self.place(prog, &edge.to, cursor)?;
                    }
                }
                *cursor += 2; // check, exit
                let info = &mut self.rows[id];
                info.last_row = Some(*cursor - 1);
                info.num_rows = *cursor - first;
            }
            _ => {
                let info = &mut self.rows[id];
                info.first_row = Some(first);
                *cursor += info.num_rows;
                info.last_row = Some(*cursor - 1);
            }
        }
        if *cursor > TABLE_ROWS {
            return Err(Error::TableOverflow(*cursor as u64, TABLE_ROWS));
        }
        Ok(())
    }
}

/// Words of the loop body of a counter-timed step: decrement and check, plus
/// extra timing words for spans one pass cannot cover.
pub(crate) fn seq_body_words(time_ns: u64, max_step: u64, counter: u16) -> u64 {
    let per_pass = max_step * counter as u64;
    if time_ns <= per_pass * 2 {
        2
    } else {
        2 + ceil_div(time_ns, per_pass)
    }
}

pub(crate) fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

/// A branch falls through to its `low` target when that target is the source
/// of the edge right after the branch's own (first) edge.
fn branch_rows(br: &BranchBlock, edges: &[Edge]) -> u64 {
    for (i, edge) in edges.iter().enumerate() {
        if edge.from == br.id {
            if let Some(next) = edges.get(i + 1) {
                if next.from == br.low {
                    return 1;
                }
            }
            break;
        }
    }
    2
}
