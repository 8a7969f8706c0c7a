//! Typed blocks: one variant per block kind, each owning the parser for its
//! own body grammar.

use indexmap::IndexMap;

use patgen::config::{AuxSelect, ClockSelect, DacMode, Polarity};
use patgen::units;
use patgen::word::TABLE_ROWS;

use crate::error::Error;
use crate::field::{self, ChanSet, DacUpdates};
use crate::parser::{Edge, Flowchart, SourceBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Control,
    Seq,
    Trigger,
    Loop,
    Branch,
}

impl BlockKind {
    /// Resolve a block id by its case-insensitive leading prefix.
    pub fn from_id(id: &str) -> Result<Self, Error> {
        let id_lc = id.to_ascii_lowercase();
        if id_lc.starts_with("control") {
            Ok(BlockKind::Control)
        } else if id_lc.starts_with("seq") {
            Ok(BlockKind::Seq)
        } else if id_lc.starts_with("trigger") {
            Ok(BlockKind::Trigger)
        } else if id_lc.starts_with("loop") {
            Ok(BlockKind::Loop)
        } else if id_lc.starts_with("branch") {
            Ok(BlockKind::Branch)
        } else {
            Err(Error::UnknownBlockType(id.to_string()))
        }
    }
}

#[derive(Debug, Clone)]
pub enum Block {
    Control(ControlBlock),
    Seq(SeqBlock),
    Trigger(TriggerBlock),
    Loop(LoopBlock),
    Branch(BranchBlock),
}

impl Block {
    pub fn parse(id: &str, src: &SourceBlock, inner: Vec<Edge>) -> Result<Block, Error> {
        match BlockKind::from_id(id)? {
            BlockKind::Control => Ok(Block::Control(ControlBlock::parse(id, &src.body)?)),
            BlockKind::Seq => Ok(Block::Seq(SeqBlock::parse(id, &src.body)?)),
            BlockKind::Trigger => Ok(Block::Trigger(TriggerBlock::parse(id, &src.body)?)),
            BlockKind::Loop => Ok(Block::Loop(LoopBlock::parse(id, &src.body, inner)?)),
            BlockKind::Branch => Ok(Block::Branch(BranchBlock::parse(id, &src.body)?)),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Block::Control(b) => &b.id,
            Block::Seq(b) => &b.id,
            Block::Trigger(b) => &b.id,
            Block::Loop(b) => &b.id,
            Block::Branch(b) => &b.id,
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Control(_) => BlockKind::Control,
            Block::Seq(_) => BlockKind::Seq,
            Block::Trigger(_) => BlockKind::Trigger,
            Block::Loop(_) => BlockKind::Loop,
            Block::Branch(_) => BlockKind::Branch,
        }
    }
}

// ----------------------------------------------------------------------------
// Control

#[derive(Debug, Clone)]
pub struct ControlBlock {
    pub id: String,
    pub clock_hz: u64,
    pub timestep_ns: u64,
    pub clock_select: ClockSelect,
    pub ivars: [u16; 4],
    pub evars: [u16; 4],
    pub aux_polarity: Polarity,
    pub aux_select: AuxSelect,
    pub input_level: Polarity,
    pub dac_mode: DacMode,
    pub start_address: u16,
    pub wide: bool,
    pub dacs: [u16; 8],
    pub input_threshold: u16,
}

impl ControlBlock {
    pub fn parse(id: &str, body: &str) -> Result<Self, Error> {
        let mut block = ControlBlock {
            id: id.to_string(),
            clock_hz: 100_000_000,
            timestep_ns: 10,
            clock_select: ClockSelect::Auto,
            ivars: [0; 4],
            evars: [0; 4],
            aux_polarity: Polarity::Nim,
            aux_select: AuxSelect::Normal,
            input_level: Polarity::Nim,
            dac_mode: DacMode::Static,
            start_address: 0,
            wide: false,
            dacs: [0; 8],
            input_threshold: 59000,
        };
        for line in body.lines() {
            let (cols, _) = field::cols(line);
            let Some((key, rest)) = cols.split_first() else {
                continue;
            };
            match key.as_str() {
                "clock" => block.set_clock(rest)?,
                "evars" => block.evars = parse_vars(id, rest)?,
                "ivars" => block.ivars = parse_vars(id, rest)?,
                "auxout" => block.aux_polarity = polarity(id, rest)?,
                "dacconfig" => {
                    block.dac_mode = keyword(id, rest, "DAC config")?;
                }
                "version" => block.set_version(rest)?,
                "inlevel" => block.input_level = polarity(id, rest)?,
                "auxconfig" => {
                    block.aux_select = keyword(id, rest, "auxline select")?;
                }
                "startaddress" => block.set_start_address(rest)?,
                "dacstatic" => block.set_static_dacs(rest)?,
                _ => return Err(Error::UnknownKeyword(id.to_string(), key.clone())),
            }
        }
        Ok(block)
    }

    fn set_clock(&mut self, cols: &[String]) -> Result<(), Error> {
        let cols = field::merge_unit_tokens(cols.to_vec());
        let freq = cols
            .first()
            .ok_or(Error::MissingField(self.id.clone(), "clock frequency"))?;
        self.clock_hz =
            units::parse_freq(freq).map_err(|e| Error::Field(self.id.clone(), e.to_string()))?;
        if self.clock_hz > 100_000_000 {
            return Err(Error::Field(
                self.id.clone(),
                format!("clock frequency {} Hz too large (max 100 MHz)", self.clock_hz),
            ));
        }
        self.timestep_ns = 1_000_000_000 / self.clock_hz;
        self.clock_select = match cols.get(1) {
            Some(sel) => sel.parse().map_err(|_| {
                Error::Field(self.id.clone(), format!("undefined clock select `{sel}`"))
            })?,
            None => ClockSelect::Auto,
        };
        if self.clock_select != ClockSelect::Direct && self.clock_hz != 100_000_000 {
            return Err(Error::Field(
                self.id.clone(),
                "clock select and clock frequency don't agree for non-direct modes".into(),
            ));
        }
        Ok(())
    }

    fn set_version(&mut self, cols: &[String]) -> Result<(), Error> {
        match cols.first().map(String::as_str) {
            Some("128bit") => self.wide = true,
            Some("64bit") => self.wide = false,
            other => {
                return Err(Error::Field(
                    self.id.clone(),
                    format!("invalid hardware version `{}`", other.unwrap_or("")),
                ))
            }
        }
        Ok(())
    }

    fn set_start_address(&mut self, cols: &[String]) -> Result<(), Error> {
        let col = cols
            .first()
            .ok_or(Error::MissingField(self.id.clone(), "start address"))?;
        let addr: u32 = col
            .parse()
            .map_err(|_| Error::Field(self.id.clone(), format!("cannot parse address `{col}`")))?;
        if addr >= TABLE_ROWS as u32 {
            return Err(Error::Field(
                self.id.clone(),
                format!("start address {addr} out of range (must be < {TABLE_ROWS})"),
            ));
        }
        self.start_address = addr as u16;
        Ok(())
    }

    fn set_static_dacs(&mut self, cols: &[String]) -> Result<(), Error> {
        let updates =
            field::parse_dac_updates(cols).map_err(|e| Error::Field(self.id.clone(), e))?;
        for (ch, val) in updates {
            if ch > 7 {
                return Err(Error::Field(
                    self.id.clone(),
                    format!("static DAC channel {ch} out of range (0-7)"),
                ));
            }
            self.dacs[ch as usize] = val;
        }
        Ok(())
    }
}

fn parse_vars(id: &str, cols: &[String]) -> Result<[u16; 4], Error> {
    if cols.len() > 4 {
        return Err(Error::Field(id.to_string(), "too many variables (max 4)".into()));
    }
    let mut vars = [0u16; 4];
    for (i, col) in cols.iter().enumerate() {
        let val: u32 = col
            .parse()
            .map_err(|_| Error::Field(id.to_string(), format!("cannot parse variable `{col}`")))?;
        if val >= 65536 {
            return Err(Error::Field(
                id.to_string(),
                format!("variable value {val} overflows (must be < 65536)"),
            ));
        }
        vars[i] = val as u16;
    }
    Ok(vars)
}

fn polarity(id: &str, cols: &[String]) -> Result<Polarity, Error> {
    let col = cols
        .first()
        .ok_or(Error::MissingField(id.to_string(), "polarity"))?;
    Polarity::parse(col).map_err(|e| Error::Field(id.to_string(), e.to_string()))
}

fn keyword<T: std::str::FromStr>(id: &str, cols: &[String], what: &str) -> Result<T, Error> {
    let col = cols
        .first()
        .ok_or(Error::Field(id.to_string(), format!("missing {what}")))?;
    col.parse()
        .map_err(|_| Error::Field(id.to_string(), format!("undefined {what} `{col}`")))
}

// ----------------------------------------------------------------------------
// Sequence

#[derive(Debug, Clone)]
pub struct Step {
    pub time_ns: u64,
    pub chans: ChanSet,
    pub use_ivar: Option<u8>,
    pub dac: DacUpdates,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct SeqBlock {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
}

impl SeqBlock {
    pub fn parse(id: &str, body: &str) -> Result<Self, Error> {
        let mut name = String::new();
        let mut steps = Vec::new();
        for (i, line) in body.lines().enumerate() {
            if i == 0 && field::is_comment(line) {
                name = line.trim_start().trim_start_matches('#').trim().to_string();
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            steps.push(Step::parse(id, line)?);
        }
        if steps.is_empty() {
            return Err(Error::MissingField(id.to_string(), "sequence steps"));
        }
        Ok(SeqBlock { id: id.to_string(), name, steps })
    }
}

impl Step {
    fn parse(block_id: &str, line: &str) -> Result<Step, Error> {
        let (mut cols, comment) = field::cols(line);
        let time_ns =
            field::parse_duration(&mut cols).map_err(|e| Error::Field(block_id.to_string(), e))?;
        let use_ivar = take_ivar(block_id, &mut cols)?;
        let dac = take_dac(block_id, &mut cols)?;
        let chans = match cols.split_first() {
            Some((key, rest)) if key == "chan" => {
                field::parse_channels(rest).map_err(|e| Error::Field(block_id.to_string(), e))?
            }
            Some((key, _)) => {
                return Err(Error::UnknownKeyword(block_id.to_string(), key.clone()))
            }
            None => return Err(Error::MissingField(block_id.to_string(), "chan")),
        };
        Ok(Step {
            time_ns,
            chans,
            use_ivar,
            dac,
            comment: comment.unwrap_or_default(),
        })
    }
}

/// Take a `use_ivar <0-3>` pair out of the columns, if present.
fn take_ivar(block_id: &str, cols: &mut Vec<String>) -> Result<Option<u8>, Error> {
    let Some(pos) = cols.iter().position(|c| c == "use_ivar") else {
        return Ok(None);
    };
    let idx = cols
        .get(pos + 1)
        .ok_or(Error::MissingField(block_id.to_string(), "ivar index"))?;
    let idx: u8 = idx.parse().map_err(|_| {
        Error::Field(block_id.to_string(), format!("cannot parse ivar index `{idx}`"))
    })?;
    if idx > 3 {
        return Err(Error::Field(
            block_id.to_string(),
            format!("ivar index {idx} must be 0-3"),
        ));
    }
    cols.drain(pos..pos + 2);
    Ok(Some(idx))
}

/// Take a trailing `dac <updates>` section out of the columns, if present.
fn take_dac(block_id: &str, cols: &mut Vec<String>) -> Result<DacUpdates, Error> {
    let Some(pos) = cols.iter().position(|c| c == "dac") else {
        return Ok(DacUpdates::new());
    };
    let updates = field::parse_dac_updates(&cols[pos + 1..])
        .map_err(|e| Error::Field(block_id.to_string(), e))?;
    cols.truncate(pos);
    Ok(updates)
}

// ----------------------------------------------------------------------------
// Trigger

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerMode {
    /// Event rate threshold in Hz.
    Rate(u64),
    /// Event count within a time span.
    Count { count: u16, span_ns: u64 },
}

#[derive(Debug, Clone)]
pub struct TriggerBlock {
    pub id: String,
    pub name: String,
    pub ext_input: u8,
    pub mode: TriggerMode,
    pub chans: ChanSet,
    pub dac: DacUpdates,
    pub success: String,
    pub failure: String,
}

impl TriggerBlock {
    pub fn parse(id: &str, body: &str) -> Result<Self, Error> {
        let mut name = String::new();
        let mut ext_input = None;
        let mut mode: Option<TriggerMode> = None;
        let mut chans = ChanSet::new();
        let mut dac = DacUpdates::new();
        let mut success = None;
        let mut failure = None;

        for (i, line) in body.lines().enumerate() {
            if i == 0 && field::is_comment(line) {
                name = line.trim_start().trim_start_matches('#').trim().to_string();
                continue;
            }
            let (cols, _) = field::cols(line);
            let Some((key, rest)) = cols.split_first() else {
                continue;
            };
            match key.as_str() {
                "extinput" => {
                    let col = rest
                        .first()
                        .ok_or(Error::MissingField(id.to_string(), "extinput channel"))?;
                    ext_input = Some(
                        field::parse_ext_input(col)
                            .map_err(|e| Error::Field(id.to_string(), e))?,
                    );
                }
                "chan" => {
                    chans = field::parse_channels(rest)
                        .map_err(|e| Error::Field(id.to_string(), e))?;
                }
                "rate" => {
                    if mode.is_some() {
                        return Err(Error::TriggerModeConflict(id.to_string()));
                    }
                    let merged = field::merge_unit_tokens(rest.to_vec());
                    let col = merged
                        .first()
                        .ok_or(Error::MissingField(id.to_string(), "rate"))?;
                    let hz = units::parse_freq(col)
                        .map_err(|e| Error::Field(id.to_string(), e.to_string()))?;
                    mode = Some(TriggerMode::Rate(hz));
                }
                "count" => {
                    if mode.is_some() {
                        return Err(Error::TriggerModeConflict(id.to_string()));
                    }
                    mode = Some(parse_count(id, rest)?);
                }
                "success" => {
                    success = Some(
                        rest.first()
                            .ok_or(Error::MissingField(id.to_string(), "success target"))?
                            .clone(),
                    );
                }
                "failure" => {
                    failure = Some(
                        rest.first()
                            .ok_or(Error::MissingField(id.to_string(), "failure target"))?
                            .clone(),
                    );
                }
                "dac" => {
                    dac = field::parse_dac_updates(rest)
                        .map_err(|e| Error::Field(id.to_string(), e))?;
                }
                _ => return Err(Error::UnknownKeyword(id.to_string(), key.clone())),
            }
        }

        Ok(TriggerBlock {
            id: id.to_string(),
            name,
            ext_input: ext_input.ok_or(Error::MissingField(id.to_string(), "extinput"))?,
            mode: mode.ok_or(Error::MissingField(id.to_string(), "rate or count"))?,
            chans,
            dac,
            success: success.ok_or(Error::MissingField(id.to_string(), "success target"))?,
            failure: failure.ok_or(Error::MissingField(id.to_string(), "failure target"))?,
        })
    }
}

/// `count <n> in <span>`
fn parse_count(id: &str, cols: &[String]) -> Result<TriggerMode, Error> {
    let cols = field::merge_unit_tokens(cols.to_vec());
    let count = cols
        .first()
        .ok_or(Error::MissingField(id.to_string(), "count value"))?;
    let count: u16 = count.parse().map_err(|_| {
        Error::Field(id.to_string(), format!("count value `{count}` should be an integer"))
    })?;
    match cols.get(1).map(String::as_str) {
        Some("in") => {}
        _ => {
            return Err(Error::Field(
                id.to_string(),
                "keyword `in` missing for count definition".into(),
            ))
        }
    }
    let span = cols
        .get(2)
        .ok_or(Error::MissingField(id.to_string(), "count time span"))?;
    let span_ns =
        units::parse_time(span).map_err(|e| Error::Field(id.to_string(), e.to_string()))?;
    Ok(TriggerMode::Count { count, span_ns })
}

// ----------------------------------------------------------------------------
// Loop

#[derive(Debug, Clone)]
pub struct LoopBlock {
    pub id: String,
    pub name: String,
    pub counter_var: u8,
    pub counter_val: u16,
    pub chans: ChanSet,
    pub dac: DacUpdates,
    pub comment: String,
    /// Edge sequence of the loop body, scoped to this loop.
    pub inner: Vec<Edge>,
}

impl LoopBlock {
    pub fn parse(id: &str, body: &str, inner: Vec<Edge>) -> Result<Self, Error> {
        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        let mut name = String::new();
        let first = lines
            .next()
            .ok_or(Error::MissingField(id.to_string(), "loop counter setup"))?;
        let setup = if field::is_comment(first) {
            name = first.trim_start().trim_start_matches('#').trim().to_string();
            lines
                .next()
                .ok_or(Error::MissingField(id.to_string(), "loop counter setup"))?
        } else {
            first
        };

        let (mut cols, comment) = field::cols(setup);
        match cols.first().map(String::as_str) {
            Some("ivar") => {}
            _ => {
                return Err(Error::Field(
                    id.to_string(),
                    "expected `ivar` for loop setup".into(),
                ))
            }
        }
        let idx = cols
            .get(1)
            .ok_or(Error::MissingField(id.to_string(), "counter index"))?;
        let idx: u8 = idx.parse().map_err(|_| {
            Error::Field(id.to_string(), format!("cannot parse counter index `{idx}`"))
        })?;
        if idx > 3 {
            return Err(Error::Field(
                id.to_string(),
                format!("counter index {idx} must be 0-3"),
            ));
        }
        let val = cols
            .get(2)
            .ok_or(Error::MissingField(id.to_string(), "counter value"))?;
        let val: u32 = val.parse().map_err(|_| {
            Error::Field(id.to_string(), format!("cannot parse counter value `{val}`"))
        })?;
        if !(1..=65535).contains(&val) {
            return Err(Error::Field(
                id.to_string(),
                format!("counter value {val} out of bounds (1-65535)"),
            ));
        }

        cols.drain(0..3);
        let dac = take_dac(id, &mut cols)?;
        let chans = match cols.split_first() {
            Some((key, rest)) if key == "chan" => {
                field::parse_channels(rest).map_err(|e| Error::Field(id.to_string(), e))?
            }
            Some((key, _)) => return Err(Error::UnknownKeyword(id.to_string(), key.clone())),
            None => ChanSet::new(),
        };

        Ok(LoopBlock {
            id: id.to_string(),
            name,
            counter_var: idx,
            counter_val: val as u16,
            chans,
            dac,
            comment: comment.unwrap_or_default(),
            inner,
        })
    }
}

// ----------------------------------------------------------------------------
// Branch

#[derive(Debug, Clone)]
pub struct BranchBlock {
    pub id: String,
    pub name: String,
    pub ext_input: u8,
    pub high: String,
    pub low: String,
    pub chans: ChanSet,
    pub dac: DacUpdates,
    /// Dwell time of the check word; the hardware timestep when absent.
    pub idle_ns: Option<u64>,
}

impl BranchBlock {
    pub fn parse(id: &str, body: &str) -> Result<Self, Error> {
        let mut name = String::new();
        let mut ext_input = None;
        let mut high = None;
        let mut low = None;
        let mut chans = ChanSet::new();
        let mut dac = DacUpdates::new();
        let mut idle_ns = None;

        for (i, line) in body.lines().enumerate() {
            if i == 0 && field::is_comment(line) {
                name = line.trim_start().trim_start_matches('#').trim().to_string();
                continue;
            }
            let (mut cols, _) = field::cols(line);
            let Some(key) = cols.first().cloned() else {
                continue;
            };
            match key.as_str() {
                "extinput" => {
                    let col = cols
                        .get(1)
                        .ok_or(Error::MissingField(id.to_string(), "extinput channel"))?;
                    ext_input = Some(
                        field::parse_ext_input(col)
                            .map_err(|e| Error::Field(id.to_string(), e))?,
                    );
                }
                "high" => {
                    high = Some(
                        cols.get(1)
                            .ok_or(Error::MissingField(id.to_string(), "high target"))?
                            .clone(),
                    );
                }
                "low" => {
                    low = Some(
                        cols.get(1)
                            .ok_or(Error::MissingField(id.to_string(), "low target"))?
                            .clone(),
                    );
                }
                "chan" => {
                    chans = field::parse_channels(&cols[1..])
                        .map_err(|e| Error::Field(id.to_string(), e))?;
                }
                "dac" => {
                    dac = field::parse_dac_updates(&cols[1..])
                        .map_err(|e| Error::Field(id.to_string(), e))?;
                }
                _ => {
                    // a bare duration line sets the idle timestep
                    idle_ns = Some(
                        field::parse_duration(&mut cols)
                            .map_err(|e| Error::Field(id.to_string(), e))?,
                    );
                }
            }
        }

        Ok(BranchBlock {
            id: id.to_string(),
            name,
            ext_input: ext_input.ok_or(Error::MissingField(id.to_string(), "extinput"))?,
            high: high.ok_or(Error::MissingField(id.to_string(), "high target"))?,
            low: low.ok_or(Error::MissingField(id.to_string(), "low target"))?,
            chans,
            dac,
            idle_ns,
        })
    }
}

// ----------------------------------------------------------------------------
// Program

/// The typed program: the control block, every other block in source order,
/// and the global edge sequence.
#[derive(Debug)]
pub struct Program {
    pub control: ControlBlock,
    pub blocks: IndexMap<String, Block>,
    pub edges: Vec<Edge>,
}

impl Program {
    pub fn build(flow: Flowchart) -> Result<Program, Error> {
        let mut control: Option<ControlBlock> = None;
        let mut blocks = IndexMap::new();

        for (id, src) in &flow.blocks {
            let inner = flow.loop_edges.get(id).cloned().unwrap_or_default();
            match Block::parse(id, src, inner)? {
                Block::Control(c) => {
                    if let Some(prev) = &control {
                        return Err(Error::DuplicateControl(prev.id.clone(), c.id));
                    }
                    control = Some(c);
                }
                block => {
                    blocks.insert(id.clone(), block);
                }
            }
        }
        let control = control.ok_or(Error::MissingControl)?;

        // cross-check counters against the control block's preloads
        for block in blocks.values() {
            match block {
                Block::Loop(lp) => {
                    if control.ivars[lp.counter_var as usize] != lp.counter_val {
                        return Err(Error::CounterMismatch(lp.id.clone(), lp.counter_var));
                    }
                }
                Block::Trigger(t) => {
                    if let TriggerMode::Count { count, .. } = t.mode {
                        if control.evars[(t.ext_input - 1) as usize] != count {
                            return Err(Error::TriggerCountMismatch(t.id.clone(), t.ext_input));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Program { control, blocks, edges: flow.edges })
    }

    pub fn get(&self, id: &str) -> Result<&Block, Error> {
        self.blocks
            .get(id)
            .ok_or_else(|| Error::UnresolvedBlock(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Flowchart;

    fn block(id: &str, body: &str) -> Block {
        Block::parse(
            id,
            &SourceBlock { body: body.to_string(), line: 1 },
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn factory_prefixes() {
        assert_eq!(BlockKind::from_id("Control").unwrap(), BlockKind::Control);
        assert_eq!(BlockKind::from_id("seq12").unwrap(), BlockKind::Seq);
        assert_eq!(BlockKind::from_id("TRIGGER_a").unwrap(), BlockKind::Trigger);
        assert_eq!(BlockKind::from_id("loop1").unwrap(), BlockKind::Loop);
        assert_eq!(BlockKind::from_id("branch2").unwrap(), BlockKind::Branch);
        assert!(matches!(
            BlockKind::from_id("pulse1"),
            Err(Error::UnknownBlockType(_))
        ));
    }

    #[test]
    fn control_defaults_and_clock() {
        let Block::Control(ctrl) = block("control", "clock 100mhz auto\nivars 5") else {
            panic!("not a control block");
        };
        assert_eq!(ctrl.clock_hz, 100_000_000);
        assert_eq!(ctrl.timestep_ns, 10);
        assert_eq!(ctrl.clock_select, ClockSelect::Auto);
        assert_eq!(ctrl.ivars, [5, 0, 0, 0]);
        assert!(!ctrl.wide);
        assert_eq!(ctrl.input_threshold, 59000);
    }

    #[test]
    fn control_direct_clock() {
        let Block::Control(ctrl) = block("control", "clock 10 mhz direct") else {
            panic!();
        };
        assert_eq!(ctrl.clock_hz, 10_000_000);
        assert_eq!(ctrl.timestep_ns, 100);
        assert_eq!(ctrl.clock_select, ClockSelect::Direct);

        // a slow clock without direct select is inconsistent
        let err = ControlBlock::parse("control", "clock 10mhz auto").unwrap_err();
        assert!(matches!(err, Error::Field(_, _)));
    }

    #[test]
    fn control_wide_fields() {
        let Block::Control(ctrl) = block(
            "control",
            "version 128bit\ndacconfig half\ndacstatic 0:100 3:2500\nauxout ttl\ninlevel 1",
        ) else {
            panic!();
        };
        assert!(ctrl.wide);
        assert_eq!(ctrl.dac_mode, DacMode::Half);
        assert_eq!(ctrl.dacs[0], 100);
        assert_eq!(ctrl.dacs[3], 2500);
        assert_eq!(ctrl.aux_polarity, Polarity::Ttl);
        assert_eq!(ctrl.input_level, Polarity::Ttl);
    }

    #[test]
    fn seq_steps() {
        let Block::Seq(seq) = block(
            "seq1",
            "#pulses\n10ns chan 0 8 # fire\n1us use_ivar 1 chan\n20ns chan 2-4 dac 0:100",
        ) else {
            panic!();
        };
        assert_eq!(seq.name, "pulses");
        assert_eq!(seq.steps.len(), 3);
        assert_eq!(seq.steps[0].time_ns, 10);
        assert_eq!(seq.steps[0].chans.iter().copied().collect::<Vec<_>>(), vec![0, 8]);
        assert_eq!(seq.steps[0].comment, "fire");
        assert_eq!(seq.steps[1].use_ivar, Some(1));
        assert!(seq.steps[1].chans.is_empty());
        assert_eq!(seq.steps[2].dac[&0], 100);
    }

    #[test]
    fn trigger_modes() {
        let Block::Trigger(t) = block(
            "trigger1",
            "#wait\nextinput e2\nchan 0\ncount 10 in 1ms\nsuccess seq2\nfailure seq1",
        ) else {
            panic!();
        };
        assert_eq!(t.ext_input, 2);
        assert_eq!(t.mode, TriggerMode::Count { count: 10, span_ns: 1_000_000 });
        assert_eq!(t.success, "seq2");
        assert_eq!(t.failure, "seq1");

        let Block::Trigger(t) = block(
            "trigger2",
            "extinput e1\nrate 100 khz\nsuccess a\nfailure b",
        ) else {
            panic!();
        };
        assert_eq!(t.mode, TriggerMode::Rate(100_000));
    }

    #[test]
    fn trigger_mode_exclusivity() {
        let err = TriggerBlock::parse(
            "trigger1",
            "extinput e1\nrate 100khz\ncount 10 in 1ms\nsuccess a\nfailure b",
        )
        .unwrap_err();
        assert!(matches!(err, Error::TriggerModeConflict(_)));
    }

    #[test]
    fn loop_setup() {
        let lp = LoopBlock::parse("loop1", "#repeat\nivar 2 100 chan 0 5", vec![]).unwrap();
        assert_eq!(lp.name, "repeat");
        assert_eq!(lp.counter_var, 2);
        assert_eq!(lp.counter_val, 100);
        assert_eq!(lp.chans.iter().copied().collect::<Vec<_>>(), vec![0, 5]);

        assert!(LoopBlock::parse("loop1", "ivar 4 100", vec![]).is_err());
        assert!(LoopBlock::parse("loop1", "ivar 0 0", vec![]).is_err());
        assert!(LoopBlock::parse("loop1", "ivar 0 65536", vec![]).is_err());
    }

    #[test]
    fn branch_fields() {
        let br = BranchBlock::parse(
            "branch1",
            "#gate\nextinput e3\nhigh seq1\nlow seq2\nchan 7\n50ns",
        )
        .unwrap();
        assert_eq!(br.ext_input, 3);
        assert_eq!(br.high, "seq1");
        assert_eq!(br.low, "seq2");
        assert_eq!(br.idle_ns, Some(50));
    }

    #[test]
    fn program_requires_control() {
        let flow = Flowchart::parse("seq1[10ns chan 0]\nseq1 --> seq1\n").unwrap();
        assert!(matches!(Program::build(flow), Err(Error::MissingControl)));
    }

    #[test]
    fn program_counter_cross_checks() {
        let flow = Flowchart::parse(
            "control[ivars 5]\n\
             subgraph loop1[ivar 0 7]\nend\n",
        )
        .unwrap();
        assert!(matches!(
            Program::build(flow),
            Err(Error::CounterMismatch(id, 0)) if id == "loop1"
        ));

        let flow = Flowchart::parse(
            "control[evars 10]\n\
             trigger1[extinput e1\ncount 9 in 1ms\nsuccess a\nfailure b]\n",
        )
        .unwrap();
        assert!(matches!(
            Program::build(flow),
            Err(Error::TriggerCountMismatch(id, 1)) if id == "trigger1"
        ));
    }
}
