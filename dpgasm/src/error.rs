use patgen::config::DacMode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Syntax errors
    #[error("Unterminated block `{0}` opened on line {1}")]
    UnterminatedBlock(String, usize),

    #[error("Unterminated loop `{0}` opened on line {1}")]
    UnterminatedLoop(String, usize),

    #[error("Malformed edge on line {0}: `{1}`")]
    MalformedEdge(usize, String),

    // Block grammar errors
    #[error("Unrecognized block type for `{0}`")]
    UnknownBlockType(String),

    #[error("Block `{0}`: keyword `{1}` doesn't match syntax")]
    UnknownKeyword(String, String),

    #[error("Block `{0}`: missing {1}")]
    MissingField(String, &'static str),

    #[error("Block `{0}`: {1}")]
    Field(String, String),

    #[error("A control block is required")]
    MissingControl,

    #[error("Multiple control blocks: `{0}` and `{1}`")]
    DuplicateControl(String, String),

    #[error("Trigger `{0}`: use only rate or count, not both")]
    TriggerModeConflict(String),

    #[error("Trigger `{0}`: count doesn't match the control block's evar for input e{1}")]
    TriggerCountMismatch(String, u8),

    #[error("Trigger `{0}`: exit edge needs a |success| or |failure| label")]
    TriggerEdgeLabel(String),

    #[error("Trigger `{0}`: |{1}| edge disagrees with its success/failure targets")]
    TriggerTargetMismatch(String, String),

    #[error("Loop `{0}`: counter value doesn't match ivar {1} in the control block")]
    CounterMismatch(String, u8),

    #[error("`loop_check` target used outside a loop body")]
    LoopCheckOutsideLoop,

    // Layout and encoding errors
    #[error("Undefined block: `{0}`")]
    UnresolvedBlock(String),

    #[error("Pattern table overflow: {0} rows needed, table holds {1}")]
    TableOverflow(u64, u16),

    #[error("Block `{0}` emitted at row {1} but laid out at row {2}")]
    RowMismatch(String, u16, u16),

    #[error("Block `{0}`: DAC update on channel {1} rejected by dacconfig `{2}`")]
    DacRejected(String, u8, DacMode),

    #[error("Block `{0}`: DAC updates need the 128bit hardware version")]
    DacOnNarrow(String),

    #[error("Block `{0}`: DAC channels updated in one step must share one value")]
    DacValueMismatch(String),

    #[error("Block `{0}`: time balancing failed for a {1} ns counter step")]
    TimeBalance(String, u64),

    // File I/O
    #[error("Failed to open file: {0}")]
    FileOpen(String, #[source] std::io::Error),

    #[error("Failed to write file: {0}")]
    FileWrite(String, #[source] std::io::Error),
}
