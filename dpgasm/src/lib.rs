pub mod block;
pub mod emit;
pub mod error;
pub mod field;
pub mod layout;
pub mod msg;
pub mod output;
pub mod parser;

pub use error::Error;
pub use output::Options;

/// Compiled artifact: the output text plus any non-fatal diagnostics.
#[derive(Debug)]
pub struct Artifact {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Single-shot translation of a flowchart source into the pattern text.
pub fn compile(source: &str, origin: &str, opts: &Options) -> Result<Artifact, Error> {
    let flow = parser::Flowchart::parse(source)?;
    let prog = block::Program::build(flow)?;
    let layout = layout::Layout::resolve(&prog)?;
    let (items, emit_warnings) = emit::Emitter::emit(&prog, &layout, opts.verbose)?;
    let text = output::assemble(&prog, &items, origin, opts);
    let mut warnings = layout.warnings;
    warnings.extend(emit_warnings);
    Ok(Artifact { text, warnings })
}
