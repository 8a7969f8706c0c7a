use color_print::{cformat, cprintln};

use dpgasm::block::Program;
use dpgasm::emit::Emitter;
use dpgasm::layout::Layout;
use dpgasm::msg::Msg;
use dpgasm::output::{self, Options};
use dpgasm::parser::Flowchart;

const HELP_TEMPLATE: &str = "\
{before-help}{bin} {version}
  {about}

{usage-heading}
{tab}{usage}

{all-args}{after-help}";

#[derive(Debug, clap::Parser)]
#[clap(version, about, help_template = HELP_TEMPLATE)]
struct Args {
    /// Input pattern flowchart
    #[clap(default_value = "main.flow")]
    input: String,

    /// Output pattern file
    #[clap(short, long, default_value = "main.dpatt")]
    output: String,

    /// Write 16 bit words in hexadecimal, except the time word
    #[clap(short = 'H', long)]
    hex: bool,

    /// Keep extended comments in the output pattern
    #[clap(short, long)]
    verbose: bool,

    /// Dump the block layout table
    #[clap(short, long)]
    dump: bool,
}

fn main() {
    use clap::Parser;

    let args = Args::parse();
    println!("DPG pattern compiler");

    println!("1. Parse Flowchart");
    println!("  < {}", args.input);
    let source = std::fs::read_to_string(&args.input)
        .expect(&cformat!("<r,s>Failed to open file</>: {}", args.input));
    let flow = match Flowchart::parse(&source) {
        Ok(flow) => flow,
        Err(err) => {
            let line = match &err {
                dpgasm::Error::UnterminatedBlock(_, line)
                | dpgasm::Error::UnterminatedLoop(_, line)
                | dpgasm::Error::MalformedEdge(line, _) => Some(*line),
                _ => None,
            };
            let Some(line) = line else { fail(err) };
            let raw = source.lines().nth(line - 1).unwrap_or("");
            Msg::Error(err.to_string()).diag(&args.input, line, raw);
            std::process::exit(1);
        }
    };

    println!("2. Build Blocks");
    let prog = match Program::build(flow) {
        Ok(prog) => prog,
        Err(err) => fail(err),
    };

    println!("3. Resolve Layout");
    let layout = match Layout::resolve(&prog) {
        Ok(layout) => layout,
        Err(err) => fail(err),
    };
    for warning in &layout.warnings {
        Msg::Warn(warning.clone()).print();
    }

    println!("4. Emit Pattern");
    let (items, warnings) = match Emitter::emit(&prog, &layout, args.verbose) {
        Ok(emitted) => emitted,
        Err(err) => fail(err),
    };
    for warning in &warnings {
        Msg::Warn(warning.clone()).print();
    }

    if args.dump {
        dump(&prog, &layout);
    }

    println!("5. Write Output");
    println!("  > {}", args.output);
    let opts = Options { hex: args.hex, verbose: args.verbose };
    let text = output::assemble(&prog, &items, &args.input, &opts);
    std::fs::write(&args.output, text)
        .expect(&cformat!("<r,s>Failed to write file</>: {}", args.output));
}

fn fail(err: dpgasm::Error) -> ! {
    Msg::Error(err.to_string()).print();
    std::process::exit(1);
}

fn dump(prog: &Program, layout: &Layout) {
    println!("------------+----------+------+-------------");
    for (id, block) in &prog.blocks {
        let Ok(info) = layout.info(id) else { continue };
        let rows = match (info.first_row, info.last_row) {
            (Some(first), Some(last)) => format!("{:>3} - {:<3}", first, last),
            _ => "unplaced".to_string(),
        };
        cprintln!(
            "<g>{:>11}</> | <b>{:<8}</> | {:>4} | {}",
            id,
            format!("{:?}", block.kind()),
            info.num_rows,
            rows
        );
    }
    println!("------------+----------+------+-------------");
}
