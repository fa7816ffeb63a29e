use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use basalt_asm::Assembler;
use basalt_vm::disasm::dump_program;
use basalt_vm::{ImageError, Program};
use clap::Parser;
use colorize::AnsiColor;
use tracing::{Level, info};

const EXIT_NO_INPUT: i32 = -1;
const EXIT_NOT_FOUND: i32 = -2;
const EXIT_FAILED: i32 = -3;

#[derive(Parser)]
#[command(name = "bas")]
#[command(about = "Basalt bytecode assembler")]
struct Args {
    /// Assembly source, or a program image with `--disassemble`
    input: Option<PathBuf>,

    /// Output image path, defaults to the input with a `bbin` extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write a disassembly dump next to the output
    #[arg(short = 'S', long)]
    dump: bool,

    /// Print the disassembly of a program image instead of assembling
    #[arg(short, long)]
    disassemble: bool,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::WARN)]
    log_level: Level,
}

fn fail(code: i32, message: impl Display) -> ! {
    eprintln!("{} {}", "error:".red(), message);
    process::exit(code);
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    let Some(input) = args.input.clone() else {
        fail(EXIT_NO_INPUT, "no input file");
    };
    if !input.exists() {
        fail(
            EXIT_NOT_FOUND,
            format!("{} does not exist", input.display()),
        );
    }

    if args.disassemble {
        match Program::load(&input) {
            Ok(program) => print!("{}", dump_program(&program)),
            Err(e) => fail(EXIT_FAILED, e),
        }
        return;
    }

    let mut assembler = Assembler::new(input.parent().unwrap_or(Path::new(".")));
    let program = match assembler.assemble_file(&input) {
        Ok(program) => program,
        Err(e) => fail(EXIT_FAILED, e),
    };

    let output = args
        .output
        .unwrap_or_else(|| input.with_extension("bbin"));

    if let Err(e) = write_outputs(&program, &output, args.dump) {
        fail(EXIT_FAILED, e);
    }
}

fn write_outputs(program: &Program, output: &Path, dump: bool) -> Result<(), ImageError> {
    program.save(output)?;
    info!(
        path = %output.display(),
        instructions = program.code.len(),
        data = program.data.len(),
        bss = program.bss_size,
        "wrote program image"
    );

    if dump {
        let mut path = output.as_os_str().to_owned();
        path.push(".dis");
        std::fs::write(&path, dump_program(program))?;
        info!(path = ?path, "wrote disassembly");
    }

    Ok(())
}
