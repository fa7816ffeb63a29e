use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process;

use basalt_vm::{ImageError, Machine, Program, VmConfig};
use clap::Parser;
use colorize::AnsiColor;
use tracing::Level;

const EXIT_NOT_FOUND: i32 = -2;
const EXIT_FAILED: i32 = -3;

#[derive(Parser)]
#[command(name = "bvm")]
#[command(about = "Basalt virtual machine")]
struct Args {
    /// Program image produced by `bas`
    binary: PathBuf,

    /// Bytes reserved for the stack after data and bss
    #[arg(long, default_value_t = basalt_vm::config::DEFAULT_STACK_SIZE)]
    stack_size: u64,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::WARN)]
    log_level: Level,
}

fn fail(code: i32, message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "error:".red(), message);
    process::exit(code);
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    let mut file = match File::open(&args.binary) {
        Ok(file) => file,
        Err(e) => fail(
            EXIT_NOT_FOUND,
            format!("cannot open {}: {e}", args.binary.display()),
        ),
    };

    let program = match Program::read_from(&mut file) {
        Ok(program) => program,
        Err(ImageError::Io(e)) => fail(EXIT_NOT_FOUND, e),
        Err(e) => fail(EXIT_FAILED, e),
    };

    let config = VmConfig::default().with_stack_size(args.stack_size);
    let mut vm = match Machine::new(&program, &config) {
        Ok(vm) => vm,
        Err(e) => fail(EXIT_FAILED, e),
    };

    let outcome = vm.run();
    if outcome.is_err() {
        tracing::debug!("machine state:\n{}", vm.dump_ctx());
    }
    // restores the terminal before exiting
    drop(vm);

    match outcome {
        Ok(result) => process::exit(result as i32),
        Err(e) => fail(EXIT_FAILED, e),
    }
}
