use std::io;

use thiserror::Error;

use crate::isa::DecodeError;

/// Failure while reading or writing a program image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unknown chunk tag {tag:#04x} at offset {offset}")]
    UnknownChunk { tag: u8, offset: usize },

    #[error("truncated {chunk} chunk: expected {expected} bytes, found {found}")]
    Truncated {
        chunk: &'static str,
        expected: u64,
        found: usize,
    },

    #[error("code chunk of {0} bytes is not a whole number of instructions")]
    MisalignedCode(u64),

    #[error("bad instruction {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Runtime fault raised by the machine.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("memory access of {len} bytes at {addr:#x} is out of bounds")]
    OutOfBounds { addr: u64, len: u64 },

    #[error("invalid foreign pointer {0:#x}")]
    ForeignPointer(u64),

    #[error("stack overflow at instruction {0}")]
    StackOverflow(usize),

    #[error("division by zero at instruction {0}")]
    DivisionByZero(usize),

    #[error("program counter {0} is outside the code section")]
    PcOutOfRange(usize),

    #[error("unterminated string at {0:#x}")]
    UnterminatedString(u64),

    #[error("instruction {pc} ({opcode}) is malformed: {reason}")]
    Malformed {
        pc: usize,
        opcode: &'static str,
        reason: &'static str,
    },

    #[error("cannot reserve memory for {data} data, {bss} bss and {stack} stack bytes")]
    ArenaTooLarge { data: u64, bss: u64, stack: u64 },

    #[error("system calls are not supported on this platform")]
    UnsupportedSyscall,

    #[error("guest i/o failed: {0}")]
    Io(#[from] io::Error),
}
