pub mod assembler;
pub mod error;
pub mod lexer;
pub mod symbols;

pub use assembler::Assembler;
pub use error::{AsmError, LexError, Span};
