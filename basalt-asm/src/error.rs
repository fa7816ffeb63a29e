use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::lexer::Token;

/// Source position of a token, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl From<&Token> for Span {
    fn from(token: &Token) -> Self {
        Span {
            line: token.line,
            column: token.column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line ({}, {})", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("error @ {span}: unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("error @ {span}: malformed number `{literal}`")]
    MalformedNumber { literal: String, span: Span },

    #[error("error @ {span}: unexpected character `{ch}`")]
    UnexpectedChar { ch: char, span: Span },
}

#[derive(Debug, Error)]
pub enum AsmError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("error @ {span}: cannot include `{}`: {source}", .path.display())]
    Include {
        path: PathBuf,
        span: Span,
        #[source]
        source: io::Error,
    },

    #[error("error @ {span}: `{}` includes itself", .path.display())]
    IncludeCycle { path: PathBuf, span: Span },

    #[error("error @ {span}: unknown section `{name}`")]
    UnknownSection { name: String, span: Span },

    #[error("error @ {span}: section `{name}` must come before `{current}`")]
    SectionOrder {
        name: String,
        current: String,
        span: Span,
    },

    #[error("error @ {span}: `{found}` is outside of any section")]
    OutsideSection { found: String, span: Span },

    #[error("error @ {span}: unknown directive `{name}`")]
    UnknownDirective { name: String, span: Span },

    #[error("error @ {span}: unknown instruction `{name}`")]
    UnknownInstruction { name: String, span: Span },

    #[error("error @ {span}: unknown register `%{name}`")]
    UnknownRegister { name: String, span: Span },

    #[error("error @ {span}: attempted to redefine `{name}`")]
    Redefinition { name: String, span: Span },

    #[error("error @ {span}: label `@{name}` is already defined")]
    LabelRedefinition { name: String, span: Span },

    #[error("error @ {span}: local label `.{name}` is already defined under `@{parent}`")]
    LocalLabelRedefinition {
        name: String,
        parent: String,
        span: Span,
    },

    #[error("error @ {span}: local label `.{name}` has no enclosing global label")]
    OrphanLocalLabel { name: String, span: Span },

    #[error("error @ {span}: undefined symbol `{name}`")]
    UndefinedSymbol { name: String, span: Span },

    #[error("error @ {span}: undefined label `@{name}`")]
    UndefinedLabel { name: String, span: Span },

    #[error("error @ {span}: undefined local label `.{name}` under `@{parent}`")]
    UndefinedLocalLabel {
        name: String,
        parent: String,
        span: Span,
    },

    #[error("error @ {span}: `{mnemonic}` takes {encoding}, found {found} operand(s)")]
    Arity {
        mnemonic: String,
        found: usize,
        encoding: String,
        span: Span,
    },

    #[error("error @ {span}: operand {position} of `{mnemonic}` cannot be {found}; encoding is {encoding}")]
    OperandKind {
        mnemonic: String,
        position: usize,
        found: &'static str,
        encoding: String,
        span: Span,
    },

    #[error("error @ {span}: `{mnemonic}` accepts at most one memory operand")]
    MultipleMemoryOperands { mnemonic: String, span: Span },

    #[error("error @ {span}: `{name}` is not a byte string, as `{mnemonic}` requires")]
    NotAString {
        name: String,
        mnemonic: String,
        span: Span,
    },

    #[error("error @ {span}: string literals are only allowed in byte data")]
    WideString { span: Span },

    #[error("error @ {span}: `{name}` grows data and bss past {limit} bytes")]
    ImageTooLarge {
        name: String,
        limit: u64,
        span: Span,
    },

    #[error("error @ {span}: displacement {value} does not fit in 32 bits")]
    DisplacementRange { value: i64, span: Span },

    #[error("error @ {span}: expected {expected}, found `{found}`")]
    Expected {
        expected: &'static str,
        found: String,
        span: Span,
    },

    #[error("error: unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: &'static str },
}
