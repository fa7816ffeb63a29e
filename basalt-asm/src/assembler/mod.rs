//! Assembler for Basalt bytecode
//!
//! Two-pass assembler. Includes are spliced into the token stream first, the
//! label pass then binds every label to an instruction index, and the code
//! generation pass builds the data image, sizes the bss and emits one
//! instruction record per mnemonic.

use std::fs;
use std::path::{Path, PathBuf};

use basalt_vm::image::Program;
use basalt_vm::isa::Instruction;
use tracing::debug;

use crate::error::{AsmError, Span};
use crate::lexer::{self, Token, TokenKind};
use crate::symbols::{LabelTable, SymbolTable};

mod codegen;
mod data;
mod include;
mod labels;

#[derive(Debug)]
pub struct Assembler {
    root_path: PathBuf,

    pub symbols: SymbolTable,
    pub labels: LabelTable,

    data: Vec<u8>,
    bss_size: u64,
    code: Vec<Instruction>,
}

impl Assembler {
    /// `root_path` is the directory `.include` paths of the top-level source
    /// are resolved against.
    pub fn new(root_path: &Path) -> Self {
        Self {
            root_path: root_path.into(),
            symbols: SymbolTable::default(),
            labels: LabelTable::default(),
            data: Vec::new(),
            bss_size: 0,
            code: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.symbols.clear();
        self.labels.clear();
        self.data.clear();
        self.bss_size = 0;
        self.code.clear();
    }

    pub fn assemble(&mut self, tokens: &[Token]) -> Result<Program, AsmError> {
        self.assemble_tokens(tokens, Vec::new())
    }

    pub fn assemble_source(&mut self, src: &str) -> Result<Program, AsmError> {
        let tokens = lexer::lex(src)?;
        self.assemble(&tokens)
    }

    /// Assembles the file at `path`, resolving its includes relative to the
    /// directory that contains it.
    pub fn assemble_file(&mut self, path: &Path) -> Result<Program, AsmError> {
        let include_error = |source| AsmError::Include {
            path: path.to_path_buf(),
            span: Span::default(),
            source,
        };
        let canonical = fs::canonicalize(path).map_err(include_error)?;
        let src = fs::read_to_string(&canonical).map_err(include_error)?;
        if let Some(dir) = canonical.parent() {
            self.root_path = dir.to_path_buf();
        }

        let tokens = lexer::lex(&src)?;
        self.assemble_tokens(&tokens, vec![canonical])
    }

    fn assemble_tokens(
        &mut self,
        tokens: &[Token],
        mut include_stack: Vec<PathBuf>,
    ) -> Result<Program, AsmError> {
        self.reset();

        let tokens = include::expand(tokens, &self.root_path, &mut include_stack)?;

        debug!(tokens = tokens.len(), "performing first pass");
        self.resolve_label_pass(&tokens)?;
        debug!(labels = self.labels.len(), "resolved labels");

        debug!("performing second pass");
        codegen::CodeGen::new(self, &tokens).run()?;
        debug!(
            data = self.data.len(),
            bss = self.bss_size,
            instructions = self.code.len(),
            symbols = self.symbols.len(),
            "assembled"
        );

        Ok(Program {
            data: self.data.clone(),
            bss_size: self.bss_size,
            code: self.code.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Section {
    Data,
    Bss,
    Code,
}

impl Section {
    fn from_name(name: &str) -> Option<Section> {
        match name.to_ascii_lowercase().as_str() {
            "data" => Some(Section::Data),
            "bss" => Some(Section::Bss),
            "code" => Some(Section::Code),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Section::Data => "data",
            Section::Bss => "bss",
            Section::Code => "code",
        }
    }
}

fn is_word(token: Option<&Token>, word: &str) -> bool {
    token.is_some_and(|t| {
        matches!(t.kind, TokenKind::Instruction | TokenKind::Identifier)
            && t.literal.eq_ignore_ascii_case(word)
    })
}

fn is_kind(token: Option<&Token>, kind: TokenKind) -> bool {
    token.is_some_and(|t| t.kind == kind)
}

/// Matches `section NAME:` or `.section NAME:` at `pos`, returning the name
/// token and the number of tokens in the header.
pub(crate) fn section_header(tokens: &[Token], pos: usize) -> Option<(&Token, usize)> {
    let start = if is_kind(tokens.get(pos), TokenKind::Dot) {
        pos + 1
    } else {
        pos
    };

    if !is_word(tokens.get(start), "section") {
        return None;
    }
    let name = tokens.get(start + 1)?;
    if name.kind != TokenKind::Identifier || !is_kind(tokens.get(start + 2), TokenKind::Colon) {
        return None;
    }
    Some((name, start + 3 - pos))
}

/// Matches a label definition, `@name:` or `.name:`, at `pos`.
pub(crate) fn label_definition(tokens: &[Token], pos: usize) -> Option<&Token> {
    let name = tokens.get(pos + 1)?;
    if name.kind == TokenKind::Identifier && is_kind(tokens.get(pos + 2), TokenKind::Colon) {
        Some(name)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_headers() {
        let tokens = lexer::lex("section data:\n.section CODE:\nsection\n").unwrap();
        let (name, len) = section_header(&tokens, 0).unwrap();
        assert_eq!((name.literal.as_str(), len), ("data", 3));
        let (name, len) = section_header(&tokens, 3).unwrap();
        assert_eq!((name.literal.as_str(), len), ("CODE", 4));
        assert!(section_header(&tokens, 7).is_none());
    }

    #[test]
    fn sections_are_ordered() {
        assert!(Section::Data < Section::Bss && Section::Bss < Section::Code);
        assert_eq!(Section::from_name("Bss"), Some(Section::Bss));
        assert_eq!(Section::from_name("text"), None);
    }
}
