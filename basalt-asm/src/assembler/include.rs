use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::{is_kind, is_word};
use crate::error::AsmError;
use crate::lexer::{self, Token, TokenKind};

/// Splices `.include "path"` directives with the tokens of the named file,
/// recursively. `dir` resolves relative paths; `stack` holds the files
/// currently being expanded.
pub(super) fn expand(
    tokens: &[Token],
    dir: &Path,
    stack: &mut Vec<PathBuf>,
) -> Result<Vec<Token>, AsmError> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut pos = 0;

    while pos < tokens.len() {
        let Some(file) = include_directive(tokens, pos) else {
            out.push(tokens[pos].clone());
            pos += 1;
            continue;
        };

        let span = tokens[pos].span();
        let path = dir.join(&file.literal);
        let include_error = |source| AsmError::Include {
            path: path.clone(),
            span,
            source,
        };

        let canonical = fs::canonicalize(&path).map_err(include_error)?;
        if stack.contains(&canonical) {
            return Err(AsmError::IncludeCycle {
                path: path.clone(),
                span,
            });
        }
        let src = fs::read_to_string(&canonical).map_err(include_error)?;
        let included = lexer::lex(&src)?;
        trace!(path = %canonical.display(), tokens = included.len(), "including file");

        let parent = canonical.parent().unwrap_or(dir).to_path_buf();
        stack.push(canonical);
        out.extend(expand(&included, &parent, stack)?);
        stack.pop();

        pos += 3;
    }

    Ok(out)
}

fn include_directive(tokens: &[Token], pos: usize) -> Option<&Token> {
    if !is_kind(tokens.get(pos), TokenKind::Dot) || !is_word(tokens.get(pos + 1), "include") {
        return None;
    }
    tokens.get(pos + 2).filter(|t| t.kind == TokenKind::String)
}
