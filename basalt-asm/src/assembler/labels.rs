use tracing::trace;

use super::{Assembler, Section, label_definition, section_header};
use crate::error::AsmError;
use crate::lexer::{Token, TokenKind};

impl Assembler {
    // Pass to resolve labels to instruction indices. A label is bound to the
    // number of instructions counted before it, the index of the next one.
    pub(super) fn resolve_label_pass(&mut self, tokens: &[Token]) -> Result<(), AsmError> {
        let mut in_code = false;
        let mut count = 0usize;
        let mut scope: Option<&str> = None;
        let mut pos = 0;

        while pos < tokens.len() {
            if let Some((name, len)) = section_header(tokens, pos) {
                in_code = Section::from_name(&name.literal) == Some(Section::Code);
                pos += len;
                continue;
            }

            let token = &tokens[pos];
            if !in_code {
                pos += 1;
                continue;
            }

            match token.kind {
                TokenKind::Instruction => count += 1,

                TokenKind::At => {
                    if let Some(name) = label_definition(tokens, pos) {
                        if !self.labels.define_global(&name.literal, count) {
                            return Err(AsmError::LabelRedefinition {
                                name: name.literal.clone(),
                                span: name.span(),
                            });
                        }
                        trace!(label = %name.literal, index = count, "defined label");
                        scope = Some(&name.literal);
                        pos += 3;
                        continue;
                    }
                }

                TokenKind::Dot => {
                    if let Some(name) = label_definition(tokens, pos) {
                        let Some(parent) = scope else {
                            return Err(AsmError::OrphanLocalLabel {
                                name: name.literal.clone(),
                                span: name.span(),
                            });
                        };
                        if !self.labels.define_local(parent, &name.literal, count) {
                            return Err(AsmError::LocalLabelRedefinition {
                                name: name.literal.clone(),
                                parent: parent.to_string(),
                                span: name.span(),
                            });
                        }
                        trace!(label = %name.literal, parent, index = count, "defined local label");
                        pos += 3;
                        continue;
                    }
                }

                _ => {}
            }

            pos += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::lexer::lex;

    fn resolve(src: &str) -> Result<Assembler, AsmError> {
        let mut asm = Assembler::new(Path::new("."));
        asm.resolve_label_pass(&lex(src).unwrap())?;
        Ok(asm)
    }

    #[test]
    fn labels_bind_to_next_instruction() {
        let asm = resolve(
            "section code:\n\
             @start:\n  nop\n  nop\n\
             @next: nop\n\
             .inner:\n  nop\n\
             @tail:\n",
        )
        .unwrap();

        assert_eq!(asm.labels.global("start"), Some(0));
        assert_eq!(asm.labels.global("next"), Some(2));
        assert_eq!(asm.labels.local("next", "inner"), Some(3));
        assert_eq!(asm.labels.global("tail"), Some(4));
    }

    #[test]
    fn data_section_words_are_not_counted() {
        let asm = resolve(
            "section data:\n  byte msg \"x\"\n\
             section code:\n  nop\n@here:\n",
        )
        .unwrap();
        assert_eq!(asm.labels.global("here"), Some(1));
    }

    #[test]
    fn local_label_needs_a_parent() {
        assert!(matches!(
            resolve("section code:\n.loop:\n  nop\n"),
            Err(AsmError::OrphanLocalLabel { .. })
        ));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        assert!(matches!(
            resolve("section code:\n@a:\n.x:\n.x:\n"),
            Err(AsmError::LocalLabelRedefinition { .. })
        ));
        assert!(matches!(
            resolve("section code:\n@a:\n@a:\n"),
            Err(AsmError::LabelRedefinition { .. })
        ));
    }
}
