use tracing::trace;

use super::codegen::{CodeGen, unexpected};
use crate::error::AsmError;
use crate::lexer::{Token, TokenKind};
use crate::symbols::{DataInfo, DataType};

/// Data and bss offsets are reached through a 32-bit displacement.
const MAX_IMAGE_SIZE: u64 = i32::MAX as u64;

impl<'a> CodeGen<'a> {
    /// Size of data plus bss once `extra` more bytes are added on top of
    /// `pending` bytes the current directive has not stored yet.
    fn grow(&self, extra: u64, pending: u64, token: &Token) -> Result<u64, AsmError> {
        (self.asm.data.len() as u64)
            .checked_add(self.asm.bss_size)
            .and_then(|n| n.checked_add(pending))
            .and_then(|n| n.checked_add(extra))
            .filter(|&n| n <= MAX_IMAGE_SIZE)
            .ok_or_else(|| AsmError::ImageTooLarge {
                name: token.literal.clone(),
                limit: MAX_IMAGE_SIZE,
                span: token.span(),
            })
    }

    fn define(&mut self, name: &Token, info: DataInfo) -> Result<(), AsmError> {
        trace!(
            symbol = %name.literal,
            offset = info.offset,
            size = info.size,
            constant = info.constant,
            "defined symbol"
        );
        if !self.asm.symbols.define(&name.literal, info) {
            return Err(AsmError::Redefinition {
                name: name.literal.clone(),
                span: name.span(),
            });
        }
        Ok(())
    }

    fn directive(&mut self) -> Result<(&'a Token, String), AsmError> {
        let token = self.next("a directive")?;
        if !matches!(token.kind, TokenKind::Instruction | TokenKind::Identifier) {
            return Err(unexpected(token, "a directive"));
        }
        Ok((token, token.literal.to_ascii_lowercase()))
    }

    fn constant(&mut self) -> Result<(), AsmError> {
        let name = self.expect(TokenKind::Identifier, "a constant name")?;
        let value = self.expect_value("a constant value")?;
        self.define(name, DataInfo::constant(value))
    }

    /// `byte|word|dword|qword name elements`, `align n`, `const name value`.
    pub(super) fn data_directive(&mut self) -> Result<(), AsmError> {
        let (token, directive) = self.directive()?;

        match directive.as_str() {
            "const" => self.constant(),
            "align" => {
                let padding = self.expect_value("a padding size")?;
                let len = self.grow(padding, 0, token)?;
                self.asm.data.resize(len as usize, 0);
                Ok(())
            }
            _ => {
                let data_type =
                    DataType::from_directive(&directive).ok_or_else(|| AsmError::UnknownDirective {
                        name: token.literal.clone(),
                        span: token.span(),
                    })?;

                let name = self.expect(TokenKind::Identifier, "a symbol name")?;
                let bytes = self.data_elements(name, data_type)?;

                let offset = self.asm.data.len() as u64;
                let info = DataInfo::variable(offset, bytes.len() as u64, data_type);
                self.define(name, info)?;
                self.asm.data.extend_from_slice(&bytes);
                Ok(())
            }
        }
    }

    /// `byte|word|dword|qword name count`, `const name value`.
    pub(super) fn bss_directive(&mut self) -> Result<(), AsmError> {
        let (token, directive) = self.directive()?;
        if directive == "const" {
            return self.constant();
        }

        let data_type =
            DataType::from_directive(&directive).ok_or_else(|| AsmError::UnknownDirective {
                name: token.literal.clone(),
                span: token.span(),
            })?;
        let name = self.expect(TokenKind::Identifier, "a symbol name")?;
        let count = self.expect_value("an element count")?;

        let offset = self.asm.data.len() as u64 + self.asm.bss_size;
        let size = count.saturating_mul(data_type.size());
        self.grow(size, 0, name)?;
        self.define(name, DataInfo::variable(offset, size, data_type))?;
        self.asm.bss_size += size;
        Ok(())
    }

    /// Comma separated numbers, strings (byte data only) and
    /// `fill(value, count)` runs, encoded little-endian.
    fn data_elements(&mut self, name: &Token, data_type: DataType) -> Result<Vec<u8>, AsmError> {
        let mut bytes = Vec::new();

        loop {
            let token = self.next("a data element")?;
            match token.kind {
                TokenKind::String => {
                    if data_type != DataType::Byte {
                        return Err(AsmError::WideString { span: token.span() });
                    }
                    bytes.extend_from_slice(token.literal.as_bytes());
                }
                TokenKind::Number(value) | TokenKind::Immediate(value) => {
                    push_element(&mut bytes, value, data_type);
                }
                TokenKind::Identifier if token.literal.eq_ignore_ascii_case("fill") => {
                    self.expect(TokenKind::LParen, "'(' after fill")?;
                    let value = self.expect_value("a fill value")?;
                    self.expect(TokenKind::Comma, "',' in fill")?;
                    let count = self.expect_value("a fill count")?;
                    self.expect(TokenKind::RParen, "')' after fill")?;
                    self.grow(count.saturating_mul(data_type.size()), bytes.len() as u64, name)?;
                    for _ in 0..count {
                        push_element(&mut bytes, value, data_type);
                    }
                }
                TokenKind::Identifier => {
                    let info = self.lookup(token)?;
                    if !info.constant {
                        return Err(unexpected(token, "a constant"));
                    }
                    push_element(&mut bytes, info.value, data_type);
                }
                _ => return Err(unexpected(token, "a data element")),
            }

            if !self.peek_is(TokenKind::Comma) {
                break;
            }
            self.pos += 1;
        }

        Ok(bytes)
    }
}

fn push_element(bytes: &mut Vec<u8>, value: u64, data_type: DataType) {
    let len = data_type.size() as usize;
    bytes.extend_from_slice(&value.to_le_bytes()[..len]);
}
