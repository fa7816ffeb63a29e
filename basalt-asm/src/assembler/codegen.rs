use std::mem::discriminant;

use basalt_vm::disasm::disasm_instruction;
use basalt_vm::isa::{Instruction, NO_ARGS, OperandKinds, Opcode, RegDesc, Register};
use tracing::trace;

use super::{Assembler, Section, section_header};
use crate::error::AsmError;
use crate::lexer::{Token, TokenKind};
use crate::symbols::{DataInfo, DataType};

/// An operand once its tokens have been parsed.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Reg(RegDesc),
    Mem {
        base: RegDesc,
        disp: i64,
        index: RegDesc,
    },
    Imm(u64),
    Label(u64),
}

impl Operand {
    fn kind(&self) -> OperandKinds {
        match self {
            Operand::Reg(_) => OperandKinds::REG,
            Operand::Mem { .. } => OperandKinds::MEM,
            Operand::Imm(_) => OperandKinds::IMM,
            Operand::Label(_) => OperandKinds::LABEL,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Operand::Reg(_) => "a register",
            Operand::Mem { .. } => "a memory operand",
            Operand::Imm(_) => "an immediate",
            Operand::Label(_) => "a label",
        }
    }
}

/// Compile-time queries on a data symbol.
#[derive(Debug, Clone, Copy)]
enum Query {
    SizeOf,
    LengthOf,
    TypeOf,
    OffsetOf,
}

impl Query {
    fn from_name(name: &str) -> Option<Query> {
        match name.to_ascii_lowercase().as_str() {
            "sizeof" => Some(Query::SizeOf),
            "lengthof" => Some(Query::LengthOf),
            "typeof" => Some(Query::TypeOf),
            "offsetof" => Some(Query::OffsetOf),
            _ => None,
        }
    }

    fn apply(self, info: &DataInfo) -> u64 {
        match self {
            Query::SizeOf => info.size,
            Query::LengthOf => info.length(),
            Query::TypeOf => info.data_type.size(),
            Query::OffsetOf => info.offset,
        }
    }
}

/// The instruction currently receiving operands.
#[derive(Debug)]
struct Pending {
    inst: Instruction,
    mnemonic: Token,
    // Slot the next operand goes into, `None` before the first operand
    slot: Option<usize>,
    filled: [bool; 2],
    has_memory: bool,
}

impl Pending {
    fn encoding(&self) -> String {
        self.inst.opcode.contract().to_string()
    }
}

pub(super) struct CodeGen<'a> {
    pub(super) asm: &'a mut Assembler,
    tokens: &'a [Token],
    pub(super) pos: usize,

    section: Option<Section>,
    scope: Option<String>,
    pending: Option<Pending>,
}

impl<'a> CodeGen<'a> {
    pub(super) fn new(asm: &'a mut Assembler, tokens: &'a [Token]) -> Self {
        Self {
            asm,
            tokens,
            pos: 0,
            section: None,
            scope: None,
            pending: None,
        }
    }

    pub(super) fn run(mut self) -> Result<(), AsmError> {
        while self.pos < self.tokens.len() {
            if let Some((name, len)) = section_header(self.tokens, self.pos) {
                self.enter_section(name)?;
                self.pos += len;
                continue;
            }

            match self.section {
                None => {
                    let token = &self.tokens[self.pos];
                    return Err(AsmError::OutsideSection {
                        found: token.literal.clone(),
                        span: token.span(),
                    });
                }
                Some(Section::Data) => self.data_directive()?,
                Some(Section::Bss) => self.bss_directive()?,
                Some(Section::Code) => self.code_token()?,
            }
        }

        self.close_instruction()?;
        self.asm.code.push(Instruction::new(Opcode::End));
        Ok(())
    }

    fn enter_section(&mut self, name: &Token) -> Result<(), AsmError> {
        let section = Section::from_name(&name.literal).ok_or_else(|| AsmError::UnknownSection {
            name: name.literal.clone(),
            span: name.span(),
        })?;

        if let Some(current) = self.section {
            if section < current {
                return Err(AsmError::SectionOrder {
                    name: section.name().to_string(),
                    current: current.name().to_string(),
                    span: name.span(),
                });
            }
        }

        trace!(section = section.name(), "entering section");
        self.section = Some(section);
        Ok(())
    }

    // Token helpers
    // --------------------------------------

    pub(super) fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub(super) fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    pub(super) fn next(&mut self, expected: &'static str) -> Result<&'a Token, AsmError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or(AsmError::UnexpectedEof { expected })?;
        self.pos += 1;
        Ok(token)
    }

    pub(super) fn expect(
        &mut self,
        kind: TokenKind,
        expected: &'static str,
    ) -> Result<&'a Token, AsmError> {
        let token = self.next(expected)?;
        if discriminant(&token.kind) != discriminant(&kind) {
            return Err(unexpected(token, expected));
        }
        Ok(token)
    }

    /// A number, immediate or constant name.
    pub(super) fn expect_value(&mut self, expected: &'static str) -> Result<u64, AsmError> {
        let token = self.next(expected)?;
        match token.kind {
            TokenKind::Number(value) | TokenKind::Immediate(value) => Ok(value),
            TokenKind::Identifier => {
                let info = self.lookup(token)?;
                if info.constant {
                    Ok(info.value)
                } else {
                    Err(unexpected(token, expected))
                }
            }
            _ => Err(unexpected(token, expected)),
        }
    }

    pub(super) fn lookup(&self, token: &Token) -> Result<DataInfo, AsmError> {
        self.asm
            .symbols
            .get(&token.literal)
            .cloned()
            .ok_or_else(|| AsmError::UndefinedSymbol {
                name: token.literal.clone(),
                span: token.span(),
            })
    }

    // Instructions
    // --------------------------------------

    fn code_token(&mut self) -> Result<(), AsmError> {
        let token = self.next("an instruction")?;

        match token.kind {
            TokenKind::Instruction => self.begin_instruction(token),

            TokenKind::At => {
                let name = self.expect(TokenKind::Identifier, "a label name")?;
                if self.peek_is(TokenKind::Colon) {
                    // Label definition, bound during the first pass
                    self.pos += 1;
                    self.close_instruction()?;
                    self.scope = Some(name.literal.clone());
                    return Ok(());
                }
                let index = self.asm.labels.global(&name.literal).ok_or_else(|| {
                    AsmError::UndefinedLabel {
                        name: name.literal.clone(),
                        span: name.span(),
                    }
                })?;
                self.place(token, Operand::Label(index as u64))
            }

            TokenKind::Dot => {
                let name = self.expect(TokenKind::Identifier, "a local label name")?;
                if self.peek_is(TokenKind::Colon) {
                    self.pos += 1;
                    return self.close_instruction();
                }
                let Some(parent) = self.scope.as_deref() else {
                    return Err(AsmError::OrphanLocalLabel {
                        name: name.literal.clone(),
                        span: name.span(),
                    });
                };
                let index = self.asm.labels.local(parent, &name.literal).ok_or_else(|| {
                    AsmError::UndefinedLocalLabel {
                        name: name.literal.clone(),
                        parent: parent.to_string(),
                        span: name.span(),
                    }
                })?;
                self.place(token, Operand::Label(index as u64))
            }

            TokenKind::Register => {
                let reg = register(token)?;
                self.place(token, Operand::Reg(RegDesc::direct(reg)))
            }

            TokenKind::LParen | TokenKind::LSquare => self.memory_operand(token, token, 0),

            TokenKind::Number(value) => {
                let open = self.peek().filter(|t| {
                    matches!(t.kind, TokenKind::LParen | TokenKind::LSquare)
                });
                match open {
                    Some(open) => {
                        self.pos += 1;
                        self.memory_operand(token, open, value as i64)
                    }
                    None => self.place(token, Operand::Imm(value)),
                }
            }

            TokenKind::Immediate(value) => self.place(token, Operand::Imm(value)),
            TokenKind::Identifier if self.starts_statement(token) => {
                Err(AsmError::UnknownInstruction {
                    name: token.literal.clone(),
                    span: token.span(),
                })
            }
            TokenKind::Identifier => self.symbol_operand(token),
            TokenKind::Comma => self.next_operand(token),

            _ => Err(unexpected(token, "an instruction or operand")),
        }
    }

    /// A word where no operand can go: nothing is pending, or it sits on a
    /// later line than a pending instruction that is not waiting after ','.
    fn starts_statement(&self, token: &Token) -> bool {
        match &self.pending {
            None => true,
            Some(pending) => {
                token.line != pending.mnemonic.line
                    && pending.slot.is_none_or(|slot| pending.filled[slot])
            }
        }
    }

    fn begin_instruction(&mut self, token: &Token) -> Result<(), AsmError> {
        self.close_instruction()?;

        let (opcode, width) =
            Opcode::from_sized_mnemonic(&token.literal).ok_or_else(|| AsmError::UnknownInstruction {
                name: token.literal.clone(),
                span: token.span(),
            })?;

        let mut inst = Instruction::new(opcode);
        inst.width = width;
        if opcode == Opcode::Printf {
            inst.imm = NO_ARGS;
        }

        self.pending = Some(Pending {
            inst,
            mnemonic: token.clone(),
            slot: None,
            filled: [false; 2],
            has_memory: false,
        });
        Ok(())
    }

    /// Validates the operand count of the pending instruction and emits it.
    fn close_instruction(&mut self) -> Result<(), AsmError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        if let Some(slot) = pending.slot {
            if !pending.filled[slot] {
                return Err(AsmError::Expected {
                    expected: "an operand after ','",
                    found: pending.mnemonic.literal.clone(),
                    span: pending.mnemonic.span(),
                });
            }
        }

        let count = pending.slot.map_or(0, |slot| slot + 1);
        let contract = pending.inst.opcode.contract();
        if !contract.arity.accepts(count) {
            return Err(AsmError::Arity {
                mnemonic: pending.mnemonic.literal.clone(),
                found: count,
                encoding: pending.encoding(),
                span: pending.mnemonic.span(),
            });
        }

        trace!(
            index = self.asm.code.len(),
            inst = %disasm_instruction(&pending.inst),
            "emitted instruction"
        );
        self.asm.code.push(pending.inst);
        Ok(())
    }

    fn next_operand(&mut self, comma: &Token) -> Result<(), AsmError> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(unexpected(comma, "an instruction"));
        };
        match pending.slot {
            Some(slot) if pending.filled[slot] => {
                if slot + 1 >= pending.filled.len() {
                    return Err(AsmError::Arity {
                        mnemonic: pending.mnemonic.literal.clone(),
                        found: slot + 2,
                        encoding: pending.encoding(),
                        span: comma.span(),
                    });
                }
                pending.slot = Some(slot + 1);
                Ok(())
            }
            _ => Err(unexpected(comma, "an operand before ','")),
        }
    }

    /// Slot and accepted forms the next operand of the pending instruction
    /// would get.
    fn upcoming(&self) -> Option<(usize, Opcode, OperandKinds)> {
        let pending = self.pending.as_ref()?;
        let slot = pending.slot.unwrap_or(0);
        let opcode = pending.inst.opcode;
        Some((slot, opcode, opcode.contract().slot(slot)))
    }

    fn place(&mut self, token: &Token, operand: Operand) -> Result<(), AsmError> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(unexpected(token, "an instruction"));
        };

        let slot = *pending.slot.get_or_insert(0);
        let mnemonic = &pending.mnemonic.literal;
        let allowed = pending.inst.opcode.contract().slot(slot);
        if allowed.is_empty() {
            return Err(AsmError::Arity {
                mnemonic: mnemonic.clone(),
                found: slot + 1,
                encoding: pending.encoding(),
                span: token.span(),
            });
        }
        if pending.filled[slot] {
            return Err(unexpected(token, "',' between operands"));
        }

        if !allowed.contains(operand.kind()) {
            return Err(AsmError::OperandKind {
                mnemonic: mnemonic.clone(),
                position: slot + 1,
                found: operand.describe(),
                encoding: pending.encoding(),
                span: token.span(),
            });
        }

        let inst = &mut pending.inst;
        match operand {
            Operand::Reg(desc) => set_slot(inst, slot, desc),
            Operand::Mem { base, disp, index } => {
                if pending.has_memory {
                    return Err(AsmError::MultipleMemoryOperands {
                        mnemonic: mnemonic.clone(),
                        span: token.span(),
                    });
                }
                inst.disp = i32::try_from(disp).map_err(|_| AsmError::DisplacementRange {
                    value: disp,
                    span: token.span(),
                })?;
                inst.index = index;
                set_slot(inst, slot, base);
                pending.has_memory = true;
            }
            Operand::Imm(value) | Operand::Label(value) => inst.imm = value,
        }

        pending.filled[slot] = true;
        Ok(())
    }

    // Operands
    // --------------------------------------

    /// Parses `disp(base[, index[, scale]])` or `[base[, index] +/- n]` after
    /// its opening token.
    fn memory_operand(&mut self, start: &Token, open: &Token, disp: i64) -> Result<(), AsmError> {
        let close = match open.kind {
            TokenKind::LParen => TokenKind::RParen,
            _ => TokenKind::RSquare,
        };
        let mut disp = disp;

        let base_token = self.next("a base register")?;
        let base = match base_token.kind {
            TokenKind::Register => RegDesc::pointer(register(base_token)?),
            TokenKind::Identifier => {
                let info = self.lookup(base_token)?;
                if info.constant {
                    return Err(unexpected(base_token, "a register or data symbol"));
                }
                disp = disp.wrapping_add(info.offset as i64);
                RegDesc::pointer(Register::Ds)
            }
            _ => return Err(unexpected(base_token, "a register or data symbol")),
        };

        let mut index = RegDesc::NUL;
        loop {
            let token = self.next("the end of the memory operand")?;
            match token.kind {
                kind if kind == close => break,
                TokenKind::Comma if index.is_none() => {
                    let index_token = self.expect(TokenKind::Register, "an index register")?;
                    index = RegDesc::direct(register(index_token)?);
                    if self.peek_is(TokenKind::Comma) {
                        self.pos += 1;
                        // Scale is accepted for compatibility and treated as 1
                        let scale = self.expect_value("a scale of 1, 2, 4 or 8")?;
                        if !matches!(scale, 1 | 2 | 4 | 8) {
                            return Err(unexpected(&self.tokens[self.pos - 1], "a scale of 1, 2, 4 or 8"));
                        }
                    }
                }
                TokenKind::Plus | TokenKind::Minus => {
                    let offset = self.expect_value("a displacement")? as i64;
                    disp = if token.kind == TokenKind::Plus {
                        disp.wrapping_add(offset)
                    } else {
                        disp.wrapping_sub(offset)
                    };
                }
                TokenKind::Number(offset) if token.is_signed() => {
                    disp = disp.wrapping_add(offset as i64);
                }
                _ => return Err(unexpected(token, "',', '+', '-' or a closing bracket")),
            }
        }

        self.place(start, Operand::Mem { base, disp, index })
    }

    /// Optional `+ n`, `- n` or glued signed number after a symbol.
    fn symbol_adjustment(&mut self) -> Result<i64, AsmError> {
        match self.peek() {
            Some(t) if matches!(t.kind, TokenKind::Plus | TokenKind::Minus) => {
                self.pos += 1;
                let offset = self.expect_value("an offset")? as i64;
                Ok(if t.kind == TokenKind::Plus {
                    offset
                } else {
                    offset.wrapping_neg()
                })
            }
            Some(t) if t.is_signed() => {
                self.pos += 1;
                match t.kind {
                    TokenKind::Number(value) => Ok(value as i64),
                    _ => Ok(0),
                }
            }
            _ => Ok(0),
        }
    }

    fn symbol_operand(&mut self, token: &'a Token) -> Result<(), AsmError> {
        if let Some(query) = Query::from_name(&token.literal) {
            if self.peek_is(TokenKind::LParen) {
                self.pos += 1;
                let name = self.expect(TokenKind::Identifier, "a symbol name")?;
                self.expect(TokenKind::RParen, "')'")?;
                let info = self.lookup(name)?;
                return self.place(token, Operand::Imm(query.apply(&info)));
            }
        }

        let info = self.lookup(token)?;
        let adjust = self.symbol_adjustment()?;

        if info.constant {
            return self.place(token, Operand::Imm(info.value.wrapping_add(adjust as u64)));
        }

        let Some((slot, opcode, allowed)) = self.upcoming() else {
            return Err(unexpected(token, "an instruction"));
        };

        if slot == 0
            && matches!(opcode, Opcode::PStr | Opcode::System)
            && info.data_type != DataType::Byte
        {
            return Err(AsmError::NotAString {
                name: token.literal.clone(),
                mnemonic: opcode.mnemonic().to_string(),
                span: token.span(),
            });
        }

        let memory = Operand::Mem {
            base: RegDesc::pointer(Register::Ds),
            disp: (info.offset as i64).wrapping_add(adjust),
            index: RegDesc::NUL,
        };
        if !allowed.contains(OperandKinds::MEM) && allowed.contains(OperandKinds::IMM) {
            let address = info.offset.wrapping_add(adjust as u64);
            return self.place(token, Operand::Imm(address));
        }
        self.place(token, memory)
    }
}

fn set_slot(inst: &mut Instruction, slot: usize, desc: RegDesc) {
    if slot == 0 {
        inst.sreg = desc;
    } else {
        inst.dreg = desc;
    }
}

fn register(token: &Token) -> Result<Register, AsmError> {
    Register::from_name(&token.literal).ok_or_else(|| AsmError::UnknownRegister {
        name: token.literal.clone(),
        span: token.span(),
    })
}

pub(super) fn unexpected(token: &Token, expected: &'static str) -> AsmError {
    AsmError::Expected {
        expected,
        found: token.literal.clone(),
        span: token.span(),
    }
}
