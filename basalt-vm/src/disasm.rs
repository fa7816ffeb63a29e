use std::fmt::Write;

use crate::image::Program;
use crate::isa::{Instruction, NO_ARGS, OperandKinds, RegDesc};

/// Disassemble a single instruction, operands in source, destination order.
pub fn disasm_instruction(inst: &Instruction) -> String {
    let contract = inst.opcode.contract();
    let mut operands = Vec::new();

    if !inst.sreg.is_none() {
        operands.push(format_reg(inst.sreg, inst));
    } else if contract.source.contains(OperandKinds::IMM)
        || contract.source.contains(OperandKinds::LABEL)
    {
        operands.push(format!("$0x{:x}", inst.imm));
    }

    if !inst.dreg.is_none() {
        operands.push(format_reg(inst.dreg, inst));
    } else if contract.destination.contains(OperandKinds::IMM) && inst.imm != NO_ARGS {
        operands.push(format!("$0x{:x}", inst.imm));
    }

    let mnemonic = format!("{}{}", inst.opcode.mnemonic(), inst.width.att_suffix());
    if operands.is_empty() {
        mnemonic
    } else {
        format!("{} {}", mnemonic, operands.join(", "))
    }
}

fn format_reg(desc: RegDesc, inst: &Instruction) -> String {
    let Some(reg) = desc.register() else {
        return String::from("%nul");
    };
    if !desc.is_pointer() {
        return reg.to_string();
    }

    let sign = if inst.disp < 0 { "-" } else { "" };
    let disp = inst.disp.unsigned_abs();
    match inst.index.register() {
        Some(index) => format!("{}0x{:x}({}, {})", sign, disp, reg, index),
        None => format!("{}0x{:x}({})", sign, disp, reg),
    }
}

/// One line per instruction, prefixed with its index.
pub fn disasm_code(code: &[Instruction]) -> String {
    let mut out = String::new();
    for (i, inst) in code.iter().enumerate() {
        let _ = writeln!(out, "0x{:04x}:  {}", i, disasm_instruction(inst));
    }
    out
}

/// Hex dump of a byte region, 16 bytes per line.
pub fn dump_memory(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:04X}: ", row * 16);
        for byte in chunk {
            let _ = write!(out, "{:02X} ", byte);
        }
        out.push('\n');
    }
    out
}

/// Full listing of a program: data dump, bss size and code.
pub fn dump_program(program: &Program) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "section data: ({} bytes)", program.data.len());
    out.push_str(&dump_memory(&program.data));
    let _ = writeln!(out, "section bss: ({} bytes)", program.bss_size);
    let _ = writeln!(out, "section code: ({} instructions)", program.code.len());
    out.push_str(&disasm_code(&program.code));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Opcode, Register, Width};

    #[test]
    fn immediate_to_register() {
        let mut inst = Instruction::new(Opcode::Mov);
        inst.imm = 0x2a;
        inst.dreg = RegDesc::direct(Register::R0);
        assert_eq!(disasm_instruction(&inst), "movq $0x2a, %r0");
    }

    #[test]
    fn memory_operand_with_index() {
        let mut inst = Instruction::new(Opcode::Load);
        inst.sreg = RegDesc::pointer(Register::Bp);
        inst.disp = -16;
        inst.index = RegDesc::direct(Register::R2);
        inst.dreg = RegDesc::direct(Register::R1);
        inst.width = Width::DWord;
        assert_eq!(disasm_instruction(&inst), "ldl -0x10(%bp, %r2), %r1");
    }

    #[test]
    fn zero_operand_and_printf_forms() {
        assert_eq!(disasm_instruction(&Instruction::new(Opcode::Leave)), "leaveq");

        let mut printf = Instruction::new(Opcode::Printf);
        printf.sreg = RegDesc::pointer(Register::Ds);
        printf.imm = NO_ARGS;
        assert_eq!(disasm_instruction(&printf), "printfq 0x0(%ds)");
    }

    #[test]
    fn listing_is_indexed() {
        let code = vec![
            Instruction::new(Opcode::Nop),
            Instruction::new(Opcode::End),
        ];
        assert_eq!(disasm_code(&code), "0x0000:  nopq\n0x0001:  endq\n");
    }

    #[test]
    fn memory_rows() {
        let bytes: Vec<u8> = (0..18).collect();
        let dump = dump_memory(&bytes);
        assert!(dump.starts_with("0000: 00 01 02"));
        assert!(dump.contains("\n0010: 10 11 \n"));
    }
}
