//! Core of the Basalt VM
//! A register machine executing fixed-size instruction records over a single
//! flat arena holding data, bss and stack.

use std::fmt::Write as _;
use std::io::{self, Read, Write};

use tracing::{debug, trace};

use super::flags::Flags;
use super::memory::Memory;
use super::{format, host};
use crate::config::VmConfig;
use crate::error::VmError;
use crate::image::Program;
use crate::isa::{Instruction, NO_ARGS, Opcode, RegDesc, Register, Width};

pub struct Machine {
    registers: [u64; Register::COUNT],
    memory: Memory,
    code: Vec<Instruction>,
    pc: Option<usize>,

    output: Box<dyn Write>,
    input: Box<dyn Read>,
    terminal: host::Terminal,
}

impl Machine {
    /// Loads `program` with guest i/o wired to the process stdin/stdout.
    pub fn new(program: &Program, config: &VmConfig) -> Result<Self, VmError> {
        Self::with_io(
            program,
            config,
            Box::new(io::stdout()),
            Box::new(io::stdin()),
        )
    }

    pub fn with_io(
        program: &Program,
        config: &VmConfig,
        output: Box<dyn Write>,
        input: Box<dyn Read>,
    ) -> Result<Self, VmError> {
        let data_len = program.data.len() as u64;
        let too_large = || VmError::ArenaTooLarge {
            data: data_len,
            bss: program.bss_size,
            stack: config.stack_size,
        };
        let stack_base = data_len
            .checked_add(program.bss_size)
            .ok_or_else(too_large)?;
        let top = stack_base
            .checked_add(config.stack_size)
            .ok_or_else(too_large)?;
        let len = usize::try_from(top).map_err(|_| too_large())?;

        let mut arena = Vec::new();
        arena.try_reserve_exact(len).map_err(|_| too_large())?;
        arena.extend_from_slice(&program.data);
        arena.resize(len, 0);

        let mut registers = [0u64; Register::COUNT];
        registers[Register::Ds.index()] = 0;
        registers[Register::Cs.index()] = 0;
        registers[Register::Ss.index()] = stack_base;
        registers[Register::Sp.index()] = top;
        registers[Register::Bp.index()] = top;

        debug!(
            data = data_len,
            bss = program.bss_size,
            stack = config.stack_size,
            instructions = program.code.len(),
            "loaded program"
        );

        Ok(Self {
            registers,
            memory: Memory::new(arena),
            code: program.code.clone(),
            pc: None,
            output,
            input,
            terminal: host::Terminal::default(),
        })
    }

    pub fn register(&self, reg: Register) -> u64 {
        self.registers[reg.index()]
    }

    pub fn set_register(&mut self, reg: Register, value: u64) {
        self.registers[reg.index()] = value;
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits(self.register(Register::Sfr))
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Runs from instruction 0 until `end` and returns `r0`.
    pub fn run(&mut self) -> Result<u64, VmError> {
        debug!("starting execution");
        self.pc = Some(0);

        while let Some(pc) = self.pc {
            let inst = *self.code.get(pc).ok_or(VmError::PcOutOfRange(pc))?;
            trace!(pc, op = %inst.opcode, "dispatch");
            self.pc = self.execute(pc, &inst)?;
        }

        self.output.flush()?;
        let result = self.register(Register::R0);
        debug!(result, "execution finished");
        Ok(result)
    }

    fn set_flags(&mut self, flags: Flags) {
        self.set_register(Register::Sfr, flags.bits());
    }

    fn reg_value(&self, desc: RegDesc) -> u64 {
        desc.register().map_or(0, |reg| self.register(reg))
    }

    fn address(&self, desc: RegDesc, inst: &Instruction) -> u64 {
        self.reg_value(desc)
            .wrapping_add(inst.disp as i64 as u64)
            .wrapping_add(self.reg_value(inst.index))
    }

    /// Value of an operand slot: the immediate when the slot is empty, memory
    /// when the register is tagged as a pointer, else the register itself.
    fn read(&self, desc: RegDesc, inst: &Instruction) -> Result<u64, VmError> {
        let mask = inst.width.mask();
        if desc.is_none() {
            Ok(inst.imm & mask)
        } else if desc.is_pointer() {
            self.memory.read(self.address(desc, inst), inst.width)
        } else {
            Ok(self.reg_value(desc) & mask)
        }
    }

    fn write(
        &mut self,
        pc: usize,
        desc: RegDesc,
        inst: &Instruction,
        value: u64,
    ) -> Result<(), VmError> {
        let Some(reg) = desc.register() else {
            return Err(malformed(pc, inst, "missing destination"));
        };
        if desc.is_pointer() {
            let addr = self.address(desc, inst);
            self.memory.write(addr, inst.width, value)
        } else {
            self.set_register(reg, value & inst.width.mask());
            Ok(())
        }
    }

    /// An address operand: effective address for pointer slots, the register
    /// value for plain registers, else the immediate.
    fn pointer(&self, desc: RegDesc, inst: &Instruction) -> u64 {
        if desc.is_none() {
            inst.imm
        } else if desc.is_pointer() {
            self.address(desc, inst)
        } else {
            self.reg_value(desc)
        }
    }

    fn push(&mut self, pc: usize, value: u64, width: Width) -> Result<(), VmError> {
        let sp = self.register(Register::Sp);
        let next = sp
            .checked_sub(width.bytes())
            .filter(|&next| next >= self.register(Register::Ss))
            .ok_or(VmError::StackOverflow(pc))?;
        self.memory.write(next, width, value)?;
        self.set_register(Register::Sp, next);
        Ok(())
    }

    fn pop(&mut self, width: Width) -> Result<u64, VmError> {
        let sp = self.register(Register::Sp);
        let value = self.memory.read(sp, width)?;
        self.set_register(Register::Sp, sp.wrapping_add(width.bytes()));
        Ok(value)
    }

    fn branch(&self, pc: usize, inst: &Instruction, taken: bool) -> Option<usize> {
        if taken {
            Some(self.pointer(inst.sreg, inst) as usize)
        } else {
            Some(pc + 1)
        }
    }

    /// Applies a binary `dst = dst OP src` operation, storing the result
    /// unless `store` is false.
    fn binary(
        &mut self,
        pc: usize,
        inst: &Instruction,
        op: fn(u64, u64, Width) -> (u64, Flags),
        store: bool,
    ) -> Result<(), VmError> {
        let src = self.read(inst.sreg, inst)?;
        let dst = self.read(inst.dreg, inst)?;
        let (result, flags) = op(dst, src, inst.width);
        if store {
            self.write(pc, inst.dreg, inst, result)?;
        }
        self.set_flags(flags);
        Ok(())
    }

    fn unary(
        &mut self,
        pc: usize,
        inst: &Instruction,
        op: impl FnOnce(u64) -> (u64, Flags),
    ) -> Result<(), VmError> {
        let value = self.read(inst.sreg, inst)?;
        let (result, flags) = op(value);
        self.write(pc, inst.sreg, inst, result)?;
        self.set_flags(flags);
        Ok(())
    }

    /// Executes one instruction and returns the next program counter.
    fn execute(&mut self, pc: usize, inst: &Instruction) -> Result<Option<usize>, VmError> {
        use Opcode::*;

        let width = inst.width;
        let next = Some(pc + 1);
        let flags = self.flags();

        match inst.opcode {
            End => return Ok(None),
            Nop => {}

            // Stack
            Push => {
                // push <src> - push onto the arena stack
                let value = self.read(inst.sreg, inst)?;
                self.push(pc, value, width)?;
            }
            Pop => {
                // pop [dst] - pop the top of the stack, discarding it without a register
                let value = self.pop(width)?;
                if !inst.sreg.is_none() {
                    self.write(pc, inst.sreg, inst, value)?;
                }
            }
            Pushar => {
                for i in 0..Register::GENERAL {
                    self.push(pc, self.registers[i], width)?;
                }
            }
            Popar => {
                for i in (0..Register::GENERAL).rev() {
                    let value = self.pop(width)?;
                    self.registers[i] = value;
                }
            }

            // Arithmetic
            Add => self.binary(pc, inst, Flags::add, true)?,
            Sub => self.binary(pc, inst, Flags::sub, true)?,
            Cmp => self.binary(pc, inst, Flags::sub, false)?,
            And => self.binary(pc, inst, |a, b, w| logical(a & b, w), true)?,
            Or => self.binary(pc, inst, |a, b, w| logical(a | b, w), true)?,
            Xor => self.binary(pc, inst, |a, b, w| logical(a ^ b, w), true)?,
            Test => self.binary(pc, inst, |a, b, w| logical(a & b, w), false)?,
            Inc => self.unary(pc, inst, |v| Flags::add(v, 1, width))?,
            Dec => self.unary(pc, inst, |v| Flags::sub(v, 1, width))?,
            Neg => self.unary(pc, inst, |v| Flags::sub(0, v, width))?,
            Not => {
                // not <dst> - bitwise complement, flags untouched
                let value = self.read(inst.sreg, inst)?;
                self.write(pc, inst.sreg, inst, !value)?;
            }
            Mul => {
                // mul <src> - r0 = r0 * src
                let src = self.read(inst.sreg, inst)?;
                let (result, flags) = Flags::mul(self.register(Register::R0), src, width);
                self.set_register(Register::R0, result);
                self.set_flags(flags);
            }
            Div => {
                // div <src> - r0 = r0 / src, r3 = r0 % src
                let src = self.read(inst.sreg, inst)?;
                if src == 0 {
                    return Err(VmError::DivisionByZero(pc));
                }
                let dividend = self.register(Register::R0) & width.mask();
                let quotient = dividend / src;
                self.set_register(Register::R0, quotient);
                self.set_register(Register::R3, dividend % src);
                self.set_flags(Flags::logical(quotient, width));
            }

            // Data movement
            Mov => {
                let value = self.read(inst.sreg, inst)?;
                self.write(pc, inst.dreg, inst, value)?;
            }
            Lea => {
                // lea <mem>, <dst> - load the effective address itself
                let addr = self.pointer(inst.sreg, inst);
                self.write(pc, inst.dreg, inst, addr)?;
            }
            Load => {
                let value = self.read(inst.sreg, inst)?;
                self.write(pc, inst.dreg, inst, value)?;
            }
            Store => {
                let value = self.read(inst.sreg, inst)?;
                if !inst.dreg.is_pointer() {
                    return Err(malformed(pc, inst, "store target is not memory"));
                }
                self.write(pc, inst.dreg, inst, value)?;
            }
            Lrzf => self.set_register(Register::R0, flags.bits()),
            Srzf => {
                let bits = self.register(Register::R0);
                self.set_flags(Flags::from_bits(bits));
            }

            // Frames and calls
            Enter => {
                // enter <n> - push bp, bp = sp, reserve n bytes of locals
                let locals = self.read(inst.sreg, inst)?;
                self.push(pc, self.register(Register::Bp), Width::QWord)?;
                let sp = self.register(Register::Sp);
                self.set_register(Register::Bp, sp);
                let reserved = sp
                    .checked_sub(locals)
                    .filter(|&sp| sp >= self.register(Register::Ss))
                    .ok_or(VmError::StackOverflow(pc))?;
                self.set_register(Register::Sp, reserved);
            }
            Leave => {
                self.set_register(Register::Sp, self.register(Register::Bp));
                let bp = self.pop(Width::QWord)?;
                self.set_register(Register::Bp, bp);
            }
            Call => {
                self.push(pc, (pc + 1) as u64, Width::QWord)?;
                return Ok(self.branch(pc, inst, true));
            }
            Ret => {
                let target = self.pop(Width::QWord)?;
                return Ok(Some(target as usize));
            }

            // Heap
            Malloc => {
                let size = self.read(inst.sreg, inst)?;
                let ptr = self.memory.allocate(size)?;
                self.set_register(Register::R0, ptr);
            }
            Free => {
                let ptr = self.pointer(inst.sreg, inst);
                self.memory.free(ptr)?;
            }
            Memset => {
                // memset <count>, <dst> - fill with the low byte of r0
                let count = self.read(inst.sreg, inst)?;
                let dst = self.pointer(inst.dreg, inst);
                let byte = self.register(Register::R0) as u8;
                self.memory.fill(dst, byte, count)?;
            }
            Memcpy => {
                // memcpy <count>, <dst> - copy from the address in r0
                let count = self.read(inst.sreg, inst)?;
                let dst = self.pointer(inst.dreg, inst);
                let src = self.register(Register::R0);
                self.memory.copy(dst, src, count)?;
            }

            // Guest i/o
            Printf => {
                let fmt = self.pointer(inst.sreg, inst);
                let args = if !inst.dreg.is_none() {
                    Some(self.pointer(inst.dreg, inst))
                } else if inst.imm == NO_ARGS {
                    None
                } else {
                    Some(inst.imm)
                };
                format::printf(&self.memory, &mut self.output, fmt, args)?;
            }
            PInt => {
                let value = self.read(inst.sreg, inst)?;
                write!(self.output, "{}", value)?;
            }
            PStr => {
                let addr = self.pointer(inst.sreg, inst);
                self.output.write_all(self.memory.read_cstr(addr)?)?;
            }
            PChr => {
                let value = self.read(inst.sreg, inst)?;
                self.output.write_all(&[value as u8])?;
            }
            GetChar => {
                self.output.flush()?;
                let mut byte = [0u8; 1];
                let value = match self.input.read(&mut byte)? {
                    0 => u64::MAX,
                    _ => byte[0] as u64,
                };
                self.write(pc, inst.sreg, inst, value)?;
            }
            SConio => {
                let raw = self.read(inst.sreg, inst)? != 0;
                self.terminal.set_raw(raw);
            }
            DumpFlags => {
                writeln!(
                    self.output,
                    "ZF={} SF={} OF={} CF={}",
                    flags.zero as u8, flags.sign as u8, flags.overflow as u8, flags.carry as u8
                )?;
            }

            // Host
            System => {
                let addr = self.pointer(inst.sreg, inst);
                let command = self.memory.read_cstr(addr)?.to_vec();
                self.output.flush()?;
                let status = host::system(&command)?;
                self.set_register(Register::R4, status as u64);
            }
            Syscall => {
                self.output.flush()?;
                let number = self.register(Register::R0);
                let mut args = [0u64; 6];
                for (i, arg) in args.iter_mut().enumerate() {
                    let value = self.registers[Register::R1.index() + i];
                    *arg = self.memory.host_address(value);
                }
                let result = host::syscall(number, args)?;
                self.set_register(Register::R0, result);
            }

            // Control flow
            Jmp => return Ok(self.branch(pc, inst, true)),
            Jz | Jue => return Ok(self.branch(pc, inst, flags.zero)),
            Jnz | June => return Ok(self.branch(pc, inst, !flags.zero)),
            Js => return Ok(self.branch(pc, inst, flags.sign)),
            Jns => return Ok(self.branch(pc, inst, !flags.sign)),
            Jo => return Ok(self.branch(pc, inst, flags.overflow)),
            Jno => return Ok(self.branch(pc, inst, !flags.overflow)),
            Jc | Jul => return Ok(self.branch(pc, inst, flags.carry)),
            Jnc | Juge => return Ok(self.branch(pc, inst, !flags.carry)),
            Jug => return Ok(self.branch(pc, inst, !flags.carry && !flags.zero)),
            Jule => return Ok(self.branch(pc, inst, flags.carry || flags.zero)),
            Jl => return Ok(self.branch(pc, inst, flags.sign != flags.overflow)),
            Jge => return Ok(self.branch(pc, inst, flags.sign == flags.overflow)),
            Jg => {
                let taken = !flags.zero && flags.sign == flags.overflow;
                return Ok(self.branch(pc, inst, taken));
            }
            Jle => {
                let taken = flags.zero || flags.sign != flags.overflow;
                return Ok(self.branch(pc, inst, taken));
            }
        }

        Ok(next)
    }

    /// Register file snapshot for diagnostics.
    pub fn dump_ctx(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", "-".repeat(60));
        let _ = writeln!(
            out,
            "pc: {:?}\tsp: {:016X}\tbp: {:016X}\tsfr: {:04b}",
            self.pc,
            self.register(Register::Sp),
            self.register(Register::Bp),
            self.register(Register::Sfr)
        );
        let _ = writeln!(out, "{}", "-".repeat(60));
        for (i, values) in self.registers[..Register::GENERAL].chunks(4).enumerate() {
            for (j, value) in values.iter().enumerate() {
                let _ = write!(out, "r{:<2} {:016X}  ", i * 4 + j, value);
            }
            out.push('\n');
        }
        out
    }
}

fn logical(result: u64, width: Width) -> (u64, Flags) {
    let result = result & width.mask();
    (result, Flags::logical(result, width))
}

fn malformed(pc: usize, inst: &Instruction, reason: &'static str) -> VmError {
    VmError::Malformed {
        pc,
        opcode: inst.opcode.mnemonic(),
        reason,
    }
}
