use std::cell::RefCell;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use basalt_asm::Assembler;
use basalt_vm::isa::{Opcode, Register, Width};
use basalt_vm::{Machine, Program, VmConfig};

#[derive(Clone, Default)]
struct Capture(Rc<RefCell<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn assemble(src: &str) -> Program {
    Assembler::new(Path::new("."))
        .assemble_source(src)
        .expect("source should assemble")
}

/// Runs an assembled program, returning its raw output and `r0`.
fn run_program(program: &Program) -> (Vec<u8>, u64) {
    let out = Capture::default();
    let config = VmConfig::default().with_stack_size(4096);
    let mut vm = Machine::with_io(
        program,
        &config,
        Box::new(out.clone()),
        Box::new(io::empty()),
    )
    .expect("program should load");
    let result = vm.run().expect("program should run");
    let bytes = out.0.borrow().clone();
    (bytes, result)
}

/// Assembles and runs `src`, returning the machine, its output and `r0`.
fn execute(src: &str) -> (Machine, String, u64) {
    let program = assemble(src);
    let out = Capture::default();
    let config = VmConfig::default().with_stack_size(4096);
    let mut vm = Machine::with_io(
        &program,
        &config,
        Box::new(out.clone()),
        Box::new(io::empty()),
    )
    .expect("program should load");
    let result = vm.run().expect("program should run");
    let text = String::from_utf8(out.0.borrow().clone()).unwrap();
    (vm, text, result)
}

#[test]
fn prints_a_data_string() {
    let (_, out, result) = execute(
        "section data:\n\
         \tbyte msg \"hi\"\n\
         section code:\n\
         \tpstr msg\n\
         \tend\n",
    );
    assert_eq!(out, "hi");
    assert_eq!(result, 0);
}

#[test]
fn countdown_loop_prints_digits() {
    let (_, out, result) = execute(
        "section code:\n\
         \tmov $5, %r1\n\
         @loop:\n\
         \tpint %r1\n\
         \tdec %r1\n\
         \tjnz @loop\n\
         \tmov $0, %r0\n\
         \tend\n",
    );
    assert_eq!(out, "54321");
    assert_eq!(result, 0);
}

#[test]
fn local_labels_are_scoped_to_their_global() {
    let (_, out, _) = execute(
        "section code:\n\
         \tcall @first\n\
         \tcall @second\n\
         \tend\n\
         @first:\n\
         \tmov $2, %r1\n\
         .loop:\n\
         \tpchr $65 ; A\n\
         \tdec %r1\n\
         \tjnz .loop\n\
         \tret\n\
         @second:\n\
         \tmov $3, %r1\n\
         .loop:\n\
         \tpchr $66\n\
         \tdec %r1\n\
         \tjnz .loop\n\
         \tret\n",
    );
    assert_eq!(out, "AABBB");
}

#[test]
fn trailing_label_targets_the_implicit_end() {
    let src = "section code:\n\
               \tmov $7, %r0\n\
               \tjmp @done\n\
               \tpint $1\n\
               @done:\n";
    let program = assemble(src);
    assert_eq!(program.code.len(), 4);
    assert_eq!(program.code[3].opcode, Opcode::End);
    assert_eq!(program.code[1].imm, 3);

    let (_, out, result) = execute(src);
    assert_eq!(out, "");
    assert_eq!(result, 7);
}

#[test]
fn image_survives_a_round_trip() {
    let program = assemble(
        "section data:\n\
         \tbyte greeting \"hello\", 0\n\
         \tword table 1, 2, 3\n\
         section bss:\n\
         \tqword scratch 4\n\
         section code:\n\
         \tlea greeting, %r1\n\
         \tpstr (%r1)\n\
         \tldw table+2, %r0\n\
         \tst %r0, scratch\n\
         \tld scratch, %r3\n\
         \tadd %r3, %r0\n",
    );
    assert_eq!(program.data.len(), 12);
    assert_eq!(program.bss_size, 32);

    let mut file = Vec::new();
    program.write_to(&mut file).unwrap();
    let decoded = Program::read_from(&mut file.as_slice()).unwrap();
    assert_eq!(decoded, program);

    let (direct_out, direct_result) = run_program(&program);
    let (loaded_out, loaded_result) = run_program(&decoded);
    assert_eq!(direct_out, b"hello");
    assert_eq!(loaded_out, direct_out);
    assert_eq!(direct_result, 4);
    assert_eq!(loaded_result, direct_result);
}

#[test]
fn wrapped_data_list_accepts_constants() {
    let (vm, _, _) = execute(
        "section data:\n\
         \tconst LIMIT 7\n\
         \tbyte list 1,\n\
         \t  LIMIT, 3\n\
         section code:\n\
         \tmov sizeof(list), %r1\n\
         \tldb list+1, %r2\n",
    );
    assert_eq!(vm.register(Register::R1), 3);
    assert_eq!(vm.register(Register::R2), 7);
}

#[test]
fn memory_operand_forms() {
    let (vm, _, result) = execute(
        "section data:\n\
         \tdword values 10, 20, 30\n\
         section bss:\n\
         \tdword slot 1\n\
         section code:\n\
         \tldd values+4, %r1\n\
         \tstd %r1, slot\n\
         \tlea values, %r3\n\
         \tldd 8(%r3), %r4\n\
         \tmov $4, %r2\n\
         \tldd (%r3, %r2), %r6\n\
         \tldd [%r3 + 8], %r7\n\
         \tmov %r1, %r0\n\
         \tadd %r4, %r0\n\
         \tadd %r6, %r0\n\
         \tadd %r7, %r0\n",
    );
    assert_eq!(result, 100);
    assert_eq!(vm.memory().read(12, Width::DWord).unwrap(), 20);
}

#[test]
fn width_suffix_masks_the_destination() {
    let (vm, _, _) = execute(
        "section code:\n\
         \tmov $0x1234, %r8\n\
         \tmovb $0x1ff, %r8\n\
         \tmovw $0x12345, %r9\n",
    );
    assert_eq!(vm.register(Register::R8), 0xff);
    assert_eq!(vm.register(Register::R9), 0x2345);
}

#[test]
fn symbol_queries_and_constants() {
    let (vm, _, _) = execute(
        "section data:\n\
         \tword table 1, 2, 3\n\
         \tbyte msg \"hey\", 0\n\
         \tconst LIMIT 7\n\
         \tbyte pad fill(0xaa, LIMIT)\n\
         section code:\n\
         \tmov sizeof(table), %r1\n\
         \tmov lengthof(table), %r2\n\
         \tmov typeof(table), %r3\n\
         \tmov offsetof(msg), %r4\n\
         \tmov LIMIT, %r5\n\
         \tmov sizeof(pad), %r6\n",
    );
    assert_eq!(vm.register(Register::R1), 6);
    assert_eq!(vm.register(Register::R2), 3);
    assert_eq!(vm.register(Register::R3), 2);
    assert_eq!(vm.register(Register::R4), 6);
    assert_eq!(vm.register(Register::R5), 7);
    assert_eq!(vm.register(Register::R6), 7);
    assert_eq!(vm.memory().read(10, Width::Byte).unwrap(), 0xaa);
}

#[test]
fn printf_reads_an_argument_block() {
    let (_, out, _) = execute(
        "section data:\n\
         \tbyte fmt \"n=%d, 100%%\", 0\n\
         \tbyte plain \"%d\", 0\n\
         section bss:\n\
         \tqword args 1\n\
         section code:\n\
         \tst $42, args\n\
         \tprintf fmt, args\n\
         \tprintf plain\n",
    );
    assert_eq!(out, "n=42, 100%%d");
}

#[test]
fn stack_frames_and_calls() {
    let (_, out, result) = execute(
        "section code:\n\
         \tpush $3\n\
         \tcall @square\n\
         \tpop\n\
         \tpint %r0\n\
         \tend\n\
         @square:\n\
         \tenter $16\n\
         \tld 16(%bp), %r0\n\
         \tmul %r0\n\
         \tleave\n\
         \tret\n",
    );
    assert_eq!(out, "9");
    assert_eq!(result, 9);
}

#[test]
fn signed_comparisons_branch() {
    let (_, out, _) = execute(
        "section code:\n\
         \tmov $-2, %r1\n\
         \tcmp $1, %r1\n\
         \tjl @less\n\
         \tpchr $110\n\
         \tend\n\
         @less:\n\
         \tpchr $121\n",
    );
    assert_eq!(out, "y");
}
