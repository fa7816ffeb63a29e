//! Instruction set of the Basalt machine
//!
//! Opcodes, registers and the fixed-size instruction record shared by the
//! assembler and the runtime. Every instruction is one 17 byte record, so a
//! program is nothing more than a flat array of them.

use std::fmt;
use std::ops::BitOr;

/// Size in bytes of one encoded [`Instruction`].
pub const INSTRUCTION_SIZE: usize = 17;

/// Immediate stored by a one-operand `printf`, meaning "no argument block".
pub const NO_ARGS: u64 = u64::MAX;

macro_rules! opcodes {
    ($($name:ident = $code:literal => $mnemonic:literal),* $(,)?) => {
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name = $code),*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic),*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = u8;

            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $($code => Ok(Opcode::$name),)*
                    other => Err(other),
                }
            }
        }
    };
}

opcodes! {
    End = 0x00 => "end",
    Push = 0x01 => "push",
    Pop = 0x02 => "pop",
    Add = 0x03 => "add",
    Sub = 0x04 => "sub",
    Mul = 0x05 => "mul",
    Div = 0x06 => "div",
    Neg = 0x07 => "neg",
    Inc = 0x08 => "inc",
    Dec = 0x09 => "dec",
    Printf = 0x0A => "printf",
    PInt = 0x0B => "pint",
    PStr = 0x0C => "pstr",
    PChr = 0x0D => "pchr",
    Cmp = 0x0E => "cmp",
    Mov = 0x0F => "mov",
    Lea = 0x10 => "lea",
    Enter = 0x11 => "enter",
    Call = 0x12 => "call",
    Ret = 0x13 => "ret",
    Leave = 0x14 => "leave",
    Malloc = 0x15 => "malloc",
    Free = 0x16 => "free",
    Memset = 0x17 => "memset",
    Memcpy = 0x18 => "memcpy",
    Lrzf = 0x19 => "lrzf",
    Srzf = 0x1A => "srzf",
    Store = 0x1B => "st",
    Load = 0x1C => "ld",
    System = 0x1D => "system",
    Syscall = 0x1E => "syscall",
    GetChar = 0x1F => "getchar",
    Jmp = 0x20 => "jmp",
    Jz = 0x21 => "jz",
    Jnz = 0x22 => "jnz",
    Js = 0x23 => "js",
    Jns = 0x24 => "jns",
    Jo = 0x25 => "jo",
    Jno = 0x26 => "jno",
    Jc = 0x27 => "jc",
    Jnc = 0x28 => "jnc",
    Jug = 0x29 => "jug",
    Jul = 0x2A => "jul",
    Jue = 0x2B => "jue",
    June = 0x2C => "june",
    Juge = 0x2D => "juge",
    Jule = 0x2E => "jule",
    Jl = 0x2F => "jl",
    Jg = 0x30 => "jg",
    Jge = 0x31 => "jge",
    Jle = 0x32 => "jle",
    And = 0x33 => "and",
    Or = 0x34 => "or",
    Not = 0x35 => "not",
    Xor = 0x36 => "xor",
    Test = 0x37 => "test",
    Pushar = 0x38 => "pushar",
    Popar = 0x39 => "popar",
    SConio = 0x3A => "sconio",
    DumpFlags = 0x3B => "dumpflags",
    Nop = 0x3C => "nop",
}

impl Opcode {
    /// Case-insensitive mnemonic lookup.
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }

    /// Resolves a mnemonic with an optional `b`/`w`/`d` width suffix. The
    /// bare name is tried first, so `add` is never read as `ad` + `d`.
    pub fn from_sized_mnemonic(name: &str) -> Option<(Opcode, Width)> {
        if let Some(opcode) = Opcode::from_mnemonic(name) {
            return Some((opcode, Width::QWord));
        }
        let mut chars = name.chars();
        let width = Width::from_suffix(chars.next_back()?)?;
        Opcode::from_mnemonic(chars.as_str()).map(|opcode| (opcode, width))
    }

    /// Call and the jump family, the only opcodes that take label operands.
    pub fn is_control_transfer(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Call | Jmp
                | Jz
                | Jnz
                | Js
                | Jns
                | Jo
                | Jno
                | Jc
                | Jnc
                | Jug
                | Jul
                | Jue
                | June
                | Juge
                | Jule
                | Jl
                | Jg
                | Jge
                | Jle
        )
    }

    /// Operand contract checked by the assembler.
    pub fn contract(self) -> Contract {
        use Opcode::*;
        use OperandKinds as K;

        let none = K::NONE;
        let r = K::REG;
        let r_imm = K::REG | K::IMM;
        let r_m = K::REG | K::MEM;
        let r_m_imm = K::REG | K::MEM | K::IMM;
        let target = K::REG | K::IMM | K::LABEL;

        match self {
            End | Ret | Leave | Lrzf | Srzf | Nop | Pushar | Popar | DumpFlags | Syscall => {
                Contract::new(Arity::Zero, none, none)
            }

            Pop => Contract::new(Arity::ZeroOrOne, r, none),
            Push | Enter | Mul | Div | Malloc => Contract::new(Arity::One, r_imm, none),
            Neg | Not | Inc | Dec => Contract::new(Arity::One, r_m, none),
            GetChar | Free => Contract::new(Arity::One, r, none),
            PInt | PChr => Contract::new(Arity::One, r_m_imm, none),
            PStr | System => Contract::new(Arity::One, r_m, none),
            SConio => Contract::new(Arity::One, r_imm, none),
            _ if self.is_control_transfer() => Contract::new(Arity::One, target, none),

            Printf => Contract::new(Arity::OneOrTwo, r_m, r_imm),
            Lea | Load => Contract::new(Arity::Two, K::MEM, r),
            Store => Contract::new(Arity::Two, r_imm, K::MEM),
            Memset | Memcpy => Contract::new(Arity::Two, r_imm, r),

            // mov, cmp and the arithmetic/logic family
            _ => Contract::new(Arity::Two, r_imm, r_m),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// --------------------------------------------
// Registers

macro_rules! registers {
    ($($name:ident = $code:literal => $text:literal),* $(,)?) => {
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Register {
            $($name = $code),*
        }

        impl Register {
            pub const ALL: &'static [Register] = &[$(Register::$name),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Register::$name => $text),*
                }
            }
        }

        impl TryFrom<u8> for Register {
            type Error = u8;

            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $($code => Ok(Register::$name),)*
                    other => Err(other),
                }
            }
        }
    };
}

registers! {
    R0 = 0 => "r0", R1 = 1 => "r1", R2 = 2 => "r2", R3 = 3 => "r3",
    R4 = 4 => "r4", R5 = 5 => "r5", R6 = 6 => "r6", R7 = 7 => "r7",
    R8 = 8 => "r8", R9 = 9 => "r9", R10 = 10 => "r10", R11 = 11 => "r11",
    R12 = 12 => "r12", R13 = 13 => "r13", R14 = 14 => "r14", R15 = 15 => "r15",
    R16 = 16 => "r16", R17 = 17 => "r17", R18 = 18 => "r18", R19 = 19 => "r19",
    R20 = 20 => "r20", R21 = 21 => "r21", R22 = 22 => "r22", R23 = 23 => "r23",
    R24 = 24 => "r24", R25 = 25 => "r25", R26 = 26 => "r26", R27 = 27 => "r27",
    R28 = 28 => "r28", R29 = 29 => "r29", R30 = 30 => "r30", R31 = 31 => "r31",

    Bp = 32 => "bp",
    Sp = 33 => "sp",

    // Status flags
    Sfr = 34 => "sfr",

    // Segment registers
    Cs = 35 => "cs",
    Ss = 36 => "ss",
    Ds = 37 => "ds",
    Es = 38 => "es",
    Fs = 39 => "fs",
    Gs = 40 => "gs",
}

impl Register {
    /// Size of the register file.
    pub const COUNT: usize = 41;

    /// Number of general purpose registers, `r0` through `r31`.
    pub const GENERAL: usize = 32;

    pub fn from_name(name: &str) -> Option<Register> {
        Register::ALL
            .iter()
            .copied()
            .find(|reg| reg.name().eq_ignore_ascii_case(name))
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// Register operand descriptor as stored in an instruction.
///
/// Holds either a register, the `NUL` sentinel (operand absent), and
/// optionally the pointer tag meaning "dereference this register".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegDesc(u8);

impl RegDesc {
    const NUL_CODE: u8 = Register::COUNT as u8;
    const PTR: u8 = 0x80;

    pub const NUL: RegDesc = RegDesc(Self::NUL_CODE);

    pub fn direct(reg: Register) -> Self {
        RegDesc(reg as u8)
    }

    pub fn pointer(reg: Register) -> Self {
        RegDesc(reg as u8 | Self::PTR)
    }

    pub fn is_none(self) -> bool {
        self.0 & !Self::PTR == Self::NUL_CODE
    }

    pub fn is_pointer(self) -> bool {
        !self.is_none() && self.0 & Self::PTR != 0
    }

    pub fn register(self) -> Option<Register> {
        Register::try_from(self.0 & !Self::PTR).ok()
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn from_raw(byte: u8) -> Result<Self, u8> {
        let plain = byte & !Self::PTR;
        if plain == Self::NUL_CODE || Register::try_from(plain).is_ok() {
            Ok(RegDesc(byte))
        } else {
            Err(byte)
        }
    }
}

impl Default for RegDesc {
    fn default() -> Self {
        RegDesc::NUL
    }
}

impl fmt::Debug for RegDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.register() {
            None => write!(f, "NUL"),
            Some(reg) if self.is_pointer() => write!(f, "({})", reg),
            Some(reg) => write!(f, "{}", reg),
        }
    }
}

// --------------------------------------------
// Operand widths

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Width {
    Byte = 8,
    Word = 16,
    DWord = 32,
    #[default]
    QWord = 64,
}

impl Width {
    pub fn from_bits(bits: u8) -> Option<Width> {
        match bits {
            8 => Some(Width::Byte),
            16 => Some(Width::Word),
            32 => Some(Width::DWord),
            64 => Some(Width::QWord),
            _ => None,
        }
    }

    /// Width selected by a mnemonic size suffix (`b`, `w`, `d`).
    pub fn from_suffix(suffix: char) -> Option<Width> {
        match suffix.to_ascii_lowercase() {
            'b' => Some(Width::Byte),
            'w' => Some(Width::Word),
            'd' => Some(Width::DWord),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn bytes(self) -> u64 {
        self as u64 / 8
    }

    pub fn mask(self) -> u64 {
        match self {
            Width::QWord => u64::MAX,
            w => (1u64 << w.bits()) - 1,
        }
    }

    pub fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }

    /// AT&T style suffix used by the disassembler.
    pub fn att_suffix(self) -> char {
        match self {
            Width::Byte => 'b',
            Width::Word => 'w',
            Width::DWord => 'l',
            Width::QWord => 'q',
        }
    }
}

// --------------------------------------------
// Operand contracts

/// How many operands an opcode accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Zero,
    One,
    Two,
    ZeroOrOne,
    OneOrTwo,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Zero => count == 0,
            Arity::One => count == 1,
            Arity::Two => count == 2,
            Arity::ZeroOrOne => count <= 1,
            Arity::OneOrTwo => count == 1 || count == 2,
        }
    }
}

/// Set of operand forms an instruction slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandKinds(u8);

impl OperandKinds {
    pub const NONE: OperandKinds = OperandKinds(0);
    pub const REG: OperandKinds = OperandKinds(0b0001);
    pub const MEM: OperandKinds = OperandKinds(0b0010);
    pub const IMM: OperandKinds = OperandKinds(0b0100);
    pub const LABEL: OperandKinds = OperandKinds(0b1000);

    pub fn contains(self, other: OperandKinds) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for OperandKinds {
    type Output = OperandKinds;

    fn bitor(self, rhs: Self) -> Self::Output {
        OperandKinds(self.0 | rhs.0)
    }
}

impl fmt::Display for OperandKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "[N/A]");
        }

        let names = [
            (OperandKinds::REG, "r"),
            (OperandKinds::MEM, "m"),
            (OperandKinds::IMM, "imm8/16/32/64"),
            (OperandKinds::LABEL, "label"),
        ];
        let listed: Vec<&str> = names
            .iter()
            .filter(|(kind, _)| self.contains(*kind))
            .map(|(_, name)| *name)
            .collect();

        write!(f, "[{}]", listed.join(", "))
    }
}

/// Operand arity and per-slot forms of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contract {
    pub arity: Arity,
    pub source: OperandKinds,
    pub destination: OperandKinds,
}

impl Contract {
    const fn new(arity: Arity, source: OperandKinds, destination: OperandKinds) -> Self {
        Self {
            arity,
            source,
            destination,
        }
    }

    /// Forms accepted by operand `index` (0 = first/source, 1 = second/destination).
    pub fn slot(&self, index: usize) -> OperandKinds {
        match index {
            0 => self.source,
            1 => self.destination,
            _ => OperandKinds::NONE,
        }
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arity == Arity::Zero {
            return write!(f, "no operands");
        }
        write!(f, "op1: {} op2: {}", self.source, self.destination)
    }
}

// --------------------------------------------
// Instruction record

/// Reason an encoded instruction record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {0:#04x}")]
    Opcode(u8),
    #[error("unknown register descriptor {0:#04x}")]
    Register(u8),
    #[error("invalid operand width {0}")]
    Width(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub imm: u64,
    pub sreg: RegDesc,
    pub dreg: RegDesc,
    pub disp: i32,
    pub index: RegDesc,
    pub width: Width,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            imm: 0,
            sreg: RegDesc::NUL,
            dreg: RegDesc::NUL,
            disp: 0,
            index: RegDesc::NUL,
            width: Width::QWord,
        }
    }

    // Layout: opcode | imm (le u64) | sreg | dreg | disp (le i32) | index | width
    pub fn encode(&self) -> [u8; INSTRUCTION_SIZE] {
        let mut bytes = [0u8; INSTRUCTION_SIZE];
        bytes[0] = self.opcode as u8;
        bytes[1..9].copy_from_slice(&self.imm.to_le_bytes());
        bytes[9] = self.sreg.raw();
        bytes[10] = self.dreg.raw();
        bytes[11..15].copy_from_slice(&self.disp.to_le_bytes());
        bytes[15] = self.index.raw();
        bytes[16] = self.width as u8;
        bytes
    }

    pub fn decode(bytes: &[u8; INSTRUCTION_SIZE]) -> Result<Self, DecodeError> {
        let opcode = Opcode::try_from(bytes[0]).map_err(DecodeError::Opcode)?;

        let mut imm = [0u8; 8];
        imm.copy_from_slice(&bytes[1..9]);
        let mut disp = [0u8; 4];
        disp.copy_from_slice(&bytes[11..15]);

        Ok(Self {
            opcode,
            imm: u64::from_le_bytes(imm),
            sreg: RegDesc::from_raw(bytes[9]).map_err(DecodeError::Register)?,
            dreg: RegDesc::from_raw(bytes[10]).map_err(DecodeError::Register)?,
            disp: i32::from_le_bytes(disp),
            index: RegDesc::from_raw(bytes[15]).map_err(DecodeError::Register)?,
            width: Width::from_bits(bytes[16]).ok_or(DecodeError::Width(bytes[16]))?,
        })
    }
}
