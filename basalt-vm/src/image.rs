//! Binary program container
//!
//! A program image is a sequence of tagged chunks. Each chunk is a one byte
//! tag followed by a little-endian `u64` size and, for data and code, that
//! many payload bytes. The bss chunk carries only its size.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::ImageError;
use crate::isa::{INSTRUCTION_SIZE, Instruction};

pub const DATA_CHUNK: u8 = 0xFD;
pub const CODE_CHUNK: u8 = 0xFC;
pub const BSS_CHUNK: u8 = 0xFB;

/// An assembled program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub data: Vec<u8>,
    pub bss_size: u64,
    pub code: Vec<Instruction>,
}

impl Program {
    pub fn to_bytes(&self) -> Vec<u8> {
        let code_len = self.code.len() * INSTRUCTION_SIZE;
        let mut out = Vec::with_capacity(27 + self.data.len() + code_len);

        out.push(DATA_CHUNK);
        out.extend_from_slice(&(self.data.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.data);

        out.push(BSS_CHUNK);
        out.extend_from_slice(&self.bss_size.to_le_bytes());

        out.push(CODE_CHUNK);
        out.extend_from_slice(&(code_len as u64).to_le_bytes());
        for inst in &self.code {
            out.extend_from_slice(&inst.encode());
        }

        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let mut program = Program::default();
        let mut reader = ChunkReader { bytes, pos: 0 };

        while let Some(tag) = reader.byte() {
            let offset = reader.pos - 1;
            match tag {
                DATA_CHUNK => {
                    let size = reader.size("data")?;
                    program.data = reader.take("data", size)?.to_vec();
                }
                BSS_CHUNK => {
                    program.bss_size = reader.size("bss")?;
                }
                CODE_CHUNK => {
                    let size = reader.size("code")?;
                    if size % INSTRUCTION_SIZE as u64 != 0 {
                        return Err(ImageError::MisalignedCode(size));
                    }
                    let payload = reader.take("code", size)?;
                    program.code = payload
                        .chunks_exact(INSTRUCTION_SIZE)
                        .enumerate()
                        .map(|(index, chunk)| {
                            let mut record = [0u8; INSTRUCTION_SIZE];
                            record.copy_from_slice(chunk);
                            Instruction::decode(&record)
                                .map_err(|source| ImageError::Decode { index, source })
                        })
                        .collect::<Result<_, _>>()?;
                }
                tag => return Err(ImageError::UnknownChunk { tag, offset }),
            }
        }

        Ok(program)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ImageError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ImageError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<(), ImageError> {
        let mut file = File::create(path)?;
        self.write_to(&mut file)
    }

    pub fn load(path: &Path) -> Result<Self, ImageError> {
        Self::from_bytes(&fs::read(path)?)
    }
}

struct ChunkReader<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> ChunkReader<'b> {
    fn byte(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn size(&mut self, chunk: &'static str) -> Result<u64, ImageError> {
        let raw = self.take(chunk, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn take(&mut self, chunk: &'static str, len: u64) -> Result<&'b [u8], ImageError> {
        let remaining = self.bytes.len() - self.pos;
        if len > remaining as u64 {
            return Err(ImageError::Truncated {
                chunk,
                expected: len,
                found: remaining,
            });
        }
        let start = self.pos;
        self.pos += len as usize;
        Ok(&self.bytes[start..self.pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Opcode, RegDesc, Register, Width};

    fn sample() -> Program {
        let mut mov = Instruction::new(Opcode::Mov);
        mov.imm = 42;
        mov.dreg = RegDesc::direct(Register::R0);

        let mut st = Instruction::new(Opcode::Store);
        st.sreg = RegDesc::direct(Register::R0);
        st.dreg = RegDesc::pointer(Register::Ds);
        st.disp = 3;
        st.width = Width::Byte;

        Program {
            data: b"hi\0x".to_vec(),
            bss_size: 16,
            code: vec![mov, st, Instruction::new(Opcode::End)],
        }
    }

    #[test]
    fn image_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes[0], DATA_CHUNK);
        assert_eq!(&bytes[1..9], &4u64.to_le_bytes());
        assert_eq!(&bytes[9..13], b"hi\0x");
        assert_eq!(bytes[13], BSS_CHUNK);
        assert_eq!(bytes[22], CODE_CHUNK);
        assert_eq!(&bytes[23..31], &51u64.to_le_bytes());
        assert_eq!(bytes.len(), 31 + 51);
    }

    #[test]
    fn image_read_back() {
        let program = sample();
        assert_eq!(Program::from_bytes(&program.to_bytes()).unwrap(), program);
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("basalt-image-{}.bbin", std::process::id()));
        let program = sample();
        program.save(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), program.to_bytes());
        assert_eq!(Program::load(&path).unwrap(), program);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn chunks_may_come_in_any_order() {
        let mut bytes = vec![CODE_CHUNK];
        bytes.extend_from_slice(&17u64.to_le_bytes());
        bytes.extend_from_slice(&Instruction::new(Opcode::End).encode());
        bytes.push(DATA_CHUNK);
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.push(7);

        let program = Program::from_bytes(&bytes).unwrap();
        assert_eq!(program.data, vec![7]);
        assert_eq!(program.bss_size, 0);
        assert_eq!(program.code.len(), 1);
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = Program::from_bytes(&[0x10, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            ImageError::UnknownChunk {
                tag: 0x10,
                offset: 0
            }
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut bytes = vec![DATA_CHUNK];
        bytes.extend_from_slice(&10u64.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(ImageError::Truncated { chunk: "data", .. })
        ));
    }

    #[test]
    fn rejects_partial_instruction() {
        let mut bytes = vec![CODE_CHUNK];
        bytes.extend_from_slice(&5u64.to_le_bytes());
        bytes.extend_from_slice(&[0; 5]);
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(ImageError::MisalignedCode(5))
        ));
    }
}
