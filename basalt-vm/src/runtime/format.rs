use std::io::Write;

use super::memory::Memory;
use crate::error::VmError;
use crate::isa::Width;

/// Formats the NUL-terminated string at `format` into `out`, pulling
/// arguments sequentially from the block at `args`.
///
/// Without an argument block every specifier is copied literally.
pub fn printf(
    memory: &Memory,
    out: &mut dyn Write,
    format: u64,
    args: Option<u64>,
) -> Result<(), VmError> {
    let text = memory.read_cstr(format)?.to_vec();
    let mut cursor = args;
    let mut i = 0;

    while i < text.len() {
        let byte = text[i];
        if byte != b'%' {
            out.write_all(&[byte])?;
            i += 1;
            continue;
        }

        let rest = &text[i + 1..];
        if rest.first() == Some(&b'%') {
            out.write_all(b"%")?;
            i += 2;
            continue;
        }

        let Some(addr) = cursor else {
            out.write_all(b"%")?;
            i += 1;
            continue;
        };

        let spec = if rest.starts_with(b"ld") || rest.starts_with(b"lu") {
            &rest[..2]
        } else {
            match rest.first() {
                Some(b'd' | b'u' | b's' | b'c' | b'b') => &rest[..1],
                _ => {
                    out.write_all(b"%")?;
                    i += 1;
                    continue;
                }
            }
        };

        let width = match spec {
            b"ld" | b"lu" | b"s" => Width::QWord,
            b"d" | b"u" => Width::DWord,
            _ => Width::Byte,
        };
        let value = memory.read(addr, width)?;

        match spec {
            b"d" => write!(out, "{}", value as u32 as i32)?,
            b"u" | b"lu" | b"b" => write!(out, "{}", value)?,
            b"ld" => write!(out, "{}", value as i64)?,
            b"c" => out.write_all(&[value as u8])?,
            _ => out.write_all(memory.read_cstr(value)?)?,
        }

        cursor = Some(addr.wrapping_add(width.bytes()));
        i += 1 + spec.len();
    }

    Ok(())
}
