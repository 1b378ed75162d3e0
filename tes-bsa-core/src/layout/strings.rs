//! Legacy string encodings: length-prefixed (BString), length-prefixed with
//! a counted NUL (BZString, folder names) and NUL-terminated (CString, the
//! file-name table). Bytes are a single-byte codepage and pass through
//! without any UTF-8 assumption.

use std::io::{Read, Write};

use bstr::{BStr, BString, ByteSlice};
use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::{BsaError, Result};

/// 1-byte length, then exactly that many bytes. No terminator.
pub fn read_bstring<R>(reader: &mut R) -> Result<BString>
where
    R: Read,
{
    let len = reader.read_u8()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(BString::new(buf))
}

pub fn write_bstring<W>(writer: &mut W, value: &BStr) -> Result<()>
where
    W: Write,
{
    let len = u8::try_from(value.len()).map_err(|_| BsaError::InvalidName {
        reason: format!("name exceeds 255 bytes: `{}`", value),
    })?;
    writer.write_u8(len)?;
    writer.write_all(value)?;
    Ok(())
}

/// 1-byte length counting a trailing NUL, then the bytes, then the NUL.
/// Reading tolerates a missing terminator; writing always emits one.
pub fn read_bzstring<R>(reader: &mut R) -> Result<BString>
where
    R: Read,
{
    let mut value = read_bstring(reader)?;
    if value.last() == Some(&0) {
        value.pop();
    }
    Ok(value)
}

pub fn write_bzstring<W>(writer: &mut W, value: &BStr) -> Result<()>
where
    W: Write,
{
    let len = u8::try_from(value.len() + 1).map_err(|_| BsaError::InvalidName {
        reason: format!("name exceeds 254 bytes: `{}`", value),
    })?;
    writer.write_u8(len)?;
    writer.write_all(value)?;
    writer.write_u8(0)?;
    Ok(())
}

pub fn write_cstring<W>(writer: &mut W, value: &BStr) -> Result<()>
where
    W: Write,
{
    writer.write_all(value)?;
    writer.write_u8(0)?;
    Ok(())
}

/// Splits the flat NUL-terminated name table into exactly `expected` names.
/// The table must end with a NUL and hold no empty trailing garbage.
pub fn parse_name_table(block: &[u8], expected: u64) -> Result<Vec<BString>> {
    let mut names = Vec::with_capacity(expected as usize);
    let mut rest = block;
    while !rest.is_empty() {
        match rest.find_byte(0) {
            Some(pos) => {
                names.push(BString::new(rest[..pos].to_vec()));
                rest = &rest[pos + 1..];
            }
            None => {
                // Unterminated tail still names a file; count it and let the
                // length check below decide whether the table was sane.
                names.push(BString::new(rest.to_vec()));
                rest = &[];
            }
        }
    }
    if names.len() as u64 != expected {
        return Err(BsaError::InvalidNameTable {
            expected,
            found: names.len() as u64,
        });
    }
    Ok(names)
}
