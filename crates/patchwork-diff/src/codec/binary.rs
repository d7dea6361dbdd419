//! `GIT binary patch` blocks: zlib-compressed payloads written as base85
//! lines.
//!
//! ```text
//! literal 12
//! Tcmb2Rp+0Ey0M7$NG5`Po
//!
//! ```
//!
//! Each line starts with a letter giving its decoded byte count (`A`-`Z`
//! for 1-26, `a`-`z` for 27-52). A blank line ends the block.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::base85;
use crate::error::{DiffError, DiffResult};
use crate::patch::{BinaryKind, BinaryPatchSide};

/// Decoded bytes carried by one full line.
pub const BYTES_PER_LINE: usize = 52;

pub fn deflate(data: &[u8]) -> DiffResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| DiffError::Engine(format!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| DiffError::Engine(format!("deflate failed: {e}")))
}

/// Inflate `data`, which must expand to exactly `expected` bytes.
pub fn inflate(data: &[u8], expected: usize) -> Result<Vec<u8>, String> {
    // The declared size is untrusted; cap the preallocation by the input.
    let mut out = Vec::with_capacity(expected.min(data.len().saturating_mul(8)));
    ZlibDecoder::new(data)
        .take((expected as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| format!("corrupt zlib payload: {e}"))?;
    if out.len() != expected {
        return Err(format!(
            "payload inflates to {} bytes, header declares {expected}",
            out.len()
        ));
    }
    Ok(out)
}

fn length_char(len: usize) -> u8 {
    if len <= 26 {
        b'A' + (len - 1) as u8
    } else {
        b'a' + (len - 27) as u8
    }
}

fn length_from_char(ch: u8) -> Option<usize> {
    match ch {
        b'A'..=b'Z' => Some((ch - b'A') as usize + 1),
        b'a'..=b'z' => Some((ch - b'a') as usize + 27),
        _ => None,
    }
}

/// Write one block, including its trailing blank line.
pub fn write_block(side: &BinaryPatchSide, out: &mut Vec<u8>) {
    let kind = match side.kind {
        BinaryKind::Delta => "delta",
        BinaryKind::Literal | BinaryKind::None => "literal",
    };
    out.extend_from_slice(format!("{kind} {}\n", side.inflated_len).as_bytes());
    for chunk in side.data.chunks(BYTES_PER_LINE) {
        out.push(length_char(chunk.len()));
        base85::encode(chunk, out);
        out.push(b'\n');
    }
    out.push(b'\n');
}

/// Parse a `literal N` / `delta N` line.
pub fn parse_block_header(line: &[u8]) -> Option<(BinaryKind, u64)> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let (kind, rest) = if let Some(rest) = line.strip_prefix(b"literal ") {
        (BinaryKind::Literal, rest)
    } else if let Some(rest) = line.strip_prefix(b"delta ") {
        (BinaryKind::Delta, rest)
    } else {
        return None;
    };
    let len = std::str::from_utf8(rest).ok()?.parse().ok()?;
    Some((kind, len))
}

/// Decode one payload line (without its newline) and append the bytes.
pub fn decode_line(line: &[u8], out: &mut Vec<u8>) -> Result<(), String> {
    let (&first, encoded) = line
        .split_first()
        .ok_or_else(|| "empty binary payload line".to_string())?;
    let len = length_from_char(first)
        .ok_or_else(|| format!("invalid binary length character {:?}", first as char))?;
    out.extend(base85::decode(encoded, len)?);
    Ok(())
}
