//! C-style path quoting for patch headers.
//!
//! A path containing `"`, `\`, control characters or bytes outside
//! printable ASCII is written inside double quotes with escapes. Everything
//! else is written as-is.

fn needs_quoting(b: u8) -> bool {
    b == b'"' || b == b'\\' || !(0x20..=0x7e).contains(&b)
}

/// Append `prefix` + `path` to `out`, quoting the whole when needed.
pub fn write_quoted(prefix: &str, path: &str, out: &mut Vec<u8>) {
    let bytes = prefix.bytes().chain(path.bytes());
    if !bytes.clone().any(needs_quoting) {
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(path.as_bytes());
        return;
    }
    out.push(b'"');
    for b in bytes {
        match b {
            0x07 => out.extend_from_slice(b"\\a"),
            0x08 => out.extend_from_slice(b"\\b"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            0x0b => out.extend_from_slice(b"\\v"),
            0x0c => out.extend_from_slice(b"\\f"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b if needs_quoting(b) => out.extend_from_slice(format!("\\{b:03o}").as_bytes()),
            b => out.push(b),
        }
    }
    out.push(b'"');
}

/// `prefix` + `path`, quoted when needed.
pub fn quoted(prefix: &str, path: &str) -> Vec<u8> {
    let mut out = Vec::new();
    write_quoted(prefix, path, &mut out);
    out
}

/// Decode a quoted string at the start of `src`. Returns the unescaped
/// bytes and how many input bytes the quoted form took, or `None` when
/// `src` does not start with a well-formed quoted string.
pub fn unquote(src: &[u8]) -> Option<(Vec<u8>, usize)> {
    if src.first() != Some(&b'"') {
        return None;
    }
    let mut out = Vec::new();
    let mut i = 1;
    while i < src.len() {
        match src[i] {
            b'"' => return Some((out, i + 1)),
            b'\\' => {
                let esc = *src.get(i + 1)?;
                i += 2;
                let decoded = match esc {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b't' => b'\t',
                    b'n' => b'\n',
                    b'v' => 0x0b,
                    b'f' => 0x0c,
                    b'r' => b'\r',
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'0'..=b'3' => {
                        let digits = src.get(i..i + 2)?;
                        if !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                            return None;
                        }
                        i += 2;
                        ((esc - b'0') << 6) | ((digits[0] - b'0') << 3) | (digits[1] - b'0')
                    }
                    _ => return None,
                };
                out.push(decoded);
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    None
}

/// Read a path that may be quoted: the whole of `src` when unquoted.
pub fn read_path(src: &[u8]) -> Option<String> {
    let bytes = if src.first() == Some(&b'"') {
        let (bytes, used) = unquote(src)?;
        if used != src.len() {
            return None;
        }
        bytes
    } else {
        src.to_vec()
    };
    String::from_utf8(bytes).ok()
}
