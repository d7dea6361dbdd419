//! Base85 as used by `GIT binary patch` blocks.
//!
//! Every 4 input bytes become 5 output characters, most significant digit
//! first. A short final group is zero-padded and still produces 5
//! characters; the decoder is told how many bytes to keep.

const ALPHABET: &[u8; 85] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";

const fn decode_table() -> [u8; 256] {
    let mut table = [0xff_u8; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

static DECODE: [u8; 256] = decode_table();

/// Characters needed to encode `len` bytes.
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(4) * 5
}

/// Append the encoding of `data` to `out`.
pub fn encode(data: &[u8], out: &mut Vec<u8>) {
    for chunk in data.chunks(4) {
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut acc = u32::from_be_bytes(group);
        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = ALPHABET[(acc % 85) as usize];
            acc /= 85;
        }
        out.extend_from_slice(&digits);
    }
}

/// Decode `src` into exactly `len` bytes. `src` must hold exactly the
/// characters [`encode`] produces for `len` bytes.
pub fn decode(src: &[u8], len: usize) -> Result<Vec<u8>, String> {
    if src.len() != encoded_len(len) {
        return Err(format!(
            "expected {} base85 characters for {len} bytes, found {}",
            encoded_len(len),
            src.len()
        ));
    }
    let mut out = Vec::with_capacity(len);
    let mut remaining = len;
    for group in src.chunks(5) {
        let mut acc: u64 = 0;
        for &ch in group {
            let digit = DECODE[ch as usize];
            if digit == 0xff {
                return Err(format!("invalid base85 character {:?}", ch as char));
            }
            acc = acc * 85 + u64::from(digit);
        }
        let acc = u32::try_from(acc).map_err(|_| "base85 group overflows 32 bits".to_string())?;
        let take = remaining.min(4);
        out.extend_from_slice(&acc.to_be_bytes()[..take]);
        remaining -= take;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode(data, &mut out);
        out
    }

    #[test]
    fn known_vectors() {
        assert_eq!(enc(&[0, 0, 0, 0]), b"00000");
        assert_eq!(enc(&[0xff, 0xff, 0xff, 0xff]), b"|NsC0");
        assert_eq!(enc(b""), b"");
    }

    #[test]
    fn partial_group_is_padded() {
        let encoded = enc(&[1, 2, 3]);
        assert_eq!(encoded.len(), 5);
        assert_eq!(decode(&encoded, 3).unwrap(), [1, 2, 3]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(decode(b"0000", 4).is_err());
        assert!(decode(b"0000\"", 4).is_err());
        // 85^5 - 1 does not fit in 32 bits.
        assert!(decode(b"~~~~~", 4).is_err());
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(data in proptest::collection::vec(any::<u8>(), 0..200)) {
            let encoded = enc(&data);
            prop_assert_eq!(encoded.len(), encoded_len(data.len()));
            prop_assert_eq!(decode(&encoded, data.len()).unwrap(), data);
        }
    }
}
