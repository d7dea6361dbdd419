//! Rolling-hash fingerprints used to score how similar two files are.
//!
//! A 32-byte window slides over the content. Every window position yields a
//! 31-bit polynomial hash; the 127 smallest and 127 largest hashes seen are
//! kept. Two digests are compared by counting the hashes they share.

use std::cmp::Ordering;
use std::io::Read;
use std::path::Path;

use crate::error::{DiffError, DiffResult};

const WINDOW: usize = 32;
const HEAP_SIZE: usize = 127;
const HASH_SHIFT: u32 = 5;
const HASH_MASK: u32 = 0x7fff_ffff;

/// `5^(WINDOW-1) mod 2^31`: the weight of the byte leaving the window.
const SHIFT_N: u32 = {
    let mut n: u32 = 1;
    let mut i = 0;
    while i < WINDOW - 1 {
        n = n.wrapping_mul(HASH_SHIFT) & HASH_MASK;
        i += 1;
    }
    n
};

/// Which whitespace takes part in the hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DigestWhitespace {
    /// Every byte counts.
    #[default]
    Normal,
    /// All ASCII whitespace is skipped.
    IgnoreAll,
    /// `\r` is skipped, as is whitespace directly following a line feed, so
    /// re-indented or blank-line-padded text still matches.
    Smart,
}

/// Fixed-capacity binary heap keeping the `HEAP_SIZE` values that sort
/// first under `keep`.
#[derive(Clone, Debug)]
struct BoundedHeap {
    values: Vec<u32>,
    /// Root ordering: the root is the value that would be evicted first.
    evict_first: fn(&u32, &u32) -> Ordering,
}

impl BoundedHeap {
    fn new(evict_first: fn(&u32, &u32) -> Ordering) -> Self {
        Self {
            values: Vec::with_capacity(HEAP_SIZE),
            evict_first,
        }
    }

    fn insert(&mut self, val: u32) {
        if self.values.len() < HEAP_SIZE {
            self.values.push(val);
            self.sift_up(self.values.len() - 1);
        } else if (self.evict_first)(&self.values[0], &val) == Ordering::Less {
            self.values[0] = val;
            self.sift_down(0);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if (self.evict_first)(&self.values[i], &self.values[parent]) != Ordering::Less {
                break;
            }
            self.values.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.values.len();
        loop {
            let (l, r) = (2 * i + 1, 2 * i + 2);
            let mut top = i;
            if l < len && (self.evict_first)(&self.values[l], &self.values[top]) == Ordering::Less {
                top = l;
            }
            if r < len && (self.evict_first)(&self.values[r], &self.values[top]) == Ordering::Less {
                top = r;
            }
            if top == i {
                break;
            }
            self.values.swap(i, top);
            i = top;
        }
    }

    fn into_sorted(mut self) -> Vec<u32> {
        self.values.sort_unstable();
        self.values
    }
}

/// Streaming digest construction.
#[derive(Clone, Debug)]
pub struct DigestBuilder {
    policy: DigestWhitespace,
    window: [u8; WINDOW],
    filled: usize,
    pos: usize,
    state: u32,
    at_line_start: bool,
    considered: usize,
    mins: BoundedHeap,
    maxs: BoundedHeap,
}

impl DigestBuilder {
    pub fn new(policy: DigestWhitespace) -> Self {
        Self {
            policy,
            window: [0; WINDOW],
            filled: 0,
            pos: 0,
            state: 0,
            at_line_start: true,
            considered: 0,
            // Keeps the smallest values: the largest kept one is evicted first.
            mins: BoundedHeap::new(|a, b| b.cmp(a)),
            maxs: BoundedHeap::new(|a, b| a.cmp(b)),
        }
    }

    fn skip(&mut self, ch: u8) -> bool {
        match self.policy {
            DigestWhitespace::Normal => false,
            DigestWhitespace::IgnoreAll => ch.is_ascii_whitespace(),
            DigestWhitespace::Smart => {
                if ch == b'\r' {
                    return true;
                }
                if self.at_line_start && ch.is_ascii_whitespace() {
                    return true;
                }
                self.at_line_start = ch == b'\n';
                false
            }
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &ch in data {
            if self.skip(ch) {
                continue;
            }
            if self.filled == WINDOW {
                let evicted = self.window[self.pos] as u32;
                self.state = self.state.wrapping_sub(SHIFT_N.wrapping_mul(evicted)) & HASH_MASK;
            } else {
                self.filled += 1;
            }
            self.state = self.state.wrapping_mul(HASH_SHIFT).wrapping_add(ch as u32) & HASH_MASK;
            self.window[self.pos] = ch;
            self.pos = (self.pos + 1) % WINDOW;

            if self.filled == WINDOW {
                self.mins.insert(self.state);
                self.maxs.insert(self.state);
                self.considered += 1;
            }
        }
    }

    /// Finish the digest. Fails with [`DiffError::ContentTooSmall`] when
    /// fewer than 127 window positions were hashed.
    pub fn finish(self) -> DiffResult<SimilarityDigest> {
        if self.considered < HEAP_SIZE {
            return Err(DiffError::ContentTooSmall {
                considered: self.considered,
            });
        }
        Ok(SimilarityDigest {
            mins: self.mins.into_sorted(),
            maxs: self.maxs.into_sorted(),
            considered: self.considered,
        })
    }
}

/// Fixed-size similarity fingerprint of one piece of content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimilarityDigest {
    mins: Vec<u32>,
    maxs: Vec<u32>,
    considered: usize,
}

impl SimilarityDigest {
    pub fn from_bytes(data: &[u8], policy: DigestWhitespace) -> DiffResult<Self> {
        let mut builder = DigestBuilder::new(policy);
        builder.update(data);
        builder.finish()
    }

    /// Build a digest by streaming a file.
    pub fn from_file(path: &Path, policy: DigestWhitespace) -> DiffResult<Self> {
        let io_err = |source: std::io::Error| DiffError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = std::fs::File::open(path).map_err(io_err)?;
        let mut builder = DigestBuilder::new(policy);
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf).map_err(io_err)?;
            if n == 0 {
                break;
            }
            builder.update(&buf[..n]);
        }
        builder.finish()
    }

    /// Number of window positions hashed.
    pub fn considered(&self) -> usize {
        self.considered
    }

    /// Similarity score 0-100: the average of the overlap ratios of the two
    /// heaps, each `100 * matches * 2 / (len_a + len_b)`.
    pub fn compare(&self, other: &SimilarityDigest) -> u16 {
        let mins = overlap_score(&self.mins, &other.mins);
        let maxs = overlap_score(&self.maxs, &other.maxs);
        ((mins + maxs) / 2) as u16
    }
}

fn overlap_score(a: &[u32], b: &[u32]) -> usize {
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let (mut i, mut j, mut matches) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                matches += 1;
                i += 1;
                j += 1;
            }
        }
    }
    100 * matches * 2 / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(lines: usize, seed: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..lines {
            out.extend_from_slice(format!("line {i} of the sample text, seed {seed}\n").as_bytes());
        }
        out
    }

    #[test]
    fn shift_matches_power() {
        let mut expect: u64 = 1;
        for _ in 0..WINDOW - 1 {
            expect = (expect * 5) % (1 << 31);
        }
        assert_eq!(SHIFT_N as u64, expect);
    }

    #[test]
    fn rolling_hash_equals_direct_hash() {
        let data: Vec<u8> = (0..200u32).map(|i| (i * 7 % 251) as u8).collect();
        let mut b = DigestBuilder::new(DigestWhitespace::Normal);
        b.update(&data);
        let mut direct: u32 = 0;
        for &ch in &data[data.len() - WINDOW..] {
            direct = direct.wrapping_mul(5).wrapping_add(ch as u32) & HASH_MASK;
        }
        assert_eq!(b.state, direct);
    }

    #[test]
    fn too_small_is_error() {
        // 127 hashes need 32 + 126 bytes.
        let small = vec![b'a'; WINDOW + HEAP_SIZE - 2];
        assert!(matches!(
            SimilarityDigest::from_bytes(&small, DigestWhitespace::Normal),
            Err(DiffError::ContentTooSmall { considered }) if considered == HEAP_SIZE - 1
        ));
        let just_enough = vec![b'a'; WINDOW + HEAP_SIZE - 1];
        assert!(SimilarityDigest::from_bytes(&just_enough, DigestWhitespace::Normal).is_ok());
    }

    #[test]
    fn whitespace_skipped_content_can_be_too_small() {
        let spaced: Vec<u8> = std::iter::repeat(b" x").take(100).flatten().copied().collect();
        assert!(SimilarityDigest::from_bytes(&spaced, DigestWhitespace::Normal).is_ok());
        assert!(matches!(
            SimilarityDigest::from_bytes(&spaced, DigestWhitespace::IgnoreAll),
            Err(DiffError::ContentTooSmall { .. })
        ));
    }

    #[test]
    fn identical_content_scores_100() {
        let a = SimilarityDigest::from_bytes(&text(40, 1), DigestWhitespace::Normal).unwrap();
        assert_eq!(a.compare(&a), 100);
    }

    #[test]
    fn unrelated_content_scores_low() {
        let a = SimilarityDigest::from_bytes(&text(40, 1), DigestWhitespace::Normal).unwrap();
        let other: Vec<u8> = (0..4000u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let b = SimilarityDigest::from_bytes(&other, DigestWhitespace::Normal).unwrap();
        assert!(a.compare(&b) < 20);
    }

    #[test]
    fn small_edit_scores_high() {
        let base = text(60, 1);
        let mut edited = base.clone();
        edited.extend_from_slice(b"one more line at the end\n");
        let a = SimilarityDigest::from_bytes(&base, DigestWhitespace::Normal).unwrap();
        let b = SimilarityDigest::from_bytes(&edited, DigestWhitespace::Normal).unwrap();
        assert!(a.compare(&b) >= 50);
    }

    #[test]
    fn smart_ignores_indent_and_cr() {
        let plain = text(40, 3);
        let mut noisy = Vec::new();
        for line in plain.split_inclusive(|&b| b == b'\n') {
            noisy.extend_from_slice(b"    ");
            noisy.extend_from_slice(&line[..line.len() - 1]);
            noisy.extend_from_slice(b"\r\n");
        }
        let a = SimilarityDigest::from_bytes(&plain, DigestWhitespace::Smart).unwrap();
        let b = SimilarityDigest::from_bytes(&noisy, DigestWhitespace::Smart).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data = text(80, 9);
        let whole = SimilarityDigest::from_bytes(&data, DigestWhitespace::Normal).unwrap();
        let mut b = DigestBuilder::new(DigestWhitespace::Normal);
        for chunk in data.chunks(17) {
            b.update(chunk);
        }
        assert_eq!(b.finish().unwrap(), whole);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, &data).unwrap();
        assert_eq!(SimilarityDigest::from_file(&path, DigestWhitespace::Normal).unwrap(), whole);
    }

    #[test]
    fn heaps_keep_extremes() {
        let mut mins = BoundedHeap::new(|a, b| b.cmp(a));
        let mut maxs = BoundedHeap::new(|a, b| a.cmp(b));
        for v in (0..1000u32).rev() {
            mins.insert(v);
            maxs.insert(v);
        }
        let mins = mins.into_sorted();
        let maxs = maxs.into_sorted();
        assert_eq!(mins, (0..127).collect::<Vec<_>>());
        assert_eq!(maxs, (873..1000).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn compare_is_symmetric(
            a in proptest::collection::vec(any::<u8>(), 200..600),
            b in proptest::collection::vec(any::<u8>(), 200..600),
        ) {
            let da = SimilarityDigest::from_bytes(&a, DigestWhitespace::Normal).unwrap();
            let db = SimilarityDigest::from_bytes(&b, DigestWhitespace::Normal).unwrap();
            prop_assert_eq!(da.compare(&db), db.compare(&da));
            prop_assert!(da.compare(&db) <= 100);
        }
    }
}
