//! Residue alphabets and mixed-radix k-mer encoding.
//!
//! Conventions
//! - Every alphabet has `radix` known symbols (indices `0..radix`) plus one
//!   unknown symbol at index `radix` (`X` for proteins, `N` for nucleotides).
//! - A k-mer value is `Σ index[i] * radix^i`, i.e. the first residue of the
//!   window is the least significant digit.
//! - Windows containing the unknown symbol are masked: never encoded.

/// Which residue alphabet a table was built with.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AlphabetKind {
    /// 20 standard amino acids, everything else is `X`.
    #[default]
    AminoAcid = 0,
    /// A, C, G, T (U read as T), everything else is `N`.
    Nucleotide = 1,
}

impl AlphabetKind {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(AlphabetKind::AminoAcid),
            1 => Some(AlphabetKind::Nucleotide),
            _ => None,
        }
    }
}

const AMINO_ORDER: &[u8; 20] = b"ACDEFGHIKLMNPQRSTVWY";

/// 256-entry LUT: ASCII → amino-acid index (0..20), 20 (`X`) for anything else.
pub static AMINO_LUT: [u8; 256] = {
    let mut t = [20u8; 256];
    let mut i = 0;
    while i < AMINO_ORDER.len() {
        let c = AMINO_ORDER[i];
        t[c as usize] = i as u8;
        t[(c + 32) as usize] = i as u8;
        i += 1;
    }
    t
};

/// 256-entry LUT: ASCII → nucleotide index (A=0, C=1, G=2, T/U=3), 4 (`N`) otherwise.
pub static NUCLEOTIDE_LUT: [u8; 256] = {
    const N: u8 = 4;
    let mut t = [N; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t[b'U' as usize] = 3;
    t[b'u' as usize] = 3;
    t
};

/// A residue alphabet: LUT plus the number of known symbols.
#[derive(Clone, Copy, Debug)]
pub struct Alphabet {
    lut: &'static [u8; 256],
    radix: u8,
}

impl Alphabet {
    pub fn amino_acid() -> Self {
        Self {
            lut: &AMINO_LUT,
            radix: 20,
        }
    }

    pub fn nucleotide() -> Self {
        Self {
            lut: &NUCLEOTIDE_LUT,
            radix: 4,
        }
    }

    pub fn from_kind(kind: AlphabetKind) -> Self {
        match kind {
            AlphabetKind::AminoAcid => Self::amino_acid(),
            AlphabetKind::Nucleotide => Self::nucleotide(),
        }
    }

    /// Number of known symbols; the base of the k-mer encoding.
    #[inline]
    pub fn radix(&self) -> u8 {
        self.radix
    }

    /// Index reserved for unknown residues (`X` / `N`).
    #[inline]
    pub fn unknown_index(&self) -> u8 {
        self.radix
    }

    /// Map one residue byte to its alphabet index.
    #[inline]
    pub fn map_residue(&self, b: u8) -> u8 {
        self.lut[b as usize]
    }

    /// Largest `k` whose k-mer values all fit in a `u64`.
    pub fn max_k(&self) -> usize {
        let radix = self.radix as u128;
        let mut k = 0u32;
        while radix
            .checked_pow(k + 1)
            .is_some_and(|v| v <= u64::MAX as u128 + 1)
        {
            k += 1;
        }
        k as usize
    }

    /// `radix^(k-1)`, the weight of the last residue in a window.
    pub(crate) fn top_weight(&self, k: usize) -> u64 {
        (self.radix as u64).pow(k as u32 - 1)
    }

    /// `k` is usable: non-zero and at most [`Alphabet::max_k`].
    #[inline]
    pub fn supports(&self, k: usize) -> bool {
        k > 0 && k <= self.max_k()
    }

    /// Iterate over the unmasked k-mers of `residues`. Empty for an
    /// unsupported `k`.
    pub fn kmers<'a>(&self, residues: &'a [u8], k: usize) -> KmerIter<'a> {
        KmerIter::new(*self, residues, k)
    }

    /// Number of unmasked windows of length `k` in `residues`.
    pub fn count_kmers(&self, residues: &[u8], k: usize) -> usize {
        if residues.len() < k || !self.supports(k) {
            return 0;
        }
        let unknown = self.unknown_index();
        let mut run = 0usize;
        let mut n = 0usize;
        for &b in residues {
            if self.map_residue(b) == unknown {
                run = 0;
                continue;
            }
            run += 1;
            if run >= k {
                n += 1;
            }
        }
        n
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::amino_acid()
    }
}

/// Encode a window of alphabet indices as `Σ index[i] * radix^i`.
///
/// Callers are responsible for masking; indices are taken as-is.
#[inline]
pub fn encode_kmer(indices: &[u8], radix: u8) -> u64 {
    indices
        .iter()
        .rev()
        .fold(0u64, |code, &v| code * radix as u64 + v as u64)
}

/// Decode a k-mer value back into its `k` alphabet indices.
pub fn decode_kmer(mut code: u64, k: usize, radix: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(k);
    for _ in 0..k {
        out.push((code % radix as u64) as u8);
        code /= radix as u64;
    }
    out
}

/// Sliding window over one sequence yielding `(start, kmer)` for every
/// window without an unknown residue.
///
/// The value is rolled in O(1): dropping the first residue is a division by
/// the radix (it is the least significant digit), the new residue enters with
/// weight `radix^(k-1)`.
pub struct KmerIter<'a> {
    alphabet: Alphabet,
    residues: &'a [u8],
    k: usize,
    top: u64,
    next: usize,
    code: u64,
    run: usize,
}

impl<'a> KmerIter<'a> {
    fn new(alphabet: Alphabet, residues: &'a [u8], k: usize) -> Self {
        let usable = alphabet.supports(k);
        Self {
            alphabet,
            residues,
            k,
            top: if usable { alphabet.top_weight(k) } else { 0 },
            // unsupported k: start exhausted
            next: if usable { 0 } else { residues.len() },
            code: 0,
            run: 0,
        }
    }
}

impl Iterator for KmerIter<'_> {
    type Item = (usize, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let unknown = self.alphabet.unknown_index();
        while self.next < self.residues.len() {
            let i = self.next;
            self.next += 1;
            let v = self.alphabet.map_residue(self.residues[i]);
            if v == unknown {
                self.run = 0;
                self.code = 0;
                continue;
            }
            let v = v as u64;
            if self.run < self.k {
                // still filling: v enters at digit `run`
                self.code += v * (self.alphabet.radix as u64).pow(self.run as u32);
                self.run += 1;
            } else {
                self.code = self.code / self.alphabet.radix as u64 + v * self.top;
            }
            if self.run >= self.k {
                return Some((i + 1 - self.k, self.code));
            }
        }
        None
    }
}
