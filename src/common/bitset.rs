//! Compact bitset used by the dataflow analyses.
//!
//! Definition IDs are dense sequential u32s, so block states (gen/kill/in/out)
//! are stored as contiguous u64 words rather than hash sets. Union is OR,
//! difference is AND-NOT, and the fixed-point "did anything change" test falls
//! out of the word-level writes for free.

/// A fixed-capacity bitset stored as a contiguous slice of u64 words.
/// Supports O(1) insert/contains and O(n/64) union/difference/subset tests.
#[derive(Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    /// Create a new empty bitset that can hold indices [0..num_bits).
    pub fn new(num_bits: usize) -> Self {
        let num_words = (num_bits + 63) / 64;
        Self { words: vec![0u64; num_words] }
    }

    #[inline(always)]
    pub fn insert(&mut self, idx: usize) {
        let word = idx / 64;
        let bit = idx % 64;
        self.words[word] |= 1u64 << bit;
    }

    #[inline(always)]
    pub fn remove(&mut self, idx: usize) {
        let word = idx / 64;
        let bit = idx % 64;
        self.words[word] &= !(1u64 << bit);
    }

    #[inline(always)]
    pub fn contains(&self, idx: usize) -> bool {
        let word = idx / 64;
        let bit = idx % 64;
        (self.words[word] >> bit) & 1 != 0
    }

    /// self = self | other. Returns true if self changed.
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        let mut changed = false;
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *w;
            *w |= *o;
            changed |= *w != old;
        }
        changed
    }

    /// self = self - other (clear every bit set in other).
    pub fn subtract(&mut self, other: &BitSet) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= !*o;
        }
    }

    /// Computes: self = gen ∪ (in - kill) in one pass. Returns true if self changed.
    pub fn assign_gen_union_in_minus_kill(&mut self, gen: &BitSet, in_set: &BitSet, kill: &BitSet) -> bool {
        let mut changed = false;
        for i in 0..self.words.len() {
            let new_val = gen.words[i] | (in_set.words[i] & !kill.words[i]);
            if new_val != self.words[i] {
                self.words[i] = new_val;
                changed = true;
            }
        }
        changed
    }

    /// True if every bit set in self is also set in other.
    pub fn is_subset_of(&self, other: &BitSet) -> bool {
        self.words.iter().zip(other.words.iter()).all(|(w, o)| w & !o == 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate over all set bits, calling f(bit_index) for each.
    pub fn for_each_set_bit(&self, mut f: impl FnMut(usize)) {
        for (word_idx, &word) in self.words.iter().enumerate() {
            if word == 0 { continue; }
            let base = word_idx * 64;
            let mut w = word;
            while w != 0 {
                let tz = w.trailing_zeros() as usize;
                f(base + tz);
                w &= w - 1; // clear lowest set bit
            }
        }
    }

    /// Clear all bits.
    pub fn clear(&mut self) {
        for w in &mut self.words {
            *w = 0;
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        self.for_each_set_bit(|idx| {
            set.entry(&idx);
        });
        set.finish()
    }
}
