use crate::{Result, SegError};

/// Set-bit spacing of first-level jump checkpoints.
const SUPER_Q: u64 = 1 << 14;
/// Set-bit spacing of second-level jump checkpoints.
const Q: u64 = 1 << 8;

/// Quasi-succinct encoding of a monotonically increasing integer sequence.
///
/// Each value is split into `l = floor(log2(u/n))` low bits, stored packed,
/// and a high part stored in unary: element `i` with high part `h` sets bit
/// `h + i`. A two-level jump table over the unary bits gives O(1) `get`.
#[derive(Clone, Debug, Default)]
pub struct EliasFano {
    count: u64,
    max: u64,
    l: u32,
    lower: Vec<u64>,
    upper: Vec<u64>,
    super_jumps: Vec<u64>,
    jumps: Vec<u32>,
}

impl EliasFano {
    /// Encode a sorted sequence. Values must be non-decreasing.
    pub fn build(values: &[u64]) -> Self {
        let count = values.len() as u64;
        if count == 0 {
            return Self::default();
        }
        let max = *values.last().expect("non-empty");
        debug_assert!(values.windows(2).all(|w| w[0] <= w[1]));

        let per_element = max / count;
        let l = if per_element > 0 {
            63 - per_element.leading_zeros()
        } else {
            0
        };

        let lower_bits = count * u64::from(l);
        let mut lower = vec![0u64; lower_bits.div_ceil(64) as usize];
        let upper_bits = (max >> l) + count;
        let mut upper = vec![0u64; (upper_bits + 1).div_ceil(64) as usize];

        for (i, &value) in values.iter().enumerate() {
            if l > 0 {
                let low = value & ((1u64 << l) - 1);
                let bit = i as u64 * u64::from(l);
                let word = (bit / 64) as usize;
                let shift = bit % 64;
                lower[word] |= low << shift;
                if shift + u64::from(l) > 64 {
                    lower[word + 1] |= low >> (64 - shift);
                }
            }
            let pos = (value >> l) + i as u64;
            upper[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }

        let mut this = Self {
            count,
            max,
            l,
            lower,
            upper,
            super_jumps: Vec::new(),
            jumps: Vec::new(),
        };
        this.build_jumps();
        this
    }

    fn build_jumps(&mut self) {
        self.super_jumps.clear();
        self.jumps.clear();
        let mut seen: u64 = 0;
        for (word_index, &word) in self.upper.iter().enumerate() {
            let mut word = word;
            while word != 0 {
                let bit = word.trailing_zeros() as u64;
                let pos = word_index as u64 * 64 + bit;
                if seen % SUPER_Q == 0 {
                    self.super_jumps.push(pos);
                }
                if seen % Q == 0 {
                    let super_base = self.super_jumps[(seen / SUPER_Q) as usize];
                    self.jumps.push((pos - super_base) as u32);
                }
                seen += 1;
                word &= word - 1;
            }
        }
        debug_assert_eq!(seen, self.count);
    }

    /// Number of encoded values.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Largest encoded value; zero when empty.
    #[inline]
    pub fn max(&self) -> u64 {
        self.max
    }

    fn lower_bits(&self, i: u64) -> u64 {
        if self.l == 0 {
            return 0;
        }
        let bit = i * u64::from(self.l);
        let word = (bit / 64) as usize;
        let shift = bit % 64;
        let mut low = self.lower[word] >> shift;
        if shift + u64::from(self.l) > 64 {
            low |= self.lower[word + 1] << (64 - shift);
        }
        low & ((1u64 << self.l) - 1)
    }

    /// Bit position of the `i`-th set upper bit.
    fn select_upper(&self, i: u64) -> u64 {
        let start = self.super_jumps[(i / SUPER_Q) as usize] + u64::from(self.jumps[(i / Q) as usize]);
        let mut remaining = i - (i / Q) * Q;
        let mut word_index = (start / 64) as usize;
        // Mask off bits below the checkpoint position.
        let mut word = self.upper[word_index] & !((1u64 << (start % 64)) - 1);
        loop {
            let ones = word.count_ones() as u64;
            if remaining < ones {
                let mut word = word;
                for _ in 0..remaining {
                    word &= word - 1;
                }
                return word_index as u64 * 64 + word.trailing_zeros() as u64;
            }
            remaining -= ones;
            word_index += 1;
            word = self.upper[word_index];
        }
    }

    /// The `i`-th value. Panics when out of range.
    pub fn get(&self, i: u64) -> u64 {
        assert!(i < self.count, "elias-fano index out of range");
        let upper = self.select_upper(i) - i;
        (upper << self.l) | self.lower_bits(i)
    }

    /// First element `>= value`, with its index.
    pub fn seek(&self, value: u64) -> Option<(u64, u64)> {
        if self.count == 0 || value > self.max {
            return None;
        }
        // Binary search on the monotone sequence; the jump table makes each
        // probe O(1).
        let mut lo = 0u64;
        let mut hi = self.count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.get(mid) < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < self.count).then(|| (lo, self.get(lo)))
    }

    /// Last element `<= value`, with its index.
    pub fn seek_back(&self, value: u64) -> Option<(u64, u64)> {
        if self.count == 0 {
            return None;
        }
        match self.seek(value) {
            Some((i, v)) if v == value => Some((i, v)),
            Some((0, _)) => None,
            Some((i, _)) => Some((i - 1, self.get(i - 1))),
            None => {
                let last = self.count - 1;
                Some((last, self.get(last)))
            }
        }
    }

    /// Iterate all values in order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.count).map(|i| self.get(i))
    }

    /// Serialize; byte-exact with [`Self::read`].
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&self.max.to_be_bytes());
        out.extend_from_slice(&(self.lower.len() as u64).to_be_bytes());
        for word in &self.lower {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(&(self.upper.len() as u64).to_be_bytes());
        for word in &self.upper {
            out.extend_from_slice(&word.to_be_bytes());
        }
    }

    /// Deserialize from `buf` at `offset`, advancing it. The jump tables are
    /// rebuilt rather than stored.
    pub fn read(buf: &[u8], offset: &mut usize) -> Result<Self> {
        let count = read_u64(buf, offset)?;
        let max = read_u64(buf, offset)?;
        if count == 0 {
            return Ok(Self::default());
        }
        let per_element = max / count;
        let l = if per_element > 0 {
            63 - per_element.leading_zeros()
        } else {
            0
        };
        let lower_len = read_u64(buf, offset)?;
        let mut lower = Vec::with_capacity(lower_len as usize);
        for _ in 0..lower_len {
            lower.push(read_u64(buf, offset)?);
        }
        let upper_len = read_u64(buf, offset)?;
        let mut upper = Vec::with_capacity(upper_len as usize);
        for _ in 0..upper_len {
            upper.push(read_u64(buf, offset)?);
        }
        let mut this = Self {
            count,
            max,
            l,
            lower,
            upper,
            super_jumps: Vec::new(),
            jumps: Vec::new(),
        };
        let total_bits: u64 = this.upper.iter().map(|w| w.count_ones() as u64).sum();
        if total_bits != count {
            return Err(SegError::corrupt("elias-fano upper bit count mismatch"));
        }
        this.build_jumps();
        Ok(this)
    }
}

fn read_u64(buf: &[u8], offset: &mut usize) -> Result<u64> {
    let end = *offset + 8;
    let bytes = buf
        .get(*offset..end)
        .ok_or_else(|| SegError::corrupt("truncated elias-fano stream"))?;
    *offset = end;
    Ok(u64::from_be_bytes(bytes.try_into().expect("8 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_sequence() {
        let values = [1u64, 4, 9, 16, 25, 36, 1000];
        let ef = EliasFano::build(&values);
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(ef.get(i as u64), v);
        }
        assert_eq!(ef.seek(0), Some((0, 1)));
        assert_eq!(ef.seek(5), Some((2, 9)));
        assert_eq!(ef.seek(1000), Some((6, 1000)));
        assert_eq!(ef.seek(1001), None);
        assert_eq!(ef.seek_back(5), Some((1, 4)));
        assert_eq!(ef.seek_back(0), None);
        assert_eq!(ef.seek_back(2000), Some((6, 1000)));
    }

    #[test]
    fn dense_sequence_crosses_jump_blocks() {
        let values: Vec<u64> = (0..100_000u64).map(|i| i * 3 + (i % 7)).collect();
        let ef = EliasFano::build(&values);
        for i in (0..values.len()).step_by(997) {
            assert_eq!(ef.get(i as u64), values[i]);
        }
        assert_eq!(ef.get(values.len() as u64 - 1), *values.last().unwrap());
    }

    #[test]
    fn serialization_round_trip() {
        let values: Vec<u64> = (0..5000u64).map(|i| i * i).collect();
        let ef = EliasFano::build(&values);
        let mut buf = Vec::new();
        ef.write(&mut buf);
        let mut offset = 0;
        let decoded = EliasFano::read(&buf, &mut offset).unwrap();
        assert_eq!(offset, buf.len());
        assert_eq!(decoded.count(), ef.count());
        assert!(decoded.iter().eq(ef.iter()));

        // Byte-exact: re-encoding the decoded form reproduces the stream.
        let mut again = Vec::new();
        decoded.write(&mut again);
        assert_eq!(again, buf);
    }

    #[test]
    fn empty_round_trip() {
        let ef = EliasFano::build(&[]);
        assert_eq!(ef.count(), 0);
        assert_eq!(ef.seek(0), None);
        let mut buf = Vec::new();
        ef.write(&mut buf);
        let decoded = EliasFano::read(&buf, &mut 0).unwrap();
        assert_eq!(decoded.count(), 0);
    }

    proptest! {
        #[test]
        fn round_trip_any_sorted(mut values in proptest::collection::vec(0u64..1 << 48, 1..512)) {
            values.sort_unstable();
            values.dedup();
            let ef = EliasFano::build(&values);
            for (i, &v) in values.iter().enumerate() {
                prop_assert_eq!(ef.get(i as u64), v);
            }
            // seek returns the first element >= probe
            for probe in values.iter().copied().chain([0, values[0].saturating_sub(1)]) {
                let expected = values.iter().position(|&v| v >= probe);
                let got = ef.seek(probe).map(|(i, _)| i as usize);
                prop_assert_eq!(got, expected);
            }
        }
    }
}
