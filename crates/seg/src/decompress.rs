use crate::{
    MAX_HUFFMAN_DEPTH, Result, SegError,
    huffman::canonical_codes,
    varint::read_uvarint,
};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Depth bound of the direct-indexed decoding table; deeper codes fall back
/// to the condensed table.
const DIRECT_BITS: u32 = 9;

/// Word lengths above this bound are treated as corruption.
const MAX_WORD_LEN: u64 = 1 << 28;

/// One decoding table: direct-indexed for codes of depth `<= DIRECT_BITS`,
/// a linearly scanned list of occupied codewords beyond that. The condensed
/// form trades a 2-3x slower lookup for roughly 10x less memory on deep
/// tables.
#[derive(Debug)]
struct HuffTable<S> {
    max_depth: u32,
    bit_len: u32,
    /// `symbol index + 1`, zero meaning "not a short code"; depth in the
    /// high bits.
    direct: Vec<u32>,
    condensed: Vec<(u64, u32, u32)>,
    symbols: Vec<S>,
}

impl<S> HuffTable<S> {
    /// Build from dictionary entries in file order: `(depth, symbol)`,
    /// depths non-decreasing.
    fn build(entries: Vec<(u32, S)>) -> Result<Self> {
        let depths: Vec<u32> = entries.iter().map(|(d, _)| *d).collect();
        if depths.iter().any(|&d| u64::from(d) > MAX_HUFFMAN_DEPTH) {
            return Err(SegError::corrupt("dictionary depth exceeds maximum"));
        }
        let codes = canonical_codes(&depths)?;
        let symbols: Vec<S> = entries.into_iter().map(|(_, s)| s).collect();
        let max_depth = depths.iter().copied().max().unwrap_or(0);
        let bit_len = max_depth.min(DIRECT_BITS);

        let mut direct = vec![0u32; 1usize << bit_len];
        let mut condensed = Vec::new();
        for (i, (&depth, &code)) in depths.iter().zip(&codes).enumerate() {
            if depth <= bit_len {
                let shift = bit_len - depth;
                let base = (code << shift) as usize;
                for suffix in 0..(1usize << shift) {
                    direct[base + suffix] = (i as u32 + 1) | (depth << 24);
                }
            } else {
                condensed.push((code, depth, i as u32));
            }
        }
        Ok(Self {
            max_depth,
            bit_len,
            direct,
            condensed,
            symbols,
        })
    }

    fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Reader over one compressed segment file.
///
/// Not safe for concurrent mutation; any number of [`Getter`]s may share one
/// read-only decompressor. The body is memory-mapped, the OS manages paging.
#[derive(Debug)]
pub struct Decompressor {
    data: Mmap,
    file_name: String,
    words_count: u64,
    empty_words_count: u64,
    patterns: HuffTable<Vec<u8>>,
    positions: HuffTable<u64>,
    words_start: usize,
}

impl Decompressor {
    /// Map and parse a segment file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: segment files are immutable once published.
        let data = unsafe { Mmap::map(&file)? };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(data, file_name)
    }

    fn parse(data: Mmap, file_name: String) -> Result<Self> {
        let corrupt = |reason: &'static str| SegError::CorruptSegment {
            file: Some(file_name.clone()),
            reason,
        };
        let read_u64 = |offset: &mut usize| -> Result<u64> {
            let end = *offset + 8;
            let bytes = data
                .get(*offset..end)
                .ok_or_else(|| corrupt("truncated header"))?;
            *offset = end;
            Ok(u64::from_be_bytes(bytes.try_into().expect("8 bytes")))
        };

        let mut offset = 0usize;
        let words_count = read_u64(&mut offset)?;
        let empty_words_count = read_u64(&mut offset)?;

        let pattern_dict_size = read_u64(&mut offset)? as usize;
        let pattern_end = offset
            .checked_add(pattern_dict_size)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| corrupt("pattern dictionary out of range"))?;
        let mut pattern_entries = Vec::new();
        while offset < pattern_end {
            let depth = read_uvarint(&data[..pattern_end], &mut offset)?;
            if depth > MAX_HUFFMAN_DEPTH {
                return Err(corrupt("dictionary depth exceeds maximum"));
            }
            let len = read_uvarint(&data[..pattern_end], &mut offset)? as usize;
            if len == 0 {
                return Err(corrupt("empty dictionary pattern"));
            }
            let end = offset
                .checked_add(len)
                .filter(|&end| end <= pattern_end)
                .ok_or_else(|| corrupt("pattern bytes out of range"))?;
            pattern_entries.push((depth as u32, data[offset..end].to_vec()));
            offset = end;
        }

        let pos_dict_size = read_u64(&mut offset)? as usize;
        let pos_end = offset
            .checked_add(pos_dict_size)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| corrupt("position dictionary out of range"))?;
        let mut pos_entries = Vec::new();
        while offset < pos_end {
            let depth = read_uvarint(&data[..pos_end], &mut offset)?;
            if depth > MAX_HUFFMAN_DEPTH {
                return Err(corrupt("dictionary depth exceeds maximum"));
            }
            let value = read_uvarint(&data[..pos_end], &mut offset)?;
            pos_entries.push((depth as u32, value));
        }

        let patterns = HuffTable::build(pattern_entries)?;
        let positions = HuffTable::build(pos_entries)?;
        if words_count > 0 && positions.is_empty() {
            return Err(corrupt("missing position dictionary"));
        }

        Ok(Self {
            data,
            file_name,
            words_count,
            empty_words_count,
            patterns,
            positions,
            words_start: offset,
        })
    }

    /// Number of words in the file.
    #[inline]
    pub fn words_count(&self) -> u64 {
        self.words_count
    }

    /// Number of zero-length words.
    #[inline]
    pub fn empty_words_count(&self) -> u64 {
        self.empty_words_count
    }

    /// File name this decompressor was opened from.
    #[inline]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// A fresh cursor at the first word.
    pub fn getter(&self) -> Getter<'_> {
        Getter {
            decomp: self,
            byte: self.words_start,
            bit: 0,
            words_read: 0,
        }
    }

    /// A lazy, non-restartable word sequence. A second pass needs a fresh
    /// getter.
    pub fn iter(&self) -> WordIter<'_> {
        WordIter {
            getter: self.getter(),
        }
    }

    fn corrupt(&self, reason: &'static str) -> SegError {
        SegError::CorruptSegment {
            file: Some(self.file_name.clone()),
            reason,
        }
    }
}

/// Stateful cursor over the body of a [`Decompressor`].
///
/// Carries `(byte offset, bit offset in 0..8)`; every word decode leaves the
/// cursor byte-aligned at the start of the next word.
#[derive(Debug, Clone)]
pub struct Getter<'d> {
    decomp: &'d Decompressor,
    byte: usize,
    bit: u32,
    words_read: u64,
}

impl<'d> Getter<'d> {
    /// Whether another word is available.
    #[inline]
    pub fn has_next(&self) -> bool {
        self.words_read < self.decomp.words_count
    }

    /// Current byte offset, meaningful only at word boundaries.
    #[inline]
    pub fn offset(&self) -> usize {
        self.byte
    }

    /// Reposition to a word boundary previously returned by
    /// [`Getter::offset`].
    pub fn reset(&mut self, offset: usize, words_read_hint: u64) {
        self.byte = offset;
        self.bit = 0;
        self.words_read = words_read_hint;
    }

    /// Peek `width` bits ahead, zero-padded past the end of the file.
    fn peek(&self, width: u32) -> u64 {
        debug_assert!(width <= 57);
        let data = &self.decomp.data;
        let mut acc: u64 = 0;
        for i in 0..8 {
            let byte = data.get(self.byte + i).copied().unwrap_or(0);
            acc = (acc << 8) | u64::from(byte);
        }
        // Skip already-consumed bits of the current byte, keep `width`.
        acc <<= self.bit;
        if width == 0 { 0 } else { acc >> (64 - width) }
    }

    fn consume(&mut self, bits: u32) {
        let total = self.bit + bits;
        self.byte += (total / 8) as usize;
        self.bit = total % 8;
    }

    fn align(&mut self) {
        if self.bit > 0 {
            self.byte += 1;
            self.bit = 0;
        }
    }

    fn next_symbol<S>(&mut self, table: &HuffTable<S>) -> Result<usize> {
        if table.bit_len == 0 {
            // Single-symbol table: the code is the empty bit string.
            if table.symbols.len() != 1 {
                return Err(self.decomp.corrupt("read from empty dictionary"));
            }
            return Ok(0);
        }
        let probe = self.peek(table.bit_len) as usize;
        let entry = table.direct[probe];
        if entry != 0 {
            let depth = entry >> 24;
            self.consume(depth);
            return Ok((entry & 0x00ff_ffff) as usize - 1);
        }
        // Deep code: scan the condensed table.
        let probe = self.peek(table.max_depth);
        for &(code, depth, symbol) in &table.condensed {
            if probe >> (table.max_depth - depth) == code {
                self.consume(depth);
                return Ok(symbol as usize);
            }
        }
        Err(self.decomp.corrupt("invalid huffman code"))
    }

    fn next_pos(&mut self) -> Result<u64> {
        let index = self.next_symbol(&self.decomp.positions)?;
        Ok(self.decomp.positions.symbols[index])
    }

    fn next_pattern(&mut self) -> Result<&'d [u8]> {
        if self.decomp.patterns.is_empty() {
            return Err(self.decomp.corrupt("pattern code without dictionary"));
        }
        let index = self.next_symbol(&self.decomp.patterns)?;
        Ok(&self.decomp.patterns.symbols[index])
    }

    /// Decode the next word, appending it to `out`. Returns the word length.
    pub fn next(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        if !self.has_next() {
            return Err(self.decomp.corrupt("read past last word"));
        }
        let len_code = self.next_pos()?;
        if len_code == 0 {
            return Err(self.decomp.corrupt("zero word length code"));
        }
        let word_len = len_code - 1;
        if word_len > MAX_WORD_LEN {
            return Err(self.decomp.corrupt("word length overflow"));
        }
        let word_len = word_len as usize;
        let start = out.len();
        out.resize(start + word_len, 0);

        // Pattern pass.
        let save = (self.byte, self.bit);
        loop {
            if self.byte > self.decomp.data.len() {
                return Err(self.decomp.corrupt("word stream past end of file"));
            }
            let pos = self.next_pos()?;
            if pos == 0 {
                break;
            }
            let _ = self.next_pattern()?;
        }
        self.align();
        let mut raw = self.byte;

        // Gap pass: re-read positions, place patterns, fill gaps from the
        // raw tail.
        (self.byte, self.bit) = save;
        let mut buf_pos = 0usize;
        let mut last_uncovered = 0usize;
        loop {
            let pos = self.next_pos()?;
            if pos == 0 {
                break;
            }
            buf_pos += pos as usize - 1;
            let pattern = self.next_pattern()?;
            if buf_pos + pattern.len() > word_len {
                return Err(self.decomp.corrupt("pattern exceeds word bounds"));
            }
            if buf_pos > last_uncovered {
                let gap = buf_pos - last_uncovered;
                let bytes = self
                    .decomp
                    .data
                    .get(raw..raw + gap)
                    .ok_or_else(|| self.decomp.corrupt("raw gap out of range"))?;
                out[start + last_uncovered..start + buf_pos].copy_from_slice(bytes);
                raw += gap;
            }
            out[start + buf_pos..start + buf_pos + pattern.len()].copy_from_slice(pattern);
            last_uncovered = buf_pos + pattern.len();
        }
        if last_uncovered < word_len {
            let gap = word_len - last_uncovered;
            let bytes = self
                .decomp
                .data
                .get(raw..raw + gap)
                .ok_or_else(|| self.decomp.corrupt("raw tail out of range"))?;
            out[start + last_uncovered..start + word_len].copy_from_slice(bytes);
            raw += gap;
        }

        self.byte = raw;
        self.bit = 0;
        self.words_read += 1;
        Ok(word_len)
    }

    /// Skip the next word without materializing it. Returns its length.
    pub fn skip(&mut self) -> Result<usize> {
        if !self.has_next() {
            return Err(self.decomp.corrupt("skip past last word"));
        }
        let len_code = self.next_pos()?;
        if len_code == 0 {
            return Err(self.decomp.corrupt("zero word length code"));
        }
        let word_len = (len_code - 1) as usize;

        let mut buf_pos = 0usize;
        let mut last_uncovered = 0usize;
        let mut raw_len = 0usize;
        loop {
            if self.byte > self.decomp.data.len() {
                return Err(self.decomp.corrupt("word stream past end of file"));
            }
            let pos = self.next_pos()?;
            if pos == 0 {
                break;
            }
            buf_pos += pos as usize - 1;
            let pattern_len = self.next_pattern()?.len();
            if buf_pos + pattern_len > word_len {
                return Err(self.decomp.corrupt("pattern exceeds word bounds"));
            }
            if buf_pos > last_uncovered {
                raw_len += buf_pos - last_uncovered;
            }
            last_uncovered = buf_pos + pattern_len;
        }
        if last_uncovered < word_len {
            raw_len += word_len - last_uncovered;
        }
        self.align();
        if self.byte + raw_len > self.decomp.data.len() {
            return Err(self.decomp.corrupt("raw tail out of range"));
        }
        self.byte += raw_len;
        self.words_read += 1;
        Ok(word_len)
    }
}

/// Lazy word iterator; errors end the sequence after yielding once.
#[derive(Debug)]
pub struct WordIter<'d> {
    getter: Getter<'d>,
}

impl Iterator for WordIter<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.getter.has_next() {
            return None;
        }
        let mut word = Vec::new();
        match self.getter.next(&mut word) {
            Ok(_) => Some(Ok(word)),
            Err(e) => {
                // Poison the iterator.
                self.getter.words_read = self.getter.decomp.words_count;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Compressor;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn write_and_open(compressor: Compressor) -> Decompressor {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v1-test.0-1.kv");
        compressor.build_to_file(&path).unwrap();
        Decompressor::open(&path).unwrap()
    }

    fn round_trip(words: &[Vec<u8>], patterns: Vec<Vec<u8>>) {
        let mut compressor = Compressor::with_patterns(patterns);
        for word in words {
            compressor.add_word(word);
        }
        let decomp = write_and_open(compressor);
        assert_eq!(decomp.words_count(), words.len() as u64);

        let decoded: Vec<Vec<u8>> = decomp.iter().collect::<Result<_>>().unwrap();
        assert_eq!(&decoded, words);
    }

    #[test]
    fn plain_words_round_trip() {
        round_trip(
            &[b"hello".to_vec(), b"".to_vec(), b"world!".to_vec()],
            vec![],
        );
    }

    #[test]
    fn pattern_words_round_trip() {
        let words = vec![
            b"the quick brown fox".to_vec(),
            b"the lazy dog".to_vec(),
            b"quick quick quick".to_vec(),
            Vec::new(),
            b"unrelated".to_vec(),
        ];
        round_trip(&words, vec![b"the ".to_vec(), b"quick".to_vec()]);
    }

    #[test]
    fn skip_matches_next() {
        let words = vec![
            b"alpha".to_vec(),
            b"beta".to_vec(),
            Vec::new(),
            b"gamma gamma".to_vec(),
        ];
        let mut compressor = Compressor::with_patterns(vec![b"gamma".to_vec()]);
        for word in &words {
            compressor.add_word(word);
        }
        let decomp = write_and_open(compressor);

        let mut skipper = decomp.getter();
        let mut reader = decomp.getter();
        for word in &words {
            let skipped = skipper.skip().unwrap();
            let mut buf = Vec::new();
            reader.next(&mut buf).unwrap();
            assert_eq!(skipped, word.len());
            assert_eq!(&buf, word);
            assert_eq!(skipper.offset(), reader.offset());
        }
        assert!(!skipper.has_next());
    }

    #[test]
    fn getter_offsets_reposition() {
        let words = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];
        let mut compressor = Compressor::new();
        for word in &words {
            compressor.add_word(word);
        }
        let decomp = write_and_open(compressor);

        let mut getter = decomp.getter();
        getter.skip().unwrap();
        let offset = getter.offset();
        let mut buf = Vec::new();
        getter.next(&mut buf).unwrap();
        assert_eq!(buf, b"two");

        let mut other = decomp.getter();
        other.reset(offset, 1);
        let mut buf = Vec::new();
        other.next(&mut buf).unwrap();
        assert_eq!(buf, b"two");
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let mut compressor = Compressor::new();
        compressor.add_word(b"some data that makes the body long enough");
        let image = compressor.build().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v1-trunc.0-1.kv");
        std::fs::write(&path, &image[..image.len() - 5]).unwrap();
        let decomp = Decompressor::open(&path).unwrap();
        let mut buf = Vec::new();
        assert!(matches!(
            decomp.getter().next(&mut buf),
            Err(SegError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn random_words_with_sampled_patterns() {
        let mut rng = StdRng::seed_from_u64(0x5e6);
        let alphabet = b"abcd";
        let words: Vec<Vec<u8>> = (0..200)
            .map(|_| {
                let len = rng.gen_range(0..120);
                (0..len).map(|_| alphabet[rng.gen_range(0..4)]).collect()
            })
            .collect();
        let patterns = crate::pattern_sample(&words, 16);
        round_trip(&words, patterns);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn round_trip_any_words(words in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..200), 0..50
        )) {
            round_trip(&words, vec![]);
        }
    }
}
