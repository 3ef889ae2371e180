use crate::{
    Result,
    huffman::{build_depths, canonical_codes},
    varint::write_uvarint,
};
use std::collections::HashMap;
use std::path::Path;

/// Append-only bit stream, most significant bit of each byte first.
#[derive(Debug, Default)]
struct BitWriter {
    out: Vec<u8>,
    current: u8,
    filled: u32,
}

impl BitWriter {
    fn push(&mut self, code: u64, depth: u32) {
        for i in (0..depth).rev() {
            let bit = ((code >> i) & 1) as u8;
            self.current = (self.current << 1) | bit;
            self.filled += 1;
            if self.filled == 8 {
                self.out.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    /// Zero-pad the partial byte.
    fn align(&mut self) {
        if self.filled > 0 {
            self.current <<= 8 - self.filled;
            self.out.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }
}

#[derive(Debug)]
struct Placement {
    pos: usize,
    pattern: usize,
}

/// Builder of a compressed segment file.
///
/// Words are collected in memory, a pattern dictionary is fixed, and the
/// whole file is emitted in one pass. The output is what [`crate::
/// Decompressor`] reads: a two-stage Huffman scheme where position codes say
/// where patterns land in the output buffer and byte-aligned raw runs fill
/// the gaps.
#[derive(Debug, Default)]
pub struct Compressor {
    words: Vec<Vec<u8>>,
    patterns: Vec<Vec<u8>>,
}

impl Compressor {
    /// A compressor with no pattern dictionary: every byte travels raw,
    /// only word framing is entropy-coded.
    pub fn new() -> Self {
        Self::default()
    }

    /// A compressor with an explicit pattern dictionary. Empty patterns are
    /// ignored; unused ones are dropped from the emitted dictionary.
    pub fn with_patterns(patterns: Vec<Vec<u8>>) -> Self {
        let mut patterns: Vec<Vec<u8>> =
            patterns.into_iter().filter(|p| !p.is_empty()).collect();
        patterns.sort();
        patterns.dedup();
        Self {
            words: Vec::new(),
            patterns,
        }
    }

    /// Append one word. Order is preserved.
    pub fn add_word(&mut self, word: &[u8]) {
        self.words.push(word.to_vec());
    }

    /// Number of words added so far.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Greedy longest-match placement of dictionary patterns over a word.
    fn cover(&self, word: &[u8]) -> Vec<Placement> {
        let mut placements = Vec::new();
        if self.patterns.is_empty() {
            return placements;
        }
        let mut pos = 0;
        while pos < word.len() {
            let mut best: Option<usize> = None;
            for (id, pattern) in self.patterns.iter().enumerate() {
                if word[pos..].starts_with(pattern)
                    && best.map_or(true, |b| pattern.len() > self.patterns[b].len())
                {
                    best = Some(id);
                }
            }
            match best {
                Some(id) => {
                    placements.push(Placement { pos, pattern: id });
                    pos += self.patterns[id].len();
                }
                None => pos += 1,
            }
        }
        placements
    }

    /// Encode all words into a complete segment file image.
    pub fn build(self) -> Result<Vec<u8>> {
        let words_count = self.words.len() as u64;
        let empty_words_count = self.words.iter().filter(|w| w.is_empty()).count() as u64;

        // Fix placements and gather symbol statistics.
        let covers: Vec<Vec<Placement>> = self.words.iter().map(|w| self.cover(w)).collect();

        let mut pattern_freq: HashMap<usize, u64> = HashMap::new();
        let mut pos_freq: HashMap<u64, u64> = HashMap::new();
        for (word, cover) in self.words.iter().zip(&covers) {
            *pos_freq.entry(word.len() as u64 + 1).or_default() += 1;
            let mut prev_pos = 0usize;
            for placement in cover {
                let delta = (placement.pos - prev_pos) as u64;
                *pos_freq.entry(delta + 1).or_default() += 1;
                *pattern_freq.entry(placement.pattern).or_default() += 1;
                prev_pos = placement.pos;
            }
            *pos_freq.entry(0).or_default() += 1;
        }

        // Pattern dictionary: used patterns only, canonical order by
        // (depth, bytes).
        let mut used: Vec<(Vec<u8>, u64)> = pattern_freq
            .iter()
            .map(|(&id, &freq)| (self.patterns[id].clone(), freq))
            .collect();
        used.sort();
        let depths = build_depths(&used.iter().map(|(_, f)| *f).collect::<Vec<_>>())?;
        let mut pattern_entries: Vec<(u32, Vec<u8>)> = depths
            .iter()
            .zip(&used)
            .map(|(&d, (p, _))| (d, p.clone()))
            .collect();
        pattern_entries.sort();
        let pattern_codes = canonical_codes(
            &pattern_entries.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
        )?;
        let pattern_lookup: HashMap<&[u8], (u64, u32)> = pattern_entries
            .iter()
            .zip(&pattern_codes)
            .map(|((depth, pattern), &code)| (pattern.as_slice(), (code, *depth)))
            .collect();

        // Position dictionary, canonical order by (depth, value).
        let mut pos_symbols: Vec<(u64, u64)> = pos_freq.into_iter().collect();
        pos_symbols.sort();
        let depths = build_depths(&pos_symbols.iter().map(|(_, f)| *f).collect::<Vec<_>>())?;
        let mut pos_entries: Vec<(u32, u64)> = depths
            .iter()
            .zip(&pos_symbols)
            .map(|(&d, (v, _))| (d, *v))
            .collect();
        pos_entries.sort();
        let pos_codes =
            canonical_codes(&pos_entries.iter().map(|(d, _)| *d).collect::<Vec<_>>())?;
        let pos_lookup: HashMap<u64, (u64, u32)> = pos_entries
            .iter()
            .zip(&pos_codes)
            .map(|((depth, value), &code)| (*value, (code, *depth)))
            .collect();

        // Header and dictionaries.
        let mut pattern_dict = Vec::new();
        for (depth, pattern) in &pattern_entries {
            write_uvarint(&mut pattern_dict, u64::from(*depth));
            write_uvarint(&mut pattern_dict, pattern.len() as u64);
            pattern_dict.extend_from_slice(pattern);
        }
        let mut pos_dict = Vec::new();
        for (depth, value) in &pos_entries {
            write_uvarint(&mut pos_dict, u64::from(*depth));
            write_uvarint(&mut pos_dict, *value);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&words_count.to_be_bytes());
        out.extend_from_slice(&empty_words_count.to_be_bytes());
        out.extend_from_slice(&(pattern_dict.len() as u64).to_be_bytes());
        out.extend_from_slice(&pattern_dict);
        out.extend_from_slice(&(pos_dict.len() as u64).to_be_bytes());
        out.extend_from_slice(&pos_dict);

        // Body: per word, the code stream, then byte-aligned raw gap bytes.
        for (word, cover) in self.words.iter().zip(&covers) {
            let mut writer = BitWriter::default();
            let (code, depth) = pos_lookup[&(word.len() as u64 + 1)];
            writer.push(code, depth);
            let mut prev_pos = 0usize;
            for placement in cover {
                let delta = (placement.pos - prev_pos) as u64;
                let (code, depth) = pos_lookup[&(delta + 1)];
                writer.push(code, depth);
                let pattern: &[u8] = &self.patterns[placement.pattern];
                let (code, depth) = pattern_lookup[pattern];
                writer.push(code, depth);
                prev_pos = placement.pos;
            }
            let (code, depth) = pos_lookup[&0];
            writer.push(code, depth);
            writer.align();
            out.extend_from_slice(&writer.out);

            // Uncovered runs, in order.
            let mut uncovered = 0usize;
            for placement in cover {
                if placement.pos > uncovered {
                    out.extend_from_slice(&word[uncovered..placement.pos]);
                }
                uncovered = placement.pos + self.patterns[placement.pattern].len();
            }
            if uncovered < word.len() {
                out.extend_from_slice(&word[uncovered..]);
            }
        }
        Ok(out)
    }

    /// Encode and write to `path`.
    pub fn build_to_file(self, path: &Path) -> Result<()> {
        let image = self.build()?;
        std::fs::write(path, image)?;
        Ok(())
    }
}

/// Sample a pattern dictionary from a word set: frequent fixed-width
/// substrings, longest first.
pub fn pattern_sample(words: &[Vec<u8>], max_patterns: usize) -> Vec<Vec<u8>> {
    const WIDTHS: [usize; 4] = [32, 16, 8, 4];
    const MIN_COUNT: u64 = 4;

    let mut patterns = Vec::new();
    for width in WIDTHS {
        let mut counts: HashMap<&[u8], u64> = HashMap::new();
        for word in words {
            for chunk in word.chunks_exact(width) {
                *counts.entry(chunk).or_default() += 1;
            }
        }
        let mut frequent: Vec<(&[u8], u64)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= MIN_COUNT)
            .collect();
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        for (chunk, _) in frequent {
            if patterns.len() >= max_patterns {
                return patterns;
            }
            patterns.push(chunk.to_vec());
        }
    }
    patterns
}
