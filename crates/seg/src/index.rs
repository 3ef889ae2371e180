use crate::{Decompressor, EliasFano, Result, SegError};
use memmap2::Mmap;
use rustc_hash::FxHasher;
use std::fs::File;
use std::hash::Hasher;
use std::path::Path;

fn fx_hash(key: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(key);
    hasher.finish()
}

fn read_u64_at(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .map(|b| u64::from_be_bytes(b.try_into().expect("8 bytes")))
        .ok_or_else(|| SegError::corrupt("index read out of range"))
}

/// Builder for the `.kvi`/`.vi`/`.efi` point-lookup index.
#[derive(Debug, Default)]
pub struct HashIndexBuilder {
    entries: Vec<(u64, u64)>,
}

impl HashIndexBuilder {
    /// Register `key` at `offset`.
    pub fn add(&mut self, key: &[u8], offset: u64) {
        let hash = fx_hash(key).max(1);
        self.entries.push((hash, offset));
    }

    /// Serialize the open-addressed table.
    pub fn build(self) -> Vec<u8> {
        let entry_count = self.entries.len() as u64;
        let slot_count = (entry_count * 4 / 3 + 1).next_power_of_two().max(2);
        let mask = slot_count - 1;
        let mut slots = vec![(0u64, 0u64); slot_count as usize];
        for (hash, offset) in self.entries {
            let mut slot = (hash & mask) as usize;
            while slots[slot].0 != 0 {
                slot = (slot + 1) & mask as usize;
            }
            slots[slot] = (hash, offset);
        }
        let mut out = Vec::with_capacity(16 + slots.len() * 16);
        out.extend_from_slice(&entry_count.to_be_bytes());
        out.extend_from_slice(&slot_count.to_be_bytes());
        for (hash, offset) in slots {
            out.extend_from_slice(&hash.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
        }
        out
    }

    /// Serialize to a file.
    pub fn build_to_file(self, path: &Path) -> Result<()> {
        std::fs::write(path, self.build())?;
        Ok(())
    }
}

/// Memory-mapped open-addressed hash index: key hash to file offset.
///
/// O(1) point lookup. A hit is a candidate only; the caller compares the key
/// word at the returned offset.
#[derive(Debug)]
pub struct HashIndex {
    data: Mmap,
    slot_count: u64,
}

impl HashIndex {
    /// Map an index file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: index files are immutable once published.
        let data = unsafe { Mmap::map(&file)? };
        let slot_count = read_u64_at(&data, 8)?;
        if !slot_count.is_power_of_two() {
            return Err(SegError::corrupt("hash index slot count not a power of two"));
        }
        let expected = 16 + slot_count * 16;
        if (data.len() as u64) < expected {
            return Err(SegError::corrupt("hash index truncated"));
        }
        Ok(Self { data, slot_count })
    }

    /// Number of entries.
    pub fn entry_count(&self) -> Result<u64> {
        read_u64_at(&self.data, 0)
    }

    /// Candidate offsets for `key`, in probe order.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<u64>> {
        let hash = fx_hash(key).max(1);
        let mask = self.slot_count - 1;
        let mut slot = hash & mask;
        loop {
            let base = 16 + (slot * 16) as usize;
            let slot_hash = read_u64_at(&self.data, base)?;
            if slot_hash == 0 {
                return Ok(None);
            }
            if slot_hash == hash {
                return Ok(Some(read_u64_at(&self.data, base + 8)?));
            }
            slot = (slot + 1) & mask;
        }
    }
}

/// Bloom-style existence filter (`.kvei`): fast negative lookups before
/// touching the word file.
#[derive(Debug)]
pub struct ExistenceFilter {
    bits: Vec<u64>,
    bit_count: u64,
    hashes: u32,
}

impl ExistenceFilter {
    /// Bits-per-key calibrated for ~1% false positives at `expected` keys.
    pub fn new(expected: usize) -> Self {
        let bit_count = (expected.max(1) as u64 * 10).next_power_of_two();
        Self {
            bits: vec![0u64; (bit_count / 64).max(1) as usize],
            bit_count,
            hashes: 7,
        }
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let h1 = fx_hash(key);
        let h2 = h1.rotate_left(32) | 1;
        (0..self.hashes).map(move |i| h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.bit_count)
    }

    /// Insert a key.
    pub fn insert(&mut self, key: &[u8]) {
        let positions: Vec<u64> = self.positions(key).collect();
        for pos in positions {
            self.bits[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }
    }

    /// Whether the key may be present. `false` is definitive.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.positions(key)
            .all(|pos| self.bits[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0)
    }

    /// Serialize.
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.bits.len() * 8);
        out.extend_from_slice(&self.bit_count.to_be_bytes());
        out.extend_from_slice(&u64::from(self.hashes).to_be_bytes());
        for word in &self.bits {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Serialize to a file.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.write())?;
        Ok(())
    }

    /// Load from a file.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let bit_count = read_u64_at(&data, 0)?;
        let hashes = read_u64_at(&data, 8)? as u32;
        if bit_count == 0 || !bit_count.is_power_of_two() || hashes == 0 {
            return Err(SegError::corrupt("malformed existence filter"));
        }
        let words = (bit_count / 64).max(1) as usize;
        if data.len() < 16 + words * 8 {
            return Err(SegError::corrupt("existence filter truncated"));
        }
        let bits = (0..words)
            .map(|i| read_u64_at(&data, 16 + i * 8))
            .collect::<Result<Vec<u64>>>()?;
        Ok(Self {
            bits,
            bit_count,
            hashes,
        })
    }
}

/// Builder for the `.bt` ordered-lookup index: Elias-Fano coded offsets of
/// every key word in the paired `.kv` file.
#[derive(Debug, Default)]
pub struct BtIndexBuilder {
    offsets: Vec<u64>,
}

impl BtIndexBuilder {
    /// Register the next key word offset; must be called in file order.
    pub fn add(&mut self, key_offset: u64) {
        debug_assert!(self.offsets.last().map_or(true, |&last| last < key_offset));
        self.offsets.push(key_offset);
    }

    /// Serialize.
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        EliasFano::build(&self.offsets).write(&mut out);
        out
    }

    /// Serialize to a file.
    pub fn build_to_file(self, path: &Path) -> Result<()> {
        std::fs::write(path, self.build())?;
        Ok(())
    }
}

/// Ordered index over a `.kv` file: binary search by key, O(log n) probes,
/// each probe decompressing one key word.
#[derive(Debug)]
pub struct BtIndex {
    offsets: EliasFano,
}

impl BtIndex {
    /// Load from a file.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let offsets = EliasFano::read(&data, &mut 0)?;
        Ok(Self { offsets })
    }

    /// Number of keys.
    pub fn key_count(&self) -> u64 {
        self.offsets.count()
    }

    fn key_at(&self, decomp: &Decompressor, index: u64) -> Result<Vec<u8>> {
        let mut getter = decomp.getter();
        getter.reset(self.offsets.get(index) as usize, 2 * index);
        let mut key = Vec::new();
        getter.next(&mut key)?;
        Ok(key)
    }

    /// Exact lookup: the value word of `key`, if present.
    pub fn get(&self, decomp: &Decompressor, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut lo = 0u64;
        let mut hi = self.key_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key_at(decomp, mid)?.as_slice().cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    let mut getter = decomp.getter();
                    getter.reset(self.offsets.get(mid) as usize, 2 * mid);
                    getter.skip()?;
                    let mut value = Vec::new();
                    getter.next(&mut value)?;
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// First key `>=` the probe, with its index and value.
    pub fn seek(
        &self,
        decomp: &Decompressor,
        probe: &[u8],
    ) -> Result<Option<(u64, Vec<u8>, Vec<u8>)>> {
        let mut lo = 0u64;
        let mut hi = self.key_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(decomp, mid)?.as_slice() < probe {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == self.key_count() {
            return Ok(None);
        }
        let mut getter = decomp.getter();
        getter.reset(self.offsets.get(lo) as usize, 2 * lo);
        let mut key = Vec::new();
        getter.next(&mut key)?;
        let mut value = Vec::new();
        getter.next(&mut value)?;
        Ok(Some((lo, key, value)))
    }
}
