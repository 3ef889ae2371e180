use crate::{
    Result, StepSize, TemporalError,
    registry::{FrozenFiles, Segment, SegmentRegistry},
};
use sse_kv::{Cursor, RoTx, RwTx, Table};
use sse_seg::{
    Compressor, Decompressor, EliasFano, HashIndex, HashIndexBuilder, SegmentFileName,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One published `.ef` + `.efi` pair.
#[derive(Debug)]
pub(crate) struct IiSegment {
    range: (u64, u64),
    words: Decompressor,
    index: HashIndex,
    frozen: FrozenFiles,
}

impl Segment for IiSegment {
    fn step_range(&self) -> (u64, u64) {
        self.range
    }
    fn frozen(&self) -> &FrozenFiles {
        &self.frozen
    }
}

impl IiSegment {
    pub(crate) fn open(dir: &Path, name: &SegmentFileName) -> Result<Self> {
        let ef_path = dir.join(name.to_string());
        let efi_path = dir.join(name.with_ext("efi").to_string());
        Ok(Self {
            range: (name.step_from, name.step_to),
            words: Decompressor::open(&ef_path)?,
            index: HashIndex::open(&efi_path)?,
            frozen: FrozenFiles::new(vec![ef_path, efi_path]),
        })
    }

    /// The change marks of `key` in this segment.
    fn lookup(&self, key: &[u8]) -> Result<Option<EliasFano>> {
        let Some(offset) = self.index.lookup(key)? else {
            return Ok(None);
        };
        let mut getter = self.words.getter();
        getter.reset(offset as usize, 0);
        let mut stored_key = Vec::new();
        getter.next(&mut stored_key)?;
        if stored_key != key {
            // 64-bit hash collision; the index is probabilistic.
            return Ok(None);
        }
        let mut ef_bytes = Vec::new();
        getter.next(&mut ef_bytes)?;
        Ok(Some(EliasFano::read(&ef_bytes, &mut 0)?))
    }
}

/// Per-key sorted sets of the transaction numbers at which the key changed.
///
/// Hot rows are dup-sorted `key -> txnum_be`; frozen ranges live in `.ef`
/// segments holding one Elias-Fano sequence per key.
#[derive(Debug)]
pub struct InvertedIndex {
    name: String,
    table: Table,
    dir: PathBuf,
    step: StepSize,
    pub(crate) registry: SegmentRegistry<IiSegment>,
}

impl InvertedIndex {
    /// Open, scanning `dir` for previously published segments.
    pub fn new(name: &str, table: Table, dir: PathBuf, step: StepSize) -> Result<Self> {
        let registry = SegmentRegistry::default();
        for file_name in scan_dir(&dir, name, "ef")? {
            registry.publish(IiSegment::open(&dir, &file_name)?);
        }
        Ok(Self {
            name: name.to_string(),
            table,
            dir,
            step,
            registry,
        })
    }

    /// Record that `key` changed at `txnum`.
    pub fn put(&self, tx: &mut impl RwTx, key: &[u8], txnum: u64) -> Result<()> {
        tx.put(self.table, key, &txnum.to_be_bytes())?;
        Ok(())
    }

    /// Smallest recorded txnum strictly greater than `target`.
    pub fn seek_gt(&self, tx: &impl RoTx, key: &[u8], target: u64) -> Result<Option<u64>> {
        let probe = target + 1;
        // Oldest-to-newest: the first hit is the smallest.
        for segment in self.registry.snapshot() {
            let (_, step_to) = segment.step_range();
            if self.step.first_txnum(step_to) <= target {
                continue;
            }
            if let Some(ef) = segment.lookup(key)? {
                if let Some((_, found)) = ef.seek(probe) {
                    return Ok(Some(found));
                }
            }
        }
        let mut cursor = tx.cursor(self.table)?;
        match cursor.seek_both_range(key, &probe.to_be_bytes())? {
            Some(value) => Ok(Some(parse_txnum(&value)?)),
            None => Ok(None),
        }
    }

    /// Largest recorded txnum less than or equal to `target`.
    pub fn seek_le(&self, tx: &impl RoTx, key: &[u8], target: u64) -> Result<Option<u64>> {
        // Hot rows are the newest data; any hit there wins.
        let mut cursor = tx.cursor(self.table)?;
        let hot = match cursor.seek_both_range(key, &target.to_be_bytes())? {
            Some(value) if parse_txnum(&value)? == target => Some(target),
            Some(_) => cursor
                .prev_dup()?
                .map(|(_, value)| parse_txnum(&value))
                .transpose()?,
            None => cursor.last_dup(key)?.map(|v| parse_txnum(&v)).transpose()?,
        };
        if let Some(found) = hot {
            return Ok(Some(found));
        }
        // Newest-to-oldest over the frozen ranges.
        for segment in self.registry.snapshot().iter().rev() {
            let (step_from, _) = segment.step_range();
            if self.step.first_txnum(step_from) > target {
                continue;
            }
            if let Some(ef) = segment.lookup(key)? {
                if let Some((_, found)) = ef.seek_back(target) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Collate the hot rows of `step_index` into an `.ef` segment, publish
    /// it, and prune the covered rows.
    pub fn collate(&self, tx: &mut impl RwTx, step_index: u64) -> Result<()> {
        let lo = self.step.first_txnum(step_index);
        let hi = self.step.end_txnum(step_index);

        let mut per_key: BTreeMap<Vec<u8>, Vec<u64>> = BTreeMap::new();
        let mut cursor = tx.cursor(self.table)?;
        let mut entry = cursor.first()?;
        while let Some((key, value)) = entry {
            let txnum = parse_txnum(&value)?;
            if txnum >= lo && txnum < hi {
                per_key.entry(key.clone()).or_default().push(txnum);
            }
            entry = cursor.next()?;
        }
        drop(cursor);
        if per_key.is_empty() {
            return Ok(());
        }

        let name = SegmentFileName::new(&self.name, step_index, step_index + 1, "ef");
        let segment = write_ii_segment(&self.dir, &name, &per_key)?;
        self.registry.publish(segment);
        tracing::debug!(domain = %self.name, step = step_index, keys = per_key.len(), "inverted index collated");

        for (key, txnums) in &per_key {
            for txnum in txnums {
                tx.delete_dup(self.table, key, &txnum.to_be_bytes())?;
            }
        }
        Ok(())
    }

    /// Merge every segment inside `[step_from, step_to)` into one.
    pub fn merge(&self, step_from: u64, step_to: u64) -> Result<()> {
        let absorbed: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| {
                let (from, to) = s.step_range();
                from >= step_from && to <= step_to
            })
            .collect();
        if absorbed.len() < 2 {
            return Ok(());
        }
        let mut per_key: BTreeMap<Vec<u8>, Vec<u64>> = BTreeMap::new();
        for segment in &absorbed {
            let mut words = segment.words.iter();
            while let (Some(key), Some(ef_bytes)) = (words.next(), words.next()) {
                let key = key?;
                let ef = EliasFano::read(&ef_bytes?, &mut 0)?;
                per_key.entry(key).or_default().extend(ef.iter());
            }
        }
        for txnums in per_key.values_mut() {
            txnums.sort_unstable();
            txnums.dedup();
        }
        let (lo, hi) = (
            absorbed.iter().map(|s| s.step_range().0).min().expect("non-empty"),
            absorbed.iter().map(|s| s.step_range().1).max().expect("non-empty"),
        );
        let name = SegmentFileName::new(&self.name, lo, hi, "ef");
        let merged = write_ii_segment(&self.dir, &name, &per_key)?;
        self.registry.replace_merged(lo, hi, merged);
        tracing::debug!(domain = %self.name, lo, hi, "inverted index merged");
        Ok(())
    }

    /// Delete every hot mark with `txnum >= from`. Unwind never reaches into
    /// frozen ranges.
    pub fn unwind(&self, tx: &mut impl RwTx, from: u64) -> Result<()> {
        let mut doomed = Vec::new();
        let mut cursor = tx.cursor(self.table)?;
        let mut entry = cursor.first()?;
        while let Some((key, value)) = entry {
            if parse_txnum(&value)? >= from {
                doomed.push((key.clone(), value.clone()));
            }
            entry = cursor.next()?;
        }
        drop(cursor);
        for (key, value) in doomed {
            tx.delete_dup(self.table, &key, &value)?;
        }
        Ok(())
    }
}

pub(crate) fn parse_txnum(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TemporalError::MalformedRow("txnum width"))?;
    Ok(u64::from_be_bytes(array))
}

fn write_ii_segment(
    dir: &Path,
    name: &SegmentFileName,
    per_key: &BTreeMap<Vec<u8>, Vec<u64>>,
) -> Result<IiSegment> {
    let mut compressor = Compressor::new();
    let mut index = HashIndexBuilder::default();
    let mut planned = Vec::new();
    for (key, txnums) in per_key {
        let mut ef_bytes = Vec::new();
        EliasFano::build(txnums).write(&mut ef_bytes);
        planned.push((key, ef_bytes));
    }
    // First pass fixes the word stream, second records key word offsets by
    // replaying it through a getter after the file exists.
    for (key, ef_bytes) in &planned {
        compressor.add_word(key);
        compressor.add_word(ef_bytes);
    }
    let ef_path = dir.join(name.to_string());
    persist(&ef_path, &compressor.build()?)?;

    let words = Decompressor::open(&ef_path)?;
    let mut getter = words.getter();
    for (key, _) in &planned {
        index.add(key, getter.offset() as u64);
        getter.skip()?;
        getter.skip()?;
    }
    let efi_path = dir.join(name.with_ext("efi").to_string());
    persist(&efi_path, &index.build())?;

    Ok(IiSegment {
        range: (name.step_from, name.step_to),
        index: HashIndex::open(&efi_path)?,
        words,
        frozen: FrozenFiles::new(vec![ef_path, efi_path]),
    })
}

/// Atomically persist a file image: temp name, then rename.
pub(crate) fn persist(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Segment file names of one domain and suffix present in `dir`, oldest
/// first.
pub(crate) fn scan_dir(dir: &Path, domain: &str, ext: &str) -> Result<Vec<SegmentFileName>> {
    let mut names = Vec::new();
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        return Ok(names);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(text) = file_name.to_str() else {
            continue;
        };
        if let Ok(parsed) = text.parse::<SegmentFileName>() {
            if parsed.domain == domain && parsed.ext == ext {
                names.push(parsed);
            }
        }
    }
    names.sort_by_key(|n| (n.step_from, n.step_to));
    Ok(names)
}
