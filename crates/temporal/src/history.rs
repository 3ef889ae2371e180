use crate::{
    InvertedIndex, Result, StepSize,
    inverted_index::{parse_txnum, persist, scan_dir},
    registry::{FrozenFiles, Segment, SegmentRegistry},
};
use sse_kv::{Cursor, RoTx, RwTx, Table};
use sse_seg::{Compressor, Decompressor, HashIndex, HashIndexBuilder, SegmentFileName};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One published `.v` + `.vi` pair.
#[derive(Debug)]
struct HistSegment {
    range: (u64, u64),
    words: Decompressor,
    index: HashIndex,
    frozen: FrozenFiles,
}

impl Segment for HistSegment {
    fn step_range(&self) -> (u64, u64) {
        self.range
    }
    fn frozen(&self) -> &FrozenFiles {
        &self.frozen
    }
}

impl HistSegment {
    fn open(dir: &Path, name: &SegmentFileName) -> Result<Self> {
        let v_path = dir.join(name.to_string());
        let vi_path = dir.join(name.with_ext("vi").to_string());
        Ok(Self {
            range: (name.step_from, name.step_to),
            words: Decompressor::open(&v_path)?,
            index: HashIndex::open(&vi_path)?,
            frozen: FrozenFiles::new(vec![v_path, vi_path]),
        })
    }

    fn lookup(&self, composite: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(offset) = self.index.lookup(composite)? else {
            return Ok(None);
        };
        let mut getter = self.words.getter();
        getter.reset(offset as usize, 0);
        let mut stored_key = Vec::new();
        getter.next(&mut stored_key)?;
        if stored_key != composite {
            return Ok(None);
        }
        let mut value = Vec::new();
        getter.next(&mut value)?;
        Ok(Some(value))
    }
}

/// The per-change value log of one domain: for every write at `txnum`, the
/// value that was replaced.
///
/// Hot rows are `key ++ txnum_be -> previous value` (empty meaning the key
/// was absent); frozen ranges live in `.v` segments with a `.vi` hash index
/// on the composite key. Change marks go to the paired [`InvertedIndex`].
#[derive(Debug)]
pub struct History {
    name: String,
    table: Table,
    dir: PathBuf,
    step: StepSize,
    index: InvertedIndex,
    registry: SegmentRegistry<HistSegment>,
}

impl History {
    /// Open, scanning `dir` for previously published segments.
    pub fn new(
        name: &str,
        table: Table,
        index_table: Table,
        dir: PathBuf,
        step: StepSize,
    ) -> Result<Self> {
        let registry = SegmentRegistry::default();
        for file_name in scan_dir(&dir, name, "v")? {
            registry.publish(HistSegment::open(&dir, &file_name)?);
        }
        Ok(Self {
            name: name.to_string(),
            table,
            dir: dir.clone(),
            step,
            index: InvertedIndex::new(name, index_table, dir, step)?,
            registry,
        })
    }

    /// The paired inverted index.
    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    /// Record a change of `key` at `txnum`: `previous` is the replaced
    /// value, empty when the key did not exist.
    pub fn put_prev(
        &self,
        tx: &mut impl RwTx,
        key: &[u8],
        txnum: u64,
        previous: &[u8],
    ) -> Result<()> {
        tx.put(self.table, &composite(key, txnum), previous)?;
        self.index.put(tx, key, txnum)
    }

    /// The previous value recorded at exactly `(key, txnum)`.
    pub fn value_at(&self, tx: &impl RoTx, key: &[u8], txnum: u64) -> Result<Option<Vec<u8>>> {
        let composite = composite(key, txnum);
        if let Some(value) = tx.get(self.table, &composite)? {
            return Ok(Some(value));
        }
        let step = self.step.step_of(txnum);
        for segment in self.registry.snapshot() {
            let (from, to) = segment.step_range();
            if step < from || step >= to {
                continue;
            }
            if let Some(value) = segment.lookup(&composite)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// The value of `key` as of `txnum` (after executing it): the previous
    /// value of the first later change. `Ok(None)` means "no later change";
    /// the caller falls through to the domain's latest value. The inner
    /// option is the time-travel answer, `None` for "absent at that time".
    #[allow(clippy::type_complexity)]
    pub fn get_as_of(
        &self,
        tx: &impl RoTx,
        key: &[u8],
        txnum: u64,
    ) -> Result<Option<Option<Vec<u8>>>> {
        let Some(next_change) = self.index.seek_gt(tx, key, txnum)? else {
            return Ok(None);
        };
        let previous = self
            .value_at(tx, key, next_change)?
            .ok_or(crate::TemporalError::MalformedRow(
                "index mark without history record",
            ))?;
        Ok(Some((!previous.is_empty()).then_some(previous)))
    }

    /// Collate `step_index` into a `.v` segment (and the paired `.ef`),
    /// publish, and prune the hot rows.
    pub fn collate(&self, tx: &mut impl RwTx, step_index: u64) -> Result<()> {
        let lo = self.step.first_txnum(step_index);
        let hi = self.step.end_txnum(step_index);

        let mut records: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut cursor = tx.cursor(self.table)?;
        let mut entry = cursor.first()?;
        while let Some((row_key, value)) = entry {
            let (_, txnum) = split_composite(&row_key)?;
            if txnum >= lo && txnum < hi {
                records.insert(row_key.clone(), value.clone());
            }
            entry = cursor.next()?;
        }
        drop(cursor);
        if !records.is_empty() {
            let name = SegmentFileName::new(&self.name, step_index, step_index + 1, "v");
            let segment = write_hist_segment(&self.dir, &name, &records)?;
            self.registry.publish(segment);
            tracing::debug!(domain = %self.name, step = step_index, records = records.len(), "history collated");
            for row_key in records.keys() {
                tx.delete(self.table, row_key)?;
            }
        }
        self.index.collate(tx, step_index)
    }

    /// Merge history (and index) segments inside `[step_from, step_to)`.
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
        if absorbed.len() >= 2 {
            let mut records: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
            for segment in &absorbed {
                let mut words = segment.words.iter();
                while let (Some(key), Some(value)) = (words.next(), words.next()) {
                    records.insert(key?, value?);
                }
            }
            let (lo, hi) = (
                absorbed.iter().map(|s| s.step_range().0).min().expect("non-empty"),
                absorbed.iter().map(|s| s.step_range().1).max().expect("non-empty"),
            );
            let name = SegmentFileName::new(&self.name, lo, hi, "v");
            let merged = write_hist_segment(&self.dir, &name, &records)?;
            self.registry.replace_merged(lo, hi, merged);
        }
        self.index.merge(step_from, step_to)
    }

    /// Collect and delete every hot record with `txnum >= from`, returning
    /// for each key the earliest removed record's previous value, i.e. the
    /// value in effect before `from`.
    pub fn unwind(&self, tx: &mut impl RwTx, from: u64) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut restored: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut doomed = Vec::new();
        let mut cursor = tx.cursor(self.table)?;
        let mut entry = cursor.first()?;
        while let Some((row_key, value)) = entry {
            let (key, txnum) = split_composite(&row_key)?;
            if txnum >= from {
                // Rows iterate in (key, txnum) order, so the first hit per
                // key is the earliest.
                restored.entry(key.to_vec()).or_insert_with(|| value.clone());
                doomed.push(row_key.clone());
            }
            entry = cursor.next()?;
        }
        drop(cursor);
        for row_key in doomed {
            tx.delete(self.table, &row_key)?;
        }
        self.index.unwind(tx, from)?;
        Ok(restored)
    }
}

pub(crate) fn composite(key: &[u8], txnum: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 8);
    out.extend_from_slice(key);
    out.extend_from_slice(&txnum.to_be_bytes());
    out
}

pub(crate) fn split_composite(row_key: &[u8]) -> Result<(&[u8], u64)> {
    if row_key.len() < 8 {
        return Err(crate::TemporalError::MalformedRow("composite key width"));
    }
    let (key, txnum) = row_key.split_at(row_key.len() - 8);
    Ok((key, parse_txnum(txnum)?))
}

fn write_hist_segment(
    dir: &Path,
    name: &SegmentFileName,
    records: &BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<HistSegment> {
    let mut compressor = Compressor::new();
    for (composite, value) in records {
        compressor.add_word(composite);
        compressor.add_word(value);
    }
    let v_path = dir.join(name.to_string());
    persist(&v_path, &compressor.build()?)?;

    let words = Decompressor::open(&v_path)?;
    let mut index = HashIndexBuilder::default();
    let mut getter = words.getter();
    for composite in records.keys() {
        index.add(composite, getter.offset() as u64);
        getter.skip()?;
        getter.skip()?;
    }
    let vi_path = dir.join(name.with_ext("vi").to_string());
    persist(&vi_path, &index.build())?;

    Ok(HistSegment {
        range: (name.step_from, name.step_to),
        index: HashIndex::open(&vi_path)?,
        words,
        frozen: FrozenFiles::new(vec![v_path, vi_path]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sse_kv::{Kv, MemKv};

    fn setup() -> (MemKv, History, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(
            "accounts",
            Table::AccountsHistory,
            Table::AccountsIndex,
            dir.path().to_path_buf(),
            StepSize(100),
        )
        .unwrap();
        (MemKv::default(), history, dir)
    }

    #[test]
    fn time_travel_over_hot_rows() {
        let (store, history, _dir) = setup();
        let mut tx = store.begin_rw().unwrap();
        // Value sequence: absent -> 1000 @100 -> 1500 @500 -> 2000 @1000.
        history.put_prev(&mut tx, b"A", 100, b"").unwrap();
        history.put_prev(&mut tx, b"A", 500, b"1000").unwrap();
        history.put_prev(&mut tx, b"A", 1000, b"1500").unwrap();

        assert_eq!(history.get_as_of(&tx, b"A", 50).unwrap(), Some(None));
        assert_eq!(
            history.get_as_of(&tx, b"A", 100).unwrap(),
            Some(Some(b"1000".to_vec()))
        );
        assert_eq!(
            history.get_as_of(&tx, b"A", 750).unwrap(),
            Some(Some(b"1500".to_vec()))
        );
        // After the last change the domain answers.
        assert_eq!(history.get_as_of(&tx, b"A", 1000).unwrap(), None);
    }

    #[test]
    fn time_travel_over_frozen_rows() {
        let (store, history, _dir) = setup();
        let mut tx = store.begin_rw().unwrap();
        history.put_prev(&mut tx, b"A", 10, b"").unwrap();
        history.put_prev(&mut tx, b"A", 70, b"old").unwrap();
        history.collate(&mut tx, 0).unwrap();
        tx.commit().unwrap();

        let tx = store.begin_ro().unwrap();
        assert_eq!(tx.get(Table::AccountsHistory, &composite(b"A", 10)).unwrap(), None);
        assert_eq!(history.get_as_of(&tx, b"A", 5).unwrap(), Some(None));
        assert_eq!(
            history.get_as_of(&tx, b"A", 30).unwrap(),
            Some(Some(b"old".to_vec()))
        );
        assert_eq!(history.get_as_of(&tx, b"A", 70).unwrap(), None);
    }

    #[test]
    fn unwind_returns_earliest_previous() {
        let (store, history, _dir) = setup();
        let mut tx = store.begin_rw().unwrap();
        history.put_prev(&mut tx, b"A", 100, b"v1").unwrap();
        history.put_prev(&mut tx, b"A", 200, b"v2").unwrap();
        history.put_prev(&mut tx, b"B", 150, b"").unwrap();

        let restored = history.unwind(&mut tx, 150).unwrap();
        assert_eq!(restored.get(b"A".as_slice()), Some(&b"v2".to_vec()));
        assert_eq!(restored.get(b"B".as_slice()), Some(&b"".to_vec()));

        // Marks at or after 150 are gone, older ones stay.
        assert_eq!(history.index().seek_le(&tx, b"A", 1000).unwrap(), Some(100));
        assert_eq!(history.index().seek_le(&tx, b"B", 1000).unwrap(), None);
        assert_eq!(
            history.value_at(&tx, b"A", 100).unwrap(),
            Some(b"v1".to_vec())
        );
        assert_eq!(history.value_at(&tx, b"A", 200).unwrap(), None);
    }
}
