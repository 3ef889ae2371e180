use crate::{
    History, Result, StepSize,
    inverted_index::{persist, scan_dir},
    registry::{FrozenFiles, Segment, SegmentRegistry},
    step::{inv_step_bytes, step_from_inv},
};
use sse_kv::{Cursor, RoTx, RwTx, Table};
use sse_seg::{
    BtIndex, BtIndexBuilder, Compressor, Decompressor, ExistenceFilter, HashIndex,
    HashIndexBuilder, SegmentFileName,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One published domain file set: `.kv` words with the `.kvi` point index,
/// `.kvei` existence filter and `.bt` ordered index.
#[derive(Debug)]
struct DomainSegment {
    range: (u64, u64),
    words: Decompressor,
    point: HashIndex,
    existence: ExistenceFilter,
    ordered: BtIndex,
    frozen: FrozenFiles,
}

impl Segment for DomainSegment {
    fn step_range(&self) -> (u64, u64) {
        self.range
    }
    fn frozen(&self) -> &FrozenFiles {
        &self.frozen
    }
}

impl DomainSegment {
    fn open(dir: &Path, name: &SegmentFileName) -> Result<Self> {
        let kv_path = dir.join(name.to_string());
        let kvi_path = dir.join(name.with_ext("kvi").to_string());
        let kvei_path = dir.join(name.with_ext("kvei").to_string());
        let bt_path = dir.join(name.with_ext("bt").to_string());
        Ok(Self {
            range: (name.step_from, name.step_to),
            words: Decompressor::open(&kv_path)?,
            point: HashIndex::open(&kvi_path)?,
            existence: ExistenceFilter::open(&kvei_path)?,
            ordered: BtIndex::open(&bt_path)?,
            frozen: FrozenFiles::new(vec![kv_path, kvi_path, kvei_path, bt_path]),
        })
    }

    /// Value of `key` in this file: existence filter, then the point index,
    /// then the ordered index as fallback.
    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.existence.may_contain(key) {
            return Ok(None);
        }
        if let Some(offset) = self.point.lookup(key)? {
            let mut getter = self.words.getter();
            getter.reset(offset as usize, 0);
            let mut stored_key = Vec::new();
            getter.next(&mut stored_key)?;
            if stored_key == key {
                let mut value = Vec::new();
                getter.next(&mut value)?;
                return Ok(Some(value));
            }
        }
        Ok(self.ordered.get(&self.words, key)?)
    }
}

/// Construction parameters of a [`Domain`].
#[derive(Clone, Debug)]
pub struct DomainConfig {
    /// Domain name, used in segment file names.
    pub name: &'static str,
    /// Hot table holding `key ++ ~step -> step ++ value` rows.
    pub hot_table: Table,
    /// History and index tables; `None` for domains without time travel.
    pub history_tables: Option<(Table, Table)>,
    /// Directory of the published segment files.
    pub dir: PathBuf,
    /// Step width.
    pub step: StepSize,
}

/// Flat latest-value store of one logical state family.
///
/// Hot rows key the value by `key ++ ~step` so the newest row of a key is
/// the first one a forward cursor meets; values carry their step and an
/// empty payload is a tombstone. Writes feed the paired [`History`] first,
/// making every mutation time-travelable and unwindable.
#[derive(Debug)]
pub struct Domain {
    name: &'static str,
    hot_table: Table,
    history: Option<History>,
    dir: PathBuf,
    step: StepSize,
    registry: SegmentRegistry<DomainSegment>,
}

impl Domain {
    /// Open a domain, scanning its directory for published segments.
    pub fn new(config: DomainConfig) -> Result<Self> {
        let registry = SegmentRegistry::default();
        for file_name in scan_dir(&config.dir, config.name, "kv")? {
            registry.publish(DomainSegment::open(&config.dir, &file_name)?);
        }
        let history = config
            .history_tables
            .map(|(history_table, index_table)| {
                History::new(
                    config.name,
                    history_table,
                    index_table,
                    config.dir.clone(),
                    config.step,
                )
            })
            .transpose()?;
        Ok(Self {
            name: config.name,
            hot_table: config.hot_table,
            history,
            dir: config.dir,
            step: config.step,
            registry,
        })
    }

    /// Domain name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The paired history, if this domain keeps one.
    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    /// One past the highest step already collated into segments.
    pub fn frozen_step(&self) -> u64 {
        self.registry.frozen_step()
    }

    /// The configured step width.
    pub fn step_size(&self) -> StepSize {
        self.step
    }

    fn hot_row_key(&self, key: &[u8], step: u64) -> Vec<u8> {
        let mut row = Vec::with_capacity(key.len() + 8);
        row.extend_from_slice(key);
        row.extend_from_slice(&inv_step_bytes(step));
        row
    }

    /// Newest hot row of `key`: `(payload, step)`, payload empty for a
    /// tombstone.
    fn hot_latest(&self, tx: &impl RoTx, key: &[u8]) -> Result<Option<(Vec<u8>, u64)>> {
        let mut cursor = tx.cursor(self.hot_table)?;
        let Some((row_key, value)) = cursor.seek(key)? else {
            return Ok(None);
        };
        if row_key.len() != key.len() + 8 || !row_key.starts_with(key) {
            return Ok(None);
        }
        let step = step_from_inv(&row_key[key.len()..])
            .ok_or(crate::TemporalError::MalformedRow("inverted step suffix"))?;
        if value.len() < 8 {
            return Err(crate::TemporalError::MalformedRow("hot value step prefix"));
        }
        Ok(Some((value[8..].to_vec(), step)))
    }

    /// Latest value of `key` with its originating step. Hot rows first, then
    /// segments newest-to-oldest. Tombstones answer `None`.
    pub fn get_latest(&self, tx: &impl RoTx, key: &[u8]) -> Result<Option<(Vec<u8>, u64)>> {
        if let Some((payload, step)) = self.hot_latest(tx, key)? {
            return Ok((!payload.is_empty()).then_some((payload, step)));
        }
        for segment in self.registry.snapshot().iter().rev() {
            if let Some(value) = segment.lookup(key)? {
                let (_, step_to) = segment.step_range();
                return Ok((!value.is_empty()).then_some((value, step_to.saturating_sub(1))));
            }
        }
        Ok(None)
    }

    /// Value of `key` as of `txnum`, through history plus latest.
    pub fn get_as_of(&self, tx: &impl RoTx, key: &[u8], txnum: u64) -> Result<Option<Vec<u8>>> {
        if let Some(history) = &self.history {
            if let Some(answer) = history.get_as_of(tx, key, txnum)? {
                return Ok(answer);
            }
        }
        Ok(self.get_latest(tx, key)?.map(|(value, _)| value))
    }

    /// Write `value` under `key` at `txnum`, recording the previous value in
    /// history first.
    pub fn put(&self, tx: &mut impl RwTx, key: &[u8], value: &[u8], txnum: u64) -> Result<()> {
        self.write(tx, key, value, txnum)
    }

    /// Delete `key` at `txnum`: a put of the tombstone payload.
    pub fn delete(&self, tx: &mut impl RwTx, key: &[u8], txnum: u64) -> Result<()> {
        self.write(tx, key, &[], txnum)
    }

    fn write(&self, tx: &mut impl RwTx, key: &[u8], value: &[u8], txnum: u64) -> Result<()> {
        if let Some(history) = &self.history {
            let previous = self
                .get_latest(tx, key)?
                .map(|(payload, _)| payload)
                .unwrap_or_default();
            history.put_prev(tx, key, txnum, &previous)?;
        }
        let step = self.step.step_of(txnum);
        let mut row_value = Vec::with_capacity(8 + value.len());
        row_value.extend_from_slice(&step.to_be_bytes());
        row_value.extend_from_slice(value);
        tx.put(self.hot_table, &self.hot_row_key(key, step), &row_value)?;
        Ok(())
    }

    /// Latest value per key across segments and hot rows, tombstones
    /// resolved. Feeds the commitment.
    pub fn iter_latest(&self, tx: &impl RoTx) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut overlay: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for segment in self.registry.snapshot() {
            let mut words = segment.words.iter();
            while let (Some(key), Some(value)) = (words.next(), words.next()) {
                overlay.insert(key?, value?);
            }
        }
        let mut cursor = tx.cursor(self.hot_table)?;
        let mut entry = cursor.first()?;
        let mut last_key: Option<Vec<u8>> = None;
        while let Some((row_key, value)) = entry {
            if row_key.len() < 8 || value.len() < 8 {
                return Err(crate::TemporalError::MalformedRow("hot row layout"));
            }
            let key = &row_key[..row_key.len() - 8];
            // Rows of one key sort newest first; only the first counts.
            if last_key.as_deref() != Some(key) {
                overlay.insert(key.to_vec(), value[8..].to_vec());
                last_key = Some(key.to_vec());
            }
            entry = cursor.next()?;
        }
        overlay.retain(|_, value| !value.is_empty());
        Ok(overlay)
    }

    /// Collate the hot rows of `step_index` into a `.kv` file set (and the
    /// paired history and index segments), publish, and prune.
    pub fn collate(&self, tx: &mut impl RwTx, step_index: u64) -> Result<()> {
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let suffix = inv_step_bytes(step_index);
        let mut cursor = tx.cursor(self.hot_table)?;
        let mut entry = cursor.first()?;
        while let Some((row_key, value)) = entry {
            if row_key.len() >= 8 && row_key[row_key.len() - 8..] == suffix {
                if value.len() < 8 {
                    return Err(crate::TemporalError::MalformedRow("hot value step prefix"));
                }
                rows.insert(row_key[..row_key.len() - 8].to_vec(), value[8..].to_vec());
            }
            entry = cursor.next()?;
        }
        drop(cursor);

        if !rows.is_empty() {
            let name = SegmentFileName::new(self.name, step_index, step_index + 1, "kv");
            let segment = write_domain_segment(&self.dir, &name, &rows)?;
            self.registry.publish(segment);
            tracing::info!(domain = self.name, step = step_index, keys = rows.len(), "domain collated");
            for key in rows.keys() {
                tx.delete(self.hot_table, &self.hot_row_key(key, step_index))?;
            }
        }
        if let Some(history) = &self.history {
            history.collate(tx, step_index)?;
        }
        Ok(())
    }

    /// Merge the segments inside `[step_from, step_to)` into one file set,
    /// newest value per key winning. Tombstones are dropped only when the
    /// merged file is the oldest possible one.
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
            // Oldest-to-newest so later inserts overwrite.
            let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
            for segment in &absorbed {
                let mut words = segment.words.iter();
                while let (Some(key), Some(value)) = (words.next(), words.next()) {
                    rows.insert(key?, value?);
                }
            }
            let (lo, hi) = (
                absorbed.iter().map(|s| s.step_range().0).min().expect("non-empty"),
                absorbed.iter().map(|s| s.step_range().1).max().expect("non-empty"),
            );
            if lo == 0 {
                rows.retain(|_, value| !value.is_empty());
            }
            let name = SegmentFileName::new(self.name, lo, hi, "kv");
            let merged = write_domain_segment(&self.dir, &name, &rows)?;
            self.registry.replace_merged(lo, hi, merged);
            tracing::info!(domain = self.name, lo, hi, "domain merged");
        }
        if let Some(history) = &self.history {
            history.merge(step_from, step_to)?;
        }
        Ok(())
    }

    /// Undo every write with `txnum >= from`: restore each touched key to
    /// its value before `from` and drop the covering history rows. Unwind
    /// never reaches frozen ranges.
    pub fn unwind(&self, tx: &mut impl RwTx, from: u64) -> Result<()> {
        let Some(history) = &self.history else {
            return Ok(());
        };
        let restored = history.unwind(tx, from)?;
        if restored.is_empty() {
            return Ok(());
        }
        let restore_step = self.step.step_of(from);
        for (key, previous) in restored {
            // Drop newer hot rows of the key, then rewrite the restored
            // value at the unwind step.
            let mut doomed = Vec::new();
            let mut cursor = tx.cursor(self.hot_table)?;
            let mut entry = cursor.seek(&key)?;
            while let Some((row_key, _)) = entry {
                if row_key.len() != key.len() + 8 || !row_key.starts_with(&key) {
                    break;
                }
                let step = step_from_inv(&row_key[key.len()..])
                    .ok_or(crate::TemporalError::MalformedRow("inverted step suffix"))?;
                if step >= restore_step {
                    doomed.push(row_key.clone());
                }
                entry = cursor.next()?;
            }
            drop(cursor);
            for row_key in doomed {
                tx.delete(self.hot_table, &row_key)?;
            }
            let mut row_value = Vec::with_capacity(8 + previous.len());
            row_value.extend_from_slice(&restore_step.to_be_bytes());
            row_value.extend_from_slice(&previous);
            tx.put(self.hot_table, &self.hot_row_key(&key, restore_step), &row_value)?;
        }
        Ok(())
    }
}

fn write_domain_segment(
    dir: &Path,
    name: &SegmentFileName,
    rows: &BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<DomainSegment> {
    let mut compressor = Compressor::new();
    for (key, value) in rows {
        compressor.add_word(key);
        compressor.add_word(value);
    }
    let kv_path = dir.join(name.to_string());
    persist(&kv_path, &compressor.build()?)?;

    let words = Decompressor::open(&kv_path)?;
    let mut point = HashIndexBuilder::default();
    let mut existence = ExistenceFilter::new(rows.len());
    let mut ordered = BtIndexBuilder::default();
    let mut getter = words.getter();
    for key in rows.keys() {
        let offset = getter.offset() as u64;
        point.add(key, offset);
        existence.insert(key);
        ordered.add(offset);
        getter.skip()?;
        getter.skip()?;
    }
    let kvi_path = dir.join(name.with_ext("kvi").to_string());
    persist(&kvi_path, &point.build())?;
    let kvei_path = dir.join(name.with_ext("kvei").to_string());
    persist(&kvei_path, &existence.write())?;
    let bt_path = dir.join(name.with_ext("bt").to_string());
    persist(&bt_path, &ordered.build())?;

    Ok(DomainSegment {
        range: (name.step_from, name.step_to),
        point: HashIndex::open(&kvi_path)?,
        existence: ExistenceFilter::open(&kvei_path)?,
        ordered: BtIndex::open(&bt_path)?,
        words,
        frozen: FrozenFiles::new(vec![kv_path, kvi_path, kvei_path, bt_path]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sse_kv::{Kv, MemKv};

    fn setup(step: u64) -> (MemKv, Domain, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let domain = Domain::new(DomainConfig {
            name: "accounts",
            hot_table: Table::PlainState,
            history_tables: Some((Table::AccountsHistory, Table::AccountsIndex)),
            dir: dir.path().to_path_buf(),
            step: StepSize(step),
        })
        .unwrap();
        (MemKv::default(), domain, dir)
    }

    #[test]
    fn latest_wins_within_hot() {
        let (store, domain, _dir) = setup(100);
        let mut tx = store.begin_rw().unwrap();
        domain.put(&mut tx, b"A", b"v1", 10).unwrap();
        domain.put(&mut tx, b"A", b"v2", 150).unwrap();
        domain.put(&mut tx, b"A", b"v3", 450).unwrap();

        let (value, step) = domain.get_latest(&tx, b"A").unwrap().unwrap();
        assert_eq!(value, b"v3");
        assert_eq!(step, 4);
        assert_eq!(domain.get_latest(&tx, b"B").unwrap(), None);
    }

    #[test]
    fn tombstone_hides_value() {
        let (store, domain, _dir) = setup(100);
        let mut tx = store.begin_rw().unwrap();
        domain.put(&mut tx, b"A", b"v1", 10).unwrap();
        domain.delete(&mut tx, b"A", 20).unwrap();
        assert_eq!(domain.get_latest(&tx, b"A").unwrap(), None);
        // Re-creation works.
        domain.put(&mut tx, b"A", b"v2", 30).unwrap();
        assert_eq!(
            domain.get_latest(&tx, b"A").unwrap().map(|(v, _)| v),
            Some(b"v2".to_vec())
        );
    }

    #[test]
    fn time_travel_scenario() {
        // The canonical sequence: 1000 @100, 1500 @500, 2000 @1000.
        let (store, domain, _dir) = setup(8192);
        let mut tx = store.begin_rw().unwrap();
        domain.put(&mut tx, b"A", b"1000", 100).unwrap();
        domain.put(&mut tx, b"A", b"1500", 500).unwrap();
        domain.put(&mut tx, b"A", b"2000", 1000).unwrap();

        assert_eq!(domain.get_as_of(&tx, b"A", 50).unwrap(), None);
        assert_eq!(
            domain.get_as_of(&tx, b"A", 100).unwrap(),
            Some(b"1000".to_vec())
        );
        assert_eq!(
            domain.get_as_of(&tx, b"A", 750).unwrap(),
            Some(b"1500".to_vec())
        );
        assert_eq!(
            domain.get_latest(&tx, b"A").unwrap().map(|(v, _)| v),
            Some(b"2000".to_vec())
        );
    }

    #[test]
    fn collation_and_segment_reads() {
        let (store, domain, _dir) = setup(100);
        let mut tx = store.begin_rw().unwrap();
        domain.put(&mut tx, b"A", b"v1", 10).unwrap();
        domain.put(&mut tx, b"B", b"w1", 20).unwrap();
        domain.put(&mut tx, b"A", b"v2", 150).unwrap();
        domain.collate(&mut tx, 0).unwrap();
        tx.commit().unwrap();

        let tx = store.begin_ro().unwrap();
        // B now answers from the segment, A still from hot (newer write).
        assert_eq!(
            domain.get_latest(&tx, b"B").unwrap().map(|(v, _)| v),
            Some(b"w1".to_vec())
        );
        assert_eq!(
            domain.get_latest(&tx, b"A").unwrap().map(|(v, _)| v),
            Some(b"v2".to_vec())
        );
        // Time travel still sees the frozen history.
        assert_eq!(
            domain.get_as_of(&tx, b"A", 100).unwrap(),
            Some(b"v1".to_vec())
        );

        let latest = domain.iter_latest(&tx).unwrap();
        assert_eq!(latest.get(b"A".as_slice()), Some(&b"v2".to_vec()));
        assert_eq!(latest.get(b"B".as_slice()), Some(&b"w1".to_vec()));
    }

    #[test]
    fn merge_keeps_newest_per_key() {
        let (store, domain, _dir) = setup(100);
        let mut tx = store.begin_rw().unwrap();
        domain.put(&mut tx, b"A", b"v1", 10).unwrap();
        domain.put(&mut tx, b"B", b"w1", 20).unwrap();
        domain.collate(&mut tx, 0).unwrap();
        domain.put(&mut tx, b"A", b"v2", 150).unwrap();
        domain.delete(&mut tx, b"B", 160).unwrap();
        domain.collate(&mut tx, 1).unwrap();
        tx.commit().unwrap();

        domain.merge(0, 2).unwrap();

        let tx = store.begin_ro().unwrap();
        assert_eq!(
            domain.get_latest(&tx, b"A").unwrap().map(|(v, _)| v),
            Some(b"v2".to_vec())
        );
        // The tombstone was dropped with the merge reaching step zero, and
        // no older file exists to resurrect the value.
        assert_eq!(domain.get_latest(&tx, b"B").unwrap(), None);
    }

    #[test]
    fn unwind_restores_previous_values() {
        let (store, domain, _dir) = setup(8192);
        let mut tx = store.begin_rw().unwrap();
        domain.put(&mut tx, b"A", b"v1", 100).unwrap();
        domain.put(&mut tx, b"A", b"v2", 200).unwrap();
        domain.put(&mut tx, b"C", b"fresh", 250).unwrap();

        domain.unwind(&mut tx, 150).unwrap();
        assert_eq!(
            domain.get_latest(&tx, b"A").unwrap().map(|(v, _)| v),
            Some(b"v1".to_vec())
        );
        assert_eq!(domain.get_latest(&tx, b"C").unwrap(), None);
        // Unwinding twice is a no-op.
        domain.unwind(&mut tx, 150).unwrap();
        assert_eq!(
            domain.get_latest(&tx, b"A").unwrap().map(|(v, _)| v),
            Some(b"v1".to_vec())
        );
    }
}
