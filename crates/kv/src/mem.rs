use crate::{Cursor, Kv, KvConfig, KvError, Result, RoTx, RwTx, Table};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum TableData {
    Plain(BTreeMap<Vec<u8>, Vec<u8>>),
    Dup(BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>),
}

#[derive(Clone, Debug)]
struct Tables {
    data: Vec<TableData>,
}

impl Tables {
    fn new() -> Self {
        let data = Table::ALL
            .iter()
            .map(|table| {
                if table.is_dup_sort() {
                    TableData::Dup(BTreeMap::new())
                } else {
                    TableData::Plain(BTreeMap::new())
                }
            })
            .collect();
        Self { data }
    }

    fn table(&self, table: Table) -> &TableData {
        &self.data[table.index()]
    }

    fn table_mut(&mut self, table: Table) -> &mut TableData {
        &mut self.data[table.index()]
    }

    fn get(&self, table: Table, key: &[u8]) -> Option<Vec<u8>> {
        match self.table(table) {
            TableData::Plain(map) => map.get(key).cloned(),
            TableData::Dup(map) => map.get(key).and_then(|set| set.first().cloned()),
        }
    }
}

/// In-memory reference store.
///
/// Snapshot isolation through atomically swapped immutable table sets:
/// readers clone the current `Arc` and are never blocked; the single writer
/// works on a private copy published at commit.
#[derive(Debug)]
pub struct MemKv {
    snapshot: RwLock<Arc<Tables>>,
    writer: Mutex<()>,
    config: KvConfig,
}

impl Default for MemKv {
    fn default() -> Self {
        Self::new(KvConfig::default())
    }
}

impl MemKv {
    /// Create an empty store with the given geometry.
    pub fn new(config: KvConfig) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Tables::new())),
            writer: Mutex::new(()),
            config,
        }
    }
}

impl Kv for MemKv {
    type Ro<'env> = MemRoTx;
    type Rw<'env> = MemRwTx<'env>;

    fn begin_ro(&self) -> Result<Self::Ro<'_>> {
        Ok(MemRoTx {
            tables: Arc::clone(&self.snapshot.read()),
        })
    }

    fn begin_rw(&self) -> Result<Self::Rw<'_>> {
        let guard = self.writer.lock();
        let working = (**self.snapshot.read()).clone();
        Ok(MemRwTx {
            store: self,
            _guard: guard,
            working,
        })
    }
}

/// Read-only snapshot transaction.
#[derive(Debug)]
pub struct MemRoTx {
    tables: Arc<Tables>,
}

impl RoTx for MemRoTx {
    type Cursor<'tx> = MemCursor<'tx>;

    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.get(table, key))
    }

    fn cursor(&self, table: Table) -> Result<Self::Cursor<'_>> {
        Ok(MemCursor::new(self.tables.table(table), table))
    }
}

/// The single write transaction.
#[derive(Debug)]
pub struct MemRwTx<'env> {
    store: &'env MemKv,
    _guard: MutexGuard<'env, ()>,
    working: Tables,
}

impl RoTx for MemRwTx<'_> {
    type Cursor<'tx>
        = MemCursor<'tx>
    where
        Self: 'tx;

    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.working.get(table, key))
    }

    fn cursor(&self, table: Table) -> Result<Self::Cursor<'_>> {
        Ok(MemCursor::new(self.working.table(table), table))
    }
}

impl RwTx for MemRwTx<'_> {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()> {
        let config = self.store.config;
        if key.len() > config.max_key_size {
            return Err(KvError::KeyTooLarge {
                got: key.len(),
                max: config.max_key_size,
            });
        }
        if value.len() > config.max_value_size {
            return Err(KvError::ValueTooLarge {
                got: value.len(),
                max: config.max_value_size,
            });
        }
        match self.working.table_mut(table) {
            TableData::Plain(map) => {
                map.insert(key.to_vec(), value.to_vec());
            }
            TableData::Dup(map) => {
                map.entry(key.to_vec()).or_default().insert(value.to_vec());
            }
        }
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &[u8]) -> Result<()> {
        match self.working.table_mut(table) {
            TableData::Plain(map) => {
                map.remove(key);
            }
            TableData::Dup(map) => {
                map.remove(key);
            }
        }
        Ok(())
    }

    fn delete_dup(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()> {
        match self.working.table_mut(table) {
            TableData::Plain(_) => return Err(KvError::WrongFlavor(table)),
            TableData::Dup(map) => {
                if let Some(set) = map.get_mut(key) {
                    set.remove(value);
                    if set.is_empty() {
                        map.remove(key);
                    }
                }
            }
        }
        Ok(())
    }

    fn clear(&mut self, table: Table) -> Result<()> {
        match self.working.table_mut(table) {
            TableData::Plain(map) => map.clear(),
            TableData::Dup(map) => map.clear(),
        }
        Ok(())
    }

    fn commit(self) -> Result<()> {
        *self.store.snapshot.write() = Arc::new(self.working);
        Ok(())
    }

    fn abort(self) {}
}

/// Cursor over one table of a snapshot or working copy.
///
/// Positions are re-derived with range queries on every step, so the cursor
/// never holds a borrow across calls.
#[derive(Debug)]
pub struct MemCursor<'tx> {
    table: &'tx TableData,
    id: Table,
    pos: Option<(Vec<u8>, Vec<u8>)>,
}

impl<'tx> MemCursor<'tx> {
    fn new(table: &'tx TableData, id: Table) -> Self {
        Self {
            table,
            id,
            pos: None,
        }
    }

    fn set(&mut self, entry: Option<(Vec<u8>, Vec<u8>)>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.pos = entry.clone();
        Ok(entry)
    }
}

impl Cursor for MemCursor<'_> {
    fn first(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let entry = match self.table {
            TableData::Plain(map) => map.iter().next().map(|(k, v)| (k.clone(), v.clone())),
            TableData::Dup(map) => map
                .iter()
                .next()
                .and_then(|(k, set)| set.first().map(|v| (k.clone(), v.clone()))),
        };
        self.set(entry)
    }

    fn last(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let entry = match self.table {
            TableData::Plain(map) => map.iter().next_back().map(|(k, v)| (k.clone(), v.clone())),
            TableData::Dup(map) => map
                .iter()
                .next_back()
                .and_then(|(k, set)| set.last().map(|v| (k.clone(), v.clone()))),
        };
        self.set(entry)
    }

    fn seek(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let entry = match self.table {
            TableData::Plain(map) => map
                .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone())),
            TableData::Dup(map) => map
                .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next()
                .and_then(|(k, set)| set.first().map(|v| (k.clone(), v.clone()))),
        };
        self.set(entry)
    }

    fn seek_exact(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let entry = match self.table {
            TableData::Plain(map) => map.get(key).map(|v| (key.to_vec(), v.clone())),
            TableData::Dup(map) => map
                .get(key)
                .and_then(|set| set.first().map(|v| (key.to_vec(), v.clone()))),
        };
        self.set(entry)
    }

    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some((cur_key, cur_val)) = self.pos.clone() else {
            return self.first();
        };
        let entry = match self.table {
            TableData::Plain(map) => map
                .range::<[u8], _>((Bound::Excluded(cur_key.as_slice()), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone())),
            TableData::Dup(map) => {
                let within = map.get(&cur_key).and_then(|set| {
                    set.range::<[u8], _>((Bound::Excluded(cur_val.as_slice()), Bound::Unbounded))
                        .next()
                        .map(|v| (cur_key.clone(), v.clone()))
                });
                within.or_else(|| {
                    map.range::<[u8], _>((Bound::Excluded(cur_key.as_slice()), Bound::Unbounded))
                        .next()
                        .and_then(|(k, set)| set.first().map(|v| (k.clone(), v.clone())))
                })
            }
        };
        self.set(entry)
    }

    fn prev(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some((cur_key, cur_val)) = self.pos.clone() else {
            return self.last();
        };
        let entry = match self.table {
            TableData::Plain(map) => map
                .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(cur_key.as_slice())))
                .next_back()
                .map(|(k, v)| (k.clone(), v.clone())),
            TableData::Dup(map) => {
                let within = map.get(&cur_key).and_then(|set| {
                    set.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(cur_val.as_slice())))
                        .next_back()
                        .map(|v| (cur_key.clone(), v.clone()))
                });
                within.or_else(|| {
                    map.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(cur_key.as_slice())))
                        .next_back()
                        .and_then(|(k, set)| set.last().map(|v| (k.clone(), v.clone())))
                })
            }
        };
        self.set(entry)
    }

    fn seek_both_range(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let TableData::Dup(map) = self.table else {
            return Err(KvError::WrongFlavor(self.id));
        };
        let found = map.get(key).and_then(|set| {
            set.range::<[u8], _>((Bound::Included(value), Bound::Unbounded))
                .next()
                .cloned()
        });
        self.pos = found.clone().map(|v| (key.to_vec(), v));
        Ok(found)
    }

    fn next_dup(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let TableData::Dup(map) = self.table else {
            return Err(KvError::WrongFlavor(self.id));
        };
        let Some((cur_key, cur_val)) = self.pos.clone() else {
            return Ok(None);
        };
        let entry = map.get(&cur_key).and_then(|set| {
            set.range::<[u8], _>((Bound::Excluded(cur_val.as_slice()), Bound::Unbounded))
                .next()
                .map(|v| (cur_key.clone(), v.clone()))
        });
        self.set(entry)
    }

    fn prev_dup(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let TableData::Dup(map) = self.table else {
            return Err(KvError::WrongFlavor(self.id));
        };
        let Some((cur_key, cur_val)) = self.pos.clone() else {
            return Ok(None);
        };
        let entry = map.get(&cur_key).and_then(|set| {
            set.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(cur_val.as_slice())))
                .next_back()
                .map(|v| (cur_key.clone(), v.clone()))
        });
        self.set(entry)
    }

    fn last_dup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let TableData::Dup(map) = self.table else {
            return Err(KvError::WrongFlavor(self.id));
        };
        let found = map.get(key).and_then(|set| set.last().cloned());
        self.pos = found.clone().map(|v| (key.to_vec(), v));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_isolation() {
        let store = MemKv::default();
        {
            let mut tx = store.begin_rw().unwrap();
            tx.put(Table::Headers, b"a", b"1").unwrap();
            tx.commit().unwrap();
        }

        let reader = store.begin_ro().unwrap();
        {
            let mut tx = store.begin_rw().unwrap();
            tx.put(Table::Headers, b"a", b"2").unwrap();
            tx.put(Table::Headers, b"b", b"3").unwrap();
            tx.commit().unwrap();
        }

        // The old snapshot still sees the first commit only.
        assert_eq!(reader.get(Table::Headers, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reader.get(Table::Headers, b"b").unwrap(), None);

        let fresh = store.begin_ro().unwrap();
        assert_eq!(fresh.get(Table::Headers, b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn abort_discards() {
        let store = MemKv::default();
        {
            let mut tx = store.begin_rw().unwrap();
            tx.put(Table::Headers, b"a", b"1").unwrap();
            tx.abort();
        }
        let reader = store.begin_ro().unwrap();
        assert_eq!(reader.get(Table::Headers, b"a").unwrap(), None);
    }

    #[test]
    fn cursor_walk() {
        let store = MemKv::default();
        let mut tx = store.begin_rw().unwrap();
        for (k, v) in [(b"a", b"1"), (b"c", b"3"), (b"e", b"5")] {
            tx.put(Table::Headers, k, v).unwrap();
        }

        let mut cursor = tx.cursor(Table::Headers).unwrap();
        assert_eq!(
            cursor.first().unwrap(),
            Some((b"a".to_vec(), b"1".to_vec()))
        );
        assert_eq!(cursor.next().unwrap(), Some((b"c".to_vec(), b"3".to_vec())));
        assert_eq!(
            cursor.seek(b"d").unwrap(),
            Some((b"e".to_vec(), b"5".to_vec()))
        );
        assert_eq!(cursor.next().unwrap(), None);
        assert_eq!(cursor.seek_exact(b"d").unwrap(), None);
        assert_eq!(
            cursor.last().unwrap(),
            Some((b"e".to_vec(), b"5".to_vec()))
        );
        assert_eq!(cursor.prev().unwrap(), Some((b"c".to_vec(), b"3".to_vec())));
    }

    #[test]
    fn dup_sort_cursor() {
        let store = MemKv::default();
        let mut tx = store.begin_rw().unwrap();
        tx.put(Table::AccountsIndex, b"k1", b"10").unwrap();
        tx.put(Table::AccountsIndex, b"k1", b"20").unwrap();
        tx.put(Table::AccountsIndex, b"k1", b"30").unwrap();
        tx.put(Table::AccountsIndex, b"k2", b"40").unwrap();

        let mut cursor = tx.cursor(Table::AccountsIndex).unwrap();
        assert_eq!(
            cursor.seek_both_range(b"k1", b"15").unwrap(),
            Some(b"20".to_vec())
        );
        assert_eq!(
            cursor.next_dup().unwrap(),
            Some((b"k1".to_vec(), b"30".to_vec()))
        );
        // next_dup never crosses into the next key.
        assert_eq!(cursor.next_dup().unwrap(), None);
        assert_eq!(cursor.last_dup(b"k1").unwrap(), Some(b"30".to_vec()));

        // plain next does cross.
        cursor.last_dup(b"k1").unwrap();
        assert_eq!(
            cursor.next().unwrap(),
            Some((b"k2".to_vec(), b"40".to_vec()))
        );

        tx.delete_dup(Table::AccountsIndex, b"k1", b"20").unwrap();
        let mut cursor = tx.cursor(Table::AccountsIndex).unwrap();
        assert_eq!(
            cursor.seek_both_range(b"k1", b"15").unwrap(),
            Some(b"30".to_vec())
        );
    }

    #[test]
    fn geometry_enforced() {
        let store = MemKv::new(KvConfig {
            max_key_size: 4,
            max_value_size: 4,
        });
        let mut tx = store.begin_rw().unwrap();
        assert!(matches!(
            tx.put(Table::Headers, b"toolong", b"v"),
            Err(KvError::KeyTooLarge { .. })
        ));
        assert!(matches!(
            tx.put(Table::Headers, b"k", b"toolong"),
            Err(KvError::ValueTooLarge { .. })
        ));
    }
}
