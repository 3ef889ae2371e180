//! Abstract transactional KV-store interface.
//!
//! Named tables, snapshot-isolated transactions with a single writer, ordered
//! cursors, and dup-sorted tables where one key maps to an ordered set of
//! values. The pipeline above never touches a backend directly; everything
//! goes through the traits here.

mod mem;
mod tables;

pub use mem::MemKv;
pub use tables::Table;

/// Errors surfaced by a KV backend.
///
/// Anything other than [`KvError::KeyNotFound`] is fatal to the containing
/// stage and propagates to the coordinator.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KvError {
    /// Lookup of a key the caller required to exist.
    #[error("key not found in {0:?}")]
    KeyNotFound(Table),
    /// Key exceeds the configured geometry.
    #[error("key length {got} exceeds maximum {max}")]
    KeyTooLarge {
        /// Offending length.
        got: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Value exceeds the configured geometry.
    #[error("value length {got} exceeds maximum {max}")]
    ValueTooLarge {
        /// Offending length.
        got: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Operation requiring dup-sort issued against a plain table, or the
    /// reverse.
    #[error("table {0:?} has the wrong dup-sort flavor for this operation")]
    WrongFlavor(Table),
}

/// Result alias.
pub type Result<T, E = KvError> = std::result::Result<T, E>;

/// Size limits of a store.
#[derive(Clone, Copy, Debug)]
pub struct KvConfig {
    /// Maximum key length accepted by `put`.
    pub max_key_size: usize,
    /// Maximum value length accepted by `put`.
    pub max_value_size: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            max_key_size: 1024,
            max_value_size: 4 * 1024 * 1024,
        }
    }
}

/// A transactional store.
///
/// Readers see the snapshot taken at `begin_ro`; at most one write
/// transaction is open at a time and its effects become visible atomically
/// at commit.
pub trait Kv {
    /// Read-only transaction type.
    type Ro<'env>: RoTx
    where
        Self: 'env;
    /// Read-write transaction type.
    type Rw<'env>: RwTx
    where
        Self: 'env;

    /// Open a read-only snapshot.
    fn begin_ro(&self) -> Result<Self::Ro<'_>>;
    /// Open the write transaction, blocking while another writer is active.
    fn begin_rw(&self) -> Result<Self::Rw<'_>>;
}

/// Read surface of a transaction.
pub trait RoTx {
    /// Cursor type over a table.
    type Cursor<'tx>: Cursor
    where
        Self: 'tx;

    /// Point lookup. Dup-sorted tables return the smallest value of the key.
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Point lookup that treats absence as an error.
    fn get_required(&self, table: Table, key: &[u8]) -> Result<Vec<u8>> {
        self.get(table, key)?.ok_or(KvError::KeyNotFound(table))
    }

    /// Open a cursor positioned before the first entry.
    fn cursor(&self, table: Table) -> Result<Self::Cursor<'_>>;
}

/// Write surface of a transaction.
pub trait RwTx: RoTx {
    /// Insert or overwrite. For dup-sorted tables the value is added to the
    /// key's set.
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key with all its values. Missing keys are a no-op.
    fn delete(&mut self, table: Table, key: &[u8]) -> Result<()>;

    /// Delete one value of a dup-sorted key.
    fn delete_dup(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()>;

    /// Drop every row of a table.
    fn clear(&mut self, table: Table) -> Result<()>;

    /// Publish all writes atomically.
    fn commit(self) -> Result<()>;

    /// Discard all writes.
    fn abort(self);
}

/// An ordered cursor over one table.
///
/// Every positioning call returns the entry the cursor lands on, or `None`
/// when it moves past either end. For dup-sorted tables the cursor yields
/// `(key, value)` pairs value by value.
pub trait Cursor {
    /// First entry of the table.
    fn first(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    /// Last entry of the table.
    fn last(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    /// First entry with key `>=` the given key.
    fn seek(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    /// Entry with exactly the given key.
    fn seek_exact(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    /// Next entry in key (then value) order.
    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    /// Previous entry.
    fn prev(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Dup-sort: first value of the current key `>=` the given value.
    fn seek_both_range(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Dup-sort: next value of the current key only.
    fn next_dup(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    /// Dup-sort: previous value of the current key only.
    fn prev_dup(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    /// Dup-sort: last value of the given key.
    fn last_dup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}
