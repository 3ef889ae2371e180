/// Named tables of the engine, matching the canonical Erigon schema so
/// existing snapshots remain interoperable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    /// `block_number_be -> rlp(header)`.
    Headers,
    /// `header_hash -> block_number_be`.
    HeaderNumbers,
    /// `block_number_be -> header_hash` of the canonical chain.
    CanonicalHashes,
    /// `block_number_be -> rlp(body)`.
    Bodies,
    /// `block_number_be -> concatenated 20-byte senders`.
    Senders,
    /// `block_number_be -> rlp([receipt, ...])`.
    Receipts,
    /// `block_number_be -> rlp([log, ...])` flattened over the block.
    Logs,
    /// `tx_hash -> block_number_be`.
    TxLookup,
    /// Account domain hot rows: `address ++ ~step -> step ++ flat account`.
    PlainState,
    /// Storage domain hot rows: `address ++ slot ++ ~step -> step ++ value`.
    StorageState,
    /// Code domain hot rows: `code_hash ++ ~step -> code`.
    Code,
    /// Commitment domain hot rows.
    Commitment,
    /// `ascii_stage_name -> block_number_be`.
    SyncStageProgress,
    /// `address ++ txnum_be -> previous flat account`.
    AccountsHistory,
    /// `address ++ slot ++ txnum_be -> previous slot value`.
    StorageHistory,
    /// Dup-sorted `address -> txnum_be` change marks.
    AccountsIndex,
    /// Dup-sorted `address ++ slot -> txnum_be` change marks.
    StorageIndex,
    /// `block_number_be -> last_txnum_be` assigned to the block.
    MaxTxNum,
}

impl Table {
    /// Every table, in declaration order.
    pub const ALL: [Table; 18] = [
        Table::Headers,
        Table::HeaderNumbers,
        Table::CanonicalHashes,
        Table::Bodies,
        Table::Senders,
        Table::Receipts,
        Table::Logs,
        Table::TxLookup,
        Table::PlainState,
        Table::StorageState,
        Table::Code,
        Table::Commitment,
        Table::SyncStageProgress,
        Table::AccountsHistory,
        Table::StorageHistory,
        Table::AccountsIndex,
        Table::StorageIndex,
        Table::MaxTxNum,
    ];

    /// Whether the table maps a key to an ordered set of values.
    pub const fn is_dup_sort(self) -> bool {
        matches!(self, Table::AccountsIndex | Table::StorageIndex)
    }

    /// Stable index into per-table storage.
    pub(crate) const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable table name.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Headers => "Headers",
            Table::HeaderNumbers => "HeaderNumbers",
            Table::CanonicalHashes => "CanonicalHashes",
            Table::Bodies => "Bodies",
            Table::Senders => "Senders",
            Table::Receipts => "Receipts",
            Table::Logs => "Logs",
            Table::TxLookup => "TxLookup",
            Table::PlainState => "PlainState",
            Table::StorageState => "StorageState",
            Table::Code => "Code",
            Table::Commitment => "Commitment",
            Table::SyncStageProgress => "SyncStageProgress",
            Table::AccountsHistory => "AccountsHistory",
            Table::StorageHistory => "StorageHistory",
            Table::AccountsIndex => "AccountsIndex",
            Table::StorageIndex => "StorageIndex",
            Table::MaxTxNum => "MaxTxNum",
        }
    }
}

/// Number of tables.
pub(crate) const TABLE_COUNT: usize = Table::ALL.len();
