use crate::{
    GAS_PER_BLOB, Revision,
    signature::{Signature, SignatureError},
};
use alloy_primitives::{Address, B256, Bytes, ChainId, TxKind, U256, keccak256};
use alloy_rlp::{
    Decodable, Encodable, Header as RlpHeader, RlpDecodable, RlpDecodableWrapper, RlpEncodable,
    RlpEncodableWrapper,
};
use std::sync::OnceLock;

/// A storage slot access declared by a transaction (EIP-2930).
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccessListItem {
    /// Address to pre-warm.
    pub address: Address,
    /// Storage keys of `address` to pre-warm.
    pub storage_keys: Vec<B256>,
}

/// An EIP-2930 access list.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct AccessList(pub Vec<AccessListItem>);

impl AccessList {
    /// Number of addresses listed.
    pub fn address_count(&self) -> usize {
        self.0.len()
    }

    /// Total number of storage keys listed.
    pub fn storage_key_count(&self) -> usize {
        self.0.iter().map(|item| item.storage_keys.len()).sum()
    }
}

/// An EIP-7702 authorization payload before signing.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Authorization {
    /// Chain the delegation is valid on; zero means every chain.
    pub chain_id: U256,
    /// Delegation target.
    pub address: Address,
    /// Expected authority nonce.
    pub nonce: u64,
}

impl Authorization {
    /// `keccak256(0x05 || rlp([chain_id, address, nonce]))`.
    pub fn signature_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(1 + self.length());
        buf.push(0x05);
        self.encode(&mut buf);
        keccak256(&buf)
    }
}

/// A signed EIP-7702 authorization.
///
/// Encoded flat: `[chain_id, address, nonce, y_parity, r, s]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedAuthorization {
    /// The authorization payload.
    pub inner: Authorization,
    /// Signature parity bit.
    pub y_parity: bool,
    /// Signature `r`.
    pub r: U256,
    /// Signature `s`.
    pub s: U256,
}

impl Encodable for SignedAuthorization {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        RlpHeader {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.inner.chain_id.encode(out);
        self.inner.address.encode(out);
        self.inner.nonce.encode(out);
        self.y_parity.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload = self.payload_length();
        payload + alloy_rlp::length_of_length(payload)
    }
}

impl Decodable for SignedAuthorization {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let head = RlpHeader::decode(buf)?;
        if !head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        Ok(Self {
            inner: Authorization {
                chain_id: Decodable::decode(buf)?,
                address: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
            },
            y_parity: Decodable::decode(buf)?,
            r: Decodable::decode(buf)?,
            s: Decodable::decode(buf)?,
        })
    }
}

impl SignedAuthorization {
    fn payload_length(&self) -> usize {
        self.inner.chain_id.length()
            + self.inner.address.length()
            + self.inner.nonce.length()
            + self.y_parity.length()
            + self.r.length()
            + self.s.length()
    }

    /// Recover the authorizing address.
    pub fn recover_authority(&self) -> Result<Address, SignatureError> {
        Signature {
            r: self.r,
            s: self.s,
            odd_y_parity: self.y_parity,
        }
        .recover(self.inner.signature_hash())
    }
}

/// Transaction envelope discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TxType {
    /// Untyped pre-Berlin transaction.
    Legacy = 0,
    /// EIP-2930 access-list transaction.
    Eip2930 = 1,
    /// EIP-1559 dynamic-fee transaction.
    Eip1559 = 2,
    /// EIP-4844 blob transaction.
    Eip4844 = 3,
    /// EIP-7702 set-code transaction.
    Eip7702 = 4,
}

impl Default for TxType {
    fn default() -> Self {
        Self::Legacy
    }
}

impl TxType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Legacy),
            1 => Some(Self::Eip2930),
            2 => Some(Self::Eip1559),
            3 => Some(Self::Eip4844),
            4 => Some(Self::Eip7702),
            _ => None,
        }
    }
}

/// Untyped transaction, optionally EIP-155 replay-protected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxLegacy {
    /// EIP-155 chain id folded into `v`, if replay-protected.
    pub chain_id: Option<ChainId>,
    /// Sender nonce.
    pub nonce: u64,
    /// Wei per gas unit.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient, or create.
    pub to: TxKind,
    /// Transferred value.
    pub value: U256,
    /// Calldata or init code.
    pub input: Bytes,
}

/// EIP-2930 transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxEip2930 {
    /// Chain id.
    pub chain_id: ChainId,
    /// Sender nonce.
    pub nonce: u64,
    /// Wei per gas unit.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient, or create.
    pub to: TxKind,
    /// Transferred value.
    pub value: U256,
    /// Calldata or init code.
    pub input: Bytes,
    /// Declared warm entries.
    pub access_list: AccessList,
}

/// EIP-1559 transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxEip1559 {
    /// Chain id.
    pub chain_id: ChainId,
    /// Sender nonce.
    pub nonce: u64,
    /// Tip cap in wei per gas.
    pub max_priority_fee_per_gas: u128,
    /// Total fee cap in wei per gas.
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient, or create.
    pub to: TxKind,
    /// Transferred value.
    pub value: U256,
    /// Calldata or init code.
    pub input: Bytes,
    /// Declared warm entries.
    pub access_list: AccessList,
}

/// EIP-4844 blob transaction. The recipient is mandatory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxEip4844 {
    /// Chain id.
    pub chain_id: ChainId,
    /// Sender nonce.
    pub nonce: u64,
    /// Tip cap in wei per gas.
    pub max_priority_fee_per_gas: u128,
    /// Total fee cap in wei per gas.
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient.
    pub to: Address,
    /// Transferred value.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Declared warm entries.
    pub access_list: AccessList,
    /// Fee cap in wei per blob gas unit.
    pub max_fee_per_blob_gas: u128,
    /// Versioned hashes of the carried blobs.
    pub blob_versioned_hashes: Vec<B256>,
}

/// EIP-7702 set-code transaction. The recipient is mandatory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxEip7702 {
    /// Chain id.
    pub chain_id: ChainId,
    /// Sender nonce.
    pub nonce: u64,
    /// Tip cap in wei per gas.
    pub max_priority_fee_per_gas: u128,
    /// Total fee cap in wei per gas.
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient.
    pub to: Address,
    /// Transferred value.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Declared warm entries.
    pub access_list: AccessList,
    /// Code delegations to install.
    pub authorization_list: Vec<SignedAuthorization>,
}

/// Tagged sum over the five transaction forms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    /// Untyped transaction.
    Legacy(TxLegacy),
    /// EIP-2930.
    Eip2930(TxEip2930),
    /// EIP-1559.
    Eip1559(TxEip1559),
    /// EIP-4844.
    Eip4844(TxEip4844),
    /// EIP-7702.
    Eip7702(TxEip7702),
}

impl Transaction {
    /// Envelope discriminant.
    pub const fn tx_type(&self) -> TxType {
        match self {
            Self::Legacy(_) => TxType::Legacy,
            Self::Eip2930(_) => TxType::Eip2930,
            Self::Eip1559(_) => TxType::Eip1559,
            Self::Eip4844(_) => TxType::Eip4844,
            Self::Eip7702(_) => TxType::Eip7702,
        }
    }

    /// Chain id, absent only for pre-155 legacy transactions.
    pub const fn chain_id(&self) -> Option<ChainId> {
        match self {
            Self::Legacy(tx) => tx.chain_id,
            Self::Eip2930(tx) => Some(tx.chain_id),
            Self::Eip1559(tx) => Some(tx.chain_id),
            Self::Eip4844(tx) => Some(tx.chain_id),
            Self::Eip7702(tx) => Some(tx.chain_id),
        }
    }

    /// Sender nonce.
    pub const fn nonce(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.nonce,
            Self::Eip2930(tx) => tx.nonce,
            Self::Eip1559(tx) => tx.nonce,
            Self::Eip4844(tx) => tx.nonce,
            Self::Eip7702(tx) => tx.nonce,
        }
    }

    /// Gas limit.
    pub const fn gas_limit(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.gas_limit,
            Self::Eip2930(tx) => tx.gas_limit,
            Self::Eip1559(tx) => tx.gas_limit,
            Self::Eip4844(tx) => tx.gas_limit,
            Self::Eip7702(tx) => tx.gas_limit,
        }
    }

    /// Recipient; blob and set-code forms cannot create.
    pub const fn to(&self) -> TxKind {
        match self {
            Self::Legacy(tx) => tx.to,
            Self::Eip2930(tx) => tx.to,
            Self::Eip1559(tx) => tx.to,
            Self::Eip4844(tx) => TxKind::Call(tx.to),
            Self::Eip7702(tx) => TxKind::Call(tx.to),
        }
    }

    /// Whether this transaction creates a contract.
    pub const fn is_create(&self) -> bool {
        matches!(self.to(), TxKind::Create)
    }

    /// Transferred value.
    pub const fn value(&self) -> U256 {
        match self {
            Self::Legacy(tx) => tx.value,
            Self::Eip2930(tx) => tx.value,
            Self::Eip1559(tx) => tx.value,
            Self::Eip4844(tx) => tx.value,
            Self::Eip7702(tx) => tx.value,
        }
    }

    /// Calldata or init code.
    pub fn input(&self) -> &Bytes {
        match self {
            Self::Legacy(tx) => &tx.input,
            Self::Eip2930(tx) => &tx.input,
            Self::Eip1559(tx) => &tx.input,
            Self::Eip4844(tx) => &tx.input,
            Self::Eip7702(tx) => &tx.input,
        }
    }

    /// Declared access list, empty for legacy.
    pub fn access_list(&self) -> Option<&AccessList> {
        match self {
            Self::Legacy(_) => None,
            Self::Eip2930(tx) => Some(&tx.access_list),
            Self::Eip1559(tx) => Some(&tx.access_list),
            Self::Eip4844(tx) => Some(&tx.access_list),
            Self::Eip7702(tx) => Some(&tx.access_list),
        }
    }

    /// Blob versioned hashes (EIP-4844 only).
    pub fn blob_versioned_hashes(&self) -> Option<&[B256]> {
        match self {
            Self::Eip4844(tx) => Some(&tx.blob_versioned_hashes),
            _ => None,
        }
    }

    /// Authorization list (EIP-7702 only).
    pub fn authorization_list(&self) -> Option<&[SignedAuthorization]> {
        match self {
            Self::Eip7702(tx) => Some(&tx.authorization_list),
            _ => None,
        }
    }

    /// Fee cap: `gas_price` for pre-1559 forms.
    pub const fn max_fee_per_gas(&self) -> u128 {
        match self {
            Self::Legacy(tx) => tx.gas_price,
            Self::Eip2930(tx) => tx.gas_price,
            Self::Eip1559(tx) => tx.max_fee_per_gas,
            Self::Eip4844(tx) => tx.max_fee_per_gas,
            Self::Eip7702(tx) => tx.max_fee_per_gas,
        }
    }

    /// Tip cap, absent for pre-1559 forms.
    pub const fn max_priority_fee_per_gas(&self) -> Option<u128> {
        match self {
            Self::Legacy(_) | Self::Eip2930(_) => None,
            Self::Eip1559(tx) => Some(tx.max_priority_fee_per_gas),
            Self::Eip4844(tx) => Some(tx.max_priority_fee_per_gas),
            Self::Eip7702(tx) => Some(tx.max_priority_fee_per_gas),
        }
    }

    /// Blob fee cap (EIP-4844 only).
    pub const fn max_fee_per_blob_gas(&self) -> Option<u128> {
        match self {
            Self::Eip4844(tx) => Some(tx.max_fee_per_blob_gas),
            _ => None,
        }
    }

    /// Total blob gas bought by this transaction.
    pub fn blob_gas(&self) -> u64 {
        match self {
            Self::Eip4844(tx) => tx.blob_versioned_hashes.len() as u64 * GAS_PER_BLOB,
            _ => 0,
        }
    }

    /// Price actually paid per gas unit under `base_fee`.
    pub fn effective_gas_price(&self, base_fee: Option<u64>) -> u128 {
        match self.max_priority_fee_per_gas() {
            None => self.max_fee_per_gas(),
            Some(priority) => match base_fee {
                None => self.max_fee_per_gas(),
                Some(base_fee) => {
                    (base_fee as u128 + priority).min(self.max_fee_per_gas())
                }
            },
        }
    }

    /// The tip per gas unit credited to the coinbase under `base_fee`.
    pub fn effective_priority_fee(&self, base_fee: Option<u64>) -> u128 {
        self.effective_gas_price(base_fee)
            .saturating_sub(base_fee.unwrap_or_default() as u128)
    }

    /// Gas charged before any execution.
    ///
    /// 21000 base, calldata bytes, creation surcharge, declared access-list
    /// entries, init-code words from Shanghai, authorization tuples for
    /// set-code transactions.
    pub fn intrinsic_gas(&self, revision: Revision) -> u64 {
        let mut gas: u64 = 21_000;
        let nonzero_cost = if revision >= Revision::Istanbul { 16 } else { 68 };
        for byte in self.input().iter() {
            gas += if *byte == 0 { 4 } else { nonzero_cost };
        }
        if self.is_create() {
            gas += 32_000;
            if revision >= Revision::Shanghai {
                gas += 2 * self.input().len().div_ceil(32) as u64;
            }
        }
        if let Some(list) = self.access_list() {
            gas += 2_400 * list.address_count() as u64;
            gas += 1_900 * list.storage_key_count() as u64;
        }
        if let Some(auths) = self.authorization_list() {
            gas += 25_000 * auths.len() as u64;
        }
        gas
    }

    /// Hash signed by the sender: canonical encoding minus the signature.
    pub fn signing_hash(&self) -> B256 {
        let mut buf = Vec::new();
        match self {
            Self::Legacy(tx) => {
                let mut payload = tx.fields_payload_length();
                if let Some(chain_id) = tx.chain_id {
                    payload += chain_id.length() + 0u8.length() * 2;
                }
                RlpHeader {
                    list: true,
                    payload_length: payload,
                }
                .encode(&mut buf);
                tx.encode_fields(&mut buf);
                if let Some(chain_id) = tx.chain_id {
                    // EIP-155: the signed payload ends in chain_id, 0, 0.
                    chain_id.encode(&mut buf);
                    0u8.encode(&mut buf);
                    0u8.encode(&mut buf);
                }
            }
            _ => {
                buf.push(self.tx_type() as u8);
                self.encode_typed_fields(&mut buf, None);
            }
        }
        keccak256(&buf)
    }

    fn fields_payload_length(&self) -> usize {
        match self {
            Self::Legacy(tx) => tx.fields_payload_length(),
            Self::Eip2930(tx) => {
                tx.chain_id.length()
                    + tx.nonce.length()
                    + tx.gas_price.length()
                    + tx.gas_limit.length()
                    + tx.to.length()
                    + tx.value.length()
                    + tx.input.length()
                    + tx.access_list.length()
            }
            Self::Eip1559(tx) => {
                tx.chain_id.length()
                    + tx.nonce.length()
                    + tx.max_priority_fee_per_gas.length()
                    + tx.max_fee_per_gas.length()
                    + tx.gas_limit.length()
                    + tx.to.length()
                    + tx.value.length()
                    + tx.input.length()
                    + tx.access_list.length()
            }
            Self::Eip4844(tx) => {
                tx.chain_id.length()
                    + tx.nonce.length()
                    + tx.max_priority_fee_per_gas.length()
                    + tx.max_fee_per_gas.length()
                    + tx.gas_limit.length()
                    + tx.to.length()
                    + tx.value.length()
                    + tx.input.length()
                    + tx.access_list.length()
                    + tx.max_fee_per_blob_gas.length()
                    + tx.blob_versioned_hashes.length()
            }
            Self::Eip7702(tx) => {
                tx.chain_id.length()
                    + tx.nonce.length()
                    + tx.max_priority_fee_per_gas.length()
                    + tx.max_fee_per_gas.length()
                    + tx.gas_limit.length()
                    + tx.to.length()
                    + tx.value.length()
                    + tx.input.length()
                    + tx.access_list.length()
                    + tx.authorization_list.length()
            }
        }
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            Self::Legacy(tx) => tx.encode_fields(out),
            Self::Eip2930(tx) => {
                tx.chain_id.encode(out);
                tx.nonce.encode(out);
                tx.gas_price.encode(out);
                tx.gas_limit.encode(out);
                tx.to.encode(out);
                tx.value.encode(out);
                tx.input.encode(out);
                tx.access_list.encode(out);
            }
            Self::Eip1559(tx) => {
                tx.chain_id.encode(out);
                tx.nonce.encode(out);
                tx.max_priority_fee_per_gas.encode(out);
                tx.max_fee_per_gas.encode(out);
                tx.gas_limit.encode(out);
                tx.to.encode(out);
                tx.value.encode(out);
                tx.input.encode(out);
                tx.access_list.encode(out);
            }
            Self::Eip4844(tx) => {
                tx.chain_id.encode(out);
                tx.nonce.encode(out);
                tx.max_priority_fee_per_gas.encode(out);
                tx.max_fee_per_gas.encode(out);
                tx.gas_limit.encode(out);
                tx.to.encode(out);
                tx.value.encode(out);
                tx.input.encode(out);
                tx.access_list.encode(out);
                tx.max_fee_per_blob_gas.encode(out);
                tx.blob_versioned_hashes.encode(out);
            }
            Self::Eip7702(tx) => {
                tx.chain_id.encode(out);
                tx.nonce.encode(out);
                tx.max_priority_fee_per_gas.encode(out);
                tx.max_fee_per_gas.encode(out);
                tx.gas_limit.encode(out);
                tx.to.encode(out);
                tx.value.encode(out);
                tx.input.encode(out);
                tx.access_list.encode(out);
                tx.authorization_list.encode(out);
            }
        }
    }

    /// Typed payload: `rlp([fields..])` or `rlp([fields.., parity, r, s])`.
    fn encode_typed_fields(&self, out: &mut dyn alloy_rlp::BufMut, signature: Option<&Signature>) {
        let mut payload = self.fields_payload_length();
        if let Some(signature) = signature {
            payload += signature.payload_length();
        }
        RlpHeader {
            list: true,
            payload_length: payload,
        }
        .encode(out);
        self.encode_fields(out);
        if let Some(signature) = signature {
            signature.encode_with_parity(out);
        }
    }
}

impl TxLegacy {
    fn fields_payload_length(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.input.length()
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
    }
}

/// A transaction together with its signature.
///
/// The canonical hash and recovered sender are computed once and memoized;
/// a single thread owns the computation at any given moment.
#[derive(Debug, Default)]
pub struct SignedTransaction {
    /// The unsigned payload.
    pub transaction: Transaction,
    /// The sender's signature.
    pub signature: Signature,
    hash: OnceLock<B256>,
    sender: OnceLock<Address>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::Legacy(TxLegacy::default())
    }
}

impl Clone for SignedTransaction {
    fn clone(&self) -> Self {
        Self {
            transaction: self.transaction.clone(),
            signature: self.signature,
            hash: self.hash.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl PartialEq for SignedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.transaction == other.transaction && self.signature == other.signature
    }
}

impl Eq for SignedTransaction {}

impl SignedTransaction {
    /// Wrap a transaction with its signature.
    pub fn new(transaction: Transaction, signature: Signature) -> Self {
        Self {
            transaction,
            signature,
            hash: OnceLock::new(),
            sender: OnceLock::new(),
        }
    }

    /// Canonical hash, type-prefixed for typed envelopes.
    pub fn hash(&self) -> B256 {
        *self
            .hash
            .get_or_init(|| keccak256(self.encoded_canonical()))
    }

    /// Recover (and memoize) the sender address.
    pub fn recover_sender(&self) -> Result<Address, SignatureError> {
        if let Some(sender) = self.sender.get() {
            return Ok(*sender);
        }
        let sender = self.signature.recover(self.transaction.signing_hash())?;
        Ok(*self.sender.get_or_init(|| sender))
    }

    /// Seed the memoized sender, e.g. from the Senders table.
    pub fn set_sender(&self, sender: Address) {
        let _ = self.sender.set(sender);
    }

    /// Canonical byte encoding: legacy RLP list, or type byte plus payload.
    pub fn encoded_canonical(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_canonical(&mut buf);
        buf
    }

    /// Encode canonically into `out`.
    pub fn encode_canonical(&self, out: &mut dyn alloy_rlp::BufMut) {
        match &self.transaction {
            Transaction::Legacy(tx) => {
                let v = self.signature.v(tx.chain_id);
                let payload = tx.fields_payload_length()
                    + v.length()
                    + self.signature.r.length()
                    + self.signature.s.length();
                RlpHeader {
                    list: true,
                    payload_length: payload,
                }
                .encode(out);
                tx.encode_fields(out);
                v.encode(out);
                self.signature.r.encode(out);
                self.signature.s.encode(out);
            }
            tx => {
                out.put_u8(tx.tx_type() as u8);
                tx.encode_typed_fields(out, Some(&self.signature));
            }
        }
    }

    /// Decode a canonical encoding.
    pub fn decode_canonical(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let first = *buf.first().ok_or(alloy_rlp::Error::InputTooShort)?;
        if first >= 0xc0 {
            return Self::decode_legacy(buf);
        }
        let tx_type =
            TxType::from_byte(first).ok_or(alloy_rlp::Error::Custom("unknown transaction type"))?;
        *buf = &buf[1..];
        let head = RlpHeader::decode(buf)?;
        if !head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let transaction = match tx_type {
            TxType::Legacy => unreachable!("legacy has no type byte"),
            TxType::Eip2930 => Transaction::Eip2930(TxEip2930 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                gas_price: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: Decodable::decode(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
            }),
            TxType::Eip1559 => Transaction::Eip1559(TxEip1559 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                max_priority_fee_per_gas: Decodable::decode(buf)?,
                max_fee_per_gas: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: Decodable::decode(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
            }),
            TxType::Eip4844 => Transaction::Eip4844(TxEip4844 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                max_priority_fee_per_gas: Decodable::decode(buf)?,
                max_fee_per_gas: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: Decodable::decode(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
                max_fee_per_blob_gas: Decodable::decode(buf)?,
                blob_versioned_hashes: Decodable::decode(buf)?,
            }),
            TxType::Eip7702 => Transaction::Eip7702(TxEip7702 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                max_priority_fee_per_gas: Decodable::decode(buf)?,
                max_fee_per_gas: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: Decodable::decode(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
                authorization_list: Decodable::decode(buf)?,
            }),
        };
        let signature = Signature::decode_with_parity(buf)?;
        Ok(Self::new(transaction, signature))
    }

    fn decode_legacy(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let head = RlpHeader::decode(buf)?;
        if !head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let mut tx = TxLegacy {
            nonce: Decodable::decode(buf)?,
            gas_price: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            to: Decodable::decode(buf)?,
            value: Decodable::decode(buf)?,
            input: Decodable::decode(buf)?,
            chain_id: None,
        };
        let v: u64 = Decodable::decode(buf)?;
        let (odd_y_parity, chain_id) =
            Signature::parity_from_v(v).ok_or(alloy_rlp::Error::Custom("invalid legacy v"))?;
        tx.chain_id = chain_id;
        let signature = Signature {
            odd_y_parity,
            r: Decodable::decode(buf)?,
            s: Decodable::decode(buf)?,
        };
        Ok(Self::new(Transaction::Legacy(tx), signature))
    }
}

impl Encodable for SignedTransaction {
    /// Body-list form: legacy encodes as a list, typed envelopes are wrapped
    /// in an RLP byte string.
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match &self.transaction {
            Transaction::Legacy(_) => self.encode_canonical(out),
            _ => {
                let canonical = self.encoded_canonical();
                canonical.as_slice().encode(out);
            }
        }
    }

    fn length(&self) -> usize {
        match &self.transaction {
            Transaction::Legacy(_) => self.encoded_canonical().len(),
            _ => {
                let inner = self.encoded_canonical().len();
                inner + alloy_rlp::length_of_length(inner)
            }
        }
    }
}

impl Decodable for SignedTransaction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let first = *buf.first().ok_or(alloy_rlp::Error::InputTooShort)?;
        if first >= 0xc0 {
            Self::decode_legacy(buf)
        } else {
            // Typed envelope wrapped as a byte string.
            let bytes = alloy_rlp::Header::decode_bytes(buf, false)?;
            Self::decode_canonical(&mut &bytes[..])
        }
    }
}
