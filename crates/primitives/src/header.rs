use alloy_primitives::{Address, B64, B256, Bloom, Bytes, U256, keccak256};
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};

/// Execution-layer block header.
///
/// Canonical identity is [`Header::hash`], the Keccak-256 of the RLP
/// encoding. Post-fork fields are optional and appear in the encoding only
/// from their activating hardfork onward.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Hash of the parent block header.
    pub parent_hash: B256,
    /// Keccak-256 of the RLP-encoded ommer list.
    pub ommers_hash: B256,
    /// Address receiving the block reward and priority fees.
    pub beneficiary: Address,
    /// Root of the world state after this block.
    pub state_root: B256,
    /// Root of the ordered transaction trie.
    pub transactions_root: B256,
    /// Root of the ordered receipt trie.
    pub receipts_root: B256,
    /// Union of the bloom filters of all logs in the block.
    pub logs_bloom: Bloom,
    /// Proof-of-work difficulty; zero post-merge.
    pub difficulty: U256,
    /// Block height.
    pub number: u64,
    /// Gas limit of the block.
    pub gas_limit: u64,
    /// Total gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Unix timestamp, strictly greater than the parent's.
    pub timestamp: u64,
    /// Arbitrary extra data, at most 32 bytes.
    pub extra_data: Bytes,
    /// Pre-merge mix hash, post-merge prev-randao.
    pub mix_hash: B256,
    /// Proof-of-work nonce; zero post-merge.
    pub nonce: B64,
    /// Base fee per gas (EIP-1559, London).
    pub base_fee_per_gas: Option<u64>,
    /// Root of the withdrawal trie (EIP-4895, Shanghai).
    pub withdrawals_root: Option<B256>,
    /// Total blob gas consumed (EIP-4844, Cancun).
    pub blob_gas_used: Option<u64>,
    /// Running excess of blob gas over target (EIP-4844, Cancun).
    pub excess_blob_gas: Option<u64>,
    /// Parent beacon block root (EIP-4788, Cancun).
    pub parent_beacon_block_root: Option<B256>,
    /// Hash of the execution requests list (EIP-7685, Prague).
    pub requests_hash: Option<B256>,
}

impl Header {
    /// Keccak-256 of the canonical encoding.
    pub fn hash(&self) -> B256 {
        let mut out = Vec::with_capacity(self.length());
        self.encode(&mut out);
        keccak256(&out)
    }

    /// Seal the header, memoizing its hash.
    pub fn seal(self) -> SealedHeader {
        let hash = self.hash();
        SealedHeader { header: self, hash }
    }

    fn payload_length(&self) -> usize {
        let mut len = self.parent_hash.length()
            + self.ommers_hash.length()
            + self.beneficiary.length()
            + self.state_root.length()
            + self.transactions_root.length()
            + self.receipts_root.length()
            + self.logs_bloom.length()
            + self.difficulty.length()
            + self.number.length()
            + self.gas_limit.length()
            + self.gas_used.length()
            + self.timestamp.length()
            + self.extra_data.length()
            + self.mix_hash.length()
            + self.nonce.length();
        if let Some(base_fee) = self.base_fee_per_gas {
            len += base_fee.length();
        }
        if let Some(root) = self.withdrawals_root {
            len += root.length();
        }
        if let Some(blob_gas) = self.blob_gas_used {
            len += blob_gas.length();
        }
        if let Some(excess) = self.excess_blob_gas {
            len += excess.length();
        }
        if let Some(root) = self.parent_beacon_block_root {
            len += root.length();
        }
        if let Some(hash) = self.requests_hash {
            len += hash.length();
        }
        len
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        RlpHeader {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.parent_hash.encode(out);
        self.ommers_hash.encode(out);
        self.beneficiary.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        // Trailing optionals must form a prefix chain: a later fork field is
        // only encodable if every earlier one is present.
        if let Some(base_fee) = self.base_fee_per_gas {
            base_fee.encode(out);
        }
        if let Some(root) = self.withdrawals_root {
            root.encode(out);
        }
        if let Some(blob_gas) = self.blob_gas_used {
            blob_gas.encode(out);
        }
        if let Some(excess) = self.excess_blob_gas {
            excess.encode(out);
        }
        if let Some(root) = self.parent_beacon_block_root {
            root.encode(out);
        }
        if let Some(hash) = self.requests_hash {
            hash.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload = self.payload_length();
        payload + alloy_rlp::length_of_length(payload)
    }
}

impl Decodable for Header {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = RlpHeader::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let mut this = Self {
            parent_hash: Decodable::decode(buf)?,
            ommers_hash: Decodable::decode(buf)?,
            beneficiary: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            transactions_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            logs_bloom: Decodable::decode(buf)?,
            difficulty: Decodable::decode(buf)?,
            number: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            extra_data: Decodable::decode(buf)?,
            mix_hash: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            ..Default::default()
        };
        if started_len - buf.len() < rlp_head.payload_length {
            this.base_fee_per_gas = Some(Decodable::decode(buf)?);
        }
        if started_len - buf.len() < rlp_head.payload_length {
            this.withdrawals_root = Some(Decodable::decode(buf)?);
        }
        if started_len - buf.len() < rlp_head.payload_length {
            this.blob_gas_used = Some(Decodable::decode(buf)?);
        }
        if started_len - buf.len() < rlp_head.payload_length {
            this.excess_blob_gas = Some(Decodable::decode(buf)?);
        }
        if started_len - buf.len() < rlp_head.payload_length {
            this.parent_beacon_block_root = Some(Decodable::decode(buf)?);
        }
        if started_len - buf.len() < rlp_head.payload_length {
            this.requests_hash = Some(Decodable::decode(buf)?);
        }
        if started_len - buf.len() != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: started_len - buf.len(),
            });
        }
        Ok(this)
    }
}

/// A header paired with its memoized hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedHeader {
    header: Header,
    hash: B256,
}

impl SealedHeader {
    /// The sealed hash.
    #[inline]
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// The inner header.
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Unseal back into the raw header.
    #[inline]
    pub fn into_header(self) -> Header {
        self.header
    }
}

impl std::ops::Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}
