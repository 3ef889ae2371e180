use crate::transaction::TxType;
use alloy_primitives::{Address, B256, Bloom, Bytes, Log as PrimLog, LogData};
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader, RlpDecodable, RlpEncodable};

/// A log emitted during execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics, at most four.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
}

impl Log {
    /// Fold this log into a bloom filter.
    pub fn accrue_to(&self, bloom: &mut Bloom) {
        let data = PrimLog {
            address: self.address,
            data: LogData::new_unchecked(self.topics.clone(), self.data.clone()),
        };
        bloom.accrue_log(&data);
    }
}

/// Execution receipt of a single transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Envelope type of the originating transaction.
    pub tx_type: TxType,
    /// Post-Byzantium status bit.
    pub success: bool,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Logs emitted by this transaction.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Bloom filter over this receipt's logs.
    pub fn bloom(&self) -> Bloom {
        let mut bloom = Bloom::ZERO;
        for log in &self.logs {
            log.accrue_to(&mut bloom);
        }
        bloom
    }

    fn payload_length(&self, bloom: &Bloom) -> usize {
        self.success.length()
            + self.cumulative_gas_used.length()
            + bloom.length()
            + self.logs.length()
    }

    /// Trie-leaf encoding: `rlp([status, cumulative_gas, bloom, logs])`,
    /// prefixed with the type byte for typed envelopes.
    pub fn encode_canonical(&self, out: &mut Vec<u8>) {
        if self.tx_type != TxType::Legacy {
            out.push(self.tx_type as u8);
        }
        let bloom = self.bloom();
        RlpHeader {
            list: true,
            payload_length: self.payload_length(&bloom),
        }
        .encode(out);
        self.success.encode(out);
        self.cumulative_gas_used.encode(out);
        bloom.encode(out);
        self.logs.encode(out);
    }

    /// Canonical encoding as an owned buffer.
    pub fn encoded_canonical(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_canonical(&mut out);
        out
    }

    /// Decode [`Self::encode_canonical`] output.
    pub fn decode_canonical(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let first = *buf.first().ok_or(alloy_rlp::Error::InputTooShort)?;
        let tx_type = if first < 0xc0 {
            *buf = &buf[1..];
            match first {
                1 => TxType::Eip2930,
                2 => TxType::Eip1559,
                3 => TxType::Eip4844,
                4 => TxType::Eip7702,
                _ => return Err(alloy_rlp::Error::Custom("unknown receipt type")),
            }
        } else {
            TxType::Legacy
        };
        let head = RlpHeader::decode(buf)?;
        if !head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let success = Decodable::decode(buf)?;
        let cumulative_gas_used = Decodable::decode(buf)?;
        let _bloom: Bloom = Decodable::decode(buf)?;
        let logs = Decodable::decode(buf)?;
        Ok(Self {
            tx_type,
            success,
            cumulative_gas_used,
            logs,
        })
    }
}
