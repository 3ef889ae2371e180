use crate::{Header, SignedTransaction, Withdrawal};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// Transactions, ommers and withdrawals of a block.
///
/// Integrity against the owning header (transaction root, ommer hash,
/// withdrawal root) is verified by the bodies stage, not enforced here.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[rlp(trailing)]
pub struct BlockBody {
    /// Transactions in execution order.
    pub transactions: Vec<SignedTransaction>,
    /// Ommer headers; at most two, empty post-merge.
    pub ommers: Vec<Header>,
    /// Withdrawals, present from Shanghai.
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl BlockBody {
    /// Keccak-256 of the RLP-encoded ommer list.
    pub fn ommers_hash(&self) -> alloy_primitives::B256 {
        alloy_primitives::keccak256(alloy_rlp::encode(&self.ommers))
    }
}

/// A header together with its body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// The block body.
    pub body: BlockBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EMPTY_LIST_HASH;

    #[test]
    fn empty_ommer_hash_is_canonical() {
        assert_eq!(BlockBody::default().ommers_hash(), EMPTY_LIST_HASH);
    }

    #[test]
    fn body_round_trip_without_withdrawals() {
        let body = BlockBody {
            transactions: vec![SignedTransaction::default()],
            ommers: vec![],
            withdrawals: None,
        };
        let encoded = alloy_rlp::encode(&body);
        let decoded =
            <BlockBody as alloy_rlp::Decodable>::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn body_round_trip_with_withdrawals() {
        let body = BlockBody {
            transactions: vec![],
            ommers: vec![],
            withdrawals: Some(vec![Withdrawal {
                index: 7,
                validator_index: 1,
                address: alloy_primitives::Address::repeat_byte(0xaa),
                amount: 32,
            }]),
        };
        let encoded = alloy_rlp::encode(&body);
        let decoded =
            <BlockBody as alloy_rlp::Decodable>::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, body);
    }
}
