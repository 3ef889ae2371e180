use alloy_primitives::{B256, U256};
use alloy_rlp::{Encodable, Header as RlpHeader};
use alloy_trie::KECCAK_EMPTY;

/// Malformed flat account encoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed flat account encoding")]
pub struct AccountDecodeError;

/// An execution-layer account.
///
/// The storage root is not part of the flat representation; it is derived by
/// the commitment from the storage domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account {
    /// Transaction count of the account.
    pub nonce: u64,
    /// Balance in wei.
    pub balance: U256,
    /// Keccak-256 of the account code.
    pub code_hash: B256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
        }
    }
}

impl Account {
    /// EIP-161: zero nonce, zero balance, empty code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == KECCAK_EMPTY
    }

    /// Compact fieldset encoding used by the accounts domain.
    ///
    /// A field-mask byte, then each present field as a length-prefixed
    /// minimal big-endian integer. Default fields are omitted, so the empty
    /// account encodes to a single zero byte.
    pub fn encode_flat(&self) -> Vec<u8> {
        let mut mask = 0u8;
        let mut out = Vec::with_capacity(1 + 8 + 32 + 32 + 2);
        out.push(0);
        if self.nonce != 0 {
            mask |= 0b001;
            let bytes = self.nonce.to_be_bytes();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            out.push((8 - skip) as u8);
            out.extend_from_slice(&bytes[skip..]);
        }
        if !self.balance.is_zero() {
            mask |= 0b010;
            let bytes = self.balance.to_be_bytes::<32>();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            out.push((32 - skip) as u8);
            out.extend_from_slice(&bytes[skip..]);
        }
        if self.code_hash != KECCAK_EMPTY {
            mask |= 0b100;
            out.extend_from_slice(self.code_hash.as_slice());
        }
        out[0] = mask;
        out
    }

    /// Decode [`Self::encode_flat`] output.
    pub fn decode_flat(mut buf: &[u8]) -> Result<Self, AccountDecodeError> {
        let (mask, rest) = buf.split_first().ok_or(AccountDecodeError)?;
        buf = rest;
        let mut account = Self::default();
        if mask & 0b001 != 0 {
            let (len, rest) = buf.split_first().ok_or(AccountDecodeError)?;
            let len = *len as usize;
            if len > 8 || rest.len() < len {
                return Err(AccountDecodeError);
            }
            let mut bytes = [0u8; 8];
            bytes[8 - len..].copy_from_slice(&rest[..len]);
            account.nonce = u64::from_be_bytes(bytes);
            buf = &rest[len..];
        }
        if mask & 0b010 != 0 {
            let (len, rest) = buf.split_first().ok_or(AccountDecodeError)?;
            let len = *len as usize;
            if len > 32 || rest.len() < len {
                return Err(AccountDecodeError);
            }
            account.balance = U256::from_be_slice(&rest[..len]);
            buf = &rest[len..];
        }
        if mask & 0b100 != 0 {
            if buf.len() < 32 {
                return Err(AccountDecodeError);
            }
            account.code_hash = B256::from_slice(&buf[..32]);
            buf = &buf[32..];
        }
        if !buf.is_empty() {
            return Err(AccountDecodeError);
        }
        Ok(account)
    }

    /// RLP leaf value for the state trie: `[nonce, balance, storage_root,
    /// code_hash]`.
    pub fn rlp_with_storage_root(&self, storage_root: B256) -> Vec<u8> {
        let payload = self.nonce.length()
            + self.balance.length()
            + storage_root.length()
            + self.code_hash.length();
        let mut out = Vec::with_capacity(payload + 2);
        RlpHeader {
            list: true,
            payload_length: payload,
        }
        .encode(&mut out);
        self.nonce.encode(&mut out);
        self.balance.encode(&mut out);
        storage_root.encode(&mut out);
        self.code_hash.encode(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    #[test]
    fn flat_round_trip() {
        let accounts = [
            Account::default(),
            Account {
                nonce: 1,
                ..Default::default()
            },
            Account {
                nonce: u64::MAX,
                balance: U256::MAX,
                code_hash: keccak256(b"code"),
            },
            Account {
                balance: U256::from(10u64).pow(U256::from(18u64)),
                ..Default::default()
            },
        ];
        for account in accounts {
            let encoded = account.encode_flat();
            assert_eq!(Account::decode_flat(&encoded), Ok(account));
        }
        assert_eq!(Account::default().encode_flat(), vec![0]);
    }

    #[test]
    fn truncated_is_rejected() {
        let encoded = Account {
            nonce: 300,
            ..Default::default()
        }
        .encode_flat();
        assert_eq!(
            Account::decode_flat(&encoded[..encoded.len() - 1]),
            Err(AccountDecodeError)
        );
        assert_eq!(Account::decode_flat(&[]), Err(AccountDecodeError));
    }
}
