use alloy_primitives::{Address, B256, U256, keccak256, uint};
use alloy_rlp::{Decodable, Encodable};
use secp256k1::{
    Message, SECP256K1,
    ecdsa::{RecoverableSignature, RecoveryId},
};

/// Half of the secp256k1 curve order. Signatures with `s` above this value
/// are malleable and rejected since Homestead.
pub const SECP256K1N_HALF: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Failure to recover a sender from an ECDSA signature.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    /// `s` exceeds the homestead bound.
    #[error("signature s value exceeds secp256k1n/2")]
    HighS,
    /// The signature does not describe a curve point.
    #[error("invalid signature: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

/// A secp256k1 signature in `(r, s, y_parity)` form.
///
/// Legacy transactions fold the chain id into `v`; typed transactions carry
/// the parity bit directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    /// `r` component.
    pub r: U256,
    /// `s` component.
    pub s: U256,
    /// Parity of the `y` coordinate of the ephemeral public key.
    pub odd_y_parity: bool,
}

impl Signature {
    /// Legacy `v` value: EIP-155 folds the chain id in, pre-155 uses 27/28.
    pub fn v(&self, chain_id: Option<u64>) -> u64 {
        match chain_id {
            Some(id) => self.odd_y_parity as u64 + 35 + id * 2,
            None => self.odd_y_parity as u64 + 27,
        }
    }

    /// Split a legacy `v` into `(parity, chain_id)`.
    ///
    /// Returns `None` for malformed values below 27.
    pub fn parity_from_v(v: u64) -> Option<(bool, Option<u64>)> {
        match v {
            27 => Some((false, None)),
            28 => Some((true, None)),
            v if v >= 35 => Some((((v - 35) % 2) != 0, Some((v - 35) / 2))),
            _ => None,
        }
    }

    /// Recover the signing address for `hash`.
    ///
    /// Applies the homestead low-`s` rule.
    pub fn recover(&self, hash: B256) -> Result<Address, SignatureError> {
        if self.s > SECP256K1N_HALF {
            return Err(SignatureError::HighS);
        }
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r.to_be_bytes::<32>());
        compact[32..].copy_from_slice(&self.s.to_be_bytes::<32>());
        let recovery_id = RecoveryId::try_from(self.odd_y_parity as i32)?;
        let signature = RecoverableSignature::from_compact(&compact, recovery_id)?;
        let public = SECP256K1.recover_ecdsa(&Message::from_digest(hash.0), &signature)?;
        let digest = keccak256(&public.serialize_uncompressed()[1..]);
        Ok(Address::from_slice(&digest[12..]))
    }

    pub(crate) fn payload_length(&self) -> usize {
        self.odd_y_parity.length() + self.r.length() + self.s.length()
    }

    /// Encode as `parity, r, s` (typed transaction tail).
    pub(crate) fn encode_with_parity(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.odd_y_parity.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    /// Decode a `parity, r, s` tail.
    pub(crate) fn decode_with_parity(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        Ok(Self {
            odd_y_parity: Decodable::decode(buf)?,
            r: Decodable::decode(buf)?,
            s: Decodable::decode(buf)?,
        })
    }
}
