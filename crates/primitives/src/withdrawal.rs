use alloy_primitives::{Address, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// Multiplier from withdrawal gwei amounts to wei.
pub const GWEI_TO_WEI: u64 = 1_000_000_000;

/// A validator withdrawal (EIP-4895).
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Withdrawal {
    /// Monotonic withdrawal counter.
    pub index: u64,
    /// Index of the withdrawing validator.
    pub validator_index: u64,
    /// Receiving address.
    pub address: Address,
    /// Amount in gwei.
    pub amount: u64,
}

impl Withdrawal {
    /// Credited amount in wei.
    pub fn amount_wei(&self) -> U256 {
        U256::from(self.amount) * U256::from(GWEI_TO_WEI)
    }
}
