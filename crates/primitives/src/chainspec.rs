//! Chain parameters and the hardfork schedule.

use alloy_primitives::{Address, ChainId, U256};
use once_cell::sync::Lazy;

/// Protocol revisions in activation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Revision {
    /// Launch rules.
    Frontier,
    /// EIP-2, EIP-7 era.
    Homestead,
    /// EIP-150/158/161 state clearing.
    SpuriousDragon,
    /// EIP-658 receipt status.
    Byzantium,
    /// EIP-1014/1052.
    Constantinople,
    /// EIP-1884/2028/2200.
    Istanbul,
    /// EIP-2929/2930 access lists.
    Berlin,
    /// EIP-1559/3529.
    London,
    /// The proof-of-stake transition.
    Paris,
    /// EIP-3651/3855/3860/4895, time-scheduled.
    Shanghai,
    /// EIP-1153/4788/4844/6780.
    Cancun,
    /// EIP-7702/7685.
    Prague,
}

/// Per-chain configuration passed explicitly to every component.
#[derive(Clone, Debug)]
pub struct ChainSpec {
    /// Chain id for EIP-155 signing.
    pub chain_id: ChainId,
    /// Block-scheduled fork heights, in [`Revision`] order up to Paris.
    pub homestead_block: u64,
    /// Spurious Dragon height.
    pub spurious_dragon_block: u64,
    /// Byzantium height.
    pub byzantium_block: u64,
    /// Constantinople height.
    pub constantinople_block: u64,
    /// Istanbul height.
    pub istanbul_block: u64,
    /// Berlin height.
    pub berlin_block: u64,
    /// London height.
    pub london_block: u64,
    /// Merge height.
    pub paris_block: u64,
    /// Shanghai activation timestamp.
    pub shanghai_time: Option<u64>,
    /// Cancun activation timestamp.
    pub cancun_time: Option<u64>,
    /// Prague activation timestamp.
    pub prague_time: Option<u64>,
}

/// Ethereum mainnet schedule.
pub static MAINNET: Lazy<ChainSpec> = Lazy::new(|| ChainSpec {
    chain_id: 1,
    homestead_block: 1_150_000,
    spurious_dragon_block: 2_675_000,
    byzantium_block: 4_370_000,
    constantinople_block: 7_280_000,
    istanbul_block: 9_069_000,
    berlin_block: 12_244_000,
    london_block: 12_965_000,
    paris_block: 15_537_394,
    shanghai_time: Some(1_681_338_455),
    cancun_time: Some(1_710_338_135),
    prague_time: Some(1_746_612_311),
});

impl ChainSpec {
    /// A development spec with every revision active from genesis.
    pub fn dev(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            homestead_block: 0,
            spurious_dragon_block: 0,
            byzantium_block: 0,
            constantinople_block: 0,
            istanbul_block: 0,
            berlin_block: 0,
            london_block: 0,
            paris_block: 0,
            shanghai_time: Some(0),
            cancun_time: Some(0),
            prague_time: Some(0),
        }
    }

    /// The revision active at `(number, timestamp)`.
    pub fn revision_at(&self, number: u64, timestamp: u64) -> Revision {
        let active = |time: Option<u64>| time.is_some_and(|t| timestamp >= t);
        if active(self.prague_time) {
            Revision::Prague
        } else if active(self.cancun_time) {
            Revision::Cancun
        } else if active(self.shanghai_time) {
            Revision::Shanghai
        } else if number >= self.paris_block {
            Revision::Paris
        } else if number >= self.london_block {
            Revision::London
        } else if number >= self.berlin_block {
            Revision::Berlin
        } else if number >= self.istanbul_block {
            Revision::Istanbul
        } else if number >= self.constantinople_block {
            Revision::Constantinople
        } else if number >= self.byzantium_block {
            Revision::Byzantium
        } else if number >= self.spurious_dragon_block {
            Revision::SpuriousDragon
        } else if number >= self.homestead_block {
            Revision::Homestead
        } else {
            Revision::Frontier
        }
    }

    /// Precompile addresses active under `revision`.
    ///
    /// Low addresses `0x01..`: four launch precompiles, four more at
    /// Byzantium, blake2f at Istanbul, the KZG point evaluation at Cancun,
    /// the BLS suite at Prague.
    pub fn precompiles(&self, revision: Revision) -> Vec<Address> {
        let count: u8 = if revision >= Revision::Prague {
            17
        } else if revision >= Revision::Cancun {
            10
        } else if revision >= Revision::Istanbul {
            9
        } else if revision >= Revision::Byzantium {
            8
        } else {
            4
        };
        (1..=count)
            .map(|index| {
                let mut bytes = [0u8; 20];
                bytes[19] = index;
                Address::from(bytes)
            })
            .collect()
    }
}

/// Denominator of the EIP-4844 blob base fee exponential (Cancun value).
pub const BLOB_BASE_FEE_UPDATE_FRACTION: u64 = 3_338_477;

/// Floor of the blob base fee in wei.
pub const MIN_BLOB_BASE_FEE: u64 = 1;

/// Blob base fee for a given running excess, the `fake_exponential` of
/// EIP-4844.
pub fn blob_base_fee(excess_blob_gas: u64) -> U256 {
    let factor = U256::from(MIN_BLOB_BASE_FEE);
    let numerator = U256::from(excess_blob_gas);
    let denominator = U256::from(BLOB_BASE_FEE_UPDATE_FRACTION);

    let mut output = U256::ZERO;
    let mut accum = factor * denominator;
    let mut i = U256::from(1u64);
    while !accum.is_zero() {
        output += accum;
        accum = accum * numerator / (denominator * i);
        i += U256::from(1u64);
    }
    output / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn mainnet_schedule_ordering() {
        let spec = &*MAINNET;
        assert_eq!(spec.revision_at(0, 0), Revision::Frontier);
        assert_eq!(spec.revision_at(12_965_000, 0), Revision::London);
        assert_eq!(spec.revision_at(15_537_394, 0), Revision::Paris);
        assert_eq!(
            spec.revision_at(17_000_000, 1_681_338_455),
            Revision::Shanghai
        );
        assert_eq!(
            spec.revision_at(19_426_587, 1_710_338_135),
            Revision::Cancun
        );
        assert!(Revision::Cancun > Revision::London);
    }

    #[test]
    fn dev_spec_is_latest_everywhere() {
        let spec = ChainSpec::dev(1337);
        assert_eq!(spec.revision_at(0, 0), Revision::Prague);
    }

    #[rstest]
    #[case(Revision::Homestead, 4)]
    #[case(Revision::Byzantium, 8)]
    #[case(Revision::Istanbul, 9)]
    #[case(Revision::Cancun, 10)]
    #[case(Revision::Prague, 17)]
    fn precompile_counts(#[case] revision: Revision, #[case] count: usize) {
        let spec = ChainSpec::dev(1);
        assert_eq!(spec.precompiles(revision).len(), count);
    }

    #[test]
    fn blob_base_fee_at_zero_excess() {
        assert_eq!(blob_base_fee(0), U256::from(MIN_BLOB_BASE_FEE));
    }
}
