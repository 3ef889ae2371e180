/// Default step width for small deployments; mainnet uses a larger one.
pub const DEFAULT_STEP_SIZE: u64 = 8192;

/// Fixed width, in transaction numbers, of one segment step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepSize(pub u64);

impl Default for StepSize {
    fn default() -> Self {
        Self(DEFAULT_STEP_SIZE)
    }
}

impl StepSize {
    /// Step index containing `txnum`.
    #[inline]
    pub fn step_of(self, txnum: u64) -> u64 {
        txnum / self.0
    }

    /// First transaction number of `step`.
    #[inline]
    pub fn first_txnum(self, step: u64) -> u64 {
        step * self.0
    }

    /// One past the last transaction number of `step`.
    #[inline]
    pub fn end_txnum(self, step: u64) -> u64 {
        (step + 1) * self.0
    }
}

/// Bitwise-complemented big-endian step, the hot-row key suffix. Larger
/// steps produce smaller suffixes, so the newest row of a key is the first
/// one a forward cursor meets.
#[inline]
pub(crate) fn inv_step_bytes(step: u64) -> [u8; 8] {
    (!step).to_be_bytes()
}

/// Inverse of [`inv_step_bytes`].
#[inline]
pub(crate) fn step_from_inv(bytes: &[u8]) -> Option<u64> {
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(!u64::from_be_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_steps_sort_newest_first() {
        assert!(inv_step_bytes(5) < inv_step_bytes(4));
        assert_eq!(step_from_inv(&inv_step_bytes(42)), Some(42));
        assert_eq!(step_from_inv(&[0u8; 4]), None);
    }

    #[test]
    fn step_arithmetic() {
        let step = StepSize(8192);
        assert_eq!(step.step_of(0), 0);
        assert_eq!(step.step_of(8191), 0);
        assert_eq!(step.step_of(8192), 1);
        assert_eq!(step.first_txnum(2), 16384);
        assert_eq!(step.end_txnum(2), 24576);
    }
}
