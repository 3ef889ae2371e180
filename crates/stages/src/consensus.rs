use sse_primitives::Header;

/// Consensus-engine-specific header validity: difficulty, seal, extra-data
/// policy, gas-limit drift. Delegated so the engine stays agnostic of
/// proof-of-work versus proof-of-stake.
pub trait HeaderValidator: std::fmt::Debug + Send {
    /// Validate `header` against its stored parent. An error names the
    /// violated rule.
    fn validate(&self, header: &Header, parent: &Header) -> Result<(), &'static str>;
}

/// Accepts everything; the engine's own structural checks still apply.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysValid;

impl HeaderValidator for AlwaysValid {
    fn validate(&self, _header: &Header, _parent: &Header) -> Result<(), &'static str> {
        Ok(())
    }
}
