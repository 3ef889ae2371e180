use crate::{Domains, Result};
use sse_kv::RwTx;
use sse_temporal::StepSize;

/// Collate every fully completed step below `upto_txnum` across all
/// domains, publishing segment files and pruning the covered hot rows.
///
/// Runs between rounds; collation is monotonic, a step is frozen only once
/// the KV rows covering it are durably committed.
pub fn collate_below(
    tx: &mut impl RwTx,
    domains: &Domains,
    step: StepSize,
    upto_txnum: u64,
) -> Result<()> {
    let complete = step.step_of(upto_txnum);
    for domain in [&domains.accounts, &domains.storage, &domains.code] {
        for step_index in domain.frozen_step()..complete {
            domain.collate(tx, step_index)?;
        }
    }
    Ok(())
}

/// Merge all published segments of every domain into one file set per
/// domain.
pub fn merge_all(domains: &Domains) -> Result<()> {
    for domain in [&domains.accounts, &domains.storage, &domains.code] {
        let frozen = domain.frozen_step();
        if frozen > 1 {
            domain.merge(0, frozen)?;
        }
    }
    Ok(())
}
