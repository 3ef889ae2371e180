use crate::{Result, StageError, StageId};
use sse_kv::{RoTx, RwTx, Table};
use sse_primitives::BlockNumber;

/// The committed progress marker of a stage; zero when never run.
pub fn read_progress(tx: &impl RoTx, stage: StageId) -> Result<BlockNumber> {
    match tx.get(Table::SyncStageProgress, stage.name().as_bytes())? {
        None => Ok(0),
        Some(bytes) => {
            let array: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StageError::Decode("progress marker width"))?;
            Ok(u64::from_be_bytes(array))
        }
    }
}

/// Persist a stage's progress marker; crash-atomic with the stage's own
/// writes since it shares their transaction.
pub fn save_progress(tx: &mut impl RwTx, stage: StageId, block: BlockNumber) -> Result<()> {
    tx.put(
        Table::SyncStageProgress,
        stage.name().as_bytes(),
        &block.to_be_bytes(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sse_kv::{Kv, MemKv};

    #[test]
    fn markers_round_trip_and_default_to_zero() {
        let store = MemKv::default();
        let mut tx = store.begin_rw().unwrap();
        assert_eq!(read_progress(&tx, StageId::Headers).unwrap(), 0);
        save_progress(&mut tx, StageId::Headers, 42).unwrap();
        assert_eq!(read_progress(&tx, StageId::Headers).unwrap(), 42);
        assert_eq!(read_progress(&tx, StageId::Bodies).unwrap(), 0);
    }
}
