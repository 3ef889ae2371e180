use crate::{
    BadBlockReason, DomainReader, ExecOutput, Result, Stage, StageContext, StageError, StageId,
    StageInput, compute_state_root, read_progress,
    reader::storage_key,
    stages::{block_key, max_txnum, read_body, read_header, read_senders},
};
use alloy_rlp::Encodable;
use sse_kv::{RoTx, RwTx, Table};
use sse_primitives::{
    Address, B256, BEACON_ROOTS_ADDRESS, BEACON_ROOTS_HISTORY_BUFFER_LENGTH, BlockNumber,
    Bloom, Bytes, Receipt, Revision, SignedTransaction, TxKind, TxNumber, U256,
    chainspec::blob_base_fee, keccak256,
};
use sse_state::{
    BlockContext, CallKind, Evm, HostAdapter, IntraBlockState, Message, StateWrite,
};

/// The heart of the pipeline: executes every transaction of every block
/// through the external EVM, settles fees and refunds, applies withdrawals
/// and the beacon-root system write, verifies the header commitments, and
/// flushes the state deltas through the domains.
pub struct ExecutionStage {
    evm: Box<dyn Evm>,
    batch_size: u64,
}

impl std::fmt::Debug for ExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStage")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// Blocks executed per transaction commit by default.
const DEFAULT_BATCH_SIZE: u64 = 10_000;

impl ExecutionStage {
    /// An execution stage driving `evm`.
    pub fn new(evm: Box<dyn Evm>) -> Self {
        Self {
            evm,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Limit the blocks executed per invocation; the stage reports
    /// `done = false` at the limit and is re-entered on a fresh
    /// transaction.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// CREATE address: `keccak256(rlp([sender, nonce]))[12..]`.
fn create_address(sender: Address, nonce: u64) -> Address {
    let payload = sender.length() + nonce.length();
    let mut buf = Vec::with_capacity(payload + 1);
    alloy_rlp::Header {
        list: true,
        payload_length: payload,
    }
    .encode(&mut buf);
    sender.encode(&mut buf);
    nonce.encode(&mut buf);
    Address::from_slice(&keccak256(&buf)[12..])
}

fn invalid(number: BlockNumber, reason: &'static str) -> StageError {
    StageError::InvalidBlock {
        number,
        reason: BadBlockReason::InvalidTransaction(reason),
    }
}

fn mismatch(number: BlockNumber, field: &'static str) -> StageError {
    StageError::InvalidBlock {
        number,
        reason: BadBlockReason::ExecutionMismatch(field),
    }
}

struct TxEnv<'a> {
    number: BlockNumber,
    revision: Revision,
    context: &'a BlockContext,
    prune_empty: bool,
    coinbase_warm: bool,
}

impl ExecutionStage {
    #[allow(clippy::too_many_arguments)]
    fn execute_transaction<R: sse_state::StateReader>(
        &mut self,
        ctx: &StageContext<'_>,
        env: &TxEnv<'_>,
        state: &mut IntraBlockState<R>,
        ancestors: &dyn Fn(u64) -> Option<B256>,
        stx: &SignedTransaction,
        sender: Address,
        txnum: TxNumber,
        cumulative_gas: &mut u64,
    ) -> Result<Receipt> {
        let tx = &stx.transaction;
        let number = env.number;
        let gas_limit = tx.gas_limit();
        let base_fee = env.context.base_fee;

        // Pre-execution validation.
        if state.get_nonce(sender)? != tx.nonce() {
            return Err(invalid(number, "nonce mismatch"));
        }
        if let Some(base_fee) = base_fee {
            if tx.max_fee_per_gas() < u128::from(base_fee) {
                return Err(invalid(number, "fee cap below base fee"));
            }
            if let Some(priority) = tx.max_priority_fee_per_gas() {
                if priority > tx.max_fee_per_gas() {
                    return Err(invalid(number, "priority fee above fee cap"));
                }
            }
        }
        if let Some(hashes) = tx.blob_versioned_hashes() {
            if hashes.is_empty() {
                return Err(invalid(number, "blob transaction without blobs"));
            }
            if hashes.iter().any(|hash| hash[0] != 0x01) {
                return Err(invalid(number, "unknown blob hash version"));
            }
            let blob_fee_cap = tx.max_fee_per_blob_gas().unwrap_or_default();
            if U256::from(blob_fee_cap) < env.context.blob_base_fee {
                return Err(invalid(number, "blob fee cap below blob base fee"));
            }
        }
        if tx.authorization_list().is_some_and(|auths| auths.is_empty()) {
            return Err(invalid(number, "empty authorization list"));
        }
        let intrinsic = tx.intrinsic_gas(env.revision);
        if intrinsic > gas_limit {
            return Err(invalid(number, "intrinsic gas above limit"));
        }
        let max_cost = U256::from(tx.max_fee_per_gas()) * U256::from(gas_limit)
            + tx.value()
            + U256::from(tx.max_fee_per_blob_gas().unwrap_or_default())
                * U256::from(tx.blob_gas());
        if state.get_balance(sender)? < max_cost {
            return Err(invalid(number, "insufficient balance for gas"));
        }

        // Buy gas and bump the nonce.
        let effective_gas_price = tx.effective_gas_price(base_fee);
        let upfront = U256::from(effective_gas_price) * U256::from(gas_limit)
            + U256::from(tx.blob_gas()) * env.context.blob_base_fee;
        state.sub_balance(sender, upfront)?;
        state.set_nonce(sender, tx.nonce() + 1)?;

        // Warm set for this transaction.
        let recipient = match tx.to() {
            TxKind::Call(address) => address,
            TxKind::Create => create_address(sender, tx.nonce()),
        };
        let precompiles = ctx.spec.precompiles(env.revision);
        let declared = tx.access_list().map(|l| l.0.as_slice()).unwrap_or(&[]);
        state.prepare_access_list(
            sender,
            Some(recipient),
            &precompiles,
            declared,
            env.coinbase_warm.then_some(env.context.coinbase),
        );

        let snapshot = state.snapshot();
        let message = Message {
            kind: if tx.is_create() {
                CallKind::Create
            } else {
                CallKind::Call
            },
            caller: sender,
            to: recipient,
            value: tx.value(),
            input: tx.input().clone(),
            access_list: declared.to_vec(),
            authorizations: tx.authorization_list().unwrap_or(&[]).to_vec(),
            blob_hashes: tx.blob_versioned_hashes().unwrap_or(&[]).to_vec(),
        };
        let available = gas_limit - intrinsic;
        let result = {
            let mut host = HostAdapter {
                state,
                context: env.context,
                ancestor_hashes: ancestors,
            };
            self.evm.execute_message(&mut host, message, available)?
        };
        let mut gas_used = intrinsic + (available - result.gas_left.min(available));
        if result.success {
            // Refund, capped at a fifth of the gas used post-London.
            let quotient = if env.revision >= Revision::London { 5 } else { 2 };
            gas_used -= state.get_refund().min(gas_used / quotient);
        } else {
            // The caller still pays for what was consumed.
            state.revert_to_snapshot(snapshot);
        }

        // Return unused gas, tip the coinbase; the base fee share burns by
        // never being credited.
        let leftover = U256::from(gas_limit - gas_used) * U256::from(effective_gas_price);
        state.add_balance(sender, leftover)?;
        let priority = tx.effective_priority_fee(base_fee);
        state.add_balance(
            env.context.coinbase,
            U256::from(gas_used) * U256::from(priority),
        )?;

        *cumulative_gas += gas_used;
        let receipt = Receipt {
            tx_type: tx.tx_type(),
            success: result.success,
            cumulative_gas_used: *cumulative_gas,
            logs: state.logs().to_vec(),
        };
        state.finalize(txnum, env.prune_empty)?;
        Ok(receipt)
    }

    fn execute_block<TX: RwTx>(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        number: BlockNumber,
    ) -> Result<()> {
        let header = read_header(tx, number)?;
        let body = read_body(tx, number)?;
        let senders = read_senders(tx, number)?;
        if senders.len() != body.transactions.len() {
            return Err(StageError::Decode("senders count"));
        }
        let revision = ctx.spec.revision_at(header.number, header.timestamp);
        let base_txnum = max_txnum(tx, number - 1)? + 1;
        let end_txnum = base_txnum + body.transactions.len() as u64 + 1;

        let context = BlockContext {
            number: header.number,
            timestamp: header.timestamp,
            coinbase: header.beneficiary,
            gas_limit: header.gas_limit,
            base_fee: header.base_fee_per_gas,
            prev_randao: header.mix_hash,
            difficulty: header.difficulty,
            blob_base_fee: header
                .excess_blob_gas
                .map(blob_base_fee)
                .unwrap_or(U256::ZERO),
            chain_id: ctx.spec.chain_id,
        };
        let env = TxEnv {
            number,
            revision,
            context: &context,
            prune_empty: revision >= Revision::SpuriousDragon,
            coinbase_warm: revision >= Revision::Shanghai,
        };

        let mut receipts = Vec::with_capacity(body.transactions.len());
        let mut cumulative_gas = 0u64;
        let writes: Vec<StateWrite>;
        {
            let reader = DomainReader {
                tx: &*tx,
                domains: ctx.domains,
            };
            let ancestor_view = &*tx;
            let ancestors = move |n: u64| -> Option<B256> {
                if n >= number || number - n > 256 {
                    return None;
                }
                ancestor_view
                    .get(Table::CanonicalHashes, &block_key(n))
                    .ok()
                    .flatten()
                    .map(|bytes| B256::from_slice(&bytes))
            };
            let mut state = IntraBlockState::new(reader);

            for (i, stx) in body.transactions.iter().enumerate() {
                let txnum = base_txnum + 1 + i as u64;
                let receipt = self.execute_transaction(
                    ctx,
                    &env,
                    &mut state,
                    &ancestors,
                    stx,
                    senders[i],
                    txnum,
                    &mut cumulative_gas,
                )?;
                receipts.push(receipt);
            }

            // Block-level system work settles on the trailing system slot.
            if let Some(withdrawals) = &body.withdrawals {
                for withdrawal in withdrawals {
                    state.add_balance(withdrawal.address, withdrawal.amount_wei())?;
                }
            }
            if revision >= Revision::Cancun {
                if let Some(root) = header.parent_beacon_block_root {
                    let slot = header.timestamp % BEACON_ROOTS_HISTORY_BUFFER_LENGTH;
                    state.set_state(
                        BEACON_ROOTS_ADDRESS,
                        B256::from(U256::from(slot)),
                        U256::from(header.timestamp),
                    )?;
                    state.set_state(
                        BEACON_ROOTS_ADDRESS,
                        B256::from(U256::from(slot + BEACON_ROOTS_HISTORY_BUFFER_LENGTH)),
                        U256::from_be_bytes(root.0),
                    )?;
                }
            }
            state.finalize(end_txnum, env.prune_empty)?;
            writes = state.take_writes();
        }

        if cumulative_gas != header.gas_used {
            return Err(mismatch(number, "gas used"));
        }

        for write in writes {
            match write {
                StateWrite::Account {
                    address,
                    txnum,
                    account,
                } => match account {
                    Some(account) => ctx.domains.accounts.put(
                        tx,
                        address.as_slice(),
                        &account.encode_flat(),
                        txnum,
                    )?,
                    None => ctx.domains.accounts.delete(tx, address.as_slice(), txnum)?,
                },
                StateWrite::Storage {
                    address,
                    slot,
                    txnum,
                    value,
                } => {
                    let key = storage_key(address, slot);
                    if value.is_zero() {
                        ctx.domains.storage.delete(tx, &key, txnum)?;
                    } else {
                        ctx.domains.storage.put(
                            tx,
                            &key,
                            &value.to_be_bytes_trimmed_vec(),
                            txnum,
                        )?;
                    }
                }
                StateWrite::Code {
                    code_hash,
                    txnum,
                    code,
                } => ctx
                    .domains
                    .code
                    .put(tx, code_hash.as_slice(), &code, txnum)?,
            }
        }

        let receipts_root =
            sse_trie::ordered_trie_root(receipts.iter().map(Receipt::encoded_canonical))?;
        if receipts_root != header.receipts_root {
            return Err(mismatch(number, "receipts root"));
        }
        let mut bloom = Bloom::ZERO;
        for receipt in &receipts {
            bloom.accrue_bloom(&receipt.bloom());
        }
        if bloom != header.logs_bloom {
            return Err(mismatch(number, "logs bloom"));
        }
        let state_root = compute_state_root(tx, ctx.domains)?;
        if state_root != header.state_root {
            return Err(mismatch(number, "state root"));
        }

        let receipt_rows: Vec<Bytes> = receipts
            .iter()
            .map(|receipt| Bytes::from(receipt.encoded_canonical()))
            .collect();
        tx.put(Table::Receipts, &block_key(number), &alloy_rlp::encode(&receipt_rows))?;
        let logs: Vec<sse_primitives::Log> = receipts
            .into_iter()
            .flat_map(|receipt| receipt.logs)
            .collect();
        tx.put(Table::Logs, &block_key(number), &alloy_rlp::encode(&logs))?;
        tracing::debug!(number, txs = senders.len(), "block executed");
        Ok(())
    }
}

impl<TX: RwTx> Stage<TX> for ExecutionStage {
    fn id(&self) -> StageId {
        StageId::Execution
    }

    fn execute(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput> {
        let mut progress = input.from;
        let target = input.target.min(read_progress(tx, StageId::Senders)?);
        let batch_end = target.min(progress.saturating_add(self.batch_size));
        while progress < batch_end {
            if ctx.aborted() {
                return Err(StageError::Shutdown);
            }
            let number = progress + 1;
            self.execute_block(ctx, tx, number)?;
            progress = number;
        }
        Ok(ExecOutput {
            progress,
            done: progress == target,
        })
    }

    fn unwind(&mut self, ctx: &StageContext<'_>, tx: &mut TX, to: BlockNumber) -> Result<()> {
        let progress = read_progress(tx, StageId::Execution)?;
        if to >= progress {
            return Ok(());
        }
        // Everything after the unwound block's trailing system slot goes.
        let boundary = max_txnum(tx, to)? + 1;
        ctx.domains.accounts.unwind(tx, boundary)?;
        ctx.domains.storage.unwind(tx, boundary)?;
        for number in (to + 1..=progress).rev() {
            tx.delete(Table::Receipts, &block_key(number))?;
            tx.delete(Table::Logs, &block_key(number))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_address_vector() {
        // keccak(rlp([sender, 0]))[12..] for a well-known sender.
        let sender = sse_primitives::address!("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0");
        let created = create_address(sender, 0);
        assert_eq!(
            created,
            sse_primitives::address!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d")
        );
    }
}
