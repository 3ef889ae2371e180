use crate::{IntraBlockState, Result, StateReader};
use sse_primitives::{Address, B256, Bytes, Log, SignedAuthorization, U256};

/// Kind of an outermost EVM invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// Plain message call.
    Call,
    /// Contract creation.
    Create,
    /// CREATE2 with a salt.
    Create2 {
        /// Creation salt.
        salt: B256,
    },
    /// Delegate call.
    DelegateCall,
    /// Static (read-only) call.
    StaticCall,
    /// Legacy CALLCODE.
    CallCode,
}

/// The outermost message handed to the external EVM.
#[derive(Clone, Debug)]
pub struct Message {
    /// Invocation kind.
    pub kind: CallKind,
    /// Sender of this message.
    pub caller: Address,
    /// Recipient; meaningless for creations.
    pub to: Address,
    /// Transferred value.
    pub value: U256,
    /// Calldata or init code.
    pub input: Bytes,
    /// Declared EIP-2930 entries, already pre-warmed by the caller.
    pub access_list: Vec<sse_primitives::AccessListItem>,
    /// EIP-7702 authorizations to process.
    pub authorizations: Vec<SignedAuthorization>,
    /// EIP-4844 blob hashes visible to BLOBHASH.
    pub blob_hashes: Vec<B256>,
}

/// Outcome of the outermost EVM invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallResult {
    /// Whether execution succeeded; reverts and failures both clear this.
    pub success: bool,
    /// Gas remaining after execution.
    pub gas_left: u64,
    /// Return or revert data.
    pub output: Bytes,
}

/// Immutable per-block execution environment.
#[derive(Clone, Debug, Default)]
pub struct BlockContext {
    /// Block height.
    pub number: u64,
    /// Block timestamp.
    pub timestamp: u64,
    /// Fee recipient.
    pub coinbase: Address,
    /// Block gas limit.
    pub gas_limit: u64,
    /// EIP-1559 base fee, absent pre-London.
    pub base_fee: Option<u64>,
    /// Post-merge prev-randao (pre-merge difficulty as a word).
    pub prev_randao: B256,
    /// Pre-merge difficulty.
    pub difficulty: U256,
    /// EIP-4844 blob base fee.
    pub blob_base_fee: U256,
    /// Chain id.
    pub chain_id: u64,
}

/// The capability surface the external EVM executes against: the
/// [`IntraBlockState`] operations plus block-context reads. The engine
/// provides it; the EVM must assume nothing else.
pub trait Host {
    /// Whether an account exists.
    fn exist(&mut self, address: Address) -> Result<bool>;
    /// EIP-161 empty check.
    fn empty(&mut self, address: Address) -> Result<bool>;
    /// Current balance.
    fn get_balance(&mut self, address: Address) -> Result<U256>;
    /// Credit balance.
    fn add_balance(&mut self, address: Address, amount: U256) -> Result<()>;
    /// Debit balance.
    fn sub_balance(&mut self, address: Address, amount: U256) -> Result<()>;
    /// Current nonce.
    fn get_nonce(&mut self, address: Address) -> Result<u64>;
    /// Set nonce.
    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<()>;
    /// Code bytes.
    fn get_code(&mut self, address: Address) -> Result<Bytes>;
    /// Code hash.
    fn get_code_hash(&mut self, address: Address) -> Result<B256>;
    /// Code size.
    fn get_code_size(&mut self, address: Address) -> Result<usize>;
    /// Install code.
    fn set_code(&mut self, address: Address, code: Bytes) -> Result<()>;
    /// Storage read.
    fn get_state(&mut self, address: Address, slot: B256) -> Result<U256>;
    /// Storage write.
    fn set_state(&mut self, address: Address, slot: B256, value: U256) -> Result<()>;
    /// Block-start storage value (SSTORE gas math).
    fn get_committed_state(&mut self, address: Address, slot: B256) -> Result<U256>;
    /// Transient storage read.
    fn get_transient_state(&mut self, address: Address, slot: B256) -> U256;
    /// Transient storage write.
    fn set_transient_state(&mut self, address: Address, slot: B256, value: U256);
    /// Register a contract creation.
    fn create_contract(&mut self, address: Address) -> Result<()>;
    /// Pre-Cancun SELFDESTRUCT mark.
    fn self_destruct(&mut self, address: Address) -> Result<bool>;
    /// EIP-6780 SELFDESTRUCT mark.
    fn self_destruct_6780(&mut self, address: Address) -> Result<bool>;
    /// Emit a log.
    fn add_log(&mut self, log: Log);
    /// Raise the refund counter.
    fn add_refund(&mut self, amount: u64);
    /// Lower the refund counter.
    fn sub_refund(&mut self, amount: u64);
    /// EIP-2929 address access: `(gas, was_cold)`.
    fn access_address(&mut self, address: Address) -> (u64, bool);
    /// EIP-2929 slot access: `(gas, was_cold)`.
    fn access_slot(&mut self, address: Address, slot: B256) -> (u64, bool);
    /// Journal snapshot.
    fn snapshot(&mut self) -> usize;
    /// Revert to a snapshot.
    fn revert_to_snapshot(&mut self, snapshot: usize);

    /// Block environment.
    fn block_context(&self) -> &BlockContext;
    /// Hash of a recent block, for BLOCKHASH.
    fn block_hash(&mut self, number: u64) -> Result<Option<B256>>;
}

/// The [`Host`] the execution stage hands to the EVM: in-block state plus
/// the block environment and an ancestor-hash source.
pub struct HostAdapter<'a, R: StateReader> {
    /// The journaled state.
    pub state: &'a mut IntraBlockState<R>,
    /// The block environment.
    pub context: &'a BlockContext,
    /// Ancestor hashes for BLOCKHASH, most recent 256 blocks.
    pub ancestor_hashes: &'a dyn Fn(u64) -> Option<B256>,
}

impl<R: StateReader> std::fmt::Debug for HostAdapter<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAdapter")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<R: StateReader> Host for HostAdapter<'_, R> {
    fn exist(&mut self, address: Address) -> Result<bool> {
        self.state.exist(address)
    }
    fn empty(&mut self, address: Address) -> Result<bool> {
        self.state.empty(address)
    }
    fn get_balance(&mut self, address: Address) -> Result<U256> {
        self.state.get_balance(address)
    }
    fn add_balance(&mut self, address: Address, amount: U256) -> Result<()> {
        self.state.add_balance(address, amount)
    }
    fn sub_balance(&mut self, address: Address, amount: U256) -> Result<()> {
        self.state.sub_balance(address, amount)
    }
    fn get_nonce(&mut self, address: Address) -> Result<u64> {
        self.state.get_nonce(address)
    }
    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<()> {
        self.state.set_nonce(address, nonce)
    }
    fn get_code(&mut self, address: Address) -> Result<Bytes> {
        self.state.get_code(address)
    }
    fn get_code_hash(&mut self, address: Address) -> Result<B256> {
        self.state.get_code_hash(address)
    }
    fn get_code_size(&mut self, address: Address) -> Result<usize> {
        self.state.get_code_size(address)
    }
    fn set_code(&mut self, address: Address, code: Bytes) -> Result<()> {
        self.state.set_code(address, code)
    }
    fn get_state(&mut self, address: Address, slot: B256) -> Result<U256> {
        self.state.get_state(address, slot)
    }
    fn set_state(&mut self, address: Address, slot: B256, value: U256) -> Result<()> {
        self.state.set_state(address, slot, value)
    }
    fn get_committed_state(&mut self, address: Address, slot: B256) -> Result<U256> {
        self.state.get_committed_state(address, slot)
    }
    fn get_transient_state(&mut self, address: Address, slot: B256) -> U256 {
        self.state.get_transient_state(address, slot)
    }
    fn set_transient_state(&mut self, address: Address, slot: B256, value: U256) {
        self.state.set_transient_state(address, slot, value)
    }
    fn create_contract(&mut self, address: Address) -> Result<()> {
        self.state.create_contract(address)
    }
    fn self_destruct(&mut self, address: Address) -> Result<bool> {
        self.state.self_destruct(address)
    }
    fn self_destruct_6780(&mut self, address: Address) -> Result<bool> {
        self.state.self_destruct_6780(address)
    }
    fn add_log(&mut self, log: Log) {
        self.state.add_log(log)
    }
    fn add_refund(&mut self, amount: u64) {
        self.state.add_refund(amount)
    }
    fn sub_refund(&mut self, amount: u64) {
        self.state.sub_refund(amount)
    }
    fn access_address(&mut self, address: Address) -> (u64, bool) {
        self.state.access_address(address)
    }
    fn access_slot(&mut self, address: Address, slot: B256) -> (u64, bool) {
        self.state.access_slot(address, slot)
    }
    fn snapshot(&mut self) -> usize {
        self.state.snapshot()
    }
    fn revert_to_snapshot(&mut self, snapshot: usize) {
        self.state.revert_to_snapshot(snapshot)
    }
    fn block_context(&self) -> &BlockContext {
        self.context
    }
    fn block_hash(&mut self, number: u64) -> Result<Option<B256>> {
        Ok((self.ancestor_hashes)(number))
    }
}

/// The external EVM contract: one entry point for the outermost invocation.
///
/// Call depth (1024) and the 63/64 forwarding rule are interpreter-internal;
/// the engine only surfaces the outermost call. Recursion happens inside
/// the implementation against the same [`Host`].
pub trait Evm {
    /// Execute `message` with `gas` available, driving all state access
    /// through `host`.
    fn execute_message(
        &mut self,
        host: &mut dyn Host,
        message: Message,
        gas: u64,
    ) -> Result<CallResult>;
}
