//! End-to-end pipeline scenarios over the in-memory store.

use secp256k1::{Message as SecpMessage, SECP256K1, SecretKey};
use sse_kv::{Kv, MemKv, RoTx, RwTx, Table};
use sse_primitives::{
    Account, Address, B256, BEACON_ROOTS_ADDRESS, BEACON_ROOTS_HISTORY_BUFFER_LENGTH, Block,
    BlockBody, Bloom, Bytes, ChainSpec, EMPTY_LIST_HASH, EMPTY_ROOT_HASH, Header, Receipt,
    SealedHeader, Signature, SignedTransaction, Transaction, TxKind, TxLegacy, TxType, U256,
    Withdrawal, keccak256,
};
use sse_stages::{
    AlwaysValid, AnyStage, BodiesStage, Domains, ExecutionStage, FinishStage, GenesisAccount,
    HeadersStage, Pipeline, SendersStage, SharedSource, StageContext, StageError, StageId,
    TxLookupStage, VecBlockSource, block_by_number, collate_below, head, init_genesis,
    read_progress, shared_source, state_at, storage_at, sync_status,
};
use sse_state::{CallResult, Evm, Host, Message};
use sse_temporal::{Domain, DomainConfig, StepSize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[ctor::ctor]
fn init() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();
}

const COINBASE: Address = Address::repeat_byte(0xcb);
const GAS_LIMIT: u64 = 30_000_000;
const GWEI: u128 = 1_000_000_000;

fn spec() -> ChainSpec {
    // Everything through Shanghai active from genesis.
    ChainSpec {
        chain_id: 1337,
        homestead_block: 0,
        spurious_dragon_block: 0,
        byzantium_block: 0,
        constantinople_block: 0,
        istanbul_block: 0,
        berlin_block: 0,
        london_block: 0,
        paris_block: 0,
        shanghai_time: Some(0),
        cancun_time: None,
        prague_time: None,
    }
}

struct Env {
    store: MemKv,
    domains: Domains,
    spec: ChainSpec,
    step: StepSize,
    abort: AtomicBool,
    _dir: tempfile::TempDir,
}

impl Env {
    fn new() -> Self {
        Self::with_step(StepSize::default())
    }

    fn with_step(step: StepSize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let domains = Domains {
            accounts: Domain::new(DomainConfig {
                name: "accounts",
                hot_table: Table::PlainState,
                history_tables: Some((Table::AccountsHistory, Table::AccountsIndex)),
                dir: dir.path().to_path_buf(),
                step,
            })
            .unwrap(),
            storage: Domain::new(DomainConfig {
                name: "storage",
                hot_table: Table::StorageState,
                history_tables: Some((Table::StorageHistory, Table::StorageIndex)),
                dir: dir.path().to_path_buf(),
                step,
            })
            .unwrap(),
            code: Domain::new(DomainConfig {
                name: "code",
                hot_table: Table::Code,
                history_tables: None,
                dir: dir.path().to_path_buf(),
                step,
            })
            .unwrap(),
        };
        Self {
            store: MemKv::default(),
            domains,
            spec: spec(),
            step,
            abort: AtomicBool::new(false),
            _dir: dir,
        }
    }

    fn ctx(&self) -> StageContext<'_> {
        StageContext {
            spec: &self.spec,
            domains: &self.domains,
            step: self.step,
            abort: &self.abort,
        }
    }

    fn genesis(&self, alloc: &[GenesisAccount]) -> SealedHeader {
        let template = Header {
            ommers_hash: EMPTY_LIST_HASH,
            beneficiary: COINBASE,
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            gas_limit: GAS_LIMIT,
            base_fee_per_gas: Some(0),
            withdrawals_root: Some(EMPTY_ROOT_HASH),
            ..Default::default()
        };
        init_genesis(&self.store, &self.ctx(), template, alloc).unwrap()
    }
}

fn pipeline(source: SharedSource, evm: Box<dyn Evm>) -> Pipeline {
    Pipeline::new(vec![
        AnyStage::Headers(HeadersStage::new(source.clone(), Box::new(AlwaysValid))),
        AnyStage::Bodies(BodiesStage::new(source)),
        AnyStage::Senders(SendersStage),
        AnyStage::Execution(ExecutionStage::new(evm)),
        AnyStage::TxLookup(TxLookupStage),
        AnyStage::Finish(FinishStage),
    ])
}

fn secret(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).unwrap()
}

fn address_of(secret: &SecretKey) -> Address {
    let public = secret.public_key(SECP256K1);
    Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..])
}

fn sign(transaction: Transaction, secret: &SecretKey) -> SignedTransaction {
    let hash = transaction.signing_hash();
    let signature = SECP256K1.sign_ecdsa_recoverable(&SecpMessage::from_digest(hash.0), secret);
    let (recovery_id, compact) = signature.serialize_compact();
    SignedTransaction::new(
        transaction,
        Signature {
            r: U256::from_be_slice(&compact[..32]),
            s: U256::from_be_slice(&compact[32..]),
            odd_y_parity: i32::from(recovery_id) != 0,
        },
    )
}

/// Assemble a block whose header commitments the test computed by hand.
fn build_block(
    parent: &SealedHeader,
    transactions: Vec<SignedTransaction>,
    receipts: &[Receipt],
    state_root: B256,
    extra: &[u8],
) -> Block {
    let gas_used = receipts.last().map(|r| r.cumulative_gas_used).unwrap_or(0);
    let mut bloom = Bloom::ZERO;
    for receipt in receipts {
        bloom.accrue_bloom(&receipt.bloom());
    }
    let header = Header {
        parent_hash: parent.hash(),
        ommers_hash: EMPTY_LIST_HASH,
        beneficiary: COINBASE,
        state_root,
        transactions_root: sse_trie::ordered_trie_root(
            transactions.iter().map(|tx| tx.encoded_canonical()),
        )
        .unwrap(),
        receipts_root: sse_trie::ordered_trie_root(
            receipts.iter().map(Receipt::encoded_canonical),
        )
        .unwrap(),
        logs_bloom: bloom,
        number: parent.number + 1,
        gas_limit: GAS_LIMIT,
        gas_used,
        timestamp: parent.timestamp + 12,
        extra_data: Bytes::copy_from_slice(extra),
        base_fee_per_gas: Some(0),
        withdrawals_root: Some(EMPTY_ROOT_HASH),
        ..Default::default()
    };
    Block {
        header,
        body: BlockBody {
            transactions,
            ommers: vec![],
            withdrawals: Some(vec![]),
        },
    }
}

fn expected_root(accounts: &[(Address, Account)]) -> B256 {
    sse_trie::state_root(
        accounts
            .iter()
            .map(|(address, account)| (*address, *account, EMPTY_ROOT_HASH)),
    )
    .unwrap()
}

/// Performs the plain value transfer of the message and nothing else.
#[derive(Debug)]
struct TransferEvm;

impl Evm for TransferEvm {
    fn execute_message(
        &mut self,
        host: &mut dyn Host,
        message: Message,
        gas: u64,
    ) -> sse_state::Result<CallResult> {
        host.sub_balance(message.caller, message.value)?;
        host.add_balance(message.to, message.value)?;
        Ok(CallResult {
            success: true,
            gas_left: gas,
            output: Bytes::new(),
        })
    }
}

#[test]
fn empty_block_advances_without_state_change() {
    // S1: an empty block leaves the state root untouched.
    let env = Env::new();
    let sender = address_of(&secret(1));
    let genesis = env.genesis(&[GenesisAccount {
        address: sender,
        balance: U256::from(10u64).pow(U256::from(18u64)),
        ..Default::default()
    }]);

    let block = build_block(&genesis, vec![], &[], genesis.state_root, b"");
    let source = shared_source(VecBlockSource::new(vec![
        Block {
            header: genesis.clone().into_header(),
            body: BlockBody::default(),
        },
        block,
    ]));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));

    let head_number = pipeline.run_to(&env.store, &env.ctx(), 1).unwrap();
    assert_eq!(head_number, 1);

    let tx = env.store.begin_ro().unwrap();
    let (number, _) = head(&tx).unwrap();
    assert_eq!(number, 1);
    let receipts = tx.get(Table::Receipts, &1u64.to_be_bytes()).unwrap().unwrap();
    let rows: Vec<Bytes> = alloy_rlp::Decodable::decode(&mut receipts.as_slice()).unwrap();
    assert!(rows.is_empty());
    let account = state_at(&tx, &env.domains, sender, 1).unwrap().unwrap();
    assert_eq!(account.balance, U256::from(10u64).pow(U256::from(18u64)));
}

/// The S2 transfer fixture: sender, recipient, amounts, and the blocks.
struct TransferFixture {
    sender: Address,
    recipient: Address,
    initial: U256,
    value: U256,
    fee: U256,
    blocks: Vec<Block>,
    genesis: SealedHeader,
}

fn transfer_fixture(env: &Env) -> TransferFixture {
    let key = secret(1);
    let sender = address_of(&key);
    let recipient = Address::repeat_byte(0x42);
    let initial = U256::from(10u64).pow(U256::from(18u64));
    let value = U256::from(10u64).pow(U256::from(17u64));
    let gas_price = 20 * GWEI;
    let fee = U256::from(21_000u64) * U256::from(gas_price);

    let genesis = env.genesis(&[GenesisAccount {
        address: sender,
        balance: initial,
        ..Default::default()
    }]);

    let transfer = sign(
        Transaction::Legacy(TxLegacy {
            chain_id: Some(env.spec.chain_id),
            nonce: 0,
            gas_price,
            gas_limit: 21_000,
            to: TxKind::Call(recipient),
            value,
            input: Bytes::new(),
        }),
        &key,
    );
    let receipts = vec![Receipt {
        tx_type: TxType::Legacy,
        success: true,
        cumulative_gas_used: 21_000,
        logs: vec![],
    }];
    let post_root = expected_root(&[
        (
            sender,
            Account {
                nonce: 1,
                balance: initial - value - fee,
                ..Default::default()
            },
        ),
        (
            recipient,
            Account {
                balance: value,
                ..Default::default()
            },
        ),
        (
            COINBASE,
            Account {
                balance: fee,
                ..Default::default()
            },
        ),
    ]);
    let block1 = build_block(&genesis, vec![transfer], &receipts, post_root, b"");
    let block2 = build_block(&block1.header.clone().seal(), vec![], &[], post_root, b"");

    let genesis_block = Block {
        header: genesis.clone().into_header(),
        body: BlockBody::default(),
    };
    TransferFixture {
        sender,
        recipient,
        initial,
        value,
        fee,
        blocks: vec![genesis_block, block1, block2],
        genesis,
    }
}

#[test]
fn single_legacy_transfer() {
    // S2: one legacy transfer settles balances, nonce, fee and receipt.
    let env = Env::new();
    let fixture = transfer_fixture(&env);
    let source = shared_source(VecBlockSource::new(fixture.blocks.clone()));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));

    let head_number = pipeline.run_to(&env.store, &env.ctx(), 2).unwrap();
    assert_eq!(head_number, 2);

    let tx = env.store.begin_ro().unwrap();
    let sender = state_at(&tx, &env.domains, fixture.sender, 1).unwrap().unwrap();
    assert_eq!(sender.nonce, 1);
    assert_eq!(sender.balance, fixture.initial - fixture.value - fixture.fee);
    let recipient = state_at(&tx, &env.domains, fixture.recipient, 1)
        .unwrap()
        .unwrap();
    assert_eq!(recipient.balance, fixture.value);
    let coinbase = state_at(&tx, &env.domains, COINBASE, 1).unwrap().unwrap();
    assert_eq!(coinbase.balance, fixture.fee);

    // Time travel: before block one the recipient does not exist.
    assert_eq!(state_at(&tx, &env.domains, fixture.recipient, 0).unwrap(), None);
    let sender_before = state_at(&tx, &env.domains, fixture.sender, 0).unwrap().unwrap();
    assert_eq!(sender_before.balance, fixture.initial);
    assert_eq!(sender_before.nonce, 0);

    // The lookup index resolves the transaction hash.
    let tx_hash = fixture.blocks[1].body.transactions[0].hash();
    assert_eq!(
        tx.get(Table::TxLookup, tx_hash.as_slice()).unwrap(),
        Some(1u64.to_be_bytes().to_vec())
    );

    // The stored receipt decodes back.
    let rows = tx.get(Table::Receipts, &1u64.to_be_bytes()).unwrap().unwrap();
    let rows: Vec<Bytes> = alloy_rlp::Decodable::decode(&mut rows.as_slice()).unwrap();
    assert_eq!(rows.len(), 1);
    let receipt = Receipt::decode_canonical(&mut rows[0].as_ref()).unwrap();
    assert!(receipt.success);
    assert_eq!(receipt.cumulative_gas_used, 21_000);

    assert!(block_by_number(&tx, 1).unwrap().is_some());
}

#[test]
fn forward_round_is_idempotent() {
    // P7: re-running an up-to-date pipeline changes nothing.
    let env = Env::new();
    let fixture = transfer_fixture(&env);
    let source = shared_source(VecBlockSource::new(fixture.blocks.clone()));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));
    pipeline.run_to(&env.store, &env.ctx(), 2).unwrap();

    let before = {
        let tx = env.store.begin_ro().unwrap();
        sync_status(&tx).unwrap()
    };
    let head_number = pipeline.run_to(&env.store, &env.ctx(), 2).unwrap();
    assert_eq!(head_number, 2);
    let after = {
        let tx = env.store.begin_ro().unwrap();
        sync_status(&tx).unwrap()
    };
    assert_eq!(before.stages, after.stages);
    assert_eq!(before.head, after.head);
}

#[test]
fn unwind_and_redo_reconverges() {
    // P8: unwinding and re-executing reproduces the same state.
    let env = Env::new();
    let fixture = transfer_fixture(&env);
    let source = shared_source(VecBlockSource::new(fixture.blocks.clone()));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));
    pipeline.run_to(&env.store, &env.ctx(), 2).unwrap();

    let root_before = {
        let tx = env.store.begin_ro().unwrap();
        sse_stages::compute_state_root(&tx, &env.domains).unwrap()
    };

    pipeline.unwind(&env.store, &env.ctx(), 0).unwrap();
    {
        let tx = env.store.begin_ro().unwrap();
        for stage in StageId::ORDER {
            assert_eq!(read_progress(&tx, stage).unwrap(), 0, "{stage:?}");
        }
        // State is back at genesis.
        let sender = state_at(&tx, &env.domains, fixture.sender, 0).unwrap().unwrap();
        assert_eq!(sender.balance, fixture.initial);
        assert_eq!(
            sse_stages::compute_state_root(&tx, &env.domains).unwrap(),
            fixture.genesis.state_root
        );
    }

    let head_number = pipeline.run_to(&env.store, &env.ctx(), 2).unwrap();
    assert_eq!(head_number, 2);
    let tx = env.store.begin_ro().unwrap();
    assert_eq!(
        sse_stages::compute_state_root(&tx, &env.domains).unwrap(),
        root_before
    );
    let recipient = state_at(&tx, &env.domains, fixture.recipient, 2).unwrap().unwrap();
    assert_eq!(recipient.balance, fixture.value);
}

/// Writes a slot, then reverts; the engine must roll the write back while
/// still charging for the consumed gas.
#[derive(Debug)]
struct RevertingStoreEvm;

impl Evm for RevertingStoreEvm {
    fn execute_message(
        &mut self,
        host: &mut dyn Host,
        message: Message,
        gas: u64,
    ) -> sse_state::Result<CallResult> {
        host.set_state(message.to, B256::ZERO, U256::from(1))?;
        Ok(CallResult {
            success: false,
            gas_left: gas - 10_000,
            output: Bytes::new(),
        })
    }
}

#[test]
fn reverted_transaction_keeps_state_charges_gas() {
    // S3: SSTORE then revert; storage intact, gas still paid.
    let env = Env::new();
    let key = secret(1);
    let sender = address_of(&key);
    let contract = Address::repeat_byte(0x77);
    let initial = U256::from(10u64).pow(U256::from(18u64));
    let gas_price = GWEI;
    let genesis = env.genesis(&[GenesisAccount {
        address: sender,
        balance: initial,
        ..Default::default()
    }]);

    let call = sign(
        Transaction::Legacy(TxLegacy {
            chain_id: Some(env.spec.chain_id),
            nonce: 0,
            gas_price,
            gas_limit: 50_000,
            to: TxKind::Call(contract),
            value: U256::ZERO,
            input: Bytes::new(),
        }),
        &key,
    );
    // 21000 intrinsic plus the 10000 the interpreter reports consumed.
    let gas_used = 31_000u64;
    let fee = U256::from(gas_used) * U256::from(gas_price);
    let receipts = vec![Receipt {
        tx_type: TxType::Legacy,
        success: false,
        cumulative_gas_used: gas_used,
        logs: vec![],
    }];
    let post_root = expected_root(&[
        (
            sender,
            Account {
                nonce: 1,
                balance: initial - fee,
                ..Default::default()
            },
        ),
        (
            COINBASE,
            Account {
                balance: fee,
                ..Default::default()
            },
        ),
    ]);
    let block = build_block(&genesis, vec![call], &receipts, post_root, b"");
    let source = shared_source(VecBlockSource::new(vec![
        Block {
            header: genesis.clone().into_header(),
            body: BlockBody::default(),
        },
        block,
    ]));
    let mut pipeline = pipeline(source, Box::new(RevertingStoreEvm));
    pipeline.run_to(&env.store, &env.ctx(), 1).unwrap();

    let tx = env.store.begin_ro().unwrap();
    assert_eq!(
        storage_at(&tx, &env.domains, contract, B256::ZERO, 1).unwrap(),
        U256::ZERO
    );
    let sender_state = state_at(&tx, &env.domains, sender, 1).unwrap().unwrap();
    assert_eq!(sender_state.balance, initial - fee);
    assert_eq!(sender_state.nonce, 1);
    assert_eq!(state_at(&tx, &env.domains, contract, 1).unwrap(), None);
}

/// Exercises EIP-2929 warm/cold transitions, including re-cooling across a
/// revert, asserting the exact gas quotes.
#[derive(Debug)]
struct WarmColdEvm;

impl Evm for WarmColdEvm {
    fn execute_message(
        &mut self,
        host: &mut dyn Host,
        _message: Message,
        gas: u64,
    ) -> sse_state::Result<CallResult> {
        let probe = Address::repeat_byte(0xaa);
        let slot = B256::repeat_byte(0x01);

        assert_eq!(host.access_address(probe), (2600, true));
        assert_eq!(host.access_address(probe), (100, false));

        let snapshot = host.snapshot();
        assert_eq!(host.access_slot(probe, slot), (2100, true));
        assert_eq!(host.access_slot(probe, slot), (100, false));
        host.revert_to_snapshot(snapshot);
        // Cold again after the revert.
        assert_eq!(host.access_slot(probe, slot), (2100, true));

        Ok(CallResult {
            success: true,
            gas_left: gas,
            output: Bytes::new(),
        })
    }
}

#[test]
fn access_list_warm_cold_over_revert() {
    // S4/P4 at the pipeline level.
    let env = Env::new();
    let key = secret(1);
    let sender = address_of(&key);
    let target = Address::repeat_byte(0x55);
    let initial = U256::from(10u64).pow(U256::from(18u64));
    let gas_price = GWEI;
    let genesis = env.genesis(&[GenesisAccount {
        address: sender,
        balance: initial,
        ..Default::default()
    }]);

    let call = sign(
        Transaction::Legacy(TxLegacy {
            chain_id: Some(env.spec.chain_id),
            nonce: 0,
            gas_price,
            gas_limit: 40_000,
            to: TxKind::Call(target),
            value: U256::ZERO,
            input: Bytes::new(),
        }),
        &key,
    );
    let fee = U256::from(21_000u64) * U256::from(gas_price);
    let receipts = vec![Receipt {
        tx_type: TxType::Legacy,
        success: true,
        cumulative_gas_used: 21_000,
        logs: vec![],
    }];
    let post_root = expected_root(&[
        (
            sender,
            Account {
                nonce: 1,
                balance: initial - fee,
                ..Default::default()
            },
        ),
        (
            COINBASE,
            Account {
                balance: fee,
                ..Default::default()
            },
        ),
    ]);
    let block = build_block(&genesis, vec![call], &receipts, post_root, b"");
    let source = shared_source(VecBlockSource::new(vec![
        Block {
            header: genesis.clone().into_header(),
            body: BlockBody::default(),
        },
        block,
    ]));
    let mut pipeline = pipeline(source, Box::new(WarmColdEvm));
    assert_eq!(pipeline.run_to(&env.store, &env.ctx(), 1).unwrap(), 1);
}

fn empty_chain(genesis: &SealedHeader, upto: u64, fork_at: u64, fork_extra: &[u8]) -> Vec<Block> {
    let mut blocks = vec![Block {
        header: genesis.clone().into_header(),
        body: BlockBody::default(),
    }];
    let mut parent = genesis.clone();
    for number in 1..=upto {
        let extra: &[u8] = if number > fork_at { fork_extra } else { b"" };
        let block = build_block(&parent, vec![], &[], genesis.state_root, extra);
        parent = block.header.clone().seal();
        blocks.push(block);
    }
    blocks
}

#[test]
fn reorg_unwinds_and_follows_new_branch() {
    // S6: head 100 on chain X, switch to chain Y branching at 90, head 105.
    let env = Env::new();
    let genesis = env.genesis(&[]);

    let chain_x = empty_chain(&genesis, 100, u64::MAX, b"");
    let chain_y = empty_chain(&genesis, 105, 90, b"y");
    assert_eq!(
        chain_x[90].header.hash(),
        chain_y[90].header.hash(),
        "branches share the ancestor"
    );
    assert_ne!(chain_x[91].header.hash(), chain_y[91].header.hash());

    let source = Arc::new(Mutex::new(VecBlockSource::new(chain_x)));
    let shared: SharedSource = source.clone();
    let mut pipeline = pipeline(shared, Box::new(TransferEvm));
    assert_eq!(pipeline.run_to(&env.store, &env.ctx(), 100).unwrap(), 100);

    source.lock().unwrap().set_chain(chain_y.clone());
    assert_eq!(pipeline.run_to(&env.store, &env.ctx(), 105).unwrap(), 105);

    let tx = env.store.begin_ro().unwrap();
    let (number, hash) = head(&tx).unwrap();
    assert_eq!(number, 105);
    assert_eq!(hash, chain_y[105].header.hash());
    // The replaced canonical hashes match the new branch all the way down.
    for number in [91u64, 100] {
        let stored = tx
            .get(Table::CanonicalHashes, &number.to_be_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(B256::from_slice(&stored), chain_y[number as usize].header.hash());
    }
}

#[test]
fn shutdown_stops_between_blocks() {
    let env = Env::new();
    let fixture = transfer_fixture(&env);
    let source = shared_source(VecBlockSource::new(fixture.blocks.clone()));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));

    env.abort.store(true, Ordering::Relaxed);
    assert!(matches!(
        pipeline.run_to(&env.store, &env.ctx(), 2),
        Err(StageError::Shutdown)
    ));
    let tx = env.store.begin_ro().unwrap();
    assert_eq!(read_progress(&tx, StageId::Headers).unwrap(), 0);
}

#[test]
fn collation_preserves_reads_and_execution() {
    // Freeze the early steps into segment files, then keep syncing.
    let env = Env::with_step(StepSize(4));
    let fixture = transfer_fixture(&env);
    let source = Arc::new(Mutex::new(VecBlockSource::new(fixture.blocks.clone())));
    let shared: SharedSource = source.clone();
    let mut pipeline = pipeline(shared, Box::new(TransferEvm));
    pipeline.run_to(&env.store, &env.ctx(), 2).unwrap();

    // Block 2 ends at txnum 6, so steps 0 (txnums 0..4) is complete.
    {
        let mut tx = env.store.begin_rw().unwrap();
        collate_below(&mut tx, &env.domains, env.step, 6).unwrap();
        tx.commit().unwrap();
    }
    assert!(env.domains.accounts.frozen_step() >= 1);

    // Reads now fall through to the segment files.
    let tx = env.store.begin_ro().unwrap();
    let sender = state_at(&tx, &env.domains, fixture.sender, 1).unwrap().unwrap();
    assert_eq!(sender.nonce, 1);
    let before = state_at(&tx, &env.domains, fixture.sender, 0).unwrap().unwrap();
    assert_eq!(before.balance, fixture.initial);
    drop(tx);

    // And the pipeline keeps executing on top of frozen state.
    let next = build_block(
        &fixture.blocks[2].header.clone().seal(),
        vec![],
        &[],
        fixture.blocks[2].header.state_root,
        b"",
    );
    source.lock().unwrap().push(next);
    assert_eq!(pipeline.run_to(&env.store, &env.ctx(), 3).unwrap(), 3);
}

#[test]
fn withdrawals_credit_balances() {
    let env = Env::new();
    let genesis = env.genesis(&[]);
    let validator = Address::repeat_byte(0x99);
    let withdrawal = Withdrawal {
        index: 0,
        validator_index: 7,
        address: validator,
        amount: 32,
    };

    let post_root = expected_root(&[(
        validator,
        Account {
            balance: withdrawal.amount_wei(),
            ..Default::default()
        },
    )]);
    let mut block = build_block(&genesis, vec![], &[], post_root, b"");
    block.body.withdrawals = Some(vec![withdrawal.clone()]);
    block.header.withdrawals_root =
        Some(sse_trie::ordered_trie_root([alloy_rlp::encode(&withdrawal)]).unwrap());

    let source = shared_source(VecBlockSource::new(vec![
        Block {
            header: genesis.clone().into_header(),
            body: BlockBody::default(),
        },
        block,
    ]));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));
    assert_eq!(pipeline.run_to(&env.store, &env.ctx(), 1).unwrap(), 1);

    let tx = env.store.begin_ro().unwrap();
    let account = state_at(&tx, &env.domains, validator, 1).unwrap().unwrap();
    assert_eq!(account.balance, withdrawal.amount_wei());
}

#[test]
fn beacon_root_system_write() {
    // EIP-4788: the beacon root lands in the ring buffer of the system
    // contract, and the commitment covers its storage.
    let mut env = Env::new();
    env.spec.cancun_time = Some(0);
    let genesis = env.genesis(&[]);
    let beacon_root = B256::repeat_byte(0xbe);
    let timestamp = genesis.timestamp + 12;

    let ts_slot = B256::from(U256::from(timestamp % BEACON_ROOTS_HISTORY_BUFFER_LENGTH));
    let root_slot = B256::from(U256::from(
        timestamp % BEACON_ROOTS_HISTORY_BUFFER_LENGTH + BEACON_ROOTS_HISTORY_BUFFER_LENGTH,
    ));
    let storage_root = sse_trie::storage_root([
        (ts_slot, U256::from(timestamp)),
        (root_slot, U256::from_be_bytes(beacon_root.0)),
    ])
    .unwrap();
    let post_root = sse_trie::state_root([(
        BEACON_ROOTS_ADDRESS,
        Account::default(),
        storage_root,
    )])
    .unwrap();

    let mut block = build_block(&genesis, vec![], &[], post_root, b"");
    block.header.blob_gas_used = Some(0);
    block.header.excess_blob_gas = Some(0);
    block.header.parent_beacon_block_root = Some(beacon_root);

    let source = shared_source(VecBlockSource::new(vec![
        Block {
            header: genesis.clone().into_header(),
            body: BlockBody::default(),
        },
        block,
    ]));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));
    assert_eq!(pipeline.run_to(&env.store, &env.ctx(), 1).unwrap(), 1);

    let tx = env.store.begin_ro().unwrap();
    assert_eq!(
        storage_at(&tx, &env.domains, BEACON_ROOTS_ADDRESS, root_slot, 1).unwrap(),
        U256::from_be_bytes(beacon_root.0)
    );
}

#[test]
fn invalid_block_surfaces_after_retries() {
    // A transaction with a wrong nonce invalidates its block; the
    // coordinator unwinds and retries, then gives up.
    let env = Env::new();
    let key = secret(1);
    let sender = address_of(&key);
    let genesis = env.genesis(&[GenesisAccount {
        address: sender,
        balance: U256::from(10u64).pow(U256::from(18u64)),
        ..Default::default()
    }]);

    let bad = sign(
        Transaction::Legacy(TxLegacy {
            chain_id: Some(env.spec.chain_id),
            nonce: 5,
            gas_price: GWEI,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x42)),
            value: U256::ZERO,
            input: Bytes::new(),
        }),
        &key,
    );
    let receipts = vec![Receipt {
        tx_type: TxType::Legacy,
        success: true,
        cumulative_gas_used: 21_000,
        logs: vec![],
    }];
    let block = build_block(&genesis, vec![bad], &receipts, genesis.state_root, b"");
    let source = shared_source(VecBlockSource::new(vec![
        Block {
            header: genesis.clone().into_header(),
            body: BlockBody::default(),
        },
        block,
    ]));
    let mut pipeline = pipeline(source, Box::new(TransferEvm));
    assert!(matches!(
        pipeline.run_to(&env.store, &env.ctx(), 1),
        Err(StageError::InvalidBlock { number: 1, .. })
    ));

    // Execution never advanced; the header chain may be ahead but state is
    // untouched.
    let tx = env.store.begin_ro().unwrap();
    assert_eq!(read_progress(&tx, StageId::Execution).unwrap(), 0);
    let account = state_at(&tx, &env.domains, sender, 0).unwrap().unwrap();
    assert_eq!(account.nonce, 0);
}

#[test]
fn execution_batch_limit_re_enters() {
    // A one-block batch limit forces a commit per block; the outcome is
    // identical to the unbatched run.
    let env = Env::new();
    let fixture = transfer_fixture(&env);
    let source = shared_source(VecBlockSource::new(fixture.blocks.clone()));
    let mut pipeline = Pipeline::new(vec![
        AnyStage::Headers(HeadersStage::new(source.clone(), Box::new(AlwaysValid))),
        AnyStage::Bodies(BodiesStage::new(source)),
        AnyStage::Senders(SendersStage),
        AnyStage::Execution(ExecutionStage::new(Box::new(TransferEvm)).with_batch_size(1)),
        AnyStage::TxLookup(TxLookupStage),
        AnyStage::Finish(FinishStage),
    ]);
    assert_eq!(pipeline.run_to(&env.store, &env.ctx(), 2).unwrap(), 2);

    let tx = env.store.begin_ro().unwrap();
    let recipient = state_at(&tx, &env.domains, fixture.recipient, 2).unwrap().unwrap();
    assert_eq!(recipient.balance, fixture.value);
}
