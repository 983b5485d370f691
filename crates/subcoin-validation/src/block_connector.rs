use crate::chain_params::ChainParams;
use crate::config::ConnectorConfig;
use crate::script_flags::get_block_script_flags;
use crate::subsidy::bitcoin_block_subsidy;
use crate::validation::{BlockValidationError, BlockValidationResult, InputLocation};
use crate::Error;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, Block, BlockHash, OutPoint, Transaction, TxMerkleNode, TxOut, Txid};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use subcoin_coins::{Coin, CoinStore, CoinsCache, FetchSummary, InputFetcher};
use subcoin_script::{
    ConsensusEvaluator, PrecomputedTransactionData, ScriptEvaluator, ScriptVerifier,
};

/// Number of blocks a coinbase output has to wait before it can be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Stage of a block connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    /// Context free checks and collection of the outputs created in the block.
    Collect,
    /// Loading the spent coins into the cache.
    Fetch,
    /// Resolving the inputs and verifying their scripts.
    Verify,
    /// Every check passed.
    Commit,
    /// The block was rejected.
    Reject,
}

/// Block which passed every check of [`BlockConnector`].
///
/// Applying it to the chain state is up to the caller.
#[derive(Debug, Clone)]
pub struct ConnectedBlock {
    pub height: u32,
    pub block_hash: BlockHash,
    /// Sum of the fees paid by the transactions of the block.
    pub fees: u64,
    /// Coins spent by the block in input order, including the ones created by the block.
    pub spent_coins: Vec<(OutPoint, Coin)>,
    /// Input prefetching statistics.
    pub fetch: FetchSummary,
}

/// Transaction whose inputs were resolved to the outputs they spend.
struct ResolvedTx {
    tx_index: usize,
    txid: Txid,
    spent_outputs: Vec<TxOut>,
}

#[derive(Debug, Default)]
struct Stats {
    /// Total blocks connected.
    total_blocks: usize,
    /// Total transactions connected.
    total_txs: usize,
    /// Total inputs verified.
    total_inputs: usize,
    // Total block connection times in milliseconds.
    total_connect_time: u128,
}

impl Stats {
    fn record_connected_block(
        &mut self,
        height: u32,
        block_hash: BlockHash,
        tx_count: usize,
        input_count: usize,
        connect_time: u128,
    ) {
        self.total_blocks += 1;
        self.total_txs += tx_count;
        self.total_inputs += input_count;
        self.total_connect_time += connect_time;

        let inputs_per_ms = self.total_inputs as f64 / self.total_connect_time.max(1) as f64;

        tracing::debug!(
            "Connected block#{height} ({tx_count} txs, {input_count} inputs) ({block_hash}) \
            {inputs_per_ms:.2} inputs/ms, connect time: {connect_time} ms, total blocks: {}",
            self.total_blocks
        );
    }
}

/// Checks the inputs of blocks against the chain state.
///
/// The spent coins are prefetched from the store by an [`InputFetcher`], every input is
/// then verified by the [`ScriptVerifier`], in parallel if a verification pool is
/// configured. No chain state is modified, the coins inserted into the cache while
/// fetching are clean.
pub struct BlockConnector<E = ConsensusEvaluator> {
    config: ConnectorConfig,
    chain_params: ChainParams,
    fetcher: InputFetcher,
    verifier: ScriptVerifier<E>,
    verification_pool: Option<rayon::ThreadPool>,
    stage: ConnectStage,
    stats: Stats,
}

impl<E> std::fmt::Debug for BlockConnector<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockConnector")
            .field("config", &self.config)
            .field("network", &self.chain_params.network())
            .field("fetcher", &self.fetcher)
            .field("stage", &self.stage)
            .finish()
    }
}

impl<E: ScriptEvaluator> BlockConnector<E> {
    /// Constructs a new instance of [`BlockConnector`].
    pub fn new(
        config: ConnectorConfig,
        chain_params: ChainParams,
        evaluator: E,
    ) -> Result<Self, Error> {
        let fetcher = InputFetcher::new(config.fetch_batch_size, config.fetch_workers)?;

        let verification_pool = if config.verification_threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.verification_threads)
                    .thread_name(|i| format!("scriptcheck.{i}"))
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            config,
            chain_params,
            fetcher,
            verifier: ScriptVerifier::new(evaluator),
            verification_pool,
            stage: ConnectStage::Collect,
            stats: Stats::default(),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn chain_params(&self) -> &ChainParams {
        &self.chain_params
    }

    /// Stage reached by the most recent block connection.
    pub fn stage(&self) -> ConnectStage {
        self.stage
    }

    /// Connects `block` at `height` using the script flags of this height.
    pub fn connect_block<C>(
        &mut self,
        cache: &mut C,
        store: Arc<dyn CoinStore>,
        block: &Block,
        height: u32,
    ) -> Result<ConnectedBlock, BlockValidationError>
    where
        C: CoinsCache + ?Sized,
    {
        let flags = get_block_script_flags(height, block.block_hash(), &self.chain_params);
        self.connect_block_with_flags(cache, store, block, height, flags.bits())
    }

    /// Connects `block` at `height`, verifying the scripts with `flags`.
    pub fn connect_block_with_flags<C>(
        &mut self,
        cache: &mut C,
        store: Arc<dyn CoinStore>,
        block: &Block,
        height: u32,
        flags: u32,
    ) -> Result<ConnectedBlock, BlockValidationError>
    where
        C: CoinsCache + ?Sized,
    {
        let block_hash = block.block_hash();
        let now = Instant::now();

        match self.connect(cache, store, block, block_hash, height, flags) {
            Ok(connected) => {
                self.enter_stage(block_hash, ConnectStage::Commit);
                let input_count = block.txdata.iter().skip(1).map(|tx| tx.input.len()).sum();
                self.stats.record_connected_block(
                    height,
                    block_hash,
                    block.txdata.len(),
                    input_count,
                    now.elapsed().as_millis(),
                );
                Ok(connected)
            }
            Err(err) => {
                let failed_stage = self.stage;
                self.enter_stage(block_hash, ConnectStage::Reject);
                tracing::debug!(
                    ?failed_stage,
                    input = ?err.input,
                    "Rejected block#{height} ({block_hash}): {err}"
                );
                Err(err)
            }
        }
    }

    fn enter_stage(&mut self, block_hash: BlockHash, stage: ConnectStage) {
        tracing::trace!(%block_hash, from = ?self.stage, to = ?stage, "Block connection stage");
        self.stage = stage;
    }

    fn connect<C>(
        &mut self,
        cache: &mut C,
        store: Arc<dyn CoinStore>,
        block: &Block,
        block_hash: BlockHash,
        height: u32,
        flags: u32,
    ) -> Result<ConnectedBlock, BlockValidationError>
    where
        C: CoinsCache + ?Sized,
    {
        self.enter_stage(block_hash, ConnectStage::Collect);
        let txids = check_block_sanity(block)?;

        self.enter_stage(block_hash, ConnectStage::Fetch);
        let fetch = self.fetcher.fetch_inputs(cache, store, block);

        self.enter_stage(block_hash, ConnectStage::Verify);
        let (resolved, spent_coins, fees) = resolve_inputs(&*cache, block, &txids, height)?;

        if self.config.verify_scripts {
            self.verify_scripts(block, &resolved, flags)?;
        }

        Ok(ConnectedBlock {
            height,
            block_hash,
            fees,
            spent_coins,
            fetch,
        })
    }

    /// Verifies every input of the block, returns the error of the first failing input.
    fn verify_scripts(
        &self,
        block: &Block,
        resolved: &[ResolvedTx],
        flags: u32,
    ) -> Result<(), BlockValidationError> {
        let verifier = &self.verifier;

        let verify_transaction = |resolved: &ResolvedTx| -> Option<BlockValidationError> {
            let tx = &block.txdata[resolved.tx_index];
            let txdata = PrecomputedTransactionData::new(tx, Some(&resolved.spent_outputs));

            tx.input
                .iter()
                .zip(&resolved.spent_outputs)
                .enumerate()
                .find_map(|(input_index, (input, spent))| {
                    let err = verifier
                        .verify_input(&txdata, &spent.script_pubkey, spent.value, input_index, flags)
                        .err()?;

                    let location = InputLocation {
                        tx_index: resolved.tx_index,
                        input_index,
                        outpoint: input.previous_output,
                    };

                    let debug_message = format!("input {input_index} of tx {}", resolved.txid);

                    let validation_error = if err.is_precondition() {
                        BlockValidationError::new(
                            BlockValidationResult::Configuration,
                            "script-verify-flags-invalid",
                            format!("{debug_message}: {err}"),
                        )
                    } else if err.is_unsupported() {
                        BlockValidationError::new(
                            BlockValidationResult::Unsupported,
                            "script-verify-unsupported",
                            format!("{debug_message}: {err}"),
                        )
                    } else {
                        BlockValidationError::consensus(
                            format!("mandatory-script-verify-flag-failed ({err})"),
                            debug_message,
                        )
                    };

                    Some(validation_error.with_input(location))
                })
        };

        let failure = match &self.verification_pool {
            Some(pool) => pool.install(|| resolved.par_iter().find_map_first(verify_transaction)),
            None => resolved.iter().find_map(verify_transaction),
        };

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Context free checks the connection relies on, returns the txids of the block.
fn check_block_sanity(block: &Block) -> Result<Vec<Txid>, BlockValidationError> {
    if block.txdata.is_empty() {
        return Err(BlockValidationError::consensus(
            "bad-blk-length",
            "block has no transactions",
        ));
    }

    // First transaction must be coinbase, the rest must not be.
    if !block.txdata[0].is_coinbase() {
        return Err(BlockValidationError::consensus(
            "bad-cb-missing",
            "first tx is not coinbase",
        ));
    }

    if block.txdata.iter().skip(1).any(Transaction::is_coinbase) {
        return Err(BlockValidationError::consensus(
            "bad-cb-multiple",
            "more than one coinbase",
        ));
    }

    let txids: Vec<Txid> = block.txdata.iter().map(Transaction::compute_txid).collect();

    let merkle_root = bitcoin::merkle_tree::calculate_root(
        txids
            .iter()
            .map(|txid| TxMerkleNode::from_raw_hash(txid.to_raw_hash())),
    );

    if merkle_root != Some(block.header.merkle_root) {
        return Err(BlockValidationError::new(
            BlockValidationResult::Mutated,
            "bad-txnmrklroot",
            "hashMerkleRoot mismatch",
        ));
    }

    // Duplicated transactions yield the same merkle root (CVE-2012-2459).
    let mut seen_transactions = HashSet::with_capacity(txids.len());
    if let Some(index) = txids.iter().position(|txid| !seen_transactions.insert(*txid)) {
        return Err(BlockValidationError::new(
            BlockValidationResult::Mutated,
            "bad-txns-duplicate",
            format!("duplicate transaction at index {index}"),
        ));
    }

    for (tx_index, tx) in block.txdata.iter().enumerate().skip(1) {
        let mut seen_inputs = HashSet::with_capacity(tx.input.len());
        for (input_index, input) in tx.input.iter().enumerate() {
            if !seen_inputs.insert(input.previous_output) {
                return Err(BlockValidationError::consensus(
                    "bad-txns-inputs-duplicate",
                    format!("duplicate input in tx {}", txids[tx_index]),
                )
                .with_input(InputLocation {
                    tx_index,
                    input_index,
                    outpoint: input.previous_output,
                }));
            }
        }
    }

    Ok(txids)
}

/// Sum of the output values, `None` if any of them is out of the money range.
fn output_value(tx: &Transaction) -> Option<u64> {
    let max_money = Amount::MAX_MONEY.to_sat();
    tx.output.iter().try_fold(0u64, |total, output| {
        let value = output.value.to_sat();
        let total = total.checked_add(value)?;
        (value <= max_money && total <= max_money).then_some(total)
    })
}

/// Resolves every input of the block to the coin it spends.
///
/// Coins come from the outputs of earlier transactions of the block or from the cache.
/// Returns the resolved transactions, the spent coins and the total fees.
fn resolve_inputs<C>(
    cache: &C,
    block: &Block,
    txids: &[Txid],
    height: u32,
) -> Result<(Vec<ResolvedTx>, Vec<(OutPoint, Coin)>, u64), BlockValidationError>
where
    C: CoinsCache + ?Sized,
{
    let max_money = Amount::MAX_MONEY.to_sat();
    let mut in_block_coins: HashMap<OutPoint, Coin> = HashMap::new();
    let mut spent: HashSet<OutPoint> = HashSet::new();
    let mut spent_coins = Vec::new();
    let mut resolved = Vec::with_capacity(block.txdata.len().saturating_sub(1));
    let mut fees = 0u64;

    for (tx_index, tx) in block.txdata.iter().enumerate() {
        let txid = txids[tx_index];
        let is_coinbase = tx_index == 0;

        let value_out = output_value(tx).ok_or_else(|| {
            BlockValidationError::consensus(
                "bad-txns-txouttotal-toolarge",
                format!("output value out of range in tx {txid}"),
            )
        })?;

        if !is_coinbase {
            let mut value_in = 0u64;
            let mut spent_outputs = Vec::with_capacity(tx.input.len());

            for (input_index, input) in tx.input.iter().enumerate() {
                let outpoint = input.previous_output;
                let location = InputLocation {
                    tx_index,
                    input_index,
                    outpoint,
                };

                if !spent.insert(outpoint) {
                    return Err(BlockValidationError::consensus(
                        "bad-txns-inputs-missingorspent",
                        format!("{outpoint} spent twice in block"),
                    )
                    .with_input(location));
                }

                let coin = in_block_coins
                    .remove(&outpoint)
                    .or_else(|| cache.access_coin(&outpoint).cloned())
                    .ok_or_else(|| {
                        BlockValidationError::new(
                            BlockValidationResult::MissingInputs,
                            "bad-txns-inputs-missingorspent",
                            format!("{outpoint} spent by tx {txid} not found"),
                        )
                        .with_input(location)
                    })?;

                if coin.is_coinbase && height.saturating_sub(coin.height) < COINBASE_MATURITY {
                    return Err(BlockValidationError::consensus(
                        "bad-txns-premature-spend-of-coinbase",
                        format!(
                            "tried to spend coinbase at depth {}",
                            height.saturating_sub(coin.height)
                        ),
                    )
                    .with_input(location));
                }

                value_in = value_in
                    .checked_add(coin.amount)
                    .filter(|value_in| coin.amount <= max_money && *value_in <= max_money)
                    .ok_or_else(|| {
                        BlockValidationError::consensus(
                            "bad-txns-inputvalues-outofrange",
                            format!("input values out of range in tx {txid}"),
                        )
                        .with_input(location)
                    })?;

                spent_outputs.push(coin.to_txout());
                spent_coins.push((outpoint, coin));
            }

            let fee = value_in.checked_sub(value_out).ok_or_else(|| {
                BlockValidationError::consensus(
                    "bad-txns-in-belowout",
                    format!("value in ({value_in}) < value out ({value_out}) in tx {txid}"),
                )
            })?;

            fees = fees
                .checked_add(fee)
                .filter(|fees| *fees <= max_money)
                .ok_or_else(|| {
                    BlockValidationError::consensus(
                        "bad-txns-accumulated-fee-outofrange",
                        "accumulated fee in the block out of range",
                    )
                })?;

            resolved.push(ResolvedTx {
                tx_index,
                txid,
                spent_outputs,
            });
        }

        for (vout, output) in tx.output.iter().enumerate() {
            let coin = Coin::from_txout(output, height, is_coinbase);
            if !coin.is_unspendable() {
                in_block_coins.insert(
                    OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    coin,
                );
            }
        }
    }

    let coinbase_value = output_value(&block.txdata[0]).unwrap_or(u64::MAX);
    let block_reward = fees.saturating_add(bitcoin_block_subsidy(height));

    // Ensures no inflation.
    if coinbase_value > block_reward {
        return Err(BlockValidationError::consensus(
            "bad-cb-amount",
            format!("coinbase pays too much (actual={coinbase_value} vs limit={block_reward})"),
        ));
    }

    Ok((resolved, spent_coins, fees))
}
