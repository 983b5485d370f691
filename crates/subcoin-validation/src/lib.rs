//! Block connection for Subcoin.
//!
//! [`BlockConnector`] checks that every input of a block spends an existing coin with
//! valid scripts before the block is applied to the chain state. The coins are
//! prefetched from the [`subcoin_coins::CoinStore`] by a pool of workers, the scripts
//! are verified in parallel.

mod block_connector;
mod chain_params;
mod config;
mod script_flags;
mod subsidy;
mod validation;

pub use block_connector::{BlockConnector, ConnectStage, ConnectedBlock, COINBASE_MATURITY};
pub use chain_params::ChainParams;
pub use config::ConnectorConfig;
pub use script_flags::get_block_script_flags;
pub use subsidy::{HALVING_INTERVAL, bitcoin_block_subsidy, block_subsidy};
pub use validation::{BlockValidationError, BlockValidationResult, InputLocation};

/// Block connector error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Coins(#[from] subcoin_coins::Error),
    #[error("Failed to build script verification thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
