//! Unspent transaction outputs of the chain state and their concurrent prefetching.
//!
//! - [`CoinStore`]: read-only point lookups into the persistent UTXO set.
//! - [`CoinsViewCache`]: in-memory write-back overlay on top of the store.
//! - [`InputFetcher`]: worker pool loading the coins spent by a block from the store into
//!   the cache before the block is connected.

mod cache;
mod coin;
mod error;
mod fetcher;
mod store;

pub use cache::{CoinsCache, CoinsViewCache, UncheckedInsert};
pub use coin::Coin;
pub use error::Error;
pub use fetcher::{FetchSummary, InputFetcher};
pub use store::{CoinStore, MemoryCoinStore};
