use crate::{Coin, Error};
use bitcoin::{Block, OutPoint};
use std::collections::HashMap;

/// Permit required to insert a coin into a cache without any consistency check.
///
/// It can only be constructed inside this crate, restricting unchecked inserts to the
/// coins which were just read from the store by the [`crate::InputFetcher`].
#[derive(Debug)]
pub struct UncheckedInsert {
    _private: (),
}

impl UncheckedInsert {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// Cache operations used by the input fetcher.
pub trait CoinsCache {
    /// Returns `true` if the cache holds an entry for `outpoint`, live or spent.
    fn contains(&self, outpoint: &OutPoint) -> bool;

    /// Returns the unspent coin at `outpoint`, if cached.
    fn access_coin(&self, outpoint: &OutPoint) -> Option<&Coin>;

    /// Inserts a coin read from the store.
    ///
    /// An existing entry is left untouched. The caller guarantees the coin is the
    /// current state of the store at `outpoint`.
    fn insert_unchecked(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        dirty: bool,
        permit: &UncheckedInsert,
    );
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct EntryFlags: u8 {
        /// The entry differs from the version in the store.
        const DIRTY = 1 << 0;
        /// The store has no unspent version of this coin, a spent entry can be erased
        /// instead of being written back.
        const FRESH = 1 << 1;
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` once spent.
    coin: Option<Coin>,
    flags: EntryFlags,
}

impl CacheEntry {
    fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlags::DIRTY)
    }

    fn is_fresh(&self) -> bool {
        self.flags.contains(EntryFlags::FRESH)
    }
}

/// Write-back cache of coins on top of a [`crate::CoinStore`].
///
/// Entries are tagged `DIRTY` when modified in memory and `FRESH` when the store is known
/// not to have an unspent version of them.
#[derive(Debug, Default)]
pub struct CoinsViewCache {
    entries: HashMap<OutPoint, CacheEntry>,
}

impl CoinsViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new coin.
    ///
    /// Unspendable outputs are never cached. Unless `possible_overwrite` is set, replacing
    /// an unspent coin is an error.
    pub fn add_coin(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        possible_overwrite: bool,
    ) -> Result<(), Error> {
        if coin.is_unspendable() {
            return Ok(());
        }

        let mut fresh = false;

        match self.entries.get(&outpoint) {
            Some(entry) if !possible_overwrite => {
                if entry.coin.is_some() {
                    return Err(Error::OverwriteUnspent(outpoint));
                }
                // A spent entry which is not dirty matches the store, which therefore does
                // not hold an unspent version either.
                fresh = !entry.is_dirty();
            }
            Some(_) => {}
            None => fresh = !possible_overwrite,
        }

        let entry = self.entries.entry(outpoint).or_insert(CacheEntry {
            coin: None,
            flags: EntryFlags::empty(),
        });
        entry.coin = Some(coin);
        entry.flags |= EntryFlags::DIRTY;
        if fresh {
            entry.flags |= EntryFlags::FRESH;
        }

        Ok(())
    }

    /// Spends the coin at `outpoint`, returns it if it was unspent.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        let entry = self.entries.get_mut(outpoint)?;
        let coin = entry.coin.take()?;

        if entry.is_fresh() {
            self.entries.remove(outpoint);
        } else {
            entry.flags |= EntryFlags::DIRTY;
        }

        Some(coin)
    }

    /// Removes the entry at `outpoint` if it has no pending modification.
    pub fn uncache(&mut self, outpoint: &OutPoint) -> bool {
        match self.entries.get(outpoint) {
            Some(entry) if entry.flags.is_empty() => {
                self.entries.remove(outpoint);
                true
            }
            _ => false,
        }
    }

    pub fn is_dirty(&self, outpoint: &OutPoint) -> bool {
        self.entries.get(outpoint).is_some_and(CacheEntry::is_dirty)
    }

    pub fn is_fresh(&self, outpoint: &OutPoint) -> bool {
        self.entries.get(outpoint).is_some_and(CacheEntry::is_fresh)
    }

    /// Number of entries which have to be written back to the store.
    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_dirty()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies the UTXO changes of a connected block.
    ///
    /// Every coin spent by the block must be available in the cache or created earlier in
    /// the block. Returns the spent coins in input order, for undo.
    pub fn apply_block(
        &mut self,
        block: &Block,
        height: u32,
    ) -> Result<Vec<(OutPoint, Coin)>, Error> {
        let mut spent_coins = Vec::new();

        for tx in &block.txdata {
            let is_coinbase = tx.is_coinbase();

            if !is_coinbase {
                for input in &tx.input {
                    let outpoint = input.previous_output;
                    let coin = self
                        .spend_coin(&outpoint)
                        .ok_or(Error::MissingCoin(outpoint))?;
                    spent_coins.push((outpoint, coin));
                }
            }

            let txid = tx.compute_txid();

            for (vout, output) in tx.output.iter().enumerate() {
                let outpoint = OutPoint {
                    txid,
                    vout: vout as u32,
                };
                // Coinbase txids were duplicated before BIP30/BIP34.
                self.add_coin(
                    outpoint,
                    Coin::from_txout(output, height, is_coinbase),
                    is_coinbase,
                )?;
            }
        }

        tracing::trace!(
            height,
            spent = spent_coins.len(),
            cached = self.entries.len(),
            "Applied block to coins cache"
        );

        Ok(spent_coins)
    }
}

impl CoinsCache for CoinsViewCache {
    fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    fn access_coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.entries
            .get(outpoint)
            .and_then(|entry| entry.coin.as_ref())
    }

    fn insert_unchecked(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        dirty: bool,
        _permit: &UncheckedInsert,
    ) {
        self.entries.entry(outpoint).or_insert_with(|| CacheEntry {
            coin: Some(coin),
            flags: if dirty {
                EntryFlags::DIRTY
            } else {
                EntryFlags::empty()
            },
        });
    }
}
