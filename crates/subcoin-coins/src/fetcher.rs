use crate::cache::{CoinsCache, UncheckedInsert};
use crate::{Coin, CoinStore, Error};
use bitcoin::{Block, OutPoint, Txid};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of [`InputFetcher::fetch_inputs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Number of outpoints submitted to the workers.
    pub requested: usize,
    /// Number of coins found in the store and merged into the cache.
    pub fetched: usize,
}

impl FetchSummary {
    /// Upper bound of the requested coins which were not found in the store.
    ///
    /// A miss abandons the rest of the worker batch, so the exact number of missing
    /// coins is unknown.
    pub fn missing(&self) -> usize {
        self.requested - self.fetched
    }
}

#[derive(Default)]
struct State {
    /// Outpoints waiting for a worker, consumed from the back.
    pending: Vec<OutPoint>,
    /// Coins read by the workers, waiting to be written to the cache.
    results: Vec<(OutPoint, Coin)>,
    /// Outpoints submitted and not yet resolved, including the ones claimed by a worker.
    in_flight: usize,
    stop: bool,
    /// Store of the block being fetched.
    store: Option<Arc<dyn CoinStore>>,
}

struct Shared {
    state: Mutex<State>,
    /// Workers block on this when out of work.
    worker_cv: Condvar,
    /// The fetching thread blocks on this while lookups are in flight.
    main_cv: Condvar,
    batch_size: usize,
    worker_count: usize,
}

impl Shared {
    fn request_stop(&self) {
        self.state.lock().stop = true;
        self.worker_cv.notify_all();
    }

    fn worker_loop(&self) {
        let mut claimed = 0usize;
        let mut outpoints = Vec::with_capacity(self.batch_size);
        let mut coins = Vec::with_capacity(self.batch_size);

        loop {
            let store = {
                let mut state = self.state.lock();

                // Publish the previous batch in the same critical section as the next claim.
                if claimed > 0 {
                    state.results.append(&mut coins);
                    state.in_flight -= claimed;
                    self.main_cv.notify_one();
                }

                while state.pending.is_empty() && !state.stop {
                    self.worker_cv.wait(&mut state);
                }

                if state.stop {
                    return;
                }

                let even_bucket = state.in_flight / self.worker_count;
                claimed = state
                    .pending
                    .len()
                    .min(self.batch_size)
                    .min(even_bucket)
                    .max(1);

                let start = state.pending.len() - claimed;
                outpoints.clear();
                outpoints.extend(state.pending.drain(start..));

                state.store.clone()
            };

            coins.clear();

            let Some(store) = store else {
                continue;
            };

            let lookup = panic::catch_unwind(AssertUnwindSafe(|| {
                for outpoint in outpoints.drain(..) {
                    match store.lookup(&outpoint) {
                        Some(coin) => coins.push((outpoint, coin)),
                        // The block spending it will fail validation, no point in continuing.
                        None => break,
                    }
                }
            }));

            // The claimed outpoints are still published so the fetching thread is not
            // left waiting, the batch resolves as missing.
            if lookup.is_err() {
                tracing::error!(claimed, "Coin store panicked during input fetch");
                coins.clear();
            }
        }
    }
}

/// Worker pool reading the coins spent by a block from the store into the cache.
///
/// The thread calling [`Self::fetch_inputs`] submits the outpoints in batches, the workers
/// look them up concurrently and the calling thread merges the results into the cache as
/// they arrive.
pub struct InputFetcher {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl InputFetcher {
    /// Constructs a new instance of [`InputFetcher`], spawning `worker_count` threads.
    pub fn new(batch_size: usize, worker_count: usize) -> Result<Self, Error> {
        if worker_count == 0 {
            return Err(Error::NoWorkers);
        }

        if batch_size == 0 {
            return Err(Error::ZeroBatchSize);
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            worker_cv: Condvar::new(),
            main_cv: Condvar::new(),
            batch_size,
            worker_count,
        });

        let mut workers = Vec::with_capacity(worker_count);

        for n in 0..worker_count {
            let worker_shared = shared.clone();

            let spawn_result = std::thread::Builder::new()
                .name(format!("inputfetch.{n}"))
                .spawn(move || worker_loop(worker_shared));

            match spawn_result {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    tracing::error!("Failed to spawn input fetch worker {n}: {err}");
                    shared.request_stop();
                    join_workers(workers);
                    return Err(Error::SpawnWorker(err));
                }
            }
        }

        tracing::debug!(batch_size, worker_count, "Started input fetcher");

        Ok(Self { shared, workers })
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size
    }

    /// Number of outpoints submitted and not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    /// Queues a batch of outpoints for the workers.
    pub(crate) fn submit(&self, outpoints: Vec<OutPoint>) {
        if outpoints.is_empty() {
            return;
        }

        let size = outpoints.len();

        {
            let mut state = self.shared.state.lock();
            state.in_flight += size;
            if state.pending.is_empty() {
                state.pending = outpoints;
            } else {
                state.pending.extend(outpoints);
            }
        }

        if size == 1 {
            self.shared.worker_cv.notify_one();
        } else {
            self.shared.worker_cv.notify_all();
        }
    }

    /// Fetches the coins spent by `block` from `store` and writes them to `cache`.
    ///
    /// The coinbase, the outputs created by earlier transactions of the block and the
    /// coins already present in the cache are not looked up. Coins are inserted clean, so
    /// they can be evicted from the cache without writing them back.
    ///
    /// Coins missing from the store are silently skipped, the block spending them is
    /// expected to be rejected once its inputs are resolved.
    pub fn fetch_inputs<C>(
        &mut self,
        cache: &mut C,
        store: Arc<dyn CoinStore>,
        block: &Block,
    ) -> FetchSummary
    where
        C: CoinsCache + ?Sized,
    {
        self.shared.state.lock().store = Some(store);

        let batch_size = self.shared.batch_size;
        let mut buffer = Vec::with_capacity(batch_size);
        let mut txids = HashSet::<Txid>::with_capacity(block.txdata.len());
        let mut queued = HashSet::<OutPoint>::new();
        let mut summary = FetchSummary::default();

        for tx in &block.txdata {
            if tx.is_coinbase() {
                continue;
            }

            for input in &tx.input {
                let outpoint = input.previous_output;

                // Created earlier in this block, neither in the cache nor in the store yet.
                if txids.contains(&outpoint.txid) {
                    continue;
                }

                if cache.contains(&outpoint) || !queued.insert(outpoint) {
                    continue;
                }

                buffer.push(outpoint);

                if buffer.len() == batch_size {
                    summary.requested += buffer.len();
                    self.submit(std::mem::replace(
                        &mut buffer,
                        Vec::with_capacity(batch_size),
                    ));
                }
            }

            txids.insert(tx.compute_txid());
        }

        summary.requested += buffer.len();
        self.submit(buffer);

        let permit = UncheckedInsert::new();

        loop {
            let coins = {
                let mut state = self.shared.state.lock();

                while state.results.is_empty() && state.in_flight > 0 && !state.stop {
                    self.shared.main_cv.wait(&mut state);
                }

                if state.results.is_empty() {
                    state.store = None;
                    break;
                }

                std::mem::take(&mut state.results)
            };

            summary.fetched += coins.len();

            for (outpoint, coin) in coins {
                cache.insert_unchecked(outpoint, coin, false, &permit);
            }
        }

        tracing::debug!(
            block_hash = %block.block_hash(),
            requested = summary.requested,
            fetched = summary.fetched,
            "Fetched block inputs"
        );

        summary
    }
}

impl std::fmt::Debug for InputFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFetcher")
            .field("batch_size", &self.shared.batch_size)
            .field("worker_count", &self.shared.worker_count)
            .finish()
    }
}

impl Drop for InputFetcher {
    fn drop(&mut self) {
        self.shared.request_stop();
        join_workers(std::mem::take(&mut self.workers));
    }
}

fn worker_loop(shared: Arc<Shared>) {
    shared.worker_loop()
}

fn join_workers(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().map(ToOwned::to_owned);
        if worker.join().is_err() {
            tracing::error!(worker = ?name, "Input fetch worker panicked");
        }
    }
}
