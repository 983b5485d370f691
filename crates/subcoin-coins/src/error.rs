use bitcoin::OutPoint;

/// Coins error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Input fetcher requires at least one worker")]
    NoWorkers,
    #[error("Input fetcher batch size must be positive")]
    ZeroBatchSize,
    #[error("Failed to spawn input fetch worker: {0}")]
    SpawnWorker(std::io::Error),
    /// Adding a coin would silently replace an unspent one.
    #[error("Attempted to overwrite unspent coin {0}")]
    OverwriteUnspent(OutPoint),
    #[error("Coin {0} is missing or already spent")]
    MissingCoin(OutPoint),
}
