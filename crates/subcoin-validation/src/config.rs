use std::num::NonZeroUsize;

const DEFAULT_FETCH_BATCH_SIZE: usize = 128;

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Block connector configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct ConnectorConfig {
    /// Maximum number of outpoints claimed at once by an input fetch worker.
    #[cfg_attr(feature = "cli", arg(long, default_value_t = DEFAULT_FETCH_BATCH_SIZE))]
    pub fetch_batch_size: usize,

    /// Number of input fetch workers.
    #[cfg_attr(feature = "cli", arg(long, default_value_t = default_parallelism()))]
    pub fetch_workers: usize,

    /// Number of script verification threads.
    ///
    /// Scripts are verified on the calling thread when set to 0 or 1.
    #[cfg_attr(feature = "cli", arg(long, default_value_t = default_parallelism()))]
    pub verification_threads: usize,

    /// Whether to verify the Bitcoin script.
    #[cfg_attr(feature = "cli", arg(long, default_value_t = true, action = clap::ArgAction::Set))]
    pub verify_scripts: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            fetch_workers: default_parallelism(),
            verification_threads: default_parallelism(),
            verify_scripts: true,
        }
    }
}
