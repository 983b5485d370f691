const COIN: u64 = 100_000_000;

const INITIAL_SUBSIDY: u64 = 50 * COIN;

/// Number of blocks between two subsidy halvings.
pub const HALVING_INTERVAL: u32 = 210_000;

/// Returns the subsidy of the Bitcoin block at given height.
pub fn bitcoin_block_subsidy(height: u32) -> u64 {
    block_subsidy(height, HALVING_INTERVAL)
}

/// Returns the block subsidy at given height and halving interval.
pub fn block_subsidy(height: u32, subsidy_halving_interval: u32) -> u64 {
    let halvings = height / subsidy_halving_interval;
    // Force block reward to zero when right shift is undefined.
    if halvings >= 64 {
        return 0;
    }

    // Subsidy is cut in half every 210,000 blocks which will occur
    // approximately every 4 years.
    INITIAL_SUBSIDY >> halvings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_subsidy() {
        assert_eq!(bitcoin_block_subsidy(0), 50 * COIN);
        assert_eq!(bitcoin_block_subsidy(209_999), 50 * COIN);
        assert_eq!(bitcoin_block_subsidy(210_000), 25 * COIN);
        assert_eq!(bitcoin_block_subsidy(840_000), 312_500_000);
        assert_eq!(bitcoin_block_subsidy(64 * 210_000), 0);
        // Regtest halves every 150 blocks.
        assert_eq!(block_subsidy(150, 150), 25 * COIN);
        assert_eq!(block_subsidy(u32::MAX, 1), 0);
    }
}
