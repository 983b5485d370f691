use crate::chain_params::ChainParams;
use bitcoin::BlockHash;
use subcoin_script::ScriptFlags;

/// Returns the script validation flags for the specified block.
///
/// Taproot is enforced from [`ChainParams::taproot_height`], while Bitcoin Core enforces
/// it on every block and exempts mainnet block 692261. Both accept the same historical
/// chain.
///
/// <https://github.com/bitcoin/bitcoin/blob/6f9db1ebcab4064065ccd787161bf2b87e03cc1f/src/validation.cpp#L2360>
pub fn get_block_script_flags(
    height: u32,
    block_hash: BlockHash,
    chain_params: &ChainParams,
) -> ScriptFlags {
    if let Some(flags) = chain_params
        .script_flag_exceptions
        .get(&block_hash)
        .copied()
    {
        return flags;
    }

    let mut flags = ScriptFlags::P2SH | ScriptFlags::WITNESS;

    // Enforce the DERSIG (BIP66) rule
    if height >= chain_params.params.bip66_height {
        flags |= ScriptFlags::DERSIG;
    }

    // Enforce CHECKLOCKTIMEVERIFY (BIP65)
    if height >= chain_params.params.bip65_height {
        flags |= ScriptFlags::CHECKLOCKTIMEVERIFY;
    }

    // Enforce CHECKSEQUENCEVERIFY (BIP112)
    if height >= chain_params.csv_height {
        flags |= ScriptFlags::CHECKSEQUENCEVERIFY;
    }

    // Enforce BIP147 NULLDUMMY (activated simultaneously with segwit)
    if height >= chain_params.segwit_height {
        flags |= ScriptFlags::NULLDUMMY;
    }

    // Enforce Taproot (BIP340-BIP342)
    if height >= chain_params.taproot_height {
        flags |= ScriptFlags::TAPROOT;
    }

    flags
}
