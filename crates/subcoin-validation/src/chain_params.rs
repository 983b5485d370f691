use bitcoin::consensus::Params;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Network};
use hex_literal::hex;
use std::collections::HashMap;
use subcoin_script::ScriptFlags;

/// Extended [`Params`].
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Chain params defined in rust-bitcoin.
    pub params: Params,
    /// Block height at which CSV becomes active.
    pub csv_height: u32,
    /// Block height at which Segwit becomes active.
    pub segwit_height: u32,
    /// Block height from which taproot rules are enforced.
    pub taproot_height: u32,
    /// Blocks whose script flags deviate from the height based rules.
    pub script_flag_exceptions: HashMap<BlockHash, ScriptFlags>,
}

/// Block hash in the byte order used by explorers.
fn block_hash(mut bytes: [u8; 32]) -> BlockHash {
    bytes.reverse();
    BlockHash::from_byte_array(bytes)
}

impl ChainParams {
    /// Constructs a new instance of [`ChainParams`].
    // https://github.com/bitcoin/bitcoin/blob/6f9db1ebcab4064065ccd787161bf2b87e03cc1f/src/kernel/chainparams.cpp#L71
    pub fn new(network: Network) -> Self {
        let params = Params::new(network);
        match network {
            Network::Bitcoin => Self {
                params,
                csv_height: 419328, // 000000000000000004a1b34462cb8aeebd5799177f7a29cf28f2d1961716b5b5
                segwit_height: 481824, // 0000000000000000001c8018d9cb3b742ef25114f27563e3fc4a1902167f9893
                taproot_height: 709632, // 0000000000000000000687bca986194dc2c1f949318629b44bb54ec0a94d8244
                script_flag_exceptions: HashMap::from([
                    // BIP16 exception
                    (
                        block_hash(hex!(
                            "00000000000002dc756eebf4f49723ed8d30cc28a5f108eb94b1ba88ac4f9c22"
                        )),
                        ScriptFlags::empty(),
                    ),
                    // Taproot exception
                    (
                        block_hash(hex!(
                            "0000000000000000000f14c35b2d841e986ab5441de8c585d5ffe55ea1e395ad"
                        )),
                        ScriptFlags::P2SH | ScriptFlags::WITNESS,
                    ),
                ]),
            },
            Network::Testnet => Self {
                params,
                csv_height: 770112, // 00000000025e930139bac5c6c31a403776da130831ab85be56578f3fa75369bb
                segwit_height: 834624, // 00000000002b980fcd729daaa248fd9316a5200e9b367f4ff2c42453e84201ca
                taproot_height: 0,
                script_flag_exceptions: HashMap::from([
                    // BIP16 exception
                    (
                        block_hash(hex!(
                            "00000000dd30457c001f4095d208cc1296b0eed002427aa599874af7a432b105"
                        )),
                        ScriptFlags::empty(),
                    ),
                ]),
            },
            Network::Signet => Self {
                params,
                csv_height: 1,
                segwit_height: 1,
                taproot_height: 0,
                script_flag_exceptions: HashMap::new(),
            },
            // Regtest and networks without buried deployments.
            _ => Self {
                params,
                csv_height: 1,    // Always active unless overridden
                segwit_height: 0, // Always active unless overridden
                taproot_height: 0,
                script_flag_exceptions: HashMap::new(),
            },
        }
    }

    pub fn network(&self) -> Network {
        self.params.network
    }
}
