use bitcoin::{Amount, ScriptBuf, TxOut};

/// Maximum size of a spendable script.
const MAX_SCRIPT_SIZE: usize = 10_000;

/// `OP_RETURN`.
const OP_RETURN: u8 = 0x6a;

/// Unspent transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    /// Whether the coin is from a coinbase transaction.
    pub is_coinbase: bool,
    /// Transfer value in satoshis.
    pub amount: u64,
    // Block height at which this containing transaction was included.
    pub height: u32,
    /// Spending condition of the output.
    pub script_pubkey: Vec<u8>,
}

impl Coin {
    pub fn from_txout(txout: &TxOut, height: u32, is_coinbase: bool) -> Self {
        Self {
            is_coinbase,
            amount: txout.value.to_sat(),
            height,
            script_pubkey: txout.script_pubkey.to_bytes(),
        }
    }

    pub fn to_txout(&self) -> TxOut {
        TxOut {
            value: Amount::from_sat(self.amount),
            script_pubkey: ScriptBuf::from_bytes(self.script_pubkey.clone()),
        }
    }

    /// Returns `true` if no input can ever spend this output.
    pub fn is_unspendable(&self) -> bool {
        self.script_pubkey.first() == Some(&OP_RETURN)
            || self.script_pubkey.len() > MAX_SCRIPT_SIZE
    }
}
