use crate::{
    ConsensusEvaluator, Error, PrecomputedTransactionData, ScriptContext, ScriptEvaluator,
    ScriptFlags, ScriptVerifyStatus,
};
use bitcoin::{Amount, Script, Transaction, TxOut};

/// Checks the arguments of a verification call which do not depend on the scripts.
///
/// The checks run in a fixed order, the cheapest and most structural ones first, the
/// first violated one determines the error.
///
/// https://github.com/bitcoin/bitcoin/blob/6f9db1ebcab4064065ccd787161bf2b87e03cc1f/src/kernel/bitcoinkernel.cpp#L514
fn check_preconditions(
    tx: &Transaction,
    spent_outputs: Option<&[TxOut]>,
    input_index: usize,
    flags: u32,
) -> Result<ScriptFlags, Error> {
    let flags = ScriptFlags::from_interface_bits(flags).ok_or(Error::InvalidFlags(flags))?;

    if !flags.is_valid_combination() {
        return Err(Error::InvalidFlagsCombination(flags.bits()));
    }

    if flags.verify_taproot() && spent_outputs.is_none() {
        return Err(Error::SpentOutputsRequired);
    }

    if let Some(spent_outputs) = spent_outputs {
        if spent_outputs.len() != tx.input.len() {
            return Err(Error::SpentOutputsMismatch {
                expected: tx.input.len(),
                got: spent_outputs.len(),
            });
        }
    }

    if input_index >= tx.input.len() {
        return Err(Error::TxInputIndex {
            index: input_index,
            inputs: tx.input.len(),
        });
    }

    Ok(flags)
}

/// Verifies that transaction inputs are authorized to spend the outputs they reference.
///
/// The verifier holds no mutable state and can be shared between threads to verify the
/// inputs of a block in parallel.
#[derive(Debug, Default)]
pub struct ScriptVerifier<E = ConsensusEvaluator> {
    evaluator: E,
}

impl<E: ScriptEvaluator> ScriptVerifier<E> {
    /// Constructs a new instance of [`ScriptVerifier`].
    pub fn new(evaluator: E) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Verifies the input `input_index` of `tx` against `script_pubkey`.
    ///
    /// `spent_outputs`, if provided, must contain the outputs spent by every input of `tx`
    /// in input order; it is mandatory when the taproot flag is set.
    pub fn verify(
        &self,
        script_pubkey: &Script,
        amount: Amount,
        tx: &Transaction,
        spent_outputs: Option<&[TxOut]>,
        input_index: usize,
        flags: u32,
    ) -> Result<(), Error> {
        let flags = check_preconditions(tx, spent_outputs, input_index, flags)?;

        let txdata = PrecomputedTransactionData::new(tx, spent_outputs);

        self.evaluate(&txdata, script_pubkey, amount, input_index, flags)
    }

    /// Same as [`Self::verify`], but reuses the transaction data computed for another input
    /// of the same transaction, including the taproot signature hash midstates.
    pub fn verify_input(
        &self,
        txdata: &PrecomputedTransactionData<'_>,
        script_pubkey: &Script,
        amount: Amount,
        input_index: usize,
        flags: u32,
    ) -> Result<(), Error> {
        let flags =
            check_preconditions(txdata.tx(), txdata.spent_outputs(), input_index, flags)?;

        self.evaluate(txdata, script_pubkey, amount, input_index, flags)
    }

    /// Boundary flavour of [`Self::verify`].
    ///
    /// Returns whether the spend is valid and writes the reason of the failure to `status`,
    /// [`ScriptVerifyStatus::Ok`] on success.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_with_status(
        &self,
        script_pubkey: &Script,
        amount: Amount,
        tx: &Transaction,
        spent_outputs: Option<&[TxOut]>,
        input_index: usize,
        flags: u32,
        status: &mut ScriptVerifyStatus,
    ) -> bool {
        match self.verify(script_pubkey, amount, tx, spent_outputs, input_index, flags) {
            Ok(()) => {
                *status = ScriptVerifyStatus::Ok;
                true
            }
            Err(err) => {
                *status = err.status();
                false
            }
        }
    }

    fn evaluate(
        &self,
        txdata: &PrecomputedTransactionData<'_>,
        script_pubkey: &Script,
        amount: Amount,
        input_index: usize,
        flags: ScriptFlags,
    ) -> Result<(), Error> {
        let ctx = ScriptContext {
            script_pubkey,
            amount,
            input_index,
            flags,
            txdata,
        };

        self.evaluator.evaluate(&ctx).map_err(|err| {
            tracing::trace!(
                txid = %txdata.tx().compute_txid(),
                input_index,
                "Script verification failed: {err}"
            );
            Error::Script(err)
        })
    }
}
