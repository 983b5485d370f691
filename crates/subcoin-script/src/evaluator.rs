use crate::{ScriptError, ScriptFlags};
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{Hash, HashEngine, sha256};
use bitcoin::secp256k1::{Message, Secp256k1, VerifyOnly, XOnlyPublicKey};
use bitcoin::sighash::{TapSighash, TapSighashType};
use bitcoin::{Amount, Script, Transaction, TxOut};

/// First byte of the annex element in a taproot witness (BIP341).
const ANNEX_TAG: u8 = 0x50;

/// BIP341 hashes over the whole transaction, shared by the signature hashes of all of
/// its taproot inputs.
#[derive(Debug, Clone, Copy)]
struct TaprootMidstates {
    prevouts: sha256::Hash,
    amounts: sha256::Hash,
    script_pubkeys: sha256::Hash,
    sequences: sha256::Hash,
    outputs: sha256::Hash,
}

impl TaprootMidstates {
    fn new(tx: &Transaction, spent_outputs: &[TxOut]) -> Self {
        let mut prevouts = sha256::Hash::engine();
        let mut sequences = sha256::Hash::engine();
        for input in &tx.input {
            prevouts.input(&serialize(&input.previous_output));
            sequences.input(&input.sequence.to_consensus_u32().to_le_bytes());
        }

        let mut amounts = sha256::Hash::engine();
        let mut script_pubkeys = sha256::Hash::engine();
        for spent in spent_outputs {
            amounts.input(&spent.value.to_sat().to_le_bytes());
            script_pubkeys.input(&serialize(&spent.script_pubkey));
        }

        let mut outputs = sha256::Hash::engine();
        for output in &tx.output {
            outputs.input(&serialize(output));
        }

        Self {
            prevouts: sha256::Hash::from_engine(prevouts),
            amounts: sha256::Hash::from_engine(amounts),
            script_pubkeys: sha256::Hash::from_engine(script_pubkeys),
            sequences: sha256::Hash::from_engine(sequences),
            outputs: sha256::Hash::from_engine(outputs),
        }
    }
}

/// Transaction data shared by the verification of every input of a transaction.
///
/// Built once per transaction, the same instance can be used to verify the inputs
/// concurrently from multiple threads.
#[derive(Debug)]
pub struct PrecomputedTransactionData<'a> {
    tx: &'a Transaction,
    serialized_tx: Vec<u8>,
    spent_outputs: Option<&'a [TxOut]>,
    taproot: Option<TaprootMidstates>,
}

impl<'a> PrecomputedTransactionData<'a> {
    /// Constructs a new instance of [`PrecomputedTransactionData`].
    ///
    /// `spent_outputs` must be ordered as the inputs of `tx`. The taproot signature hash
    /// midstates are computed here when one of them is a taproot output.
    pub fn new(tx: &'a Transaction, spent_outputs: Option<&'a [TxOut]>) -> Self {
        let taproot = spent_outputs
            .filter(|spent| spent.iter().any(|txout| txout.script_pubkey.is_p2tr()))
            .map(|spent| TaprootMidstates::new(tx, spent));

        Self {
            tx,
            serialized_tx: serialize(tx),
            spent_outputs,
            taproot,
        }
    }

    pub fn tx(&self) -> &'a Transaction {
        self.tx
    }

    /// Consensus encoding of the transaction, including the witness data.
    pub fn serialized_tx(&self) -> &[u8] {
        &self.serialized_tx
    }

    /// Outputs spent by the transaction, `None` if they were not supplied.
    pub fn spent_outputs(&self) -> Option<&'a [TxOut]> {
        self.spent_outputs
    }

    /// BIP341 signature hash of a key path spend of `input_index`.
    ///
    /// `annex` is the full annex element, including its tag byte.
    ///
    /// <https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki#common-signature-message>
    pub fn taproot_signature_hash(
        &self,
        input_index: usize,
        annex: Option<&[u8]>,
        sighash_type: TapSighashType,
    ) -> Result<TapSighash, ScriptError> {
        let midstates = self.taproot.as_ref().ok_or(ScriptError::MissingSpentOutputs)?;
        let spent_outputs = self.spent_outputs.ok_or(ScriptError::MissingSpentOutputs)?;
        let tx = self.tx;

        let input = tx.input.get(input_index).ok_or(ScriptError::SchnorrSigHashType)?;
        let spent = spent_outputs
            .get(input_index)
            .ok_or(ScriptError::MissingSpentOutputs)?;

        let anyone_can_pay = matches!(
            sighash_type,
            TapSighashType::AllPlusAnyoneCanPay
                | TapSighashType::NonePlusAnyoneCanPay
                | TapSighashType::SinglePlusAnyoneCanPay
        );
        let single = matches!(
            sighash_type,
            TapSighashType::Single | TapSighashType::SinglePlusAnyoneCanPay
        );
        let none = matches!(
            sighash_type,
            TapSighashType::None | TapSighashType::NonePlusAnyoneCanPay
        );

        let mut engine = TapSighash::engine();

        // Epoch.
        engine.input(&[0x00]);
        engine.input(&[sighash_type as u8]);
        engine.input(&tx.version.0.to_le_bytes());
        engine.input(&tx.lock_time.to_consensus_u32().to_le_bytes());

        if !anyone_can_pay {
            engine.input(midstates.prevouts.as_byte_array());
            engine.input(midstates.amounts.as_byte_array());
            engine.input(midstates.script_pubkeys.as_byte_array());
            engine.input(midstates.sequences.as_byte_array());
        }

        if !single && !none {
            engine.input(midstates.outputs.as_byte_array());
        }

        // Key path spend, the extension flag is zero.
        let spend_type = u8::from(annex.is_some());
        engine.input(&[spend_type]);

        if anyone_can_pay {
            engine.input(&serialize(&input.previous_output));
            engine.input(&spent.value.to_sat().to_le_bytes());
            engine.input(&serialize(&spent.script_pubkey));
            engine.input(&input.sequence.to_consensus_u32().to_le_bytes());
        } else {
            engine.input(&(input_index as u32).to_le_bytes());
        }

        if let Some(annex) = annex {
            engine.input(sha256::Hash::hash(&serialize(&annex.to_vec())).as_byte_array());
        }

        if single {
            // SIGHASH_SINGLE without a matching output can not be signed.
            let output = tx
                .output
                .get(input_index)
                .ok_or(ScriptError::SchnorrSigHashType)?;
            engine.input(sha256::Hash::hash(&serialize(output)).as_byte_array());
        }

        Ok(TapSighash::from_engine(engine))
    }
}

/// Everything needed to evaluate the scripts of one input.
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    /// Script of the output being spent.
    pub script_pubkey: &'a Script,
    /// Amount of the output being spent.
    pub amount: Amount,
    /// Index of the input in [`PrecomputedTransactionData::tx`], always in range.
    pub input_index: usize,
    /// Validated script flags.
    pub flags: ScriptFlags,
    pub txdata: &'a PrecomputedTransactionData<'a>,
}

/// Decides whether an input is authorized to spend the output it references.
///
/// Implementations must be free of shared mutable state, they are invoked concurrently
/// for different inputs. Whenever the evaluation needs data which is not available in
/// the [`ScriptContext`], the spend must be rejected rather than accepted.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, ctx: &ScriptContext<'_>) -> Result<(), ScriptError>;
}

impl<T: ScriptEvaluator + ?Sized> ScriptEvaluator for std::sync::Arc<T> {
    fn evaluate(&self, ctx: &ScriptContext<'_>) -> Result<(), ScriptError> {
        (**self).evaluate(ctx)
    }
}

/// Consensus script evaluator.
///
/// Taproot key path spends are verified natively, all other spends are delegated to
/// libbitcoinconsensus.
pub struct ConsensusEvaluator {
    secp: Secp256k1<VerifyOnly>,
}

impl Default for ConsensusEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConsensusEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEvaluator").finish()
    }
}

impl ConsensusEvaluator {
    /// Constructs a new instance of [`ConsensusEvaluator`].
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }

    // https://github.com/bitcoin/bitcoin/blob/6f9db1ebcab4064065ccd787161bf2b87e03cc1f/src/script/interpreter.cpp#L1893
    fn verify_taproot_spend(&self, ctx: &ScriptContext<'_>) -> Result<(), ScriptError> {
        let tx = ctx.txdata.tx();
        let input = &tx.input[ctx.input_index];

        if !input.script_sig.is_empty() {
            return Err(ScriptError::WitnessMalleated);
        }

        let mut stack: Vec<&[u8]> = input.witness.iter().collect();

        if stack.is_empty() {
            return Err(ScriptError::WitnessProgramWitnessEmpty);
        }

        let annex = match stack.last().copied() {
            Some(last) if stack.len() >= 2 && last.first() == Some(&ANNEX_TAG) => {
                stack.pop();
                Some(last)
            }
            _ => None,
        };

        if stack.len() != 1 {
            return Err(ScriptError::TapscriptUnsupported);
        }

        let output_key = XOnlyPublicKey::from_slice(&ctx.script_pubkey.as_bytes()[2..])
            .map_err(|_| ScriptError::InvalidOutputKey)?;

        let sig = stack[0];
        match sig.len() {
            64 => {}
            // An explicit SIGHASH_DEFAULT must use the 64-byte encoding.
            65 if sig[64] == 0x00 => return Err(ScriptError::SchnorrSigHashType),
            65 => {}
            len => return Err(ScriptError::SchnorrSigSize(len)),
        }

        let signature = bitcoin::taproot::Signature::from_slice(sig)
            .map_err(|_| ScriptError::SchnorrSigHashType)?;

        let sighash =
            ctx.txdata
                .taproot_signature_hash(ctx.input_index, annex, signature.sighash_type)?;

        let msg = Message::from_digest(sighash.to_byte_array());

        self.secp
            .verify_schnorr(&signature.signature, &msg, &output_key)
            .map_err(|_| ScriptError::SchnorrSig)
    }
}

impl ScriptEvaluator for ConsensusEvaluator {
    fn evaluate(&self, ctx: &ScriptContext<'_>) -> Result<(), ScriptError> {
        if ctx.flags.verify_witness() && ctx.flags.verify_taproot() && ctx.script_pubkey.is_p2tr()
        {
            return self.verify_taproot_spend(ctx);
        }

        // libbitcoinconsensus treats witness v1 programs as upgradable, which is only
        // correct for the outputs which are not taproot outputs at this point.
        let flags = ctx.flags.difference(ScriptFlags::TAPROOT);

        bitcoinconsensus::verify_with_flags(
            ctx.script_pubkey.as_bytes(),
            ctx.amount.to_sat(),
            ctx.txdata.serialized_tx(),
            ctx.input_index,
            flags.bits(),
        )
        .map_err(ScriptError::Consensus)
    }
}
