use crate::{
    ConsensusEvaluator, Error, PrecomputedTransactionData, ScriptContext, ScriptError,
    ScriptEvaluator, ScriptFlags, ScriptVerifier, ScriptVerifyStatus,
};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::deserialize;
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TweakedPublicKey};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{Annex, Prevouts, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, PublicKey, ScriptBuf, Sequence, TapSighashType, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use std::sync::atomic::{AtomicUsize, Ordering};

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("subcoin_script=trace")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct CountingEvaluator {
    calls: AtomicUsize,
}

impl ScriptEvaluator for CountingEvaluator {
    fn evaluate(&self, _ctx: &ScriptContext<'_>) -> Result<(), ScriptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counting_verifier() -> ScriptVerifier<CountingEvaluator> {
    ScriptVerifier::new(CountingEvaluator::default())
}

fn calls(verifier: &ScriptVerifier<CountingEvaluator>) -> usize {
    verifier.evaluator().calls.load(Ordering::SeqCst)
}

fn spending_tx(inputs: usize) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: (0..inputs)
            .map(|i| TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([i as u8 + 1; 32]),
                    vout: i as u32,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        }],
    }
}

fn op_true_output(amount: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
    }
}

#[test]
fn taproot_without_spent_outputs_is_rejected() {
    let verifier = counting_verifier();
    let tx = spending_tx(2);
    let flags = (ScriptFlags::P2SH | ScriptFlags::WITNESS | ScriptFlags::TAPROOT).bits();

    let mut status = ScriptVerifyStatus::Ok;
    let ok = verifier.verify_with_status(
        &ScriptBuf::new(),
        Amount::ZERO,
        &tx,
        None,
        0,
        flags,
        &mut status,
    );

    assert!(!ok);
    assert_eq!(status, ScriptVerifyStatus::SpentOutputsRequired);
    assert_eq!(calls(&verifier), 0);
}

#[test]
fn spent_outputs_count_must_match_inputs() {
    let verifier = counting_verifier();
    let tx = spending_tx(4);
    let spent_outputs = vec![op_true_output(1); 3];

    let err = verifier
        .verify(
            &ScriptBuf::new(),
            Amount::ZERO,
            &tx,
            Some(&spent_outputs),
            0,
            ScriptFlags::P2SH.bits(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        Error::SpentOutputsMismatch {
            expected: 4,
            got: 3
        }
    ));
    assert_eq!(err.status(), ScriptVerifyStatus::SpentOutputsMismatch);
    assert_eq!(calls(&verifier), 0);
}

#[test]
fn witness_without_p2sh_is_rejected_before_evaluation() {
    let verifier = counting_verifier();
    let tx = spending_tx(1);

    let err = verifier
        .verify(
            &ScriptBuf::new(),
            Amount::ZERO,
            &tx,
            None,
            0,
            ScriptFlags::WITNESS.bits(),
        )
        .unwrap_err();

    assert!(matches!(err, Error::InvalidFlagsCombination(_)));
    assert_eq!(err.status(), ScriptVerifyStatus::InvalidFlagsCombination);
    assert_eq!(calls(&verifier), 0);
}

#[test]
fn unknown_flag_bit_is_reported_first() {
    let verifier = counting_verifier();
    let tx = spending_tx(1);
    // Unknown bit, taproot without spent outputs and a bad input index at once.
    let flags = (1 << 30) | ScriptFlags::TAPROOT.bits() | ScriptFlags::WITNESS.bits();

    let err = verifier
        .verify(&ScriptBuf::new(), Amount::ZERO, &tx, None, 5, flags)
        .unwrap_err();

    assert!(matches!(err, Error::InvalidFlags(_)));
    assert_eq!(err.status(), ScriptVerifyStatus::InvalidFlags);
    assert!(err.is_precondition());
}

#[test]
fn invalid_combination_reported_before_missing_spent_outputs() {
    let verifier = counting_verifier();
    let tx = spending_tx(1);
    let flags = (ScriptFlags::WITNESS | ScriptFlags::TAPROOT).bits();

    let err = verifier
        .verify(&ScriptBuf::new(), Amount::ZERO, &tx, None, 0, flags)
        .unwrap_err();

    assert_eq!(err.status(), ScriptVerifyStatus::InvalidFlagsCombination);
}

#[test]
fn mismatch_reported_before_bad_input_index() {
    let verifier = counting_verifier();
    let tx = spending_tx(2);
    let spent_outputs = vec![op_true_output(1)];

    let err = verifier
        .verify(
            &ScriptBuf::new(),
            Amount::ZERO,
            &tx,
            Some(&spent_outputs),
            9,
            ScriptFlags::P2SH.bits(),
        )
        .unwrap_err();

    assert_eq!(err.status(), ScriptVerifyStatus::SpentOutputsMismatch);
}

#[test]
fn input_index_out_of_range() {
    let verifier = counting_verifier();
    let tx = spending_tx(2);

    let mut status = ScriptVerifyStatus::Ok;
    assert!(!verifier.verify_with_status(
        &ScriptBuf::new(),
        Amount::ZERO,
        &tx,
        None,
        2,
        ScriptFlags::P2SH.bits(),
        &mut status,
    ));
    assert_eq!(status, ScriptVerifyStatus::TxInputIndex);
    assert_eq!(calls(&verifier), 0);

    assert!(verifier.verify_with_status(
        &ScriptBuf::new(),
        Amount::ZERO,
        &tx,
        None,
        1,
        ScriptFlags::P2SH.bits(),
        &mut status,
    ));
    assert_eq!(status, ScriptVerifyStatus::Ok);
    assert_eq!(calls(&verifier), 1);
}

#[test]
fn precomputed_data_is_reused_across_inputs() {
    let verifier = counting_verifier();
    let tx = spending_tx(3);
    let spent_outputs = vec![op_true_output(10); 3];
    let flags = ScriptFlags::ALL.bits();

    let txdata = PrecomputedTransactionData::new(&tx, Some(&spent_outputs));

    for (index, spent) in spent_outputs.iter().enumerate() {
        verifier
            .verify_input(&txdata, &spent.script_pubkey, spent.value, index, flags)
            .unwrap();
    }

    assert_eq!(calls(&verifier), 3);
}

#[test]
fn test_basic_p2pk() {
    init_logger();

    // https://www.blockchain.com/explorer/transactions/btc/12b5633bad1f9c167d523ad1aa1947b2732a865bf5414eab2f9e5ae5d5c191ba
    let tx = "010000000173805864da01f15093f7837607ab8be7c3705e29a9d4a12c9116d709f8911e590100000049483045022052ffc1929a2d8bd365c6a2a4e3421711b4b1e1b8781698ca9075807b4227abcb0221009984107ddb9e3813782b095d0d84361ed4c76e5edaf6561d252ae162c2341cfb01ffffffff0200e1f50500000000434104baa9d36653155627c740b3409a734d4eaf5dcca9fb4f736622ee18efcf0aec2b758b2ec40db18fbae708f691edb2d4a2a3775eb413d16e2e3c0f8d4c69119fd1ac009ce4a60000000043410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac00000000";
    let tx: Transaction = deserialize(&hex::decode(tx).unwrap()).unwrap();

    let pubkey_data = "0411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3";
    let pubkey = PublicKey::from_slice(&hex::decode(pubkey_data).unwrap()).unwrap();
    let script_pubkey = ScriptBuf::new_p2pk(&pubkey);

    let verifier = ScriptVerifier::new(ConsensusEvaluator::new());

    // Amount is irrelevant for legacy spends.
    verifier
        .verify(
            &script_pubkey,
            Amount::from_sat(0),
            &tx,
            None,
            0,
            ScriptFlags::P2SH.bits(),
        )
        .expect("Verify p2pk");

    // Same signature checked against another key.
    let other_pubkey = "04baa9d36653155627c740b3409a734d4eaf5dcca9fb4f736622ee18efcf0aec2b758b2ec40db18fbae708f691edb2d4a2a3775eb413d16e2e3c0f8d4c69119fd1";
    let other_pubkey = PublicKey::from_slice(&hex::decode(other_pubkey).unwrap()).unwrap();

    let err = verifier
        .verify(
            &ScriptBuf::new_p2pk(&other_pubkey),
            Amount::from_sat(0),
            &tx,
            None,
            0,
            ScriptFlags::P2SH.bits(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Script(ScriptError::Consensus(_))));
    assert_eq!(err.status(), ScriptVerifyStatus::ScriptFailed);
}

struct TaprootFixture {
    tx: Transaction,
    spent_outputs: Vec<TxOut>,
    keypair: Keypair,
}

impl TaprootFixture {
    fn new() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[0x11; 32]).unwrap();
        let (xonly, _parity) = keypair.x_only_public_key();
        let script_pubkey =
            ScriptBuf::new_p2tr_tweaked(TweakedPublicKey::dangerous_assume_tweaked(xonly));

        let spent_outputs = vec![
            TxOut {
                value: Amount::from_sat(50_000),
                script_pubkey: script_pubkey.clone(),
            },
            TxOut {
                value: Amount::from_sat(20_000),
                script_pubkey,
            },
        ];

        Self {
            tx: spending_tx(2),
            spent_outputs,
            keypair,
        }
    }

    fn signature(&self, input_index: usize, prevouts: &[TxOut]) -> bitcoin::taproot::Signature {
        let secp = Secp256k1::new();
        let sighash = SighashCache::new(&self.tx)
            .taproot_key_spend_signature_hash(
                input_index,
                &Prevouts::All(prevouts),
                TapSighashType::Default,
            )
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        bitcoin::taproot::Signature {
            signature: secp.sign_schnorr_no_aux_rand(&msg, &self.keypair),
            sighash_type: TapSighashType::Default,
        }
    }

    fn sign_input(&mut self, input_index: usize) {
        let signature = self.signature(input_index, &self.spent_outputs);
        self.tx.input[input_index].witness = Witness::p2tr_key_spend(&signature);
    }

    fn verify(&self, input_index: usize) -> Result<(), Error> {
        let spent = &self.spent_outputs[input_index];
        ScriptVerifier::new(ConsensusEvaluator::new()).verify(
            &spent.script_pubkey,
            spent.value,
            &self.tx,
            Some(&self.spent_outputs),
            input_index,
            ScriptFlags::ALL.bits(),
        )
    }
}

#[test]
fn taproot_key_path_spend() {
    init_logger();

    let mut fixture = TaprootFixture::new();
    fixture.sign_input(0);
    fixture.sign_input(1);

    fixture.verify(0).expect("Verify taproot key path input 0");
    fixture.verify(1).expect("Verify taproot key path input 1");
}

#[test]
fn taproot_signature_commits_to_all_spent_outputs() {
    let mut fixture = TaprootFixture::new();

    // Sign with a different amount for the *other* input.
    let mut prevouts = fixture.spent_outputs.clone();
    prevouts[1].value = Amount::from_sat(20_001);
    let signature = fixture.signature(0, &prevouts);
    fixture.tx.input[0].witness = Witness::p2tr_key_spend(&signature);

    let err = fixture.verify(0).unwrap_err();
    assert!(matches!(err, Error::Script(ScriptError::SchnorrSig)));
}

#[test]
fn taproot_explicit_default_sighash_is_rejected() {
    let mut fixture = TaprootFixture::new();
    let signature = fixture.signature(0, &fixture.spent_outputs);

    let mut sig = signature.signature.serialize().to_vec();
    sig.push(0x00);
    fixture.tx.input[0].witness = Witness::from_slice(&[sig]);

    let err = fixture.verify(0).unwrap_err();
    assert!(matches!(err, Error::Script(ScriptError::SchnorrSigHashType)));
}

#[test]
fn taproot_script_path_fails_closed() {
    let mut fixture = TaprootFixture::new();
    fixture.tx.input[0].witness = Witness::from_slice(&[vec![0x51], vec![0xc0; 33]]);

    let err = fixture.verify(0).unwrap_err();
    assert!(matches!(
        err,
        Error::Script(ScriptError::TapscriptUnsupported)
    ));
}

#[test]
fn taproot_empty_witness_fails() {
    let fixture = TaprootFixture::new();

    let err = fixture.verify(0).unwrap_err();
    assert!(matches!(
        err,
        Error::Script(ScriptError::WitnessProgramWitnessEmpty)
    ));
}

#[test]
fn missing_spent_outputs_fail_evaluation() {
    let mut fixture = TaprootFixture::new();
    fixture.sign_input(0);

    let txdata = PrecomputedTransactionData::new(&fixture.tx, None);
    let spent = &fixture.spent_outputs[0];

    let ctx = ScriptContext {
        script_pubkey: &spent.script_pubkey,
        amount: spent.value,
        input_index: 0,
        flags: ScriptFlags::ALL,
        txdata: &txdata,
    };

    assert!(matches!(
        ConsensusEvaluator::new().evaluate(&ctx),
        Err(ScriptError::MissingSpentOutputs)
    ));
}

#[test]
fn taproot_signature_hash_matches_sighash_cache() {
    let fixture = TaprootFixture::new();

    let mut tx = fixture.tx.clone();
    tx.lock_time = LockTime::from_consensus(500_001);
    tx.input[1].sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;
    tx.output.push(op_true_output(2_000));

    let txdata = PrecomputedTransactionData::new(&tx, Some(&fixture.spent_outputs));
    let annex = [0x50, 0x01, 0x02];

    let sighash_types = [
        TapSighashType::Default,
        TapSighashType::All,
        TapSighashType::None,
        TapSighashType::Single,
        TapSighashType::AllPlusAnyoneCanPay,
        TapSighashType::NonePlusAnyoneCanPay,
        TapSighashType::SinglePlusAnyoneCanPay,
    ];

    for sighash_type in sighash_types {
        for input_index in 0..2 {
            for annex in [None, Some(&annex[..])] {
                let expected = SighashCache::new(&tx)
                    .taproot_signature_hash(
                        input_index,
                        &Prevouts::All(&fixture.spent_outputs),
                        annex.map(|annex| Annex::new(annex).unwrap()),
                        None,
                        sighash_type,
                    )
                    .unwrap();

                let sighash = txdata
                    .taproot_signature_hash(input_index, annex, sighash_type)
                    .unwrap();

                assert_eq!(
                    sighash, expected,
                    "{sighash_type:?}, input: {input_index}, annex: {annex:?}"
                );
            }
        }
    }
}

#[test]
fn taproot_sighash_single_without_matching_output() {
    let fixture = TaprootFixture::new();
    let txdata = PrecomputedTransactionData::new(&fixture.tx, Some(&fixture.spent_outputs));

    // The transaction has a single output, the second input has nothing to commit to.
    assert!(txdata
        .taproot_signature_hash(0, None, TapSighashType::Single)
        .is_ok());
    assert!(matches!(
        txdata.taproot_signature_hash(1, None, TapSighashType::Single),
        Err(ScriptError::SchnorrSigHashType)
    ));
}

#[test]
fn taproot_midstates_require_taproot_spent_outputs() {
    let tx = spending_tx(2);
    let spent_outputs = vec![op_true_output(1_000), op_true_output(2_000)];
    let txdata = PrecomputedTransactionData::new(&tx, Some(&spent_outputs));

    assert!(matches!(
        txdata.taproot_signature_hash(0, None, TapSighashType::Default),
        Err(ScriptError::MissingSpentOutputs)
    ));
}
