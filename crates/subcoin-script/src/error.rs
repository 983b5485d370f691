/// Status code reported by [`crate::ScriptVerifier::verify_with_status`].
///
/// The numeric values are stable so the status can be passed across a library boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ScriptVerifyStatus {
    #[default]
    Ok = 0,
    /// The input index is out of range of the inputs of the transaction.
    TxInputIndex = 1,
    /// The flag bitfield contains bits outside of the supported set.
    InvalidFlags = 2,
    /// The flags were combined in an invalid way.
    InvalidFlagsCombination = 3,
    /// The taproot flag was set, so the spent outputs have to be provided.
    SpentOutputsRequired = 4,
    /// The number of spent outputs does not match the number of inputs of the transaction.
    SpentOutputsMismatch = 5,
    /// Script evaluation failed.
    ScriptFailed = 6,
}

/// Script verification error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Script flags contain unknown bits: {0:#x}")]
    InvalidFlags(u32),
    #[error("Invalid script flags combination: {0:#x}")]
    InvalidFlagsCombination(u32),
    #[error("Spent outputs are required when taproot verification is enabled")]
    SpentOutputsRequired,
    #[error("Spent outputs count mismatch, expected: {expected}, got: {got}")]
    SpentOutputsMismatch { expected: usize, got: usize },
    #[error("Input index {index} out of range, transaction has {inputs} inputs")]
    TxInputIndex { index: usize, inputs: usize },
    #[error("Script evaluation failed: {0}")]
    Script(#[from] ScriptError),
}

impl Error {
    /// Returns the status code representing this error.
    pub fn status(&self) -> ScriptVerifyStatus {
        match self {
            Self::InvalidFlags(_) => ScriptVerifyStatus::InvalidFlags,
            Self::InvalidFlagsCombination(_) => ScriptVerifyStatus::InvalidFlagsCombination,
            Self::SpentOutputsRequired => ScriptVerifyStatus::SpentOutputsRequired,
            Self::SpentOutputsMismatch { .. } => ScriptVerifyStatus::SpentOutputsMismatch,
            Self::TxInputIndex { .. } => ScriptVerifyStatus::TxInputIndex,
            Self::Script(_) => ScriptVerifyStatus::ScriptFailed,
        }
    }

    /// Whether the error was raised before any script was evaluated.
    ///
    /// These errors depend only on the arguments of the call, not on the transaction data.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::Script(_))
    }

    /// Whether the evaluator could not judge the spend, see [`ScriptError::is_unsupported`].
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Script(err) if err.is_unsupported())
    }
}

/// Error produced while evaluating the scripts of a single input.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("libbitcoinconsensus: {0:?}")]
    Consensus(bitcoinconsensus::Error),
    #[error("Spent outputs are not available to compute the signature hash")]
    MissingSpentOutputs,
    #[error("Witness requires empty scriptSig")]
    WitnessMalleated,
    #[error("Witness program was passed an empty witness")]
    WitnessProgramWitnessEmpty,
    #[error("Invalid taproot output key")]
    InvalidOutputKey,
    #[error("Invalid schnorr signature size: {0}")]
    SchnorrSigSize(usize),
    #[error("Invalid schnorr signature hash type")]
    SchnorrSigHashType,
    #[error("Schnorr signature verification failed")]
    SchnorrSig,
    #[error("Tapscript spends require a script interpreter")]
    TapscriptUnsupported,
}

impl ScriptError {
    /// Whether the evaluator could not judge the spend, as opposed to finding it invalid.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::TapscriptUnsupported)
    }
}
