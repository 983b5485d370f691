use bitcoin::OutPoint;
use std::fmt;

/// Classification of a block rejection, consumed by the peer scoring logic.
///
/// <https://github.com/bitcoin/bitcoin/blob/6f9db1ebcab4064065ccd787161bf2b87e03cc1f/src/consensus/validation.h#L72>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValidationResult {
    /// Invalid by consensus rules.
    Consensus,
    /// The block spends coins which are not known, neither in the chain state nor in
    /// the block itself.
    MissingInputs,
    /// The block data does not match its header, another copy may be valid.
    Mutated,
    /// The validation was requested with invalid parameters, the block itself has not
    /// been judged.
    Configuration,
    /// The script evaluator can not judge a spend of the block, e.g. a tapscript spend
    /// without an interpreter.
    Unsupported,
}

impl BlockValidationResult {
    /// Whether the peer relaying the block may be attributed with bad intent.
    pub fn is_possibly_malicious(&self) -> bool {
        matches!(self, Self::Consensus | Self::Mutated)
    }
}

impl fmt::Display for BlockValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consensus => write!(f, "consensus"),
            Self::MissingInputs => write!(f, "missing-inputs"),
            Self::Mutated => write!(f, "mutated"),
            Self::Configuration => write!(f, "configuration"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Input responsible for a block rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLocation {
    /// Index of the transaction in the block.
    pub tx_index: usize,
    /// Index of the input in the transaction.
    pub input_index: usize,
    /// Output spent by the input.
    pub outpoint: OutPoint,
}

/// Reason a block failed to connect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{result}: {reject_reason}, {debug_message}")]
pub struct BlockValidationError {
    pub result: BlockValidationResult,
    /// Short reject code, e.g. `bad-txns-inputs-missingorspent`.
    pub reject_reason: String,
    /// Human readable detail.
    pub debug_message: String,
    pub input: Option<InputLocation>,
}

impl BlockValidationError {
    pub(crate) fn new(
        result: BlockValidationResult,
        reject_reason: impl Into<String>,
        debug_message: impl Into<String>,
    ) -> Self {
        Self {
            result,
            reject_reason: reject_reason.into(),
            debug_message: debug_message.into(),
            input: None,
        }
    }

    pub(crate) fn consensus(
        reject_reason: impl Into<String>,
        debug_message: impl Into<String>,
    ) -> Self {
        Self::new(
            BlockValidationResult::Consensus,
            reject_reason,
            debug_message,
        )
    }

    pub(crate) fn with_input(mut self, input: InputLocation) -> Self {
        self.input = Some(input);
        self
    }

    pub fn is_possibly_malicious(&self) -> bool {
        self.result.is_possibly_malicious()
    }
}
