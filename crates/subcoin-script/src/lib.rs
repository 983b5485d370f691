//! Bitcoin script verification.
//!
//! [`ScriptVerifier`] decides whether one input of a transaction is authorized to spend the
//! output it references under a set of consensus [`ScriptFlags`]. The arguments are checked
//! before any script is evaluated, each violation is reported with a distinct
//! [`ScriptVerifyStatus`]. The script evaluation itself is performed by a
//! [`ScriptEvaluator`], [`ConsensusEvaluator`] being the default one.

mod error;
mod evaluator;
mod flags;
mod verify;

#[cfg(test)]
mod tests;

pub use error::{Error, ScriptError, ScriptVerifyStatus};
pub use evaluator::{
    ConsensusEvaluator, PrecomputedTransactionData, ScriptContext, ScriptEvaluator,
};
pub use flags::ScriptFlags;
pub use verify::ScriptVerifier;
