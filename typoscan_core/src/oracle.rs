use crate::error::OracleError;
use serde::Serialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Context label used when an oracle does not name where an identifier came from.
pub const UNLABELLED_CONTEXT: &str = "-";

/// One identifier produced by an oracle, together with the label of the
/// derivation that produced it (typically a derivation path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedIdentifier {
    pub context: String,
    pub identifier: String,
}

impl DerivedIdentifier {
    pub fn new(context: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            identifier: identifier.into(),
        }
    }

    pub fn unlabelled(identifier: impl Into<String>) -> Self {
        Self::new(UNLABELLED_CONTEXT, identifier)
    }
}

/// A `DerivationOracle` turns one variant into the identifiers it derives to.
///
/// Implementations may depend on a base secret and derivation settings fixed
/// at construction, but must return the same identifiers every time they are
/// asked about the same variant. Derivation is assumed to be expensive and is
/// called concurrently from every worker, hence `Send + Sync`.
pub trait DerivationOracle: Send + Sync {
    /// Derives the identifiers for `variant`.
    ///
    /// # Returns
    /// - `Ok(ids)`: the identifiers, possibly none.
    /// - `Err(error)`: this variant could not be derived. Callers treat this
    ///   exactly like an empty result.
    fn derive(&self, variant: &str) -> Result<Vec<DerivedIdentifier>, OracleError>;
}

impl<F> DerivationOracle for F
where
    F: Fn(&str) -> Result<Vec<DerivedIdentifier>, OracleError> + Send + Sync,
{
    fn derive(&self, variant: &str) -> Result<Vec<DerivedIdentifier>, OracleError> {
        self(variant)
    }
}

/// Calls `oracle.derive(variant)`, converting a panic inside the oracle into
/// [`OracleError::Panicked`].
pub fn derive_guarded(
    oracle: &dyn DerivationOracle,
    variant: &str,
) -> Result<Vec<DerivedIdentifier>, OracleError> {
    match catch_unwind(AssertUnwindSafe(|| oracle.derive(variant))) {
        Ok(result) => result,
        Err(panic_payload) => Err(OracleError::Panicked(panic_message(panic_payload.as_ref()))),
    }
}

fn panic_message(panic_payload: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}
