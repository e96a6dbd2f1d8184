//! Error type for `walletscope-engine`.

use thiserror::Error;

/// An error raised by an analysis pass. Evidentiary ambiguity is never
/// an error — conflicting signals resolve to explicit low-confidence
/// states — so the only failure modes here are backend failures and
/// invalid parameters rejected before a pass starts.
#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid engine parameter: {0}")]
  InvalidParams(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a backend error; used at every store call site.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
