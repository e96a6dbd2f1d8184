//! Error types for `walletscope-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed address: {0:?}")]
  MalformedAddress(String),

  #[error("confidence {0} outside [0.0, 1.0]")]
  ConfidenceOutOfRange(f64),

  #[error("identity {0:?} requires a confidence greater than zero")]
  UnsupportedIdentity(String),

  #[error("unknown discriminant for {kind}: {value:?}")]
  UnknownDiscriminant { kind: &'static str, value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
