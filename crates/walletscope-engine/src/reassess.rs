//! Re-derive an entity's belief from its evidence ledger.
//!
//! Collaborators append evidence; this is where the rows are folded into
//! the entity's `(identity, confidence)` via the per-source-max
//! aggregation rule. The fold never weakens an entity: the aggregate is
//! applied only when it meets or beats the current confidence.

use tracing::debug;
use walletscope_core::{
  aggregate::aggregate, entity::Address, store::GraphStore,
};

use crate::error::{Error, Result};

/// Aggregate the evidence for one address and update the entity when
/// the result is at least as well supported as the current state.
/// Returns `true` if the entity was updated.
pub async fn reassess_entity<S: GraphStore>(
  store: &S,
  address: &Address,
) -> Result<bool> {
  let rows = store.evidence_for(address).await.map_err(Error::store)?;
  let Some(assessment) = aggregate(&rows) else {
    return Ok(false);
  };

  let current = store
    .get_entity(address)
    .await
    .map_err(Error::store)?
    .map(|e| e.confidence)
    .unwrap_or(0.0);
  if assessment.confidence < current {
    return Ok(false);
  }
  // An aggregate with no identity claim cannot satisfy the
  // identity/confidence invariant path; only update when it names one.
  let Some(identity) = assessment.identity else {
    return Ok(false);
  };

  debug!(
    %address, identity = %identity,
    confidence = assessment.confidence, "entity reassessed"
  );
  store
    .set_identity(address, Some(identity), assessment.confidence)
    .await
    .map_err(Error::store)?;
  Ok(true)
}
