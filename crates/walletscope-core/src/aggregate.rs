//! Evidence aggregation — many sourced claims in, one belief out.
//!
//! The rule that matters: within each source only the single strongest
//! claim counts. A verified exchange label must not be diluted by fifty
//! weak behavioural-similarity rows, so sources are combined by a
//! reliability-weighted average over the per-source *maxima*, never over
//! raw item counts. Ties between disagreeing sources break by source
//! reliability order, not recency.

use std::collections::BTreeMap;

use crate::{
  evidence::{Evidence, EvidenceSource},
  label::base_identity,
};

/// Aggregate output confidence is capped below 1.0 to reflect
/// irreducible uncertainty.
pub const CONFIDENCE_CAP: f64 = 0.95;

/// The aggregated belief for one address.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
  /// The winning identity claim, if any row proposed one.
  pub identity:   Option<String>,
  /// Reliability-weighted confidence over per-source maxima, capped.
  pub confidence: f64,
}

/// Reduce the evidence rows for one address to a single assessment.
/// Returns `None` when there are no rows.
pub fn aggregate(rows: &[Evidence]) -> Option<Assessment> {
  if rows.is_empty() {
    return None;
  }

  // Per-source maximum. BTreeMap keys iterate in declared source order,
  // which is descending reliability: the tie-break falls out of the walk.
  let mut best: BTreeMap<EvidenceSource, &Evidence> = BTreeMap::new();
  for row in rows {
    best
      .entry(row.source)
      .and_modify(|current| {
        if row.confidence > current.confidence {
          *current = row;
        }
      })
      .or_insert(row);
  }

  let mut weighted_sum = 0.0;
  let mut weight_sum = 0.0;
  let mut identity: Option<&Evidence> = None;

  for (source, row) in &best {
    let weight = source.weight();
    weighted_sum += weight * row.confidence;
    weight_sum += weight;

    if row.claim.is_empty() {
      continue;
    }
    let better = match identity {
      None => true,
      Some(current) => {
        // Same identity never displaces the earlier (more reliable)
        // source; a disagreeing one only wins on strictly higher weight,
        // which the ordered walk already rules out.
        base_identity(&row.claim) != base_identity(&current.claim)
          && weight > current.source.weight()
      }
    };
    if better {
      identity = Some(row);
    }
  }

  let confidence = (weighted_sum / weight_sum).min(CONFIDENCE_CAP);

  Some(Assessment {
    identity: identity.map(|row| row.claim.clone()),
    confidence,
  })
}
