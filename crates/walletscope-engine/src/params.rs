//! Tunable thresholds for the analysis passes.
//!
//! Defaults match the values the passes were calibrated against; a TOML
//! config file can override any of them (the CLI deserialises this
//! struct directly).

use serde::Deserialize;
use walletscope_core::entity::Address;

use crate::error::{Error, Result};

/// Well-known shared infrastructure on Ethereum mainnet. Nearly every
/// address interacts with these, so they must never contribute a
/// common-funder or common-target signal.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
  // Uniswap V2 router
  "0x7a250d5630b4cf539739df2c5dacb4c659f2488d",
  // Uniswap V3 router
  "0xe592427a0aece92de3edee1f18e0157c05861564",
  // Uniswap universal router
  "0x3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad",
  // 1inch v5 aggregation router
  "0x1111111254eeb25477b68fb85ed929f73a960582",
  // 0x exchange proxy
  "0xdef1c0ded9bec7f1a1670819833240f027b25eff",
  // OpenSea Seaport 1.5
  "0x00000000000000adc04c56bf30ac9d3c0aaf14dc",
  // WETH
  "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
];

/// Thresholds for clustering, propagation, and cleanup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineParams {
  /// Two transfers from one funder within this window count as a
  /// shared-funding signal.
  pub funding_window_secs: i64,

  /// Hard cap on cluster membership; merges past it are rejected, not
  /// truncated.
  pub max_cluster_size: usize,

  /// Membership at which the evidentiary bar for admitting one more
  /// member rises.
  pub large_cluster_threshold: usize,

  /// Independent corroborating links required to join a large cluster.
  pub required_corroboration: usize,

  /// Candidate confidence below which propagation stops.
  pub propagation_floor: f64,

  /// Minimum edge confidence for a neighbour to count as a conflict
  /// witness during cleanup.
  pub conflict_edge_min_confidence: f64,

  /// Minimum confidence for a stored `shared_deposits` edge to seed a
  /// merge candidate.
  pub shared_deposit_min_confidence: f64,

  /// Shared-infrastructure addresses that never contribute ownership
  /// signals.
  pub exclusions: Vec<Address>,
}

impl Default for EngineParams {
  fn default() -> Self {
    Self {
      funding_window_secs: 6 * 60 * 60,
      max_cluster_size: 50,
      large_cluster_threshold: 20,
      required_corroboration: 3,
      propagation_floor: 0.20,
      conflict_edge_min_confidence: 0.5,
      shared_deposit_min_confidence: 0.5,
      exclusions: DEFAULT_EXCLUSIONS
        .iter()
        .map(|s| Address::parse(s).expect("default exclusion is canonical"))
        .collect(),
    }
  }
}

impl EngineParams {
  /// Reject configurations no pass can run with.
  pub fn validate(&self) -> Result<()> {
    if self.funding_window_secs <= 0 {
      return Err(Error::InvalidParams(
        "funding_window_secs must be positive".into(),
      ));
    }
    if self.max_cluster_size < 2 {
      return Err(Error::InvalidParams(
        "max_cluster_size must be at least 2".into(),
      ));
    }
    if !(0.0..=1.0).contains(&self.propagation_floor) {
      return Err(Error::InvalidParams(
        "propagation_floor must be in [0, 1]".into(),
      ));
    }
    if self.required_corroboration == 0 {
      return Err(Error::InvalidParams(
        "required_corroboration must be at least 1".into(),
      ));
    }
    Ok(())
  }

  pub fn is_excluded(&self, address: &Address) -> bool {
    self.exclusions.contains(address)
  }
}
