//! The propagated-label marker.
//!
//! Identities written by the propagator are suffixed so that consumers
//! and the conflict resolver can tell inherited labels from
//! independently-sourced ones. Applying the marker is idempotent, and
//! two labels that differ only by the marker count as the same identity
//! wherever conflicts are tallied.

/// Suffix appended to identities the propagator inherited from a
/// neighbour.
pub const PROPAGATED_MARKER: &str = " (associated)";

/// Identity assigned by cleanup check 1 when a propagated label
/// contradicts three or more independent neighbours.
pub const CONFLICTED_IDENTITY: &str = "conflicted";

/// Prefix of the identity assigned by cleanup check 2.
pub const UNVERIFIED_PREFIX: &str = "unverified (previously ";

/// Apply the propagated marker. Idempotent: an already-marked label is
/// returned unchanged, never double-suffixed.
pub fn mark_propagated(identity: &str) -> String {
  if identity.ends_with(PROPAGATED_MARKER) {
    identity.to_owned()
  } else {
    format!("{identity}{PROPAGATED_MARKER}")
  }
}

/// Whether a label carries the propagated marker.
pub fn is_propagated(identity: &str) -> bool {
  identity.ends_with(PROPAGATED_MARKER)
}

/// Strip the marker (repeatedly, in case legacy data stacked it) to get
/// the identity used for equality and conflict counting.
pub fn base_identity(identity: &str) -> &str {
  let mut base = identity;
  while let Some(stripped) = base.strip_suffix(PROPAGATED_MARKER) {
    base = stripped;
  }
  base
}

/// The demoted label written by cleanup check 2, preserving the previous
/// base identity for the audit trail.
pub fn demoted_identity(previous: &str) -> String {
  format!("{UNVERIFIED_PREFIX}{})", base_identity(previous))
}

/// Whether a label is a cleanup end-state (stripped or demoted). These
/// are terminal for the conflict resolver: re-running cleanup skips them.
pub fn is_cleanup_state(identity: &str) -> bool {
  identity == CONFLICTED_IDENTITY || identity.starts_with(UNVERIFIED_PREFIX)
}
