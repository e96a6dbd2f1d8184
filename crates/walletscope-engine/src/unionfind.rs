//! Disjoint-set forest over address indices.
//!
//! Addresses are mapped to indices into a flat parent array, so merge
//! and find are allocation-free. Path compression plus union by size
//! keeps operations effectively constant-time.

pub struct DisjointSet {
  parent: Vec<usize>,
  size:   Vec<usize>,
}

impl DisjointSet {
  pub fn new(n: usize) -> Self {
    Self { parent: (0..n).collect(), size: vec![1; n] }
  }

  /// Root of the component containing `x`, compressing the path walked.
  pub fn find(&mut self, x: usize) -> usize {
    let mut root = x;
    while self.parent[root] != root {
      root = self.parent[root];
    }
    // Second walk: point everything on the path at the root.
    let mut cur = x;
    while self.parent[cur] != root {
      let next = self.parent[cur];
      self.parent[cur] = root;
      cur = next;
    }
    root
  }

  /// Merge the components of `a` and `b`; returns the surviving root.
  /// A no-op (returning the shared root) when already joined.
  pub fn union(&mut self, a: usize, b: usize) -> usize {
    let ra = self.find(a);
    let rb = self.find(b);
    if ra == rb {
      return ra;
    }
    // Attach the smaller tree under the larger.
    let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
    self.parent[small] = big;
    self.size[big] += self.size[small];
    big
  }

  /// Members in the component containing `x`.
  pub fn size_of(&mut self, x: usize) -> usize {
    let root = self.find(x);
    self.size[root]
  }

  pub fn same_set(&mut self, a: usize, b: usize) -> bool {
    self.find(a) == self.find(b)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn singletons_start_separate() {
    let mut ds = DisjointSet::new(4);
    assert!(!ds.same_set(0, 1));
    assert_eq!(ds.size_of(2), 1);
  }

  #[test]
  fn union_is_transitive() {
    let mut ds = DisjointSet::new(5);
    ds.union(0, 1);
    ds.union(1, 2);
    assert!(ds.same_set(0, 2));
    assert_eq!(ds.size_of(0), 3);
    assert!(!ds.same_set(0, 3));
  }

  #[test]
  fn union_by_size_tracks_membership() {
    let mut ds = DisjointSet::new(6);
    ds.union(0, 1);
    ds.union(2, 3);
    ds.union(4, 5);
    ds.union(0, 2);
    assert_eq!(ds.size_of(3), 4);
    assert_eq!(ds.size_of(4), 2);
  }

  #[test]
  fn repeated_union_is_stable() {
    let mut ds = DisjointSet::new(3);
    let r1 = ds.union(0, 1);
    let r2 = ds.union(0, 1);
    assert_eq!(r1, r2);
    assert_eq!(ds.size_of(0), 2);
  }
}
