// SPDX-License-Identifier: Apache-2.0

//! Identifier set algebra
//!
//! Pure set operations over entity identifier sets, with two performance
//! layers on top: an adaptive sequential/parallel strategy keyed on set
//! size, and a bounded cache for repeated intersections.
//!
//! The cache is keyed by the *identity* of the two input `Arc`s, not their
//! contents. Two freshly built sets with equal elements are not guaranteed
//! to hit the same entry; only literal reuse of the same set objects is
//! accelerated (for example repeated joins against the per-schema identifier
//! sets held for the duration of one execution). Callers must never rely on
//! the cache for correctness.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::types::Identifier;

/// A set of entity identifiers
pub type IdSet = std::collections::HashSet<Identifier>;

/// Sets at or above this size use a parallel scan-and-filter
pub const PARALLEL_THRESHOLD: usize = 10_000;

/// Upper bound on cached intersection results
const CACHE_MAX_ENTRIES: usize = 1_024;

/// Cache key: the two input sets' pointer addresses, normalized so that
/// `(a, b)` and `(b, a)` collapse to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PairKey(usize, usize);

impl PairKey {
    fn new(a: &Arc<IdSet>, b: &Arc<IdSet>) -> Self {
        let pa = Arc::as_ptr(a) as usize;
        let pb = Arc::as_ptr(b) as usize;
        if pa <= pb {
            Self(pa, pb)
        } else {
            Self(pb, pa)
        }
    }
}

/// Stateless set operations plus the shared intersection cache.
///
/// One instance is shared process-wide across all executions; reads and
/// writes may interleave with eviction and no entry is guaranteed to
/// survive.
pub struct SetAlgebra {
    cache: DashMap<PairKey, Arc<IdSet>>,
    max_entries: usize,
}

impl Default for SetAlgebra {
    fn default() -> Self {
        Self::new()
    }
}

impl SetAlgebra {
    pub fn new() -> Self {
        Self::with_max_entries(CACHE_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            max_entries,
        }
    }

    /// Elements present in both sets.
    ///
    /// Iterates the smaller set against membership tests on the larger.
    /// Either input empty short-circuits to an empty result with no cache
    /// lookup.
    pub fn intersect(&self, a: &Arc<IdSet>, b: &Arc<IdSet>) -> Arc<IdSet> {
        if a.is_empty() || b.is_empty() {
            return Arc::new(IdSet::new());
        }

        let key = PairKey::new(a, b);
        if let Some(hit) = self.cache.get(&key) {
            return Arc::clone(&hit);
        }

        let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        let result: IdSet = if small.len() >= PARALLEL_THRESHOLD {
            small
                .par_iter()
                .filter(|id| large.contains(*id))
                .copied()
                .collect()
        } else {
            small
                .iter()
                .filter(|id| large.contains(*id))
                .copied()
                .collect()
        };
        let result = Arc::new(result);

        self.evict_if_full();
        self.cache.insert(key, Arc::clone(&result));
        result
    }

    /// Intersection of many sets.
    ///
    /// Empty inputs are dropped first. Zero survivors give an empty result,
    /// a single survivor is returned as-is, otherwise the sets are folded
    /// smallest-first and the fold short-circuits as soon as an intermediate
    /// result is empty. Input order never affects the result, only the work
    /// done.
    pub fn intersect_all(&self, sets: &[Arc<IdSet>]) -> Arc<IdSet> {
        let mut live: Vec<&Arc<IdSet>> = sets.iter().filter(|s| !s.is_empty()).collect();
        match live.len() {
            0 => return Arc::new(IdSet::new()),
            1 => return Arc::clone(live[0]),
            _ => {}
        }
        live.sort_by_key(|s| s.len());

        let mut acc = Arc::clone(live[0]);
        for set in &live[1..] {
            acc = self.intersect(&acc, set);
            if acc.is_empty() {
                return Arc::new(IdSet::new());
            }
        }
        acc
    }

    /// Elements present in either set
    pub fn union(&self, a: &Arc<IdSet>, b: &Arc<IdSet>) -> Arc<IdSet> {
        let mut result = IdSet::with_capacity(a.len() + b.len());
        result.extend(a.iter().copied());
        result.extend(b.iter().copied());
        Arc::new(result)
    }

    /// Union of many sets, pre-sized to the sum of input sizes
    pub fn union_all(&self, sets: &[Arc<IdSet>]) -> Arc<IdSet> {
        let capacity = sets.iter().map(|s| s.len()).sum();
        let mut result = IdSet::with_capacity(capacity);
        for set in sets {
            result.extend(set.iter().copied());
        }
        Arc::new(result)
    }

    /// Elements in `a` that are not in `b`
    pub fn difference(&self, a: &Arc<IdSet>, b: &Arc<IdSet>) -> Arc<IdSet> {
        Arc::new(a.iter().filter(|id| !b.contains(*id)).copied().collect())
    }

    /// Elements in exactly one of the two sets, defined as
    /// `difference(union(a, b), intersect(a, b))`
    pub fn symmetric_difference(&self, a: &Arc<IdSet>, b: &Arc<IdSet>) -> Arc<IdSet> {
        let union = self.union(a, b);
        let intersection = self.intersect(a, b);
        self.difference(&union, &intersection)
    }

    /// Filters the identifier set once per named predicate.
    ///
    /// Buckets are independent, not mutually exclusive: overlapping
    /// predicates place the same identifier in multiple buckets.
    pub fn partition(
        &self,
        ids: &IdSet,
        predicates: &HashMap<String, Box<dyn Fn(&Identifier) -> bool + Send + Sync>>,
    ) -> HashMap<String, IdSet> {
        predicates
            .iter()
            .map(|(name, pred)| {
                let bucket: IdSet = ids.iter().filter(|id| pred(id)).copied().collect();
                (name.clone(), bucket)
            })
            .collect()
    }

    /// True iff the two sets share no element; scans the smaller set and
    /// stops at the first common element.
    pub fn are_disjoint(&self, a: &IdSet, b: &IdSet) -> bool {
        let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        !small.iter().any(|id| large.contains(id))
    }

    /// Number of cached intersection results
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// When the cache is full, drops an arbitrary ~10% of entries. No LRU
    /// ordering; a coarse bound is all the contract promises.
    fn evict_if_full(&self) {
        if self.cache.len() < self.max_entries {
            return;
        }
        let victims: Vec<PairKey> = self
            .cache
            .iter()
            .take((self.max_entries / 10).max(1))
            .map(|entry| *entry.key())
            .collect();
        for key in victims {
            self.cache.remove(&key);
        }
    }
}
