/*!
Ordered sets of disjoint half-open location ranges.
*/

use crate::util::position::Location;

/// An ordered set of disjoint half-open ranges over pattern locations.
///
/// This is the foundation of the modifier map: enabling a modifier over a
/// span inserts a range, disabling one subtracts, and later passes query
/// membership per location. Ranges are kept sorted, disjoint and
/// non-adjacent in a flat vector.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct LocationRanges {
    // Invariant: sorted by start, pairwise disjoint, no empty ranges and
    // no two ranges adjacent (they would have been coalesced).
    ranges: Vec<(Location, Location)>,
}

impl LocationRanges {
    pub(crate) fn new() -> LocationRanges {
        LocationRanges { ranges: Vec::new() }
    }

    /// Create a set holding the single range `lo..=hi`.
    pub(crate) fn range(lo: Location, hi: Location) -> LocationRanges {
        let mut set = LocationRanges::new();
        set.insert(lo, hi);
        set
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Insert the inclusive range `lo..=hi`, coalescing with any ranges it
    /// overlaps or abuts.
    pub(crate) fn insert(&mut self, lo: Location, hi: Location) {
        debug_assert!(lo <= hi);
        let (mut start, mut end) = (lo, hi + 1);
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for &(s, e) in self.ranges.iter() {
            if e < start || (end < s && placed) {
                out.push((s, e));
            } else if end < s {
                out.push((start, end));
                out.push((s, e));
                placed = true;
            } else {
                // Overlapping or adjacent: widen the pending range.
                start = start.min(s);
                end = end.max(e);
            }
        }
        if !placed {
            out.push((start, end));
            out.sort_unstable();
        }
        self.ranges = out;
    }

    /// Remove every location of `other` from this set.
    pub(crate) fn subtract(&mut self, other: &LocationRanges) {
        let mut out = Vec::with_capacity(self.ranges.len());
        for &(s, e) in self.ranges.iter() {
            let mut pieces = vec![(s, e)];
            for &(os, oe) in other.ranges.iter() {
                let mut next = Vec::with_capacity(pieces.len() + 1);
                for (ps, pe) in pieces {
                    if oe <= ps || pe <= os {
                        next.push((ps, pe));
                        continue;
                    }
                    if ps < os {
                        next.push((ps, os));
                    }
                    if oe < pe {
                        next.push((oe, pe));
                    }
                }
                pieces = next;
            }
            out.extend(pieces);
        }
        self.ranges = out;
    }

    /// Merge every range of `other` into this set.
    pub(crate) fn union(&mut self, other: &LocationRanges) {
        for &(s, e) in other.ranges.iter() {
            self.insert(s, e - 1);
        }
    }

    /// True when `loc` is covered by some range.
    pub(crate) fn contains(&self, loc: Location) -> bool {
        // Binary search over the sorted disjoint ranges.
        let idx = self.ranges.partition_point(|&(_, e)| e <= loc);
        match self.ranges.get(idx) {
            Some(&(s, _)) => s <= loc,
            None => false,
        }
    }

    /// Iterate the ranges as half-open `(start, end)` pairs.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Location, Location)> + '_ {
        self.ranges.iter().copied()
    }
}
