//! Sets of 64-bit integers represented as sorted interval lists.
//!
//! [`LongSet`] backs two things: the state sets produced by the symbolic
//! evaluator (`state in {1, 3..7}`) and the case labels of switch sections.
//! Both can be huge (`state != 5` covers almost the whole number line), so
//! members are stored as maximal inclusive intervals rather than enumerated.
//!
//! # Normal Form
//!
//! The interval list is always sorted by start, and no two intervals overlap or
//! touch. Two sets with the same members therefore compare equal with `==`.
//!
//! # Arithmetic
//!
//! [`LongSet::add_offset`] shifts all members with two's-complement wraparound,
//! mirroring how `state - c` behaves at runtime.

use std::fmt;

/// An inclusive range `start..=end` of `i64` values.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LongInterval {
    /// First member of the interval.
    pub start: i64,
    /// Last member of the interval.
    pub end: i64,
}

impl LongInterval {
    /// Creates the interval `start..=end`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `start > end`.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(start <= end, "interval start after end");
        LongInterval { start, end }
    }

    /// Returns `true` if `value` lies inside the interval.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.start <= value && value <= self.end
    }

    /// Number of members; `u128` because the full range has `2^64` of them.
    #[must_use]
    pub fn count(&self) -> u128 {
        (i128::from(self.end) - i128::from(self.start) + 1) as u128
    }
}

impl fmt::Debug for LongInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..={}", self.start, self.end)
        }
    }
}

/// A set of `i64` values in interval normal form.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct LongSet {
    intervals: Vec<LongInterval>,
}

impl LongSet {
    /// The empty set.
    #[must_use]
    pub fn empty() -> Self {
        LongSet::default()
    }

    /// The set of all `i64` values.
    #[must_use]
    pub fn universe() -> Self {
        LongSet {
            intervals: vec![LongInterval::new(i64::MIN, i64::MAX)],
        }
    }

    /// The set `{value}`.
    #[must_use]
    pub fn single(value: i64) -> Self {
        LongSet {
            intervals: vec![LongInterval::new(value, value)],
        }
    }

    /// The set `start..=end`, empty if `start > end`.
    #[must_use]
    pub fn range(start: i64, end: i64) -> Self {
        if start > end {
            return LongSet::empty();
        }
        LongSet {
            intervals: vec![LongInterval::new(start, end)],
        }
    }

    /// Builds a set from arbitrary (possibly overlapping) intervals.
    #[must_use]
    pub fn from_intervals(intervals: impl IntoIterator<Item = LongInterval>) -> Self {
        let mut intervals: Vec<LongInterval> = intervals.into_iter().collect();
        intervals.sort_by_key(|iv| iv.start);

        let mut merged: Vec<LongInterval> = Vec::with_capacity(intervals.len());
        for iv in intervals {
            match merged.last_mut() {
                Some(last) if last.end == i64::MAX || iv.start <= last.end + 1 => {
                    last.end = last.end.max(iv.end);
                }
                _ => merged.push(iv),
            }
        }
        LongSet { intervals: merged }
    }

    /// Builds a set from individual values.
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = i64>) -> Self {
        Self::from_intervals(values.into_iter().map(|v| LongInterval::new(v, v)))
    }

    /// The intervals of the normal form.
    #[must_use]
    pub fn intervals(&self) -> &[LongInterval] {
        &self.intervals
    }

    /// Returns `true` if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Returns `true` if the set contains every `i64`.
    #[must_use]
    pub fn is_universe(&self) -> bool {
        self.intervals.len() == 1
            && self.intervals[0].start == i64::MIN
            && self.intervals[0].end == i64::MAX
    }

    /// Returns `true` if `value` is a member.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        // Intervals are sorted, so a binary search on the start finds the candidate.
        let idx = self.intervals.partition_point(|iv| iv.start <= value);
        idx > 0 && self.intervals[idx - 1].contains(value)
    }

    /// Number of members.
    #[must_use]
    pub fn count(&self) -> u128 {
        self.intervals.iter().map(LongInterval::count).sum()
    }

    /// Returns the only member if the set has exactly one.
    #[must_use]
    pub fn single_value(&self) -> Option<i64> {
        match self.intervals.as_slice() {
            [iv] if iv.start == iv.end => Some(iv.start),
            _ => None,
        }
    }

    /// Iterates the members in ascending order.
    ///
    /// Only practical for small sets; callers should check [`LongSet::count`] first.
    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        self.intervals.iter().flat_map(|iv| iv.start..=iv.end)
    }

    /// The complement with respect to all `i64` values.
    #[must_use]
    pub fn invert(&self) -> LongSet {
        let mut result = Vec::with_capacity(self.intervals.len() + 1);
        let mut gap_start = Some(i64::MIN);
        for iv in &self.intervals {
            if let Some(start) = gap_start {
                if iv.start > start {
                    result.push(LongInterval::new(start, iv.start - 1));
                }
            }
            gap_start = iv.end.checked_add(1);
        }
        if let Some(start) = gap_start {
            result.push(LongInterval::new(start, i64::MAX));
        }
        LongSet { intervals: result }
    }

    /// Members present in either set.
    #[must_use]
    pub fn union(&self, other: &LongSet) -> LongSet {
        Self::from_intervals(self.intervals.iter().chain(&other.intervals).copied())
    }

    /// Members present in both sets.
    #[must_use]
    pub fn intersect(&self, other: &LongSet) -> LongSet {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let a = self.intervals[i];
            let b = other.intervals[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start <= end {
                result.push(LongInterval::new(start, end));
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        LongSet { intervals: result }
    }

    /// Members of `self` that are not in `other`.
    #[must_use]
    pub fn except(&self, other: &LongSet) -> LongSet {
        self.intersect(&other.invert())
    }

    /// Shifts every member by `offset`, wrapping around on overflow.
    #[must_use]
    pub fn add_offset(&self, offset: i64) -> LongSet {
        if offset == 0 || self.is_universe() {
            return self.clone();
        }
        let mut shifted = Vec::with_capacity(self.intervals.len() + 1);
        for iv in &self.intervals {
            let start = iv.start.wrapping_add(offset);
            let end = iv.end.wrapping_add(offset);
            if start <= end {
                shifted.push(LongInterval::new(start, end));
            } else {
                shifted.push(LongInterval::new(start, i64::MAX));
                shifted.push(LongInterval::new(i64::MIN, end));
            }
        }
        Self::from_intervals(shifted)
    }
}

impl fmt::Debug for LongSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(&self.intervals).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_form_merges_adjacent() {
        let set = LongSet::from_values([3, 1, 2, 7]);
        assert_eq!(
            set.intervals(),
            &[LongInterval::new(1, 3), LongInterval::new(7, 7)]
        );
        assert_eq!(set.count(), 4);
    }

    #[test]
    fn test_invert() {
        let set = LongSet::single(5);
        let inv = set.invert();
        assert!(!inv.contains(5));
        assert!(inv.contains(4));
        assert!(inv.contains(i64::MIN));
        assert!(inv.contains(i64::MAX));
        assert_eq!(inv.invert(), set);
        assert!(LongSet::empty().invert().is_universe());
        assert!(LongSet::universe().invert().is_empty());
    }

    #[test]
    fn test_intersect_and_except() {
        let a = LongSet::range(0, 10);
        let b = LongSet::from_values([5, 20]);
        assert_eq!(a.intersect(&b), LongSet::single(5));
        let rest = a.except(&b);
        assert!(!rest.contains(5));
        assert!(rest.contains(4) && rest.contains(6));
        assert_eq!(rest.count(), 10);
    }

    #[test]
    fn test_add_offset_wraps() {
        let set = LongSet::range(i64::MIN, -10);
        let shifted = set.add_offset(-1);
        assert!(shifted.contains(i64::MAX));
        assert!(shifted.contains(-11));
        assert!(!shifted.contains(-10));
        assert_eq!(shifted.count(), set.count());
    }

    #[test]
    fn test_single_value() {
        assert_eq!(LongSet::single(3).add_offset(2).single_value(), Some(5));
        assert_eq!(LongSet::range(1, 2).single_value(), None);
    }
}
