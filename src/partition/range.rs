use crate::ids::{PartitionId, TitId};
use crate::store::{LockId, RowKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comma-separated composite index. Components compare as strings, left to right, and a shorter
/// index that is a prefix of a longer one sorts first. The empty index is the minimum.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeIndex(Vec<String>);

impl CompositeIndex {
    pub fn parse(index: &str) -> Self {
        if index.is_empty() {
            return CompositeIndex::default();
        }
        CompositeIndex(index.split(',').map(str::to_string).collect())
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_min(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CompositeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(","))
    }
}

/// One bound of a range: the partition index, then the cluster index within it.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
pub struct RangeBound {
    pub partition_index: CompositeIndex,
    pub cluster_index: CompositeIndex,
}

impl RangeBound {
    pub fn new(partition_index: &str, cluster_index: &str) -> Self {
        RangeBound {
            partition_index: CompositeIndex::parse(partition_index),
            cluster_index: CompositeIndex::parse(cluster_index),
        }
    }

    pub fn min() -> Self {
        RangeBound::default()
    }

    /// Bound at `key`: its first component is the partition index and the rest the cluster index.
    /// NULL components sort as empty strings.
    pub fn from_key(key: &RowKey) -> Self {
        let mut components = key.components().into_iter().map(Option::unwrap_or_default);
        let partition_index = components.next().map(|c| vec![c]).unwrap_or_default();
        RangeBound {
            partition_index: CompositeIndex(partition_index),
            cluster_index: CompositeIndex(components.collect()),
        }
    }
}

/// Half-open key range `[lower, upper)` owned by one partition. `upper == None` is unbounded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Range {
    pub partition_id: PartitionId,
    pub lower: RangeBound,
    pub upper: Option<RangeBound>,
    /// TIT row this range was last synchronized to.
    pub tit_index: Option<TitId>,
    // Never persisted.
    #[serde(skip)]
    pub lock_id: Option<LockId>,
}

impl Range {
    pub fn new(partition_id: PartitionId, lower: RangeBound, upper: Option<RangeBound>) -> Self {
        Range {
            partition_id,
            lower,
            upper,
            tit_index: None,
            lock_id: None,
        }
    }

    pub fn whole_table(partition_id: PartitionId) -> Self {
        Range::new(partition_id, RangeBound::min(), None)
    }

    /// False for empty or inverted ranges.
    pub fn is_valid(&self) -> bool {
        match &self.upper {
            None => true,
            Some(upper) => self.lower < *upper,
        }
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        Self::below(&self.lower, &other.upper) && Self::below(&other.lower, &self.upper)
    }

    /// Same key span, ignoring partition, TIT and lock.
    pub fn same_bounds(&self, other: &Range) -> bool {
        self.lower == other.lower && self.upper == other.upper
    }

    pub fn contains(&self, bound: &RangeBound) -> bool {
        self.lower <= *bound && Self::below(bound, &self.upper)
    }

    fn below(bound: &RangeBound, upper: &Option<RangeBound>) -> bool {
        match upper {
            None => true,
            Some(upper) => bound.cmp(upper) == Ordering::Less,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn range(lower: &str, upper: Option<&str>) -> Range {
        Range::new(
            PartitionId::new("p"),
            RangeBound::new(lower, ""),
            upper.map(|u| RangeBound::new(u, "")),
        )
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        assert!(!range("a", Some("m")).overlaps(&range("m", None)));
        assert!(range("a", Some("n")).overlaps(&range("m", None)));
    }

    #[test]
    fn inverted_and_empty_ranges_are_invalid() {
        assert!(!range("m", Some("a")).is_valid());
        assert!(!range("m", Some("m")).is_valid());
        assert!(range("", None).is_valid());
    }

    #[test]
    fn composite_components_compare_left_to_right() {
        assert!(CompositeIndex::parse("a,z") < CompositeIndex::parse("b,a"));
        assert!(CompositeIndex::parse("a") < CompositeIndex::parse("a,a"));
        assert!(CompositeIndex::parse("").is_min());
    }

    #[test]
    fn unbounded_range_contains_everything_above_lower() {
        let r = range("k", None);
        assert!(r.contains(&RangeBound::new("zzz", "")));
        assert!(!r.contains(&RangeBound::new("a", "")));
    }

    #[test]
    fn key_bound_splits_partition_and_cluster_components() {
        let key = RowKey::from_values(&[Some("eu".to_string()), Some("7".to_string()), None]);
        let bound = RangeBound::from_key(&key);
        assert_eq!(bound.partition_index, CompositeIndex::parse("eu"));
        assert_eq!(bound.cluster_index.components(), &["7".to_string(), String::new()][..]);
        assert_eq!(RangeBound::from_key(&RowKey::new("k")), RangeBound::new("k", ""));
    }

    proptest! {
        #[test]
        fn overlap_iff_some_point_is_in_both(
            a in 0u8..20, b in 0u8..20, c in 0u8..20, d in 0u8..20
        ) {
            let (a_lo, a_hi) = (a.min(b), a.max(b));
            let (b_lo, b_hi) = (c.min(d), c.max(d));
            prop_assume!(a_lo < a_hi && b_lo < b_hi);

            let key = |n: u8| format!("{:02}", n);
            let ra = range(&key(a_lo), Some(&key(a_hi)));
            let rb = range(&key(b_lo), Some(&key(b_hi)));

            let shares_a_point = (0u8..20).any(|n| n >= a_lo && n < a_hi && n >= b_lo && n < b_hi);
            prop_assert_eq!(ra.overlaps(&rb), shares_a_point);
            prop_assert_eq!(rb.overlaps(&ra), shares_a_point);
        }
    }
}
