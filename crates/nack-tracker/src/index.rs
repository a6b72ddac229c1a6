use std::collections::BTreeMap;

use nack_core::{BucketKey, EntryIdSet, LedgerId};

/// Reservations sharing one bucket key, grouped by ledger.
///
/// A bucket held by an index is never empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    ledgers: BTreeMap<LedgerId, EntryIdSet>,
}

impl Bucket {
    /// Adds `entry_id` under `ledger_id`, returning `true` when it was new.
    pub fn insert(&mut self, ledger_id: LedgerId, entry_id: u64) -> bool {
        self.ledgers.entry(ledger_id).or_default().insert(entry_id)
    }

    pub fn get(&self, ledger_id: LedgerId) -> Option<&EntryIdSet> {
        self.ledgers.get(&ledger_id)
    }

    pub fn ledger_count(&self) -> usize {
        self.ledgers.len()
    }

    /// Total entry ids across all ledgers.
    pub fn reservation_count(&self) -> u64 {
        self.ledgers.values().map(EntryIdSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }

    /// Ledgers in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (LedgerId, &EntryIdSet)> + '_ {
        self.ledgers.iter().map(|(ledger, ids)| (*ledger, ids))
    }
}

impl IntoIterator for Bucket {
    type Item = (LedgerId, EntryIdSet);
    type IntoIter = std::collections::btree_map::IntoIter<LedgerId, EntryIdSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.ledgers.into_iter()
    }
}

/// Sorted map from bucket key to pending reservations.
///
/// Work per drain is bounded by the number of distinct keys in use, not by
/// the number of reservations inside them.
#[derive(Debug, Default)]
pub struct TimestampBucketIndex {
    buckets: BTreeMap<BucketKey, Bucket>,
    buckets_created: u64,
}

impl TimestampBucketIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `(ledger_id, entry_id)` in the bucket at `key`.
    ///
    /// Re-inserting an id already present at `key` is a no-op. Returns
    /// `true` when `key` became the new, strictly earlier minimum key,
    /// including the first key inserted into an empty index.
    pub fn schedule(&mut self, ledger_id: LedgerId, entry_id: u64, key: BucketKey) -> bool {
        let earlier = self
            .peek_earliest_key()
            .map_or(true, |earliest| key < earliest);
        let created = &mut self.buckets_created;
        self.buckets
            .entry(key)
            .or_insert_with(|| {
                *created += 1;
                Bucket::default()
            })
            .insert(ledger_id, entry_id);
        earlier
    }

    pub fn peek_earliest_key(&self) -> Option<BucketKey> {
        self.buckets.keys().next().copied()
    }

    /// Removes and returns every bucket whose key is `<= now`, ascending.
    pub fn drain_due(&mut self, now: BucketKey) -> Vec<(BucketKey, Bucket)> {
        let remaining = match now.checked_add(1) {
            Some(bound) => self.buckets.split_off(&bound),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.buckets, remaining);
        due.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of distinct bucket keys currently pending.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Total reservations across all pending buckets.
    pub fn reservation_count(&self) -> u64 {
        self.buckets.values().map(Bucket::reservation_count).sum()
    }

    /// Buckets allocated over the lifetime of this index.
    pub fn buckets_created(&self) -> u64 {
        self.buckets_created
    }

    pub fn get(&self, key: BucketKey) -> Option<&Bucket> {
        self.buckets.get(&key)
    }

    /// Drops every pending reservation.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::TimestampBucketIndex;
    use nack_core::PrecisionBits;

    fn ids(index: &TimestampBucketIndex, key: i64, ledger: i64) -> Vec<u64> {
        index
            .get(key)
            .and_then(|bucket| bucket.get(ledger))
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    #[test]
    fn single_reservation_fires_only_once_due() {
        let mut index = TimestampBucketIndex::new();
        assert!(index.schedule(1, 5, 1010));

        assert!(index.drain_due(1009).is_empty());
        assert_eq!(index.peek_earliest_key(), Some(1010));

        let drained = index.drain_due(1010);
        assert_eq!(drained.len(), 1);
        let (key, bucket) = &drained[0];
        assert_eq!(*key, 1010);
        assert_eq!(bucket.ledger_count(), 1);
        assert_eq!(bucket.get(1).map(|s| s.iter().collect::<Vec<_>>()), Some(vec![5]));
        assert!(index.is_empty());
    }

    #[test]
    fn same_entry_in_two_keys_keeps_both_reservations() {
        let mut index = TimestampBucketIndex::new();
        index.schedule(1, 5, 1010);
        index.schedule(1, 5, 1020);
        assert_eq!(index.len(), 2);

        let first = index.drain_due(1010);
        assert_eq!(first.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1010]);
        assert_eq!(index.peek_earliest_key(), Some(1020));

        let second = index.drain_due(1020);
        assert_eq!(second.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1020]);
        assert!(index.is_empty());
    }

    #[test]
    fn coarse_precision_fires_early_but_not_before_bucket() {
        let precision = PrecisionBits::new(3).expect("valid precision");
        let key = precision.bucket_key(1013);
        assert_eq!(key, 1008);

        let mut index = TimestampBucketIndex::new();
        index.schedule(4, 1, key);
        assert!(index.drain_due(1007).is_empty());
        assert_eq!(index.drain_due(1008).len(), 1);
    }

    #[test]
    fn entries_of_one_ledger_share_a_bucket() {
        let mut index = TimestampBucketIndex::new();
        index.schedule(2, 3, 1005);
        index.schedule(2, 9, 1005);

        assert_eq!(index.len(), 1);
        assert_eq!(ids(&index, 1005, 2), vec![3, 9]);
        let drained = index.drain_due(1005);
        let (_, bucket) = &drained[0];
        assert_eq!(bucket.ledger_count(), 1);
    }

    #[test]
    fn reinserting_same_key_is_idempotent() {
        let mut index = TimestampBucketIndex::new();
        assert!(index.schedule(1, 5, 1010));
        assert!(!index.schedule(1, 5, 1010));
        assert_eq!(index.reservation_count(), 1);
        assert_eq!(index.buckets_created(), 1);
    }

    #[test]
    fn schedule_reports_only_strictly_earlier_minimum() {
        let mut index = TimestampBucketIndex::new();
        assert!(index.schedule(1, 1, 2000));
        assert!(!index.schedule(1, 2, 3000));
        assert!(!index.schedule(1, 3, 2000));
        assert!(index.schedule(1, 4, 1500));
        assert_eq!(index.peek_earliest_key(), Some(1500));
    }

    #[test]
    fn drain_returns_ascending_and_leaves_nothing_due() {
        let mut index = TimestampBucketIndex::new();
        for key in [1030, 1010, 1050, 1020, 1040] {
            index.schedule(7, key as u64, key);
        }

        let drained = index.drain_due(1035);
        let keys: Vec<i64> = drained.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1010, 1020, 1030]);
        assert!(drained.iter().all(|(k, bucket)| *k <= 1035 && !bucket.is_empty()));
        assert!(index.peek_earliest_key().map_or(true, |k| k > 1035));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn drain_at_max_time_takes_everything() {
        let mut index = TimestampBucketIndex::new();
        index.schedule(1, 1, 10);
        index.schedule(1, 1, i64::MAX);
        assert_eq!(index.drain_due(i64::MAX).len(), 2);
        assert!(index.is_empty());
    }

    #[test]
    fn bucket_allocations_track_distinct_keys_not_reservations() {
        let precision = PrecisionBits::new(8).expect("valid precision");
        let mut index = TimestampBucketIndex::new();
        let now = 1_000_000_i64;
        for i in 0..200_000_u64 {
            let delay = (i % 1024) as i64;
            index.schedule((i % 16) as i64, i, precision.bucket_key(now + delay));
        }
        // 1024 ms of delays over 256 ms buckets touch at most five keys.
        assert!(index.buckets_created() <= 5);
        assert_eq!(index.len() as u64, index.buckets_created());
        assert_eq!(index.reservation_count(), 200_000);
    }

    #[test]
    fn clear_discards_everything() {
        let mut index = TimestampBucketIndex::new();
        index.schedule(1, 1, 10);
        index.schedule(2, 2, 20);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.peek_earliest_key(), None);
    }
}
