use std::collections::{BTreeMap, BTreeSet};

use nack_core::PrecisionBits;
use nack_tracker::index::TimestampBucketIndex;

fn xorshift64(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

type Model = BTreeMap<i64, BTreeMap<i64, BTreeSet<u64>>>;

#[test]
fn fuzz_like_index_matches_model() {
    for seed in 1..=8_u64 {
        let mut s = 0x5EED_0000 ^ seed;
        let precision = PrecisionBits::new((seed % 6) as u32).expect("valid precision");
        let mut index = TimestampBucketIndex::new();
        let mut model: Model = BTreeMap::new();
        let mut now = 10_000_i64;

        for _ in 0..5_000 {
            let r = xorshift64(&mut s);
            if r % 5 == 0 {
                now += ((r >> 8) % 40) as i64;
                let drained = index.drain_due(now);
                let mut expected = model.split_off(&(now + 1));
                std::mem::swap(&mut expected, &mut model);

                assert_eq!(drained.len(), expected.len());
                for ((key, bucket), (model_key, model_bucket)) in drained.iter().zip(&expected) {
                    assert_eq!(key, model_key);
                    assert!(*key <= now);
                    assert_eq!(bucket.ledger_count(), model_bucket.len());
                    for (ledger, ids) in bucket.iter() {
                        let want = &model_bucket[&ledger];
                        assert!(ids.iter().eq(want.iter().copied()));
                    }
                }
                assert!(index.peek_earliest_key().map_or(true, |k| k > now));
            } else {
                let ledger = ((r >> 16) % 5) as i64;
                let entry = (r >> 24) % 20_000;
                let delay = ((r >> 40) % 300) as i64;
                let key = precision.bucket_key(now + delay);
                let was_min = model.keys().next().map_or(true, |k| key < *k);
                let earlier = index.schedule(ledger, entry, key);
                model
                    .entry(key)
                    .or_default()
                    .entry(ledger)
                    .or_default()
                    .insert(entry);
                assert_eq!(earlier, was_min);
            }
            assert_eq!(index.len(), model.len());
            assert_eq!(index.peek_earliest_key(), model.keys().next().copied());
        }
    }
}
