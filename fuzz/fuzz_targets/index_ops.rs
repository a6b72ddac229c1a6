#![no_main]

use libfuzzer_sys::fuzz_target;
use nack_core::PrecisionBits;
use nack_tracker::index::TimestampBucketIndex;

fuzz_target!(|data: &[u8]| {
    let Some((&bits, ops)) = data.split_first() else {
        return;
    };
    let Ok(precision) = PrecisionBits::new(u32::from(bits % 12)) else {
        return;
    };
    let mut index = TimestampBucketIndex::new();
    let mut now = 1_000_i64;
    for op in ops.chunks_exact(3) {
        match op[0] % 3 {
            0 | 1 => {
                let key = precision.bucket_key(now + i64::from(op[1]));
                index.schedule(i64::from(op[2] % 4), u64::from(op[1]), key);
            }
            _ => {
                now += i64::from(op[1]);
                for (key, bucket) in index.drain_due(now) {
                    assert!(key <= now);
                    assert!(!bucket.is_empty());
                }
                assert!(index.peek_earliest_key().map_or(true, |k| k > now));
            }
        }
    }
});
