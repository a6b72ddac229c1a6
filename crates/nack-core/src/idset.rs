//! Compressed set of non-negative entry ids.
//!
//! Ids are split into a 48-bit high part selecting a container and a 16-bit
//! low part stored inside it. A container starts as a sorted `u16` array and
//! switches to a fixed 65536-bit bitmap once it holds more than
//! [`ARRAY_CONTAINER_MAX`] values, so dense runs of entries in one ledger
//! cost at most one bit each while sparse ids cost two bytes each.
//!
//! Ids are never removed; a set is drained by dropping it whole.

use std::mem::size_of;

/// Largest number of values an array container holds before it becomes a bitmap.
pub const ARRAY_CONTAINER_MAX: usize = 4096;
const BITMAP_WORDS: usize = 1 << 10;

#[inline]
const fn split(id: u64) -> (u64, u16) {
    (id >> 16, (id & 0xffff) as u16)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Container {
    Array(Vec<u16>),
    Bitmap {
        words: Box<[u64; BITMAP_WORDS]>,
        len: u32,
    },
}

impl Container {
    fn new() -> Self {
        Container::Array(Vec::new())
    }

    fn len(&self) -> usize {
        match self {
            Container::Array(values) => values.len(),
            Container::Bitmap { len, .. } => *len as usize,
        }
    }

    fn contains(&self, low: u16) -> bool {
        match self {
            Container::Array(values) => values.binary_search(&low).is_ok(),
            Container::Bitmap { words, .. } => {
                words[usize::from(low >> 6)] & (1_u64 << (low & 63)) != 0
            }
        }
    }

    fn insert(&mut self, low: u16) -> bool {
        let inserted = match self {
            Container::Array(values) => match values.binary_search(&low) {
                Ok(_) => false,
                Err(pos) => {
                    values.insert(pos, low);
                    true
                }
            },
            Container::Bitmap { words, len } => {
                let word = &mut words[usize::from(low >> 6)];
                let bit = 1_u64 << (low & 63);
                if *word & bit != 0 {
                    false
                } else {
                    *word |= bit;
                    *len += 1;
                    true
                }
            }
        };
        if inserted && matches!(self, Container::Array(_)) && self.len() > ARRAY_CONTAINER_MAX {
            self.promote();
        }
        inserted
    }

    fn promote(&mut self) {
        if let Container::Array(values) = self {
            let mut words = Box::new([0_u64; BITMAP_WORDS]);
            for low in values.iter() {
                words[usize::from(low >> 6)] |= 1_u64 << (low & 63);
            }
            let len = values.len() as u32;
            *self = Container::Bitmap { words, len };
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            Container::Array(values) => values.capacity() * size_of::<u16>(),
            Container::Bitmap { .. } => BITMAP_WORDS * size_of::<u64>(),
        }
    }

    fn iter(&self) -> ContainerIter<'_> {
        match self {
            Container::Array(values) => ContainerIter::Array(values.iter()),
            Container::Bitmap { words, .. } => ContainerIter::Bitmap {
                words: &words[..],
                word_idx: 0,
                current: words[0],
            },
        }
    }
}

enum ContainerIter<'a> {
    Array(std::slice::Iter<'a, u16>),
    Bitmap {
        words: &'a [u64],
        word_idx: usize,
        current: u64,
    },
}

impl Iterator for ContainerIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match self {
            ContainerIter::Array(iter) => iter.next().copied(),
            ContainerIter::Bitmap {
                words,
                word_idx,
                current,
            } => loop {
                if *current != 0 {
                    let bit = current.trailing_zeros();
                    *current &= *current - 1;
                    return Some((*word_idx as u32 * 64 + bit) as u16);
                }
                *word_idx += 1;
                if *word_idx >= words.len() {
                    return None;
                }
                *current = words[*word_idx];
            },
        }
    }
}

/// Sparse, compressed set of entry ids pending redelivery for one ledger.
///
/// Insertion is idempotent and iteration is ascending.
///
/// # Examples
/// ```
/// use nack_core::EntryIdSet;
///
/// let mut ids = EntryIdSet::new();
/// assert!(ids.insert(9));
/// assert!(ids.insert(3));
/// assert!(!ids.insert(9));
/// assert_eq!(ids.iter().collect::<Vec<_>>(), vec![3, 9]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryIdSet {
    // Sorted by high part.
    containers: Vec<(u64, Container)>,
    len: u64,
}

impl EntryIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`, returning `true` when it was not already present.
    pub fn insert(&mut self, id: u64) -> bool {
        let (high, low) = split(id);
        let pos = match self.containers.binary_search_by_key(&high, |(key, _)| *key) {
            Ok(pos) => pos,
            Err(pos) => {
                self.containers.insert(pos, (high, Container::new()));
                pos
            }
        };
        let inserted = self.containers[pos].1.insert(low);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    pub fn contains(&self, id: u64) -> bool {
        let (high, low) = split(id);
        self.containers
            .binary_search_by_key(&high, |(key, _)| *key)
            .map(|pos| self.containers[pos].1.contains(low))
            .unwrap_or(false)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of 65536-id containers in use.
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Approximate heap footprint in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.containers.capacity() * size_of::<(u64, Container)>()
            + self
                .containers
                .iter()
                .map(|(_, container)| container.heap_bytes())
                .sum::<usize>()
    }

    /// Iterates ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.containers.iter().flat_map(|(high, container)| {
            let base = high << 16;
            container.iter().map(move |low| base | u64::from(low))
        })
    }
}

impl FromIterator<u64> for EntryIdSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<u64> for EntryIdSet {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Container, EntryIdSet, ARRAY_CONTAINER_MAX};

    #[test]
    fn array_container_promotes_only_past_threshold() {
        let mut ids = EntryIdSet::new();
        for id in 0..ARRAY_CONTAINER_MAX as u64 {
            ids.insert(id * 3);
        }
        assert!(matches!(ids.containers[0].1, Container::Array(_)));
        assert_eq!(ids.containers[0].1.len(), ARRAY_CONTAINER_MAX);

        // Re-inserting a present id does not count toward the threshold.
        assert!(!ids.insert(0));
        assert!(matches!(ids.containers[0].1, Container::Array(_)));

        assert!(ids.insert(1));
        assert!(matches!(ids.containers[0].1, Container::Bitmap { .. }));
        assert_eq!(ids.containers[0].1.len(), ARRAY_CONTAINER_MAX + 1);
        assert!(ids.contains(1));
        assert!(ids.contains(3 * (ARRAY_CONTAINER_MAX as u64 - 1)));
    }

    #[test]
    fn insert_is_idempotent() {
        let mut ids = EntryIdSet::new();
        assert!(ids.insert(5));
        assert!(!ids.insert(5));
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(5));
        assert!(!ids.contains(6));
    }

    #[test]
    fn iterates_ascending_across_containers() {
        let ids: EntryIdSet = [70_000_u64, 3, 1 << 40, 65_535, 65_536, 9]
            .into_iter()
            .collect();
        assert_eq!(
            ids.iter().collect::<Vec<_>>(),
            vec![3, 9, 65_535, 65_536, 70_000, 1 << 40]
        );
        assert_eq!(ids.container_count(), 3);
    }

    #[test]
    fn dense_run_promotes_to_bitmap_and_keeps_members() {
        let mut ids = EntryIdSet::new();
        let count = (ARRAY_CONTAINER_MAX as u64) * 4;
        for id in 0..count {
            ids.insert(id * 2);
        }
        assert_eq!(ids.len(), count);
        assert!(ids.contains(0));
        assert!(ids.contains((count - 1) * 2));
        assert!(!ids.contains(1));
        assert!(!ids.insert(10));

        let collected: Vec<u64> = ids.iter().collect();
        assert_eq!(collected.len() as u64, count);
        assert!(collected.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn dense_footprint_is_bounded_per_container() {
        let mut ids = EntryIdSet::new();
        for id in 0..65_536_u64 {
            ids.insert(id);
        }
        // One bitmap container: 8 KiB for 65536 ids instead of 128 KiB as u16s.
        assert_eq!(ids.container_count(), 1);
        assert!(ids.heap_bytes() < 65_536 * 2 / 8);
    }

    #[test]
    fn empty_set_reports_empty() {
        let ids = EntryIdSet::new();
        assert!(ids.is_empty());
        assert_eq!(ids.iter().next(), None);
        assert_eq!(ids.heap_bytes(), 0);
    }
}
