//! Fixed-size entity bitsets used for selector match sets.

use entity_store::{Entity, EntityIndex};

const BITS: usize = 64;

/// A set of entities backed by a bitset sized to the store capacity.
///
/// Iteration is in ascending index order, which keeps rule evaluation
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySet {
    words: Vec<u64>,
    len: usize,
}

impl EntitySet {
    /// Create an empty set able to hold indices below `capacity`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(BITS)],
            len: 0,
        }
    }

    /// Add an entity. Out-of-range indices are ignored.
    pub fn insert(&mut self, entity: Entity) -> bool {
        let (word, bit) = Self::position(entity);
        let Some(slot) = self.words.get_mut(word) else {
            return false;
        };
        let added = *slot & bit == 0;
        *slot |= bit;
        if added {
            self.len += 1;
        }
        added
    }

    pub fn remove(&mut self, entity: Entity) -> bool {
        let (word, bit) = Self::position(entity);
        let Some(slot) = self.words.get_mut(word) else {
            return false;
        };
        let present = *slot & bit != 0;
        *slot &= !bit;
        if present {
            self.len -= 1;
        }
        present
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        let (word, bit) = Self::position(entity);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
        self.len = 0;
    }

    /// In-place union with `other`.
    pub fn union_with(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
        self.recount();
    }

    /// In-place intersection with `other`.
    pub fn intersect_with(&mut self, other: &Self) {
        for (i, a) in self.words.iter_mut().enumerate() {
            *a &= other.words.get(i).copied().unwrap_or(0);
        }
        self.recount();
    }

    /// Overwrite this set with the contents of `other` without reallocating.
    pub fn copy_from(&mut self, other: &Self) {
        let n = self.words.len().min(other.words.len());
        self.words[..n].copy_from_slice(&other.words[..n]);
        self.words[n..].fill(0);
        self.recount();
    }

    /// Keep only the members for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(Entity) -> bool) {
        for (i, word) in self.words.iter_mut().enumerate() {
            let mut bits = *word;
            while bits != 0 {
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                if !keep(Entity::from_index((i * BITS + offset) as EntityIndex)) {
                    *word &= !(1 << offset);
                }
            }
        }
        self.recount();
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowest-index member.
    #[must_use]
    pub fn first(&self) -> Option<Entity> {
        self.iter().next()
    }

    /// Iterate members in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(Entity::from_index((i * BITS + offset) as EntityIndex))
            })
        })
    }

    fn position(entity: Entity) -> (usize, u64) {
        let slot = entity.slot();
        (slot / BITS, 1 << (slot % BITS))
    }

    fn recount(&mut self) {
        self.len = self.words.iter().map(|w| w.count_ones() as usize).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(i: u32) -> Entity {
        Entity::from_index(i)
    }

    #[test]
    fn test_insert_remove_contains() {
        let mut set = EntitySet::with_capacity(130);
        assert!(set.insert(e(0)));
        assert!(set.insert(e(129)));
        assert!(!set.insert(e(129)));
        assert!(!set.insert(e(500)));

        assert!(set.contains(e(129)));
        assert_eq!(set.len(), 2);
        assert!(set.remove(e(0)));
        assert!(!set.contains(e(0)));
    }

    #[test]
    fn test_iter_ascending_across_words() {
        let mut set = EntitySet::with_capacity(200);
        for i in [150, 3, 64, 63] {
            set.insert(e(i));
        }
        let indices: Vec<u32> = set.iter().map(Entity::index).collect();
        assert_eq!(indices, [3, 63, 64, 150]);
        assert_eq!(set.first(), Some(e(3)));
    }

    #[test]
    fn test_set_algebra() {
        let mut a = EntitySet::with_capacity(10);
        let mut b = EntitySet::with_capacity(10);
        a.insert(e(1));
        a.insert(e(2));
        b.insert(e(2));
        b.insert(e(3));

        let mut union = a.clone();
        union.union_with(&b);
        assert_eq!(union.len(), 3);

        a.intersect_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), [e(2)]);
    }
}
