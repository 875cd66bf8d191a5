use core::fmt;

use bitvec::vec::BitVec;
use cranelift_entity::{EntityRef, entity_impl};

use crate::FxHashMap;

/// A predicate (attribute) an abstract structure can express
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Predicate(u32);
entity_impl!(Predicate, "p");

/// A set of predicates.
///
/// Vocabularies are small and dense, so they are represented as a bitset indexed by predicate.
/// The bitset never carries trailing zeros, which keeps equality, hashing and ordering structural.
#[derive(Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vocabulary {
    bits: BitVec,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn contains(&self, predicate: Predicate) -> bool {
        self.bits.get(predicate.index()).is_some_and(|bit| *bit)
    }

    pub fn insert(&mut self, predicate: Predicate) -> bool {
        let index = predicate.index();
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        !self.bits.replace(index, true)
    }

    pub fn remove(&mut self, predicate: Predicate) -> bool {
        let index = predicate.index();
        if index >= self.bits.len() {
            return false;
        }
        let was_set = self.bits.replace(index, false);
        self.normalize();
        was_set
    }

    pub fn iter(&self) -> impl Iterator<Item = Predicate> + '_ {
        self.bits.iter_ones().map(Predicate::new)
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.bits.iter_ones().all(|index| other.bits.get(index).is_some_and(|bit| *bit))
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.union_with(other);
        result
    }

    pub fn union_with(&mut self, other: &Self) {
        if other.bits.len() > self.bits.len() {
            self.bits.resize(other.bits.len(), false);
        }
        for index in other.bits.iter_ones() {
            self.bits.set(index, true);
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        self.iter().filter(|predicate| other.contains(*predicate)).collect()
    }

    pub fn difference(&self, other: &Self) -> Self {
        self.iter().filter(|predicate| !other.contains(*predicate)).collect()
    }

    fn normalize(&mut self) {
        let len = self.bits.last_one().map(|index| index + 1).unwrap_or(0);
        self.bits.truncate(len);
    }
}

impl FromIterator<Predicate> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = Predicate>>(iter: I) -> Self {
        let mut vocabulary = Self::new();
        vocabulary.extend(iter);
        vocabulary
    }
}

impl Extend<Predicate> for Vocabulary {
    fn extend<I: IntoIterator<Item = Predicate>>(&mut self, iter: I) {
        for predicate in iter {
            self.insert(predicate);
        }
    }
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A renaming of predicates, used to move structures between isomorphic components.
///
/// Predicates without an entry are mapped to themselves.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Permutation {
    map: FxHashMap<Predicate, Predicate>,
}

impl Permutation {
    pub fn identity() -> Self {
        Self::default()
    }

    /// A permutation exchanging `from[i]` and `to[i]` for every `i`
    pub fn swapping(from: &[Predicate], to: &[Predicate]) -> Self {
        assert_eq!(from.len(), to.len(), "cannot swap predicate lists of different lengths");
        let mut map = FxHashMap::default();
        for (a, b) in from.iter().copied().zip(to.iter().copied()) {
            if a != b {
                map.insert(a, b);
                map.insert(b, a);
            }
        }
        Self { map }
    }

    pub fn is_identity(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn apply(&self, predicate: Predicate) -> Predicate {
        self.map.get(&predicate).copied().unwrap_or(predicate)
    }

    pub fn apply_to(&self, vocabulary: &Vocabulary) -> Vocabulary {
        vocabulary.iter().map(|predicate| self.apply(predicate)).collect()
    }

    pub fn inverse(&self) -> Self {
        Self {
            map: self.map.iter().map(|(from, to)| (*to, *from)).collect(),
        }
    }
}

impl fmt::Debug for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = self.map.iter().collect::<Vec<_>>();
        entries.sort();
        f.debug_map().entries(entries).finish()
    }
}
