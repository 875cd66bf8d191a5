use core::{fmt, hash::Hash};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::{DecompositionName, Permutation, Vocabulary};

/// The interface the engine requires of an abstract structure.
///
/// An abstract structure is one element of the abstract domain: it represents a set of concrete
/// program states over some [Vocabulary]. The engine never inspects structures directly, it only
/// combines, splits and compares them through this trait.
pub trait AbstractStructure: Clone + Eq + Hash + fmt::Debug + 'static {
    /// The logical formulas structures are evaluated against
    type Formula: fmt::Debug;

    /// The predicates this structure ranges over
    fn vocabulary(&self) -> Vocabulary;

    /// Whether `formula` may hold in this structure
    fn evaluate(&self, formula: &Self::Formula) -> bool;

    /// Rename the predicates of this structure according to `permutation`
    fn permute(&self, permutation: &Permutation) -> Self;

    /// Refine this structure into cases in which every predicate of `vocabulary` has a definite
    /// value.
    fn focus(&self, vocabulary: &Vocabulary) -> Vec<Self>;

    /// Restrict or extend this structure to range over exactly `vocabulary`
    fn update_vocabulary(&mut self, vocabulary: &Vocabulary);

    /// Prepare this structure of component `name` to be fed to a transformer whose precondition
    /// mentions `extra`.
    ///
    /// Returns `None` if the structure turns out to be inconsistent.
    fn prepare_for_action(&self, name: &DecompositionName, extra: &Vocabulary) -> Option<Self>;

    /// Join `other` into a copy of this structure, if the two can be represented by one structure.
    ///
    /// Returns `None` when the structures must be kept apart.
    fn join(&self, other: &Self) -> Option<Self>;

    /// The structure representing the states of both `self` and `other`, or `None` if there are
    /// no such states.
    fn meet(&self, other: &Self) -> Option<Self>;

    /// Compose this structure with `other` into a structure over `vocabulary`
    fn compose(&self, other: &Self, vocabulary: &Vocabulary) -> Option<Self> {
        let mut composed = self.meet(other)?;
        composed.update_vocabulary(vocabulary);
        Some(composed)
    }

    /// Whether this structure can be split along the vocabulary of `name` without losing
    /// precision.
    fn can_decompose(&self, name: &DecompositionName) -> bool;

    /// Project this structure onto the vocabulary of `name`
    fn decompose(&self, name: &DecompositionName) -> Self;
}

/// A set of abstract structures over one component.
///
/// Sets are shared copy-on-write: cloning a set is cheap, and the structures are only copied when
/// one of the clones is modified.
#[derive(Clone)]
pub struct StructureSet<S> {
    structures: Rc<Vec<S>>,
}

impl<S> Default for StructureSet<S> {
    fn default() -> Self {
        Self {
            structures: Rc::new(Vec::new()),
        }
    }
}

impl<S: AbstractStructure> StructureSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, S> {
        self.structures.iter()
    }

    pub fn contains(&self, structure: &S) -> bool {
        self.structures.contains(structure)
    }

    /// Whether `self` and `other` share their storage
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.structures, &other.structures)
    }

    /// Merge `structure` into this set.
    ///
    /// Returns the part of the set which changed as a result: `structure` itself if it was
    /// added, the joined structure if it was joined with an existing one, or `None` if the set
    /// already represented it.
    pub fn merge_with(&mut self, structure: S) -> Option<S> {
        if self.contains(&structure) {
            return None;
        }
        let joined = self.structures.iter().enumerate().find_map(|(index, existing)| {
            existing.join(&structure).map(|joined| (index, joined))
        });
        let structures = Rc::make_mut(&mut self.structures);
        match joined {
            Some((index, joined)) if structures[index] == joined => None,
            Some((index, joined)) => {
                // The joined structure may equal, or join with, another member of the set
                structures.remove(index);
                Some(self.merge_with(joined.clone()).unwrap_or(joined))
            }
            None => {
                structures.push(structure.clone());
                Some(structure)
            }
        }
    }

    /// Merge every structure of `other` into this set, returning the set of changes
    pub fn join(&mut self, other: &Self) -> Self {
        let mut delta = Self::new();
        for structure in other.iter() {
            if let Some(changed) = self.merge_with(structure.clone()) {
                delta.merge_with(changed);
            }
        }
        delta
    }

    /// The pairwise meet of `self` and `other`
    pub fn meet(&self, other: &Self) -> Self {
        if self.ptr_eq(other) {
            return self.clone();
        }
        self.iter()
            .flat_map(|one| other.iter().filter_map(move |two| one.meet(two)))
            .collect()
    }

    /// Lazily compose every structure of `self` with every structure of `other`
    pub fn compose<'a>(
        &'a self,
        other: &'a Self,
        vocabulary: &'a Vocabulary,
    ) -> impl Iterator<Item = S> + 'a {
        self.iter().flat_map(move |one| {
            other.iter().filter_map(move |two| one.compose(two, vocabulary))
        })
    }

    /// Apply `f` to every structure, collecting the results into a new set
    pub fn map(&self, f: impl FnMut(&S) -> S) -> Self {
        self.iter().map(f).collect()
    }
}

impl<S: AbstractStructure> FromIterator<S> for StructureSet<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<S: AbstractStructure> Extend<S> for StructureSet<S> {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for structure in iter {
            self.merge_with(structure);
        }
    }
}

impl<'a, S> IntoIterator for &'a StructureSet<S> {
    type IntoIter = core::slice::Iter<'a, S>;
    type Item = &'a S;

    fn into_iter(self) -> Self::IntoIter {
        self.structures.iter()
    }
}

impl<S: AbstractStructure> Eq for StructureSet<S> {}
impl<S: AbstractStructure> PartialEq for StructureSet<S> {
    /// Sets are compared as sets, ignoring the order in which structures were added
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.len() == other.len() && self.iter().all(|structure| other.contains(structure)))
    }
}

impl<S: fmt::Debug> fmt::Debug for StructureSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.structures.iter()).finish()
    }
}

/// Holds part of a structure fixed across a transformer.
///
/// Framing before composition drops predicates the transformer does not need, which shrinks the
/// composed vocabulary. Decomposition must then unframe each result to recover the structures
/// of the target component.
pub trait Framer<S: AbstractStructure> {
    fn frame(&self, structure: &S, name: Option<&DecompositionName>) -> S;

    fn unframe(&self, structure: &S, target: &DecompositionName) -> SmallVec<[S; 2]>;

    /// The vocabulary a structure over `vocabulary` ranges over once framed
    fn framed_vocabulary(&self, vocabulary: &Vocabulary) -> Vocabulary;
}

/// The composition of two framers: `inner` is applied first when framing, and last when
/// unframing.
pub struct ComposedFramer<S: AbstractStructure> {
    outer: Rc<dyn Framer<S>>,
    inner: Rc<dyn Framer<S>>,
}

impl<S: AbstractStructure> ComposedFramer<S> {
    /// Compose two optional framers, avoiding an indirection when either is absent
    pub fn compose(
        outer: Option<Rc<dyn Framer<S>>>,
        inner: Option<Rc<dyn Framer<S>>>,
    ) -> Option<Rc<dyn Framer<S>>> {
        match (outer, inner) {
            (Some(outer), Some(inner)) => Some(Rc::new(Self { outer, inner })),
            (Some(framer), None) | (None, Some(framer)) => Some(framer),
            (None, None) => None,
        }
    }
}

impl<S: AbstractStructure> Framer<S> for ComposedFramer<S> {
    fn frame(&self, structure: &S, name: Option<&DecompositionName>) -> S {
        self.outer.frame(&self.inner.frame(structure, name), name)
    }

    fn unframe(&self, structure: &S, target: &DecompositionName) -> SmallVec<[S; 2]> {
        self.outer
            .unframe(structure, target)
            .iter()
            .flat_map(|partial| self.inner.unframe(partial, target))
            .collect()
    }

    fn framed_vocabulary(&self, vocabulary: &Vocabulary) -> Vocabulary {
        self.outer.framed_vocabulary(&self.inner.framed_vocabulary(vocabulary))
    }
}
