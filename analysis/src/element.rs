use core::fmt;
use std::collections::BTreeMap;

use crate::{
    AbstractStructure, AnalysisError, AnalysisResult, ChangeResult, DecompositionName, NameTable,
    StructureSet,
};

/// The state of the decomposed domain at one program point: for each component name, the set of
/// structures over that component.
///
/// Elements never hold an empty set, so an element is empty iff it holds no names. Cloning an
/// element shares its sets, which are only copied when modified.
#[derive(Clone)]
pub struct CartesianElement<S> {
    structures: BTreeMap<DecompositionName, StructureSet<S>>,
}

impl<S> Default for CartesianElement<S> {
    fn default() -> Self {
        Self {
            structures: BTreeMap::new(),
        }
    }
}

impl<S: AbstractStructure> CartesianElement<S> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// The number of structures stored in this element
    pub fn len(&self) -> usize {
        self.structures.values().map(StructureSet::len).sum()
    }

    pub fn names(&self) -> impl ExactSizeIterator<Item = &DecompositionName> + Clone + '_ {
        self.structures.keys()
    }

    pub fn contains_name(&self, name: &DecompositionName) -> bool {
        self.structures.contains_key(name)
    }

    pub fn get(&self, name: &DecompositionName) -> Option<&StructureSet<S>> {
        self.structures.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DecompositionName, &StructureSet<S>)> + '_ {
        self.structures.iter()
    }

    /// Iterate over every structure, regardless of its component
    pub fn iter(&self) -> impl Iterator<Item = &S> + '_ {
        self.structures.values().flat_map(StructureSet::iter)
    }

    /// Associate `set` with `name`, replacing any previous set. An empty set removes `name`.
    pub fn put(&mut self, name: DecompositionName, set: StructureSet<S>) {
        if set.is_empty() {
            self.structures.remove(&name);
        } else {
            self.structures.insert(name, set);
        }
    }

    pub fn remove(&mut self, name: &DecompositionName) -> Option<StructureSet<S>> {
        self.structures.remove(name)
    }

    /// Remove every abstraction name from this element
    pub fn remove_abstractions(&mut self) {
        self.structures.retain(|name, _| !name.is_abstraction());
    }

    /// Join `other` into this element.
    ///
    /// Returns the delta, i.e. the structures which were not already represented by this element,
    /// or `None` if nothing changed.
    pub fn join(&mut self, other: &Self) -> Option<Self> {
        let mut delta = Self::new();
        for (name, set) in other.structures.iter() {
            match self.structures.get_mut(name) {
                None => {
                    self.put(name.clone(), set.clone());
                    delta.put(name.clone(), set.clone());
                }
                Some(current) => {
                    let added = current.join(set);
                    delta.put(name.clone(), added);
                }
            }
        }
        if delta.is_empty() { None } else { Some(delta) }
    }

    /// Join a single structure into the set of `name`
    pub fn join_structure(&mut self, name: &DecompositionName, structure: S) -> ChangeResult {
        match self.structures.get_mut(name) {
            Some(set) => ChangeResult::added(usize::from(set.merge_with(structure).is_some())),
            None => {
                self.structures.insert(name.clone(), core::iter::once(structure).collect());
                ChangeResult::added(1)
            }
        }
    }

    /// Meet the set of `name` with `set`, adopting `set` if this element holds no set for `name`
    pub fn meet_name(&mut self, name: &DecompositionName, set: &StructureSet<S>) {
        let met = match self.structures.get(name) {
            None => set.clone(),
            Some(current) => current.meet(set),
        };
        self.put(name.clone(), met);
    }

    /// Meet this element with `other`, name by name
    pub fn meet(&mut self, other: &Self) {
        for (name, set) in other.structures.iter() {
            self.meet_name(name, set);
        }
    }

    /// Rename every component to the representative of its parametric group, permuting its
    /// structures accordingly.
    pub fn permute_back(&mut self, table: &NameTable) -> AnalysisResult<()> {
        if !table.is_parametric() {
            return Ok(());
        }
        if let Some(name) = self.names().find(|name| name.is_composed()) {
            return Err(AnalysisError::ComposedPermutation {
                name: name.label().into(),
            });
        }
        let mut result = Self::new();
        for (name, set) in core::mem::take(&mut self.structures) {
            let representative = table.representative(&name);
            let permuted = match table.permutation(&name, &representative) {
                Some(permutation) if !permutation.is_identity() => {
                    set.map(|structure| structure.permute(&permutation))
                }
                _ => set,
            };
            let mut single = Self::new();
            single.put(representative, permuted);
            result.join(&single);
        }
        *self = result;
        Ok(())
    }
}

impl<S: AbstractStructure> PartialEq for CartesianElement<S> {
    fn eq(&self, other: &Self) -> bool {
        self.structures == other.structures
    }
}
impl<S: AbstractStructure> Eq for CartesianElement<S> {}

impl<S: fmt::Debug> fmt::Debug for CartesianElement<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.structures.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        Predicate, Vocabulary,
        testing::{ToyStructure, toy},
    };

    fn names() -> (NameTable, DecompositionName, DecompositionName) {
        let mut table = NameTable::new();
        let a = table.define("A", [Predicate::new(0)].into_iter().collect());
        let b = table.define("B", [Predicate::new(1)].into_iter().collect());
        (table, a, b)
    }

    fn element(entries: &[(&DecompositionName, ToyStructure)]) -> CartesianElement<ToyStructure> {
        let mut element = CartesianElement::new();
        for (name, structure) in entries {
            element.join_structure(name, structure.clone());
        }
        element
    }

    #[test]
    fn join_returns_only_the_delta() {
        let (_, a, b) = names();
        let mut current = element(&[(&a, toy(&[(0, true)]))]);
        let other = element(&[(&a, toy(&[(0, true)])), (&a, toy(&[(0, false)])), (&b, toy(&[(1, true)]))]);
        let delta = current.join(&other).unwrap();
        assert_eq!(delta, element(&[(&a, toy(&[(0, false)])), (&b, toy(&[(1, true)]))]));
        assert_eq!(current.len(), 3);
        assert!(current.join(&other).is_none());
    }

    #[test]
    fn meet_adopts_missing_names() {
        let (_, a, b) = names();
        let mut current = element(&[(&a, toy(&[(0, true)])), (&a, toy(&[(0, false)]))]);
        current.meet(&element(&[(&a, toy(&[(0, true)])), (&b, toy(&[(1, false)]))]));
        assert_eq!(current, element(&[(&a, toy(&[(0, true)])), (&b, toy(&[(1, false)]))]));
    }

    #[test]
    fn permute_back_renames_to_the_representative() {
        let mut table = NameTable::new();
        let shared = Vocabulary::new();
        let names = table.define_parametric(
            &shared,
            &[("X", &[Predicate::new(0)][..]), ("Y", &[Predicate::new(1)][..])],
        );
        let mut current = element(&[(&names[1], toy(&[(1, true)]))]);
        current.permute_back(&table).unwrap();
        assert_eq!(current, element(&[(&names[0], toy(&[(0, true)]))]));
    }

    #[test]
    fn composed_names_cannot_be_permuted() {
        let mut table = NameTable::new();
        let names = table.define_parametric(
            &Vocabulary::new(),
            &[("X", &[Predicate::new(0)][..]), ("Y", &[Predicate::new(1)][..])],
        );
        let xy = names[0].compose(&names[1]);
        let mut current = element(&[(&xy, toy(&[(0, true), (1, true)]))]);
        let err = current.permute_back(&table).unwrap_err();
        assert!(matches!(err, AnalysisError::ComposedPermutation { .. }));
    }

    proptest! {
        #[test]
        fn join_is_monotone(first in proptest::collection::vec(any::<(bool, bool)>(), 0..6),
                            second in proptest::collection::vec(any::<(bool, bool)>(), 0..6)) {
            let (_, a, _) = names();
            let build = |values: &[(bool, bool)]| {
                let mut element = CartesianElement::new();
                for (x, y) in values {
                    element.join_structure(&a, toy(&[(0, *x), (2, *y)]));
                }
                element
            };
            let mut current = build(&first);
            let before = current.clone();
            let other = build(&second);
            let delta = current.join(&other);
            prop_assert!(before.iter().all(|s| current.iter().any(|t| t == s)));
            prop_assert!(other.iter().all(|s| current.iter().any(|t| t == s)));
            prop_assert_eq!(delta.is_some(), current.len() > before.len());
        }
    }
}
