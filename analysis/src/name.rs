use core::{cmp::Ordering, fmt, hash};
use std::rc::Rc;

use compact_str::CompactString;
use cranelift_entity::{PrimaryMap, entity_impl};
use smallvec::SmallVec;

use crate::{FxHashMap, Permutation, Predicate, Vocabulary};

/// A base component of the decomposition, i.e. one sub-vocabulary declared by the user
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);
entity_impl!(ComponentId, "c");

#[derive(Debug, Clone)]
struct Component {
    id: ComponentId,
    label: CompactString,
}

struct NameInfo {
    /// The base components, sorted by id
    base: SmallVec<[Component; 4]>,
    abstraction: bool,
    vocabulary: Vocabulary,
    label: CompactString,
}

/// Identifies one partition of the abstract domain: a single base component, or the composition
/// of several.
///
/// Names are immutable and cheap to clone. Two names are equal when they are built from the same
/// base components, regardless of the order in which they were composed, so composition is
/// commutative and associative.
#[derive(Clone)]
pub struct DecompositionName(Rc<NameInfo>);

impl DecompositionName {
    fn base(id: ComponentId, label: &str, vocabulary: Vocabulary, abstraction: bool) -> Self {
        let label = CompactString::from(label);
        Self(Rc::new(NameInfo {
            base: smallvec::smallvec![Component {
                id,
                label: label.clone()
            }],
            abstraction,
            vocabulary,
            label,
        }))
    }

    /// The name of the union of `self` and `other`
    pub fn compose(&self, other: &Self) -> Self {
        if self.contains(other) {
            return self.clone();
        }
        let mut base = SmallVec::<[Component; 4]>::with_capacity(self.0.base.len() + other.0.base.len());
        base.extend(self.0.base.iter().cloned());
        for component in other.0.base.iter() {
            if let Err(index) = base.binary_search_by_key(&component.id, |c| c.id) {
                base.insert(index, component.clone());
            }
        }
        let mut label = CompactString::default();
        for (i, component) in base.iter().enumerate() {
            if i > 0 {
                label.push('+');
            }
            label.push_str(&component.label);
        }
        Self(Rc::new(NameInfo {
            base,
            abstraction: self.is_abstraction() || other.is_abstraction(),
            vocabulary: self.vocabulary().union(other.vocabulary()),
            label,
        }))
    }

    /// Compose every name produced by `names`, or `None` if there are none
    pub fn compose_all<'a>(names: impl IntoIterator<Item = &'a DecompositionName>) -> Option<Self> {
        let mut names = names.into_iter();
        let first = names.next()?.clone();
        Some(names.fold(first, |composed, name| composed.compose(name)))
    }

    /// Whether every base component of `other` is also a base component of `self`
    pub fn contains(&self, other: &Self) -> bool {
        other
            .0
            .base
            .iter()
            .all(|component| self.0.base.binary_search_by_key(&component.id, |c| c.id).is_ok())
    }

    /// Whether structures named `self` can be derived by projecting structures named `other`
    pub fn can_decompose_from(&self, other: &Self) -> bool {
        self.vocabulary().is_subset(other.vocabulary())
    }

    /// Abstraction names are local to a single transformer application
    #[inline]
    pub fn is_abstraction(&self) -> bool {
        self.0.abstraction
    }

    #[inline]
    pub fn is_composed(&self) -> bool {
        self.0.base.len() > 1
    }

    #[inline]
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.0.vocabulary
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn components(&self) -> impl ExactSizeIterator<Item = ComponentId> + '_ {
        self.0.base.iter().map(|c| c.id)
    }

    /// The single base component of a non-composed name
    fn component(&self) -> Option<ComponentId> {
        match self.0.base.as_slice() {
            [component] => Some(component.id),
            _ => None,
        }
    }
}

impl Eq for DecompositionName {}
impl PartialEq for DecompositionName {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.cmp(other).is_eq()
    }
}
impl hash::Hash for DecompositionName {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        for id in self.components() {
            id.hash(state);
        }
        self.0.abstraction.hash(state);
    }
}
impl PartialOrd for DecompositionName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DecompositionName {
    /// Names are ordered by size first, then by their base components
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .base
            .len()
            .cmp(&other.0.base.len())
            .then_with(|| self.components().cmp(other.components()))
            .then_with(|| self.0.abstraction.cmp(&other.0.abstraction))
    }
}
impl fmt::Display for DecompositionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
impl fmt::Debug for DecompositionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_abstraction() {
            write!(f, "{}#", self.label())
        } else {
            f.write_str(self.label())
        }
    }
}

/// A group of components which are identical up to a renaming of their predicates
struct ParametricGroup {
    members: SmallVec<[ComponentId; 4]>,
    /// The predicates of each member which are renamed onto one another, position by position
    predicates: Vec<Vec<Predicate>>,
}

/// The registry of every decomposition name the analysis tracks.
///
/// Besides the base components, the table records which components are isomorphic (parametric
/// groups) and which abstraction components were derived from which origin, so that a missing
/// component can be restored from an equivalent one.
#[derive(Default)]
pub struct NameTable {
    names: PrimaryMap<ComponentId, DecompositionName>,
    by_label: FxHashMap<CompactString, ComponentId>,
    origins: FxHashMap<ComponentId, ComponentId>,
    groups: Vec<ParametricGroup>,
    /// Maps a component to its group, and its position within that group
    group_of: FxHashMap<ComponentId, (usize, usize)>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new base component over `vocabulary`
    pub fn define(&mut self, label: &str, vocabulary: Vocabulary) -> DecompositionName {
        self.push(label, vocabulary, false)
    }

    /// Declare an abstraction component, restored on demand from `origin`
    ///
    /// # Panics
    ///
    /// Panics if `origin` is a composed name.
    pub fn define_abstraction(
        &mut self,
        label: &str,
        vocabulary: Vocabulary,
        origin: &DecompositionName,
    ) -> DecompositionName {
        let origin = origin.component().expect("the origin of an abstraction must be a base name");
        let name = self.push(label, vocabulary, true);
        if let Some(id) = name.component() {
            self.origins.insert(id, origin);
        }
        name
    }

    /// Declare a group of isomorphic components.
    ///
    /// Every member ranges over `shared` plus its own predicates. The `i`-th predicate of one
    /// member corresponds to the `i`-th predicate of every other member. The first member is the
    /// representative of the group, under which locations store the components of the group.
    ///
    /// # Panics
    ///
    /// Panics if the members do not all have the same number of predicates.
    pub fn define_parametric(
        &mut self,
        shared: &Vocabulary,
        members: &[(&str, &[Predicate])],
    ) -> Vec<DecompositionName> {
        let arity = members.first().map(|(_, predicates)| predicates.len()).unwrap_or(0);
        assert!(
            members.iter().all(|(_, predicates)| predicates.len() == arity),
            "members of a parametric group must have the same number of predicates"
        );
        let group = self.groups.len();
        let mut names = Vec::with_capacity(members.len());
        let mut group_members = SmallVec::new();
        let mut group_predicates = Vec::with_capacity(members.len());
        for (position, (label, predicates)) in members.iter().enumerate() {
            let mut vocabulary = shared.clone();
            vocabulary.extend(predicates.iter().copied());
            let name = self.push(label, vocabulary, false);
            if let Some(id) = name.component() {
                group_members.push(id);
                self.group_of.insert(id, (group, position));
            }
            group_predicates.push(predicates.to_vec());
            names.push(name);
        }
        self.groups.push(ParametricGroup {
            members: group_members,
            predicates: group_predicates,
        });
        names
    }

    fn push(&mut self, label: &str, vocabulary: Vocabulary, abstraction: bool) -> DecompositionName {
        let id = self.names.next_key();
        let name = DecompositionName::base(id, label, vocabulary, abstraction);
        self.names.push(name.clone());
        self.by_label.insert(label.into(), id);
        name
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn get(&self, label: &str) -> Option<&DecompositionName> {
        self.by_label.get(label).map(|id| &self.names[*id])
    }

    /// Every declared base name, abstraction names included, in declaration order
    pub fn names(&self) -> impl ExactSizeIterator<Item = &DecompositionName> + '_ {
        self.names.values()
    }

    /// Whether any parametric group has been declared
    pub fn is_parametric(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Whether some parametric group has more than two members
    pub fn is_multi(&self) -> bool {
        self.groups.iter().any(|group| group.members.len() > 2)
    }

    /// The canonical name under which structures of `name` are stored in a location
    pub fn representative(&self, name: &DecompositionName) -> DecompositionName {
        name.component()
            .and_then(|id| self.group_of.get(&id))
            .map(|(group, _)| self.names[self.groups[*group].members[0]].clone())
            .unwrap_or_else(|| name.clone())
    }

    /// The permutation mapping structures of `from` onto structures of `to`, if the two are
    /// isomorphic
    pub fn permutation(&self, from: &DecompositionName, to: &DecompositionName) -> Option<Permutation> {
        if from == to {
            return Some(Permutation::identity());
        }
        let (from_group, from_position) = *self.group_of.get(&from.component()?)?;
        let (to_group, to_position) = *self.group_of.get(&to.component()?)?;
        if from_group != to_group {
            return None;
        }
        let predicates = &self.groups[from_group].predicates;
        Some(Permutation::swapping(&predicates[from_position], &predicates[to_position]))
    }

    /// The names `name` may be rebuilt from when a location holds no structures for it: the
    /// origin of an abstraction, or the other members of a parametric group.
    pub fn restore_candidates(&self, name: &DecompositionName) -> SmallVec<[DecompositionName; 4]> {
        let Some(id) = name.component() else {
            return SmallVec::new();
        };
        if let Some(origin) = self.origins.get(&id) {
            return smallvec::smallvec![self.names[*origin].clone()];
        }
        match self.group_of.get(&id) {
            Some((group, _)) => self.groups[*group]
                .members
                .iter()
                .filter(|member| **member != id)
                .map(|member| self.names[*member].clone())
                .collect(),
            None => SmallVec::new(),
        }
    }
}
