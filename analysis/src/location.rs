use std::collections::BTreeSet;

use compact_str::CompactString;
use cranelift_entity::{PrimaryMap, entity_impl};
use smallvec::SmallVec;

use crate::{
    AbstractStructure, Action, AnalysisError, AnalysisResult, CartesianElement, ChangeResult,
    FxHashMap,
};

/// A node of the control-flow graph
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(u32);
entity_impl!(LocationId, "loc");

/// An action labeling an edge of the control-flow graph
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u32);
entity_impl!(ActionId, "action");

/// An outgoing edge of a location
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Edge {
    pub action: ActionId,
    pub target: LocationId,
}

/// One program point, holding the joined state of the decomposed domain there.
///
/// Alongside the joined element, a location keeps the part of its state which has not been
/// processed yet, as a pair of the element before the first unprocessed join (`old`) and the
/// structures added since (`delta`). The full state is always recoverable as `old` joined with
/// `delta`.
pub struct Location<S> {
    label: CompactString,
    element: CartesianElement<S>,
    old: CartesianElement<S>,
    delta: Option<CartesianElement<S>>,
    messages: BTreeSet<String>,
    edges: SmallVec<[Edge; 2]>,
}

impl<S: AbstractStructure> Location<S> {
    pub fn new(label: impl Into<CompactString>) -> Self {
        Self {
            label: label.into(),
            element: CartesianElement::new(),
            old: CartesianElement::new(),
            delta: None,
            messages: BTreeSet::new(),
            edges: SmallVec::new(),
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn element(&self) -> &CartesianElement<S> {
        &self.element
    }

    pub(crate) fn element_mut(&mut self) -> &mut CartesianElement<S> {
        &mut self.element
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn messages(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.messages.iter().map(String::as_str)
    }

    /// The number of structures stored in this location
    pub fn len(&self) -> usize {
        self.element.len()
    }

    pub fn is_empty(&self) -> bool {
        self.element.is_empty()
    }

    pub fn has_unprocessed(&self) -> bool {
        self.delta.is_some()
    }

    /// Join `new_delta` into this location.
    ///
    /// The result is changed iff `new_delta` represents states the location did not already
    /// represent.
    pub fn join(&mut self, new_delta: CartesianElement<S>) -> ChangeResult {
        let (grew, pending) = match self.delta.take() {
            None => {
                self.old = self.element.clone();
                (None, new_delta)
            }
            Some(mut pending) => {
                let grew = self.element.join(&new_delta).map_or(0, |grown| grown.len());
                self.element = self.old.clone();
                pending.join(&new_delta);
                (Some(grew), pending)
            }
        };
        self.delta = self.element.join(&pending);
        ChangeResult::added(
            grew.unwrap_or_else(|| self.delta.as_ref().map_or(0, CartesianElement::len)),
        )
    }

    /// Take the unprocessed state of this location, as the pair `(old, delta)`.
    ///
    /// Afterwards the location holds no unprocessed state, so that new contributions accumulate
    /// afresh.
    pub fn retrieve_delta(&mut self) -> (CartesianElement<S>, Option<CartesianElement<S>>) {
        (core::mem::take(&mut self.old), self.delta.take())
    }

    /// Give back the unprocessed state taken by [Location::retrieve_delta], merging it with
    /// anything joined since.
    ///
    /// Without a delta, the whole element is unprocessed again.
    pub(crate) fn restore_delta(
        &mut self,
        old: CartesianElement<S>,
        delta: Option<CartesianElement<S>>,
    ) {
        let pending = self.delta.take();
        self.old = old;
        self.delta = delta.map(|mut delta| {
            if let Some(pending) = pending {
                delta.join(&pending);
            }
            delta
        });
    }

    /// Every structure this location currently knows of: those of `old`, of the joined element,
    /// and of the unprocessed delta.
    pub fn every_structure(&self) -> impl Iterator<Item = &S> + '_ {
        self.old
            .iter()
            .chain(self.element.iter())
            .chain(self.delta.iter().flat_map(CartesianElement::iter))
    }

    /// Record `messages`, returning how many of them were not reported here before
    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = String>) -> usize {
        messages.into_iter().filter(|message| self.messages.insert(message.clone())).count()
    }

    /// Locations store decomposed state only, single structures cannot be joined directly
    pub fn join_structure(&mut self, _structure: S) -> AnalysisResult<ChangeResult> {
        Err(AnalysisError::Unsupported {
            operation: "joining a single structure into a decomposed location",
        })
    }

    pub fn remove_unprocessed(&mut self) -> AnalysisResult<Vec<S>> {
        Err(AnalysisError::Unsupported {
            operation: "removing unprocessed structures from a decomposed location",
        })
    }

    /// A one-line summary of this location
    pub fn status(&self) -> String {
        let unprocessed = self.delta.as_ref().map(CartesianElement::len).unwrap_or(0);
        format!(
            "{} : \tunprocessed={}\tsaved={}\t #messages={}",
            self.label,
            unprocessed,
            self.element.len(),
            self.messages.len()
        )
    }
}

/// The control-flow graph the engine computes a fixpoint over
pub struct ControlFlowGraph<S: AbstractStructure> {
    pub(crate) locations: PrimaryMap<LocationId, Location<S>>,
    pub(crate) actions: PrimaryMap<ActionId, Box<dyn Action<S>>>,
    by_label: FxHashMap<CompactString, LocationId>,
    entry: Option<LocationId>,
}

impl<S: AbstractStructure> Default for ControlFlowGraph<S> {
    fn default() -> Self {
        Self {
            locations: PrimaryMap::new(),
            actions: PrimaryMap::new(),
            by_label: FxHashMap::default(),
            entry: None,
        }
    }
}

impl<S: AbstractStructure> ControlFlowGraph<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the location labeled `label`, creating it if necessary.
    ///
    /// The first location created is the entry of the graph.
    pub fn location(&mut self, label: &str) -> LocationId {
        if let Some(id) = self.by_label.get(label) {
            return *id;
        }
        let id = self.locations.push(Location::new(label));
        self.by_label.insert(label.into(), id);
        self.entry.get_or_insert(id);
        id
    }

    pub fn set_entry(&mut self, location: LocationId) {
        self.entry = Some(location);
    }

    pub fn entry(&self) -> Option<LocationId> {
        self.entry
    }

    pub fn add_action(&mut self, action: impl Action<S> + 'static) -> ActionId {
        self.actions.push(Box::new(action))
    }

    /// Add an edge from `from` to `to`, labeled by `action`
    pub fn add_edge(&mut self, from: LocationId, action: ActionId, to: LocationId) {
        self.locations[from].edges.push(Edge { action, target: to });
    }

    pub fn location_by_label(&self, label: &str) -> Option<&Location<S>> {
        self.by_label.get(label).map(|id| &self.locations[*id])
    }

    pub fn get(&self, location: LocationId) -> &Location<S> {
        &self.locations[location]
    }

    pub fn action(&self, action: ActionId) -> &dyn Action<S> {
        self.actions[action].as_ref()
    }

    pub fn locations(&self) -> impl Iterator<Item = (LocationId, &Location<S>)> + '_ {
        self.locations.iter()
    }
}
