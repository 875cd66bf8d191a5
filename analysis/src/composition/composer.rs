use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use super::{CompositionFilter, StepContext};
use crate::{
    AbstractStructure, AnalysisError, AnalysisResult, CartesianElement, CompositionFormula,
    DecompositionName, StructureSet, Vocabulary,
};

type Tuple = SmallVec<[DecompositionName; 4]>;

/// Decides which names an action composes, and from which components.
///
/// The composer is computed once per plan and never changes afterwards. The caches of composed
/// structures live in a [ComposerState], owned by a single run of the plan.
#[derive(Debug)]
pub struct Composer {
    incremental: bool,
    /// For each composed name, the components it is composed of, in composition order
    to_compose: BTreeMap<DecompositionName, Tuple>,
    /// Components feeding exactly one composed name other than themselves
    single_use: BTreeSet<DecompositionName>,
}

impl Composer {
    /// Build the composer for an action with composition formula `formula`, at a location
    /// holding the components `current`.
    pub fn new(
        formula: Option<&CompositionFormula>,
        incremental: bool,
        current: &BTreeSet<DecompositionName>,
    ) -> Self {
        let mut to_compose = BTreeMap::<DecompositionName, Tuple>::new();
        match formula {
            None => {
                for name in current {
                    to_compose.insert(name.clone(), smallvec::smallvec![name.clone()]);
                }
            }
            Some(formula) => {
                let mut redundant = BTreeSet::new();
                for tuple in optimize_order(formula) {
                    if let Some(composed) = DecompositionName::compose_all(&tuple) {
                        redundant.extend(tuple.iter().cloned());
                        to_compose.insert(composed, tuple);
                    }
                }
                for name in current {
                    if !to_compose.contains_key(name) && !redundant.contains(name) {
                        to_compose.insert(name.clone(), smallvec::smallvec![name.clone()]);
                    }
                }
            }
        }

        let mut uses = BTreeMap::<&DecompositionName, usize>::new();
        for (name, components) in to_compose.iter() {
            for component in components.iter().filter(|component| *component != name) {
                *uses.entry(component).or_default() += 1;
            }
        }
        let single_use = uses
            .into_iter()
            .filter_map(|(component, count)| (count == 1).then(|| component.clone()))
            .collect();

        Self {
            incremental,
            to_compose,
            single_use,
        }
    }

    #[inline]
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// The names this composer produces
    pub fn composed_names(&self) -> impl Iterator<Item = &DecompositionName> + Clone + '_ {
        self.to_compose.keys()
    }

    pub fn sources(&self, name: &DecompositionName) -> Option<&[DecompositionName]> {
        self.to_compose.get(name).map(|tuple| tuple.as_slice())
    }

    pub fn is_single_use(&self, name: &DecompositionName) -> bool {
        self.single_use.contains(name)
    }

    /// Every name cached while composing `target`: its components, and each prefix of its tuple
    pub fn intermediates(&self, target: &DecompositionName) -> BTreeSet<DecompositionName> {
        let mut result = BTreeSet::new();
        let Some((first, rest)) = self.sources(target).and_then(|tuple| tuple.split_first()) else {
            result.insert(target.clone());
            return result;
        };
        let mut current = first.clone();
        result.insert(current.clone());
        for added in rest {
            current = current.compose(added);
            result.insert(added.clone());
            result.insert(current.clone());
        }
        result
    }
}

/// Order every tuple of `formula` so as to share as many composed prefixes as possible: the
/// components common to every tuple come first, followed by the rest in canonical order.
fn optimize_order(formula: &CompositionFormula) -> Vec<Tuple> {
    let tuples = formula
        .iter()
        .map(|tuple| tuple.iter().cloned().collect::<BTreeSet<_>>())
        .collect::<Vec<_>>();
    let shared = tuples
        .iter()
        .skip(1)
        .fold(tuples.first().cloned().unwrap_or_default(), |shared, tuple| {
            shared.intersection(tuple).cloned().collect()
        });
    tuples
        .iter()
        .map(|tuple| {
            shared.iter().chain(tuple.difference(&shared)).cloned().collect::<Tuple>()
        })
        .collect()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum View {
    Old,
    Delta,
    New,
}

/// The caches for one view of the location being processed
struct ViewCache<S> {
    /// The snapshot of the location this view is computed from
    before: CartesianElement<S>,
    /// Filtered component sets, before framing
    unframed: CartesianElement<S>,
    /// Sets ready for composition: filtered and framed components, and composed names
    ready: BTreeMap<DecompositionName, StructureSet<S>>,
}

impl<S: AbstractStructure> ViewCache<S> {
    fn new(before: CartesianElement<S>) -> Self {
        Self {
            before,
            unframed: CartesianElement::new(),
            ready: BTreeMap::new(),
        }
    }

    fn remove(&mut self, name: &DecompositionName) {
        self.ready.remove(name);
        self.unframed.remove(name);
    }
}

/// The state snapshots of a location while its actions are processed
pub struct Snapshot<S> {
    pub old: CartesianElement<S>,
    pub delta: Option<CartesianElement<S>>,
    pub new: CartesianElement<S>,
}

/// The caches of one run of a [Composer].
///
/// The state owns the snapshots it composes from. It may add restored components to them, and
/// gives them back, minus any abstraction component, when the run is over.
pub struct ComposerState<S> {
    incremental: bool,
    has_delta: bool,
    old: ViewCache<S>,
    delta: ViewCache<S>,
    new: ViewCache<S>,
}

impl<S: AbstractStructure> ComposerState<S> {
    pub fn new(composer: &Composer, snapshot: Snapshot<S>) -> Self {
        let Snapshot { old, delta, new } = snapshot;
        let has_delta = delta.is_some();
        let incremental = composer.is_incremental() && has_delta && !old.is_empty();
        Self {
            incremental,
            has_delta,
            old: ViewCache::new(old),
            delta: ViewCache::new(delta.unwrap_or_default()),
            new: ViewCache::new(new),
        }
    }

    /// Whether this run composes the increment only
    #[inline]
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    fn view(&self, view: View) -> &ViewCache<S> {
        match view {
            View::Old => &self.old,
            View::Delta => &self.delta,
            View::New => &self.new,
        }
    }

    fn view_mut(&mut self, view: View) -> &mut ViewCache<S> {
        match view {
            View::Old => &mut self.old,
            View::Delta => &mut self.delta,
            View::New => &mut self.new,
        }
    }

    /// Compute the structures of `target`, returning whether any are available.
    ///
    /// In incremental mode, only the structures of `target` which do not derive from the old
    /// state exclusively are computed.
    pub fn compose(
        &mut self,
        composer: &Composer,
        target: &DecompositionName,
        cx: &mut StepContext<'_, S>,
        filter: &CompositionFilter<'_, S>,
    ) -> AnalysisResult<bool> {
        let mut env = ComposeEnv {
            composer,
            cx,
            filter,
        };
        if self.incremental {
            self.compose_incremental(&mut env, target)?;
            Ok(self.delta.ready.contains_key(target))
        } else {
            self.compose_full(&mut env, target)?;
            Ok(self.new.ready.contains_key(target))
        }
    }

    /// The structures computed for `target` by the last successful [ComposerState::compose]
    pub fn composed(&self, target: &DecompositionName) -> Option<&StructureSet<S>> {
        let view = if self.incremental { View::Delta } else { View::New };
        self.view(view).ready.get(target)
    }

    pub fn remove_old(&mut self, name: &DecompositionName) {
        self.old.remove(name);
    }

    pub fn remove_delta(&mut self, name: &DecompositionName) {
        self.delta.remove(name);
    }

    pub fn remove_new(&mut self, name: &DecompositionName) {
        self.new.remove(name);
    }

    /// Release the caches, giving back the snapshots without their abstraction components
    pub fn done(self) -> Snapshot<S> {
        let Self {
            has_delta,
            mut old,
            mut delta,
            mut new,
            ..
        } = self;
        old.before.remove_abstractions();
        delta.before.remove_abstractions();
        new.before.remove_abstractions();
        Snapshot {
            old: old.before,
            delta: has_delta.then_some(delta.before),
            new: new.before,
        }
    }

    fn compose_full(
        &mut self,
        env: &mut ComposeEnv<'_, '_, S>,
        target: &DecompositionName,
    ) -> AnalysisResult<()> {
        if self.prepare(env, View::New, target)? {
            return Ok(());
        }
        let Some((first, rest)) = env.composer.sources(target).and_then(|tuple| tuple.split_first())
        else {
            return Ok(());
        };
        if rest.is_empty() || !self.prepare(env, View::New, first)? {
            return Ok(());
        }
        let mut current = first.clone();
        for added in rest {
            if !self.prepare(env, View::New, added)? {
                return Ok(());
            }
            let combined = current.compose(added);
            if !self.new.ready.contains_key(&combined) {
                let composed = self.compose_views(env, (View::New, &current), (View::New, added));
                log::trace!(target: "composer", "composed {combined}: {} structures", composed.len());
                self.new.ready.insert(combined.clone(), composed);
            }
            current = combined;
        }
        Ok(())
    }

    fn compose_incremental(
        &mut self,
        env: &mut ComposeEnv<'_, '_, S>,
        target: &DecompositionName,
    ) -> AnalysisResult<()> {
        if self.prepare(env, View::Delta, target)? {
            return Ok(());
        }
        let Some((first, rest)) = env.composer.sources(target).and_then(|tuple| tuple.split_first())
        else {
            return Ok(());
        };
        if rest.is_empty() || !self.prepare_all(env, first)? {
            return Ok(());
        }
        let mut current = first.clone();
        let mut previous: Option<(DecompositionName, DecompositionName)> = None;
        for added in rest {
            if !self.prepare_all(env, added)? {
                return Ok(());
            }
            let combined = current.compose(added);
            if !self.delta.ready.contains_key(&combined) {
                // Only the increment of a prefix is composed eagerly, its old and new sets are
                // built when a longer composition first needs them
                if let Some((prefix, last)) = previous.as_ref() {
                    if !self.new.ready.contains_key(&current) {
                        let old = self.compose_views(env, (View::Old, prefix), (View::Old, last));
                        let mut new = old.clone();
                        if let Some(delta) = self.delta.ready.get(&current) {
                            new.join(delta);
                        }
                        self.old.ready.insert(current.clone(), old);
                        self.new.ready.insert(current.clone(), new);
                    }
                }
                let increment = self.increment(env, &current, added);
                log::trace!(target: "composer", "composed increment of {combined}: {} structures", increment.len());
                self.delta.ready.insert(combined.clone(), increment);
            }
            previous = Some((current, added.clone()));
            current = combined;
        }
        Ok(())
    }

    /// The structures of `current∘added` which involve at least one structure of the delta.
    ///
    /// `compose(new, new) \ compose(old, old)` is computed as
    /// `compose(delta, new) ∪ compose(old, delta)`, which visits each new pair exactly once.
    fn increment(
        &self,
        env: &ComposeEnv<'_, '_, S>,
        current: &DecompositionName,
        added: &DecompositionName,
    ) -> StructureSet<S> {
        let mut increment = self.compose_views(env, (View::Delta, current), (View::New, added));
        increment.extend(
            self.compose_views(env, (View::Old, current), (View::Delta, added)).iter().cloned(),
        );
        increment
    }

    /// Prepare `name` in both the old and the delta view, and derive its new set
    fn prepare_all(
        &mut self,
        env: &mut ComposeEnv<'_, '_, S>,
        name: &DecompositionName,
    ) -> AnalysisResult<bool> {
        if self.new.ready.contains_key(name) {
            return Ok(true);
        }
        let have_delta = self.prepare(env, View::Delta, name)?;
        let have_old = self.prepare(env, View::Old, name)?;
        match (have_old, have_delta) {
            (false, false) => Ok(false),
            (true, false) => {
                let old = self.old.ready[name].clone();
                self.new.ready.insert(name.clone(), old);
                Ok(true)
            }
            (false, true) => {
                let delta = self.delta.ready[name].clone();
                self.new.ready.insert(name.clone(), delta);
                Ok(true)
            }
            (true, true) => {
                let mut both = self.old.unframed.get(name).cloned().unwrap_or_default();
                let mut real_delta = StructureSet::new();
                if let Some(delta) = self.delta.unframed.get(name) {
                    for structure in delta.iter() {
                        if let Some(added) = both.merge_with(structure.clone()) {
                            real_delta.merge_with(added);
                        }
                    }
                }
                let framed = self.frame(env, both, name);
                self.new.ready.insert(name.clone(), framed);
                // Abstraction may have merged delta structures into old ones
                if name.is_abstraction() {
                    let framed = self.frame(env, real_delta, name);
                    self.delta.ready.insert(name.clone(), framed);
                }
                Ok(true)
            }
        }
    }

    /// Make the filtered, framed structures of component `name` ready in `view`.
    ///
    /// Returns whether any structure is ready.
    fn prepare(
        &mut self,
        env: &mut ComposeEnv<'_, '_, S>,
        view: View,
        name: &DecompositionName,
    ) -> AnalysisResult<bool> {
        if self.view(view).ready.contains_key(name) {
            return Ok(true);
        }
        let table = env.cx.table;
        let config = env.cx.config;
        let mut before = self.view(view).before.get(name).cloned();
        if before.is_none() && (table.is_parametric() || name.is_abstraction()) {
            before = self.restore(env, view, name)?;
        }
        let Some(mut before) = before else {
            return Ok(false);
        };
        if name.is_abstraction() && config.composition_abstraction() {
            before = before.map(|structure| structure.decompose(name));
        }
        let filtered =
            env.filter.filter(name, &before, env.composer.is_single_use(name), env.cx.status);
        if !filtered.is_empty() {
            let framed = self.frame(env, filtered.clone(), name);
            let cache = self.view_mut(view);
            cache.unframed.put(name.clone(), filtered);
            cache.ready.insert(name.clone(), framed);
            return Ok(true);
        }
        Ok(false)
    }

    /// Rebuild the structures of `name` from an isomorphic component, or from the origin of an
    /// abstraction, present in the snapshot of `view`.
    fn restore(
        &mut self,
        env: &ComposeEnv<'_, '_, S>,
        view: View,
        name: &DecompositionName,
    ) -> AnalysisResult<Option<StructureSet<S>>> {
        let table = env.cx.table;
        let before = &mut self.view_mut(view).before;
        let mut origin: Option<DecompositionName> = None;
        for candidate in table.restore_candidates(name) {
            if !before.contains_name(&candidate) {
                continue;
            }
            match origin.as_ref() {
                None => origin = Some(candidate),
                Some(first) if !name.is_abstraction() => {
                    return Err(AnalysisError::AmbiguousRestore {
                        name: name.label().into(),
                        first: first.label().into(),
                        second: candidate.label().into(),
                    });
                }
                Some(_) => (),
            }
        }
        let Some(origin) = origin else {
            return Ok(None);
        };
        let Some(set) = before.get(&origin) else {
            return Ok(None);
        };
        let restored = match table.permutation(&origin, name) {
            Some(permutation) if !permutation.is_identity() => {
                set.map(|structure| structure.permute(&permutation))
            }
            _ => set.clone(),
        };
        log::trace!(target: "composer", "restored {name} from {origin}");
        // With more than two isomorphic components, a cached restoration could later be mistaken
        // for a second restore candidate
        if !table.is_multi() {
            before.put(name.clone(), restored.clone());
        }
        Ok(Some(restored))
    }

    fn frame(
        &self,
        env: &ComposeEnv<'_, '_, S>,
        set: StructureSet<S>,
        name: &DecompositionName,
    ) -> StructureSet<S> {
        match env.cx.action.pre_framer(name) {
            Some(framer) => set.map(|structure| framer.frame(structure, Some(name))),
            None => set,
        }
    }

    /// Compose the ready set of `one` in its view with the ready set of `two` in its view
    fn compose_views(
        &self,
        env: &ComposeEnv<'_, '_, S>,
        (one_view, one): (View, &DecompositionName),
        (two_view, two): (View, &DecompositionName),
    ) -> StructureSet<S> {
        let (Some(one_set), Some(two_set)) =
            (self.view(one_view).ready.get(one), self.view(two_view).ready.get(two))
        else {
            return StructureSet::new();
        };
        let vocabulary = ready_vocabulary(env, one, one_set).union(&ready_vocabulary(env, two, two_set));
        one_set.compose(two_set, &vocabulary).collect()
    }
}

/// The vocabulary the ready structures of `name` range over, once framed for the action
fn ready_vocabulary<S: AbstractStructure>(
    env: &ComposeEnv<'_, '_, S>,
    name: &DecompositionName,
    set: &StructureSet<S>,
) -> Vocabulary {
    if name.is_abstraction() && !env.cx.config.composition_abstraction() {
        // Not abstracted, the structures keep the vocabulary of the component they came from
        return set.iter().next().map(S::vocabulary).unwrap_or_default();
    }
    match env.cx.action.pre_framer(name) {
        Some(framer) => framer.framed_vocabulary(name.vocabulary()),
        None => name.vocabulary().clone(),
    }
}

struct ComposeEnv<'a, 'cx, S: AbstractStructure> {
    composer: &'a Composer,
    cx: &'a mut StepContext<'cx, S>,
    filter: &'a CompositionFilter<'a, S>,
}
