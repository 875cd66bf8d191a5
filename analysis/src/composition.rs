//! Composition strategies: how an action's input is assembled from stored components, and how its
//! output is split back.
//!
//! For every action applied at a location, the engine obtains a [CompositionPlan]. The plan is a
//! sequence of steps, one for each composed name some target is derived from. Each step composes
//! its name (incrementally when possible), hands the composed structures to the transformer, and
//! decomposes the transformer's output into the step's targets. Intermediate compositions are
//! cached across steps, and released after the last step needing them.
//!
//! Plans only depend on the action, the names present at the location, and the configuration, so
//! the engine caches them. The caches holding actual structures live in an [ActionRun], which is
//! created from a plan for each application of the action, and consumed once it is done.
mod composer;
mod decomposition;
mod filter;

use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

pub use self::{
    composer::{Composer, ComposerState, Snapshot},
    decomposition::{Decomposition, DecompositionState},
    filter::CompositionFilter,
};
use crate::{
    AbstractStructure, Action, ActionId, AnalysisResult, AnalysisStatus, CartesianElement,
    ComposedFramer, DecompositionName, EngineConfig, LocationId, NameTable, StructureSet,
};

/// Identifies a cached [CompositionPlan]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub action: ActionId,
    /// The names the plan was built for
    pub names: Vec<DecompositionName>,
    pub incremental: bool,
    pub successor: LocationId,
}

/// What a step needs from the engine while it runs
pub struct StepContext<'a, S: AbstractStructure> {
    pub action: &'a dyn Action<S>,
    pub table: &'a NameTable,
    /// The element of the location the action leads to
    pub successor: &'a CartesianElement<S>,
    pub config: &'a EngineConfig,
    pub status: &'a mut AnalysisStatus,
}

#[derive(Debug)]
struct Step {
    /// The composed name fed to the transformer
    compose: DecompositionName,
    /// The targets derived from the output of the transformer
    decompose: Vec<DecompositionName>,
    /// Cached names no later step needs
    remove: Vec<DecompositionName>,
}

impl Step {
    fn new(compose: DecompositionName) -> Self {
        Self {
            compose,
            decompose: vec![],
            remove: vec![],
        }
    }
}

/// The steps needed to apply one action at one location
#[derive(Debug)]
pub struct CompositionPlan {
    composer: Composer,
    steps: Vec<Step>,
}

impl CompositionPlan {
    /// Build the plan for `action` at a location holding the components `names`
    pub fn new<S: AbstractStructure>(
        action: &dyn Action<S>,
        names: &BTreeSet<DecompositionName>,
        incremental: bool,
        table: &NameTable,
    ) -> Self {
        let composer = Composer::new(action.composition(), incremental, names);
        let decomposition =
            Decomposition::new(action.decomposition(), composer.composed_names(), incremental, table);

        let mut steps = Vec::<Step>::new();
        let mut by_source = BTreeMap::<DecompositionName, usize>::new();
        for (target, sources) in decomposition.iter() {
            for source in sources {
                let index = *by_source.entry(source.clone()).or_insert_with(|| {
                    steps.push(Step::new(source.clone()));
                    steps.len() - 1
                });
                if !target.is_abstraction() {
                    steps[index].decompose.push(target.clone());
                }
            }
        }

        // A cached name is released by the last step using it
        let mut needed = BTreeSet::new();
        for step in steps.iter_mut().rev() {
            for name in composer.intermediates(&step.compose) {
                if needed.insert(name.clone()) {
                    step.remove.push(name);
                }
            }
        }

        log::debug!(target: "composition-plan", "plan for {action}: {steps:?}");
        Self { composer, steps }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One application of a [CompositionPlan] at a location.
///
/// The run owns the snapshots of the location it composes from, and gives them back from
/// [ActionRun::finish], so that the next action at the location can reuse them.
pub struct ActionRun<S> {
    plan: Rc<CompositionPlan>,
    composer: ComposerState<S>,
    decomposition: DecompositionState<S>,
    /// The index of the next step to start
    next: usize,
    /// The step whose composed structures were handed out, and which is not finished yet
    current: Option<usize>,
}

impl<S: AbstractStructure> ActionRun<S> {
    pub fn new(plan: Rc<CompositionPlan>, snapshot: Snapshot<S>) -> Self {
        let composer = ComposerState::new(&plan.composer, snapshot);
        Self {
            plan,
            composer,
            decomposition: DecompositionState::new(),
            next: 0,
            current: None,
        }
    }

    /// Whether this run composes the increment of the location only
    pub fn is_incremental(&self) -> bool {
        self.composer.is_incremental()
    }

    /// Finish the current step, and compose the input of the next step having any.
    ///
    /// Returns the composed name and its structures, or `None` once every step is done.
    pub fn next_step(
        &mut self,
        cx: &mut StepContext<'_, S>,
    ) -> AnalysisResult<Option<(DecompositionName, StructureSet<S>)>> {
        if let Some(index) = self.current.take() {
            self.finish_step(index);
        }
        let plan = Rc::clone(&self.plan);
        while let Some(step) = plan.steps.get(self.next) {
            let index = self.next;
            self.next += 1;
            let filter = CompositionFilter::new(
                cx.action,
                cx.table,
                cx.successor,
                cx.config.skip_filter(),
                &step.decompose,
            );
            let composed = self.composer.compose(&plan.composer, &step.compose, cx, &filter)?;
            self.decomposition.begin_step();
            if let Some(set) = self.composer.composed(&step.compose).filter(|_| composed) {
                let set = match cx.action.post_framer(&step.compose) {
                    Some(framer) => set.map(|structure| framer.frame(structure, None)),
                    None => set.clone(),
                };
                self.current = Some(index);
                return Ok(Some((step.compose.clone(), set)));
            }
            self.finish_step(index);
        }
        Ok(None)
    }

    /// Decompose the transformer output `results` for the composed name `source` into the targets
    /// of the current step.
    pub fn after(
        &mut self,
        action: &dyn Action<S>,
        config: &EngineConfig,
        source: &DecompositionName,
        results: &StructureSet<S>,
    ) {
        let Some(index) = self.current else {
            return;
        };
        for target in self.plan.steps[index].decompose.iter() {
            let framer = ComposedFramer::compose(action.post_framer(target), action.pre_framer(target));
            self.decomposition.decompose(
                source,
                target,
                results,
                framer.as_deref(),
                config.focus_decompose_names(),
            );
        }
    }

    fn finish_step(&mut self, index: usize) {
        let step = &self.plan.steps[index];
        for name in step.remove.iter() {
            self.composer.remove_old(name);
            self.composer.remove_delta(name);
            self.composer.remove_new(name);
        }
        for target in step.decompose.iter() {
            self.decomposition.done(target);
        }
    }

    /// Fail if some target of the plan could not be decomposed
    pub fn verify(&self) -> AnalysisResult<()> {
        self.decomposition.verify()
    }

    /// Consume the run, returning the decomposed output of the action, and the snapshots of the
    /// location stripped of abstraction components.
    pub fn finish(mut self) -> (CartesianElement<S>, Snapshot<S>) {
        if let Some(index) = self.current.take() {
            self.finish_step(index);
        }
        (self.decomposition.into_decomposed(), self.composer.done())
    }
}
