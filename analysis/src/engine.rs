use core::ops::ControlFlow;
use std::{collections::BTreeSet, rc::Rc, time::Instant};

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::{
    AbstractStructure, Action, ActionId, AnalysisError, AnalysisResult, AnalysisStatus,
    CartesianElement, ControlFlowGraph, DecompositionName, Edge, EngineConfig, FxHashMap,
    LocationId, NameTable, Phase, StructureSet, Vocabulary,
    composition::{ActionRun, CompositionPlan, PlanKey, Snapshot, StepContext},
};

/// How a call to [Engine::run] ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The worklist is empty, every location holds its final state
    Fixpoint,
    /// A budget was exhausted, or the stop predicate fired, before reaching a fixpoint
    Stopped,
}

/// The result of seeding the entry location with initial structures
#[derive(Debug)]
pub struct SeedReport<S> {
    /// The number of initial structures which were consistent
    pub seeded: usize,
    /// The initial structures found inconsistent, which were dropped
    pub inconsistent: Vec<S>,
}

/// Computes a fixpoint over a control-flow graph whose locations hold decomposed abstract
/// states.
///
/// The engine is a chaotic-iteration worklist solver. Each time a location is popped from the
/// worklist, the part of its state which was not processed yet is handed to every action leaving
/// it. For every action, a [CompositionPlan] composes the components the action needs, the
/// action's transformer is applied to each composed structure, and the results are decomposed
/// back into components and joined into the successor location. A successor whose state grew is
/// pushed back onto the worklist.
///
/// Plans are cached for the duration of an analysis, keyed by the action, the names present at
/// the location, and the successor. The cache is dropped once the analysis ends, and entries can
/// be evicted earlier with [Engine::retire].
pub struct Engine<S: AbstractStructure> {
    config: EngineConfig,
    table: NameTable,
    graph: ControlFlowGraph<S>,
    worklist: BTreeSet<LocationId>,
    plans: FxHashMap<PlanKey, Rc<CompositionPlan>>,
    status: AnalysisStatus,
    stop: Option<Box<dyn Fn(&AnalysisStatus) -> bool>>,
}

impl<S: AbstractStructure> Engine<S> {
    /// Create an engine analyzing `graph` over the components declared in `table`
    pub fn new(
        config: EngineConfig,
        table: NameTable,
        graph: ControlFlowGraph<S>,
    ) -> AnalysisResult<Self> {
        if table.is_empty() {
            return Err(AnalysisError::NoDecompositionNames);
        }
        Ok(Self {
            config,
            table,
            graph,
            worklist: BTreeSet::new(),
            plans: FxHashMap::default(),
            status: AnalysisStatus::new(),
            stop: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn table(&self) -> &NameTable {
        &self.table
    }

    #[inline]
    pub fn graph(&self) -> &ControlFlowGraph<S> {
        &self.graph
    }

    #[inline]
    pub fn status(&self) -> &AnalysisStatus {
        &self.status
    }

    /// The number of plans currently cached
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Register a predicate which stops the analysis when it returns true.
    ///
    /// The predicate is evaluated whenever a message is reported, and whenever a location grows.
    pub fn set_stop(&mut self, stop: impl Fn(&AnalysisStatus) -> bool + 'static) {
        self.stop = Some(Box::new(stop));
    }

    /// Evict every cached plan for `action` leading to `successor`
    pub fn retire(&mut self, action: ActionId, successor: LocationId) {
        self.plans.retain(|key, _| key.action != action || key.successor != successor);
    }

    /// Seed the entry location with `initial`.
    ///
    /// Every structure is split into the base components of the name table. Structures found
    /// inconsistent are dropped, and returned in the report.
    pub fn seed(&mut self, initial: impl IntoIterator<Item = S>) -> AnalysisResult<SeedReport<S>> {
        let mut report = SeedReport {
            seeded: 0,
            inconsistent: vec![],
        };
        let Some(entry) = self.graph.entry() else {
            log::warn!(target: "decompose-engine", "cannot seed a graph without locations");
            return Ok(report);
        };
        let location = &mut self.graph.locations[entry];
        let extra = Vocabulary::new();
        for structure in initial {
            let mut consistent = true;
            for name in self.table.names().filter(|name| !name.is_abstraction()) {
                match structure.decompose(name).prepare_for_action(name, &extra) {
                    Some(prepared) => {
                        location.element_mut().join_structure(name, prepared.decompose(name));
                    }
                    None if consistent => {
                        log::warn!(target: "decompose-engine", "dropping inconsistent initial structure {structure:?}");
                        consistent = false;
                        report.inconsistent.push(structure.clone());
                    }
                    None => (),
                }
            }
            if consistent {
                report.seeded += 1;
            }
        }
        if location.is_empty() {
            log::warn!(target: "decompose-engine", "no consistent initial structure, '{}' is left empty", location.label());
        }
        location.element_mut().permute_back(&self.table)?;
        self.status.set_structures(location.len());
        self.worklist.insert(entry);
        Ok(report)
    }

    /// Run the analysis until a fixpoint is reached, or until it is stopped.
    ///
    /// A stopped analysis picks up where it left off when run again.
    pub fn run(&mut self) -> AnalysisResult<Outcome> {
        loop {
            if let Some(outcome) = self.step()? {
                return Ok(outcome);
            }
        }
    }

    /// Process the next location of the worklist.
    ///
    /// Returns `None` while work remains, and the outcome of the analysis once it is over.
    pub fn step(&mut self) -> AnalysisResult<Option<Outcome>> {
        let Some(location) = self.worklist.pop_first() else {
            return Ok(Some(self.finish(Outcome::Fixpoint)));
        };
        self.status.record_iteration(self.worklist.len() + 1);
        match self.process(location) {
            Ok(ControlFlow::Continue(())) => Ok(None),
            Ok(ControlFlow::Break(())) => Ok(Some(self.finish(Outcome::Stopped))),
            Err(err) => {
                self.plans.clear();
                Err(err)
            }
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.plans.clear();
        log::info!(target: "decompose-engine", "analysis ended ({outcome:?})\n{}", self.status);
        outcome
    }

    fn process(&mut self, id: LocationId) -> AnalysisResult<ControlFlow<()>> {
        let Self {
            config,
            table,
            graph,
            worklist,
            plans,
            status,
            stop,
        } = self;
        let (config, table, stop) = (&*config, &*table, stop.as_deref());
        let ControlFlowGraph {
            locations, actions, ..
        } = graph;

        let location = &mut locations[id];
        log::debug!(target: "decompose-engine", "processing {}", location.status());
        let label = CompactString::from(location.label());
        let edges = SmallVec::<[Edge; 2]>::from_slice(location.edges());
        let (old, delta) = location.retrieve_delta();
        let pending = (old.clone(), delta.clone());
        let mut snapshot = Snapshot {
            old,
            delta,
            new: location.element().clone(),
        };
        let names: BTreeSet<DecompositionName> = snapshot.new.names().cloned().collect();

        let stopped = 'edges: {
            for edge in edges {
                let action = actions[edge.action].as_ref();
                let in_action = |err: AnalysisError| err.in_action(&label, action);
                check_names(config, &label, action, "before", &snapshot.new)?;

                let key = PlanKey {
                    action: edge.action,
                    names: names.iter().cloned().collect(),
                    incremental: config.is_incremental(),
                    successor: edge.target,
                };
                let plan = Rc::clone(plans.entry(key).or_insert_with(|| {
                    Rc::new(CompositionPlan::new(action, &names, config.is_incremental(), table))
                }));
                let mut run = ActionRun::new(Rc::clone(&plan), snapshot);
                log::debug!(target: "decompose-engine", "applying {action} to {}{}", label, if run.is_incremental() { " incrementally" } else { "" });

                loop {
                    let started = Instant::now();
                    let next = run.next_step(&mut StepContext {
                        action,
                        table,
                        successor: locations[edge.target].element(),
                        config,
                        status: &mut *status,
                    });
                    status.record_time(Phase::Compose, started.elapsed());
                    let Some((source, composed)) = next.map_err(in_action)? else {
                        break;
                    };

                    let mut results = StructureSet::new();
                    for structure in composed.iter() {
                        let mut transition = action.apply(structure, false).map_err(in_action)?;
                        if !transition.messages.is_empty() {
                            transition = action.apply(structure, true).map_err(in_action)?;
                        }
                        let reported = locations[id].add_messages(transition.messages);
                        status.add_messages(reported);
                        if status.should_finish(config, stop) {
                            log::debug!(target: "decompose-engine", "stopping while applying {action} at {label}");
                            break 'edges true;
                        }
                        results.extend(transition.results);
                    }

                    let started = Instant::now();
                    run.after(action, config, &source, &results);
                    status.record_time(Phase::Decompose, started.elapsed());
                }

                if let Err(err) = run.verify() {
                    let (_, snapshot) = run.finish();
                    replay(plan, snapshot, &mut StepContext {
                        action,
                        table,
                        successor: locations[edge.target].element(),
                        config,
                        status: &mut *status,
                    });
                    return Err(in_action(err));
                }
                let (mut decomposed, returned) = run.finish();
                snapshot = returned;
                if decomposed.is_empty() {
                    continue;
                }

                decomposed.permute_back(table).map_err(in_action)?;
                let added = decomposed.len();
                let started = Instant::now();
                let successor = &mut locations[edge.target];
                let changed = successor.join(decomposed);
                status.record_time(Phase::Join, started.elapsed());
                check_names(config, successor.label(), action, "after", successor.element())?;

                if changed.changed() {
                    log::debug!(target: "decompose-engine", "{action}: {changed}, {}", successor.status());
                    // A sink has nothing to propagate
                    if !successor.edges().is_empty() {
                        worklist.insert(edge.target);
                    }
                    status.add_structures(added);
                    if status.should_finish(config, stop) {
                        break 'edges true;
                    }
                }
            }
            false
        };

        if stopped {
            // Whatever this visit did not finish is processed again when the analysis resumes
            let (old, delta) = pending;
            locations[id].restore_delta(old, delta);
            worklist.insert(id);
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// Run `plan` once more with tracing enabled, so that the transformer reports every structure
/// it receives. Only used to diagnose a decomposition failure.
fn replay<S: AbstractStructure>(
    plan: Rc<CompositionPlan>,
    snapshot: Snapshot<S>,
    cx: &mut StepContext<'_, S>,
) {
    let mut run = ActionRun::new(plan, snapshot);
    while let Ok(Some((name, composed))) = run.next_step(cx) {
        for structure in composed.iter() {
            log::debug!(target: "decompose-engine", "replaying {} on {name}: {structure:?}", cx.action);
            if let Err(err) = cx.action.apply(structure, true) {
                log::debug!(target: "decompose-engine", "replay failed: {err}");
            }
        }
    }
}

/// Check that no component stored in `element` subsumes another one
fn check_names<S: AbstractStructure>(
    config: &EngineConfig,
    location: &str,
    action: &dyn Action<S>,
    stage: &'static str,
    element: &CartesianElement<S>,
) -> AnalysisResult<()> {
    if !config.sanity_checks() {
        return Ok(());
    }
    let names = element.names().filter(|name| !name.is_abstraction());
    for outer in names.clone() {
        for inner in names.clone() {
            if inner != outer && outer.contains(inner) {
                return Err(AnalysisError::NameSubsumption {
                    location: location.into(),
                    action: action.to_string(),
                    stage,
                    outer: outer.label().into(),
                    inner: inner.label().into(),
                });
            }
        }
    }
    Ok(())
}
