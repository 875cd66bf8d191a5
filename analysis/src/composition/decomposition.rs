use std::collections::{BTreeMap, BTreeSet};

use crate::{
    AbstractStructure, AnalysisError, AnalysisResult, CartesianElement, DecompositionName,
    DecompositionPolicy, Framer, NameTable, StructureSet,
};

/// For each target name, the composed names whose transformer output it is derived from.
#[derive(Debug, Default)]
pub struct Decomposition {
    mapping: BTreeMap<DecompositionName, BTreeSet<DecompositionName>>,
}

impl Decomposition {
    /// Resolve `policy` against the names an action composes.
    ///
    /// In incremental mode a target is only derived from composed names containing it, since any
    /// other composed name only holds the increment of its components.
    pub fn new<'a>(
        policy: &DecompositionPolicy,
        composed: impl IntoIterator<Item = &'a DecompositionName> + Clone,
        incremental: bool,
        table: &NameTable,
    ) -> Self {
        let derivable = |target: &DecompositionName, from: &DecompositionName| {
            (!incremental || from.contains(target)) && target.can_decompose_from(from)
        };
        let mut mapping = BTreeMap::<DecompositionName, BTreeSet<DecompositionName>>::new();
        match policy {
            DecompositionPolicy::Identity => {
                for name in composed {
                    mapping.entry(name.clone()).or_default().insert(name.clone());
                }
            }
            DecompositionPolicy::Automatic => {
                for target in table.names() {
                    let sources = composed
                        .clone()
                        .into_iter()
                        .filter(|from| derivable(target, *from))
                        .cloned()
                        .collect();
                    mapping.insert(target.clone(), sources);
                }
            }
            DecompositionPolicy::Explicit(rules) => {
                for (target, sources) in rules {
                    let entry = mapping.entry(target.clone()).or_default();
                    for source in sources {
                        entry.extend(
                            composed.clone().into_iter().filter(|from| derivable(source, *from)).cloned(),
                        );
                    }
                }
            }
        }
        Self { mapping }
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&DecompositionName, &BTreeSet<DecompositionName>)> + '_ {
        self.mapping.iter()
    }
}

/// The decomposed output of one run of a composition plan.
///
/// The output of each step is split into the step's targets and kept apart until the step is
/// done, at which point it is met with what previous steps derived for the same targets.
pub struct DecompositionState<S> {
    decomposed: CartesianElement<S>,
    step: CartesianElement<S>,
    /// Targets which could not be split without losing precision, with an offending structure
    must_decompose: BTreeMap<DecompositionName, S>,
    /// Targets derived without a precision failure in at least one step
    succeeded: BTreeSet<DecompositionName>,
}

impl<S: AbstractStructure> Default for DecompositionState<S> {
    fn default() -> Self {
        Self {
            decomposed: CartesianElement::new(),
            step: CartesianElement::new(),
            must_decompose: BTreeMap::new(),
            succeeded: BTreeSet::new(),
        }
    }
}

impl<S: AbstractStructure> DecompositionState<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_step(&mut self) {
        self.step = CartesianElement::new();
    }

    /// Split the transformer output `results` for composed name `source` into `target`.
    ///
    /// A framer, when given, is undone on every structure before it is split.
    pub fn decompose(
        &mut self,
        source: &DecompositionName,
        target: &DecompositionName,
        results: &StructureSet<S>,
        framer: Option<&dyn Framer<S>>,
        focus: bool,
    ) {
        if !source.contains(target) {
            return;
        }
        match framer {
            None => self.decompose_merged(target, results, focus),
            Some(framer) => self.decompose_framed(target, results, framer),
        }
    }

    fn decompose_merged(&mut self, target: &DecompositionName, results: &StructureSet<S>, focus: bool) {
        let mut composed = results.clone();
        let mut problematic = composed.iter().find(|structure| !structure.can_decompose(target)).cloned();
        if focus && problematic.is_some() {
            log::trace!(target: "decomposition", "focusing {} structures on {target}", composed.len());
            composed = composed
                .iter()
                .flat_map(|structure| structure.focus(target.vocabulary()))
                .collect();
            problematic = None;
        }
        match problematic {
            None => {
                for structure in composed.iter() {
                    self.step.join_structure(target, structure.decompose(target));
                }
                self.succeeded.insert(target.clone());
            }
            Some(example) => self.record_failure(target, example),
        }
    }

    fn decompose_framed(&mut self, target: &DecompositionName, results: &StructureSet<S>, framer: &dyn Framer<S>) {
        for framed in results.iter() {
            let unframed = framer.unframe(framed, target);
            match unframed.iter().find(|structure| !structure.can_decompose(target)) {
                None => {
                    for structure in unframed.iter() {
                        self.step.join_structure(target, structure.decompose(target));
                    }
                    self.succeeded.insert(target.clone());
                }
                Some(example) if !self.step.contains_name(target) => {
                    self.record_failure(target, example.clone());
                    return;
                }
                Some(_) => (),
            }
        }
    }

    fn record_failure(&mut self, target: &DecompositionName, example: S) {
        if !self.step.contains_name(target) {
            log::debug!(target: "decomposition", "cannot decompose {target} from {example:?}");
            self.must_decompose.insert(target.clone(), example);
        }
    }

    /// Finish the current step for `target`, meeting what the step derived with the output of
    /// the previous steps.
    pub fn done(&mut self, target: &DecompositionName) {
        if let Some(set) = self.step.get(target) {
            self.decomposed.meet_name(target, set);
        }
    }

    /// Fail if some target could not be derived in any step of the run
    pub fn verify(&self) -> AnalysisResult<()> {
        let mut failed = self
            .must_decompose
            .iter()
            .filter(|(target, _)| !self.succeeded.contains(*target))
            .peekable();
        let Some((_, example)) = failed.peek() else {
            return Ok(());
        };
        let example = format!("{example:?}");
        let targets = failed.map(|(target, _)| target.label()).collect::<Vec<_>>().join(", ");
        Err(AnalysisError::DecompositionFailed { targets, example })
    }

    pub fn decomposed(&self) -> &CartesianElement<S> {
        &self.decomposed
    }

    pub fn into_decomposed(self) -> CartesianElement<S> {
        self.decomposed
    }
}
