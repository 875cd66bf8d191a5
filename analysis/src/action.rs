use core::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::{AbstractStructure, AnalysisResult, DecompositionName, Framer, Predicate, Vocabulary};

/// The components an action needs combined before its transformer runs.
///
/// This is a disjunction of tuples: each tuple is composed into one name, and the transformer is
/// applied to the structures of every composed name.
pub type CompositionFormula = Vec<SmallVec<[DecompositionName; 4]>>;

/// How the output of a transformer is split back into components
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DecompositionPolicy {
    /// Every composed name is its own target
    #[default]
    Identity,
    /// Every tracked name is a target, derivable from each composed name covering its vocabulary
    Automatic,
    /// Each target is derivable from the composed names covering any one of its sources
    Explicit(Vec<(DecompositionName, SmallVec<[DecompositionName; 2]>)>),
}

/// The outcome of applying a transformer to a single structure
#[derive(Debug, Clone)]
pub struct Transition<S> {
    pub results: Vec<S>,
    /// Messages reported for the input structure
    pub messages: Vec<String>,
}

impl<S> Transition<S> {
    pub fn new(results: Vec<S>) -> Self {
        Self {
            results,
            messages: vec![],
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

/// A transformer labeling an edge of the control-flow graph.
///
/// Besides the transformer itself, an action declares what the engine needs in order to compose
/// its input and decompose its output.
pub trait Action<S: AbstractStructure>: fmt::Display {
    /// The formula a structure must satisfy for the transformer to apply, `None` meaning `true`
    fn precondition(&self) -> Option<&S::Formula> {
        None
    }

    /// The predicates mentioned by [Action::precondition]
    fn precondition_vocabulary(&self) -> Vocabulary {
        Vocabulary::new()
    }

    /// The components to combine before applying the transformer, `None` meaning the transformer
    /// runs on each stored component separately.
    fn composition(&self) -> Option<&CompositionFormula> {
        None
    }

    fn decomposition(&self) -> &DecompositionPolicy;

    /// For each predicate the action may update, a formula which holds in a structure where the
    /// update is visible.
    fn change_formulas(&self) -> &[(Predicate, S::Formula)] {
        &[]
    }

    /// Whether the action allocates or deallocates individuals
    fn is_universe_changing(&self) -> bool {
        false
    }

    /// The framer applied to the structures of component `name` before composition
    fn pre_framer(&self, _name: &DecompositionName) -> Option<Rc<dyn Framer<S>>> {
        None
    }

    /// The framer applied to the structures of composed name `name` before the transformer
    fn post_framer(&self, _name: &DecompositionName) -> Option<Rc<dyn Framer<S>>> {
        None
    }

    /// Apply the transformer to `structure`.
    ///
    /// When `trace` is set the engine is diagnosing a failure, and the transformer should report
    /// what it does in detail.
    fn apply(&self, structure: &S, trace: bool) -> AnalysisResult<Transition<S>>;
}
