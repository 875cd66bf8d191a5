//! A three-valued toy domain for exercising the engine.
//!
//! A [ToyStructure] maps each predicate of its vocabulary to a [Kleene] value, and represents
//! every concrete state agreeing with its definite values. Structures built by [toy] never join,
//! so a set of them is a plain disjunction.
use core::{cell::Cell, fmt};
use std::{collections::BTreeMap, rc::Rc};

use cranelift_entity::EntityRef;
use smallvec::SmallVec;

use crate::{
    AbstractStructure, Action, AnalysisError, AnalysisResult, CompositionFormula,
    DecompositionName, DecompositionPolicy, Framer, Permutation, Predicate, Transition,
    Vocabulary,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kleene {
    False,
    Unknown,
    True,
}

impl From<bool> for Kleene {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToyFormula {
    True,
    False,
    Holds(Predicate),
    NotHolds(Predicate),
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ToyStructure {
    values: BTreeMap<Predicate, Kleene>,
    inconsistent: bool,
    /// Joins with other joinable structures differing in one definite predicate
    joinable: bool,
}

/// A consistent structure with the given definite values
pub fn toy(values: &[(usize, bool)]) -> ToyStructure {
    ToyStructure {
        values: values.iter().map(|(p, v)| (Predicate::new(*p), Kleene::from(*v))).collect(),
        inconsistent: false,
        joinable: false,
    }
}

pub fn p(index: usize) -> Predicate {
    Predicate::new(index)
}

impl ToyStructure {
    /// A structure violating some integrity constraint
    pub fn inconsistent(values: &[(usize, bool)]) -> Self {
        Self {
            inconsistent: true,
            ..toy(values)
        }
    }

    /// A structure in which every predicate of `predicates` is unknown
    pub fn unknown(predicates: &[usize]) -> Self {
        Self {
            values: predicates.iter().map(|p| (Predicate::new(*p), Kleene::Unknown)).collect(),
            inconsistent: false,
            joinable: false,
        }
    }

    pub fn joinable(values: &[(usize, Kleene)]) -> Self {
        Self {
            values: values.iter().map(|(p, v)| (Predicate::new(*p), *v)).collect(),
            inconsistent: false,
            joinable: true,
        }
    }

    pub fn value(&self, predicate: Predicate) -> Kleene {
        self.values.get(&predicate).copied().unwrap_or(Kleene::Unknown)
    }

    pub fn with(mut self, predicate: Predicate, value: Kleene) -> Self {
        self.values.insert(predicate, value);
        self
    }
}

impl fmt::Debug for ToyStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.inconsistent { "!{" } else { "{" })?;
        for (i, (predicate, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let value = match value {
                Kleene::False => "0",
                Kleene::Unknown => "1/2",
                Kleene::True => "1",
            };
            write!(f, "{predicate}={value}")?;
        }
        f.write_str("}")
    }
}

impl AbstractStructure for ToyStructure {
    type Formula = ToyFormula;

    fn vocabulary(&self) -> Vocabulary {
        self.values.keys().copied().collect()
    }

    fn evaluate(&self, formula: &ToyFormula) -> bool {
        match formula {
            ToyFormula::True => true,
            ToyFormula::False => false,
            ToyFormula::Holds(predicate) => self.value(*predicate) != Kleene::False,
            ToyFormula::NotHolds(predicate) => self.value(*predicate) != Kleene::True,
        }
    }

    fn permute(&self, permutation: &Permutation) -> Self {
        Self {
            values: self.values.iter().map(|(p, v)| (permutation.apply(*p), *v)).collect(),
            inconsistent: self.inconsistent,
            joinable: self.joinable,
        }
    }

    fn focus(&self, vocabulary: &Vocabulary) -> Vec<Self> {
        let mut cases = vec![self.clone()];
        for predicate in vocabulary.iter() {
            if self.values.get(&predicate) == Some(&Kleene::Unknown) {
                cases = cases
                    .into_iter()
                    .flat_map(|case| {
                        [case.clone().with(predicate, Kleene::False), case.with(predicate, Kleene::True)]
                    })
                    .collect();
            }
        }
        cases
    }

    fn update_vocabulary(&mut self, vocabulary: &Vocabulary) {
        self.values.retain(|predicate, _| vocabulary.contains(*predicate));
        for predicate in vocabulary.iter() {
            self.values.entry(predicate).or_insert(Kleene::Unknown);
        }
    }

    fn prepare_for_action(&self, _name: &DecompositionName, extra: &Vocabulary) -> Option<Self> {
        if self.inconsistent {
            return None;
        }
        let mut prepared = self.clone();
        for predicate in extra.iter() {
            prepared.values.entry(predicate).or_insert(Kleene::Unknown);
        }
        Some(prepared)
    }

    fn join(&self, other: &Self) -> Option<Self> {
        if !(self.joinable && other.joinable) || self.vocabulary() != other.vocabulary() {
            return None;
        }
        let differing = self
            .values
            .iter()
            .zip(other.values.values())
            .filter(|((_, mine), theirs)| mine != theirs)
            .map(|((predicate, mine), theirs)| (*predicate, *mine, *theirs))
            .take(2)
            .collect::<SmallVec<[_; 2]>>();
        match differing.as_slice() {
            [] => Some(self.clone()),
            [(predicate, mine, theirs)] if *mine != Kleene::Unknown && *theirs != Kleene::Unknown => {
                Some(self.clone().with(*predicate, Kleene::Unknown))
            }
            _ => None,
        }
    }

    fn meet(&self, other: &Self) -> Option<Self> {
        let mut met = self.clone();
        for (predicate, value) in other.values.iter() {
            let merged = match (met.value(*predicate), *value) {
                (Kleene::Unknown, value) => value,
                (mine, Kleene::Unknown) => mine,
                (mine, theirs) if mine == theirs => mine,
                _ => return None,
            };
            met.values.insert(*predicate, merged);
        }
        met.inconsistent |= other.inconsistent;
        Some(met)
    }

    fn can_decompose(&self, name: &DecompositionName) -> bool {
        name.vocabulary().iter().all(|predicate| self.values.get(&predicate) != Some(&Kleene::Unknown))
    }

    fn decompose(&self, name: &DecompositionName) -> Self {
        let mut projected = self.clone();
        projected.values.retain(|predicate, _| name.vocabulary().contains(*predicate));
        projected
    }
}

/// Hides a fixed set of predicates across a transformer
pub struct ToyFramer {
    hidden: Vocabulary,
    /// The values hidden predicates are restored to, unknown otherwise
    held: BTreeMap<Predicate, Kleene>,
}

impl ToyFramer {
    pub fn hiding(predicates: &[usize]) -> Self {
        Self {
            hidden: predicates.iter().map(|p| Predicate::new(*p)).collect(),
            held: BTreeMap::new(),
        }
    }

    /// Hide predicates whose value the transformer never changes
    pub fn holding(values: &[(usize, bool)]) -> Self {
        Self {
            hidden: values.iter().map(|(p, _)| Predicate::new(*p)).collect(),
            held: values.iter().map(|(p, v)| (Predicate::new(*p), Kleene::from(*v))).collect(),
        }
    }
}

impl Framer<ToyStructure> for ToyFramer {
    fn frame(&self, structure: &ToyStructure, _name: Option<&DecompositionName>) -> ToyStructure {
        let mut framed = structure.clone();
        framed.values.retain(|predicate, _| !self.hidden.contains(*predicate));
        framed
    }

    fn unframe(&self, structure: &ToyStructure, target: &DecompositionName) -> SmallVec<[ToyStructure; 2]> {
        let mut unframed = structure.clone();
        for predicate in self.hidden.intersection(target.vocabulary()).iter() {
            let value = self.held.get(&predicate).copied().unwrap_or(Kleene::Unknown);
            unframed.values.entry(predicate).or_insert(value);
        }
        smallvec::smallvec![unframed]
    }

    fn framed_vocabulary(&self, vocabulary: &Vocabulary) -> Vocabulary {
        vocabulary.difference(&self.hidden)
    }
}

/// An action assigning constant values to predicates
pub struct ToyAction {
    label: String,
    precondition: Option<ToyFormula>,
    precondition_vocabulary: Vocabulary,
    updates: Vec<(Predicate, Kleene)>,
    change_formulas: Vec<(Predicate, ToyFormula)>,
    composition: Option<CompositionFormula>,
    decomposition: DecompositionPolicy,
    universe_changing: bool,
    /// Messages reported for structures satisfying a formula
    messages: Vec<(ToyFormula, String)>,
    /// Fail on structures satisfying a formula
    failure: Option<ToyFormula>,
    pre_framer: Option<Rc<ToyFramer>>,
    post_framer: Option<Rc<ToyFramer>>,
    applied: Rc<Cell<usize>>,
    traced: Rc<Cell<usize>>,
}

impl ToyAction {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            precondition: None,
            precondition_vocabulary: Vocabulary::new(),
            updates: vec![],
            change_formulas: vec![],
            composition: None,
            decomposition: DecompositionPolicy::Identity,
            universe_changing: false,
            messages: vec![],
            failure: None,
            pre_framer: None,
            post_framer: None,
            applied: Rc::new(Cell::new(0)),
            traced: Rc::new(Cell::new(0)),
        }
    }

    pub fn with_precondition(mut self, formula: ToyFormula) -> Self {
        if let ToyFormula::Holds(predicate) | ToyFormula::NotHolds(predicate) = formula {
            self.precondition_vocabulary.insert(predicate);
        }
        self.precondition = Some(formula);
        self
    }

    /// Assign `value` to `predicate`
    pub fn with_update(mut self, predicate: Predicate, value: Kleene) -> Self {
        let change = match value {
            Kleene::True => ToyFormula::NotHolds(predicate),
            Kleene::False => ToyFormula::Holds(predicate),
            Kleene::Unknown => ToyFormula::True,
        };
        self.updates.push((predicate, value));
        self.change_formulas.push((predicate, change));
        self
    }

    pub fn with_composition(mut self, formula: CompositionFormula) -> Self {
        self.composition = Some(formula);
        self
    }

    pub fn with_decomposition(mut self, policy: DecompositionPolicy) -> Self {
        self.decomposition = policy;
        self
    }

    pub fn universe_changing(mut self) -> Self {
        self.universe_changing = true;
        self
    }

    pub fn with_message(mut self, when: ToyFormula, message: &str) -> Self {
        self.messages.push((when, message.to_string()));
        self
    }

    pub fn failing_on(mut self, when: ToyFormula) -> Self {
        self.failure = Some(when);
        self
    }

    pub fn with_pre_framer(mut self, framer: ToyFramer) -> Self {
        self.pre_framer = Some(Rc::new(framer));
        self
    }

    pub fn with_post_framer(mut self, framer: ToyFramer) -> Self {
        self.post_framer = Some(Rc::new(framer));
        self
    }

    /// A handle on the number of structures the transformer was applied to
    pub fn applied(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.applied)
    }

    /// A handle on the number of traced applications
    pub fn traced(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.traced)
    }
}

impl fmt::Display for ToyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl Action<ToyStructure> for ToyAction {
    fn precondition(&self) -> Option<&ToyFormula> {
        self.precondition.as_ref()
    }

    fn precondition_vocabulary(&self) -> Vocabulary {
        self.precondition_vocabulary.clone()
    }

    fn composition(&self) -> Option<&CompositionFormula> {
        self.composition.as_ref()
    }

    fn decomposition(&self) -> &DecompositionPolicy {
        &self.decomposition
    }

    fn change_formulas(&self) -> &[(Predicate, ToyFormula)] {
        &self.change_formulas
    }

    fn is_universe_changing(&self) -> bool {
        self.universe_changing
    }

    fn pre_framer(&self, _name: &DecompositionName) -> Option<Rc<dyn Framer<ToyStructure>>> {
        self.pre_framer.clone().map(|framer| framer as Rc<dyn Framer<ToyStructure>>)
    }

    fn post_framer(&self, _name: &DecompositionName) -> Option<Rc<dyn Framer<ToyStructure>>> {
        self.post_framer.clone().map(|framer| framer as Rc<dyn Framer<ToyStructure>>)
    }

    fn apply(&self, structure: &ToyStructure, trace: bool) -> AnalysisResult<Transition<ToyStructure>> {
        if trace {
            self.traced.set(self.traced.get() + 1);
            log::trace!(target: "toy", "{} on {structure:?}", self.label);
        } else {
            self.applied.set(self.applied.get() + 1);
        }
        if self.failure.as_ref().is_some_and(|when| structure.evaluate(when)) {
            return Err(AnalysisError::Transformer {
                action: self.label.clone(),
                message: format!("cannot apply to {structure:?}"),
            });
        }
        let mut result = structure.clone();
        for (predicate, value) in self.updates.iter() {
            if result.values.contains_key(predicate) {
                result.values.insert(*predicate, *value);
            }
        }
        let mut transition = Transition::new(vec![result]);
        for (when, message) in self.messages.iter() {
            if structure.evaluate(when) {
                transition = transition.with_message(message.as_str());
            }
        }
        Ok(transition)
    }
}
