use crate::{
    AbstractStructure, Action, AnalysisStatus, CartesianElement, DecompositionName, NameTable,
    StructureSet,
};

/// Selects the structures of a component which take part in an action.
///
/// A structure passes the filter if it is consistent with the action and satisfies its
/// precondition. Structures of a component feeding a single target may additionally be skipped
/// when the action provably leaves them unchanged and the successor location already holds
/// them, since running the transformer on them could not add anything.
pub struct CompositionFilter<'a, S: AbstractStructure> {
    action: &'a dyn Action<S>,
    table: &'a NameTable,
    successor: &'a CartesianElement<S>,
    /// Whether the skip check may be attempted at all for this action
    skip: bool,
    /// The names the current step decomposes into
    targets: &'a [DecompositionName],
}

impl<'a, S: AbstractStructure> CompositionFilter<'a, S> {
    pub fn new(
        action: &'a dyn Action<S>,
        table: &'a NameTable,
        successor: &'a CartesianElement<S>,
        skip_filter: bool,
        targets: &'a [DecompositionName],
    ) -> Self {
        Self {
            action,
            table,
            successor,
            skip: skip_filter && !action.is_universe_changing(),
            targets,
        }
    }

    /// Filter the structures `set` of component `name`.
    ///
    /// `single_use` indicates that `name` feeds exactly one composed name.
    pub fn filter(
        &self,
        name: &DecompositionName,
        set: &StructureSet<S>,
        single_use: bool,
        status: &mut AnalysisStatus,
    ) -> StructureSet<S> {
        let check_skip = self.skip
            && single_use
            && self.targets.len() == 1
            && self.targets.contains(name);
        // The successor stores `name` under its representative, so candidates for skipping must
        // be permuted before they are looked up
        let skip_target = if check_skip {
            let representative = self.table.representative(name);
            self.successor.get(&representative).map(|target| {
                let permutation = self
                    .table
                    .permutation(name, &representative)
                    .filter(|permutation| !permutation.is_identity());
                (target, permutation)
            })
        } else {
            None
        };

        let precondition_vocabulary = self.action.precondition_vocabulary();
        let mut result = StructureSet::new();
        for original in set.iter() {
            let Some(mut structure) = original.prepare_for_action(name, &precondition_vocabulary)
            else {
                continue;
            };
            if let Some(precondition) = self.action.precondition() {
                if !structure.evaluate(precondition) {
                    continue;
                }
            }
            if let Some((target, permutation)) = skip_target.as_ref() {
                status.filter.checked += 1;
                let vocabulary = original.vocabulary();
                let changes = self.action.change_formulas().iter().any(|(predicate, formula)| {
                    vocabulary.contains(*predicate) && structure.evaluate(formula)
                });
                if !changes {
                    status.filter.no_change += 1;
                    let present = match permutation {
                        Some(permutation) => target.contains(&original.permute(permutation)),
                        None => target.contains(original),
                    };
                    if present {
                        status.filter.skipped += 1;
                        log::trace!(target: "composition-filter", "skipping unchanged structure of {name} for {}", self.action);
                        continue;
                    }
                }
            }
            structure.update_vocabulary(name.vocabulary());
            result.merge_with(structure);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        DecompositionPolicy, Predicate,
        testing::{Kleene, ToyAction, ToyFormula, ToyStructure, toy},
    };

    fn p(index: usize) -> Predicate {
        Predicate::new(index)
    }

    fn setup() -> (NameTable, DecompositionName) {
        let mut table = NameTable::new();
        let a = table.define("A", [p(0), p(1)].into_iter().collect());
        (table, a)
    }

    fn set(structures: &[ToyStructure]) -> StructureSet<ToyStructure> {
        structures.iter().cloned().collect()
    }

    #[test]
    fn precondition_and_consistency_select_structures() {
        let (table, a) = setup();
        let action = ToyAction::new("assume p0")
            .with_precondition(ToyFormula::Holds(p(0)))
            .with_decomposition(DecompositionPolicy::Identity);
        let successor = CartesianElement::<ToyStructure>::new();
        let targets = [a.clone()];
        let filter = CompositionFilter::new(&action, &table, &successor, true, &targets);
        let input = set(&[
            toy(&[(0, true), (1, true)]),
            toy(&[(0, false), (1, true)]),
            ToyStructure::inconsistent(&[(0, true), (1, false)]),
        ]);
        let mut status = AnalysisStatus::new();
        let result = filter.filter(&a, &input, false, &mut status);
        assert_eq!(result, set(&[toy(&[(0, true), (1, true)])]));
        assert_eq!(status.filter().checked, 0);
    }

    #[test]
    fn unchanged_structures_present_in_the_successor_are_skipped() {
        let (table, a) = setup();
        let action = ToyAction::new("p1 := true")
            .with_update(p(1), Kleene::True)
            .with_decomposition(DecompositionPolicy::Identity);
        let unchanged = toy(&[(0, false), (1, true)]);
        let fresh = toy(&[(0, true), (1, true)]);
        let changing = toy(&[(0, false), (1, false)]);
        let mut successor = CartesianElement::new();
        successor.join_structure(&a, unchanged.clone());
        let targets = [a.clone()];
        let filter = CompositionFilter::new(&action, &table, &successor, true, &targets);
        let mut status = AnalysisStatus::new();
        let result =
            filter.filter(&a, &set(&[unchanged, fresh.clone(), changing.clone()]), true, &mut status);
        assert_eq!(result, set(&[fresh, changing]));
        assert_eq!(status.filter().checked, 3);
        assert_eq!(status.filter().no_change, 2);
        assert_eq!(status.filter().skipped, 1);
    }

    #[test]
    fn skip_requires_a_single_use_component() {
        let (table, a) = setup();
        let action = ToyAction::new("p1 := true")
            .with_update(p(1), Kleene::True)
            .with_decomposition(DecompositionPolicy::Identity);
        let unchanged = toy(&[(0, false), (1, true)]);
        let mut successor = CartesianElement::new();
        successor.join_structure(&a, unchanged.clone());
        let targets = [a.clone()];
        let mut status = AnalysisStatus::new();
        let filter = CompositionFilter::new(&action, &table, &successor, true, &targets);
        let result = filter.filter(&a, &set(&[unchanged.clone()]), false, &mut status);
        assert_eq!(result.len(), 1);

        let universe = ToyAction::new("new")
            .with_update(p(1), Kleene::True)
            .universe_changing()
            .with_decomposition(DecompositionPolicy::Identity);
        let filter = CompositionFilter::new(&universe, &table, &successor, true, &targets);
        let result = filter.filter(&a, &set(&[unchanged]), true, &mut status);
        assert_eq!(result.len(), 1);
        assert_eq!(status.filter().checked, 0);
    }
}
