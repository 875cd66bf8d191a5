//! Fixpoint computation over a decomposed abstract domain.
//!
//! Rather than keeping one monolithic abstract value per program point, the domain is partitioned
//! into named components (sub-vocabularies), each holding its own set of abstract structures. The
//! [Engine] composes the components an action needs before running its transformer, splits the
//! transformer's output back into components afterwards, and propagates the result over the
//! control-flow graph until a fixpoint is reached.

extern crate alloc;

mod action;
mod change_result;
pub mod composition;
mod config;
mod element;
mod engine;
mod error;
mod location;
mod name;
mod status;
mod structure;
mod vocabulary;

#[cfg(test)]
mod testing;

pub use self::{
    action::{Action, CompositionFormula, DecompositionPolicy, Transition},
    change_result::ChangeResult,
    config::EngineConfig,
    element::CartesianElement,
    engine::{Engine, Outcome, SeedReport},
    error::{AnalysisError, AnalysisResult},
    location::{ActionId, ControlFlowGraph, Edge, Location, LocationId},
    name::{ComponentId, DecompositionName, NameTable},
    status::{AnalysisStatus, FilterCounters, Phase},
    structure::{AbstractStructure, ComposedFramer, Framer, StructureSet},
    vocabulary::{Permutation, Predicate, Vocabulary},
};

pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
