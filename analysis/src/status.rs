use core::{fmt, time::Duration};

use crate::EngineConfig;

/// Counters maintained by the composition filter
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FilterCounters {
    /// Structures eligible for the skip check
    pub checked: usize,
    /// Checked structures no change formula holds in
    pub no_change: usize,
    /// Unchanged structures already present in the successor, and therefore dropped
    pub skipped: usize,
}

/// The phases of processing an action whose running time is recorded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Compose,
    Decompose,
    Join,
}

/// Diagnostics gathered while computing a fixpoint.
///
/// Nothing here affects the result of the analysis. The engine owns one status per run and
/// threads it to the components which update it.
#[derive(Debug, Default, Clone)]
pub struct AnalysisStatus {
    iterations: usize,
    max_worklist: usize,
    total_worklist: usize,
    structures: usize,
    messages: usize,
    pub(crate) filter: FilterCounters,
    compose_time: Duration,
    decompose_time: Duration,
    join_time: Duration,
}

impl AnalysisStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn max_worklist(&self) -> usize {
        self.max_worklist
    }

    pub fn average_worklist(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.total_worklist as f64 / self.iterations as f64
        }
    }

    pub fn structures(&self) -> usize {
        self.structures
    }

    pub fn messages(&self) -> usize {
        self.messages
    }

    pub fn filter(&self) -> FilterCounters {
        self.filter
    }

    pub fn time(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Compose => self.compose_time,
            Phase::Decompose => self.decompose_time,
            Phase::Join => self.join_time,
        }
    }

    /// Record one pop from a worklist holding `worklist` locations
    pub(crate) fn record_iteration(&mut self, worklist: usize) {
        self.iterations += 1;
        self.max_worklist = self.max_worklist.max(worklist);
        self.total_worklist += worklist;
    }

    pub(crate) fn add_structures(&mut self, count: usize) {
        self.structures += count;
    }

    pub(crate) fn set_structures(&mut self, count: usize) {
        self.structures = count;
    }

    pub(crate) fn add_messages(&mut self, count: usize) {
        self.messages += count;
    }

    pub(crate) fn record_time(&mut self, phase: Phase, elapsed: Duration) {
        match phase {
            Phase::Compose => self.compose_time += elapsed,
            Phase::Decompose => self.decompose_time += elapsed,
            Phase::Join => self.join_time += elapsed,
        }
    }

    /// Whether the analysis should stop before reaching a fixpoint, because a budget of `config`
    /// is exhausted or `stop` requests it.
    pub fn should_finish(
        &self,
        config: &EngineConfig,
        stop: Option<&dyn Fn(&AnalysisStatus) -> bool>,
    ) -> bool {
        config.max_messages().is_some_and(|limit| self.messages >= limit)
            || config.max_structures().is_some_and(|limit| self.structures >= limit)
            || stop.is_some_and(|stop| stop(self))
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of iterations: {}", self.iterations)?;
        writeln!(
            f,
            "Worklist size: max {}, average {:.2}",
            self.max_worklist,
            self.average_worklist()
        )?;
        writeln!(f, "Number of structures: {}", self.structures)?;
        writeln!(f, "Number of messages: {}", self.messages)?;
        if self.filter.checked != 0 {
            writeln!(
                f,
                "Skip: {}/{}/{}",
                self.filter.skipped, self.filter.no_change, self.filter.checked
            )?;
        }
        write!(
            f,
            "Compose {:?}, decompose {:?}, join {:?}",
            self.compose_time, self.decompose_time, self.join_time
        )
    }
}
