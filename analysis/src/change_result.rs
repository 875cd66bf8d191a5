use core::{fmt, ops::AddAssign};

/// The outcome of joining new structures into a component set, an element or a location.
///
/// Counts the structures the join added or widened, so a join representing nothing new reports
/// zero.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChangeResult {
    added: usize,
}

impl ChangeResult {
    pub const UNCHANGED: Self = Self { added: 0 };

    #[inline]
    pub const fn added(added: usize) -> Self {
        Self { added }
    }

    #[inline]
    pub const fn changed(&self) -> bool {
        self.added > 0
    }

    /// The number of structures the join added or widened
    #[inline]
    pub const fn count(&self) -> usize {
        self.added
    }
}

impl AddAssign for ChangeResult {
    fn add_assign(&mut self, rhs: Self) {
        self.added += rhs.added;
    }
}

impl fmt::Display for ChangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.added {
            0 => f.write_str("unchanged"),
            1 => f.write_str("1 structure added"),
            n => write!(f, "{n} structures added"),
        }
    }
}
