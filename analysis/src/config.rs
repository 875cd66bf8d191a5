use serde::Deserialize;

use crate::AnalysisResult;

/// Configuration for the decomposition engine and its composition strategies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Compose only the increment (delta) of each component since the last visit
    incremental: bool,
    /// Skip structures an action provably leaves unchanged
    skip_filter: bool,
    /// Project restored abstraction components onto their own name before filtering
    composition_abstraction: bool,
    /// Focus on the target vocabulary when a minimal precision check fails
    focus_decompose_names: bool,
    /// Check that no stored component name subsumes another
    sanity_checks: bool,
    max_messages: Option<usize>,
    max_structures: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            skip_filter: true,
            composition_abstraction: true,
            focus_decompose_names: true,
            sanity_checks: true,
            max_messages: None,
            max_structures: None,
        }
    }
}

impl EngineConfig {
    /// Get a new, default configuration
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    ///
    /// Omitted keys keep their default values, unknown keys are rejected.
    pub fn from_toml(text: &str) -> AnalysisResult<Self> {
        Ok(toml::from_str(text)?)
    }

    #[inline(always)]
    pub const fn is_incremental(&self) -> bool {
        self.incremental
    }

    #[inline(always)]
    pub const fn skip_filter(&self) -> bool {
        self.skip_filter
    }

    #[inline(always)]
    pub const fn composition_abstraction(&self) -> bool {
        self.composition_abstraction
    }

    #[inline(always)]
    pub const fn focus_decompose_names(&self) -> bool {
        self.focus_decompose_names
    }

    #[inline(always)]
    pub const fn sanity_checks(&self) -> bool {
        self.sanity_checks
    }

    #[inline(always)]
    pub const fn max_messages(&self) -> Option<usize> {
        self.max_messages
    }

    #[inline(always)]
    pub const fn max_structures(&self) -> Option<usize> {
        self.max_structures
    }

    /// Set whether composition is computed incrementally.
    ///
    /// When enabled, a location visited a second time only composes the structures which are new
    /// since its previous visit, instead of recomputing the full Cartesian product.
    pub fn set_incremental(&mut self, yes: bool) -> &mut Self {
        self.incremental = yes;
        self
    }

    /// Set whether the filter may skip structures an action cannot change.
    pub fn set_skip_filter(&mut self, yes: bool) -> &mut Self {
        self.skip_filter = yes;
        self
    }

    pub fn set_composition_abstraction(&mut self, yes: bool) -> &mut Self {
        self.composition_abstraction = yes;
        self
    }

    /// Set whether a failed minimal precision check is answered by focusing the composed
    /// structures on the target vocabulary, rather than by recording a decomposition failure.
    pub fn set_focus_decompose_names(&mut self, yes: bool) -> &mut Self {
        self.focus_decompose_names = yes;
        self
    }

    pub fn set_sanity_checks(&mut self, yes: bool) -> &mut Self {
        self.sanity_checks = yes;
        self
    }

    /// Stop the analysis once this many distinct messages have been reported
    pub fn set_max_messages(&mut self, limit: Option<usize>) -> &mut Self {
        self.max_messages = limit;
        self
    }

    /// Stop the analysis once this many structures have been joined into locations
    pub fn set_max_structures(&mut self, limit: Option<usize>) -> &mut Self {
        self.max_structures = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::AnalysisError;

    #[test]
    fn defaults_enable_every_optimization() {
        let config = EngineConfig::new();
        assert!(config.is_incremental());
        assert!(config.skip_filter());
        assert!(config.composition_abstraction());
        assert!(config.focus_decompose_names());
        assert!(config.sanity_checks());
        assert_eq!(config.max_messages(), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml("incremental = false\nmax_structures = 100\n").unwrap();
        let mut expected = EngineConfig::new();
        expected.set_incremental(false).set_max_structures(Some(100));
        assert_eq!(config, expected);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EngineConfig::from_toml("incremantal = false").unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }
}
