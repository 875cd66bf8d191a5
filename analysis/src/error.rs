use compact_str::CompactString;
use miette::Diagnostic;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors raised while computing a fixpoint over a decomposed domain.
///
/// Only [AnalysisError::DecompositionFailed] and [AnalysisError::Transformer] describe a property
/// of the analyzed program; the remaining variants indicate an inconsistent name table, plan or
/// configuration.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum AnalysisError {
    #[error(
        "cannot decompose {targets}: undefined predicates in all options, e.g. {example}"
    )]
    #[diagnostic(help(
        "enable focusing on decomposition names, or declare an explicit decomposition for the \
         action"
    ))]
    DecompositionFailed { targets: String, example: String },
    #[error("{source} while processing location '{location}' and action '{action}'")]
    InAction {
        location: CompactString,
        action: String,
        #[source]
        source: Box<AnalysisError>,
    },
    #[error("in location '{location}' for action '{action}' {stage}: '{outer}' contains '{inner}'")]
    #[diagnostic(help("the decomposition plan produced redundant components"))]
    NameSubsumption {
        location: CompactString,
        action: String,
        stage: &'static str,
        outer: CompactString,
        inner: CompactString,
    },
    #[error("have multiple restore options for '{name}', e.g. '{first}' and '{second}'")]
    AmbiguousRestore {
        name: CompactString,
        first: CompactString,
        second: CompactString,
    },
    #[error("cannot permute a composed component: '{name}'")]
    ComposedPermutation { name: CompactString },
    #[error("unsupported operation on a decomposed location: {operation}")]
    Unsupported { operation: &'static str },
    #[error("no decomposition names have been specified")]
    NoDecompositionNames,
    #[error("transformer '{action}' failed: {message}")]
    Transformer { action: String, message: String },
    #[error("invalid engine configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl AnalysisError {
    /// Attach the location and action being processed to `self`
    pub fn in_action(self, location: &str, action: impl ToString) -> Self {
        Self::InAction {
            location: location.into(),
            action: action.to_string(),
            source: Box::new(self),
        }
    }

    /// Strip any [AnalysisError::InAction] context, returning the underlying failure
    pub fn root_cause(&self) -> &AnalysisError {
        match self {
            Self::InAction { source, .. } => source.root_cause(),
            err => err,
        }
    }
}
