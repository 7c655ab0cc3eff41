use std::fmt;

use crate::document::Mark;

/// Every error the resolver can produce, each carrying the nearest available
/// source mark so the caller can point the user at the offending YAML.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("package specification not found: {name}")]
    PackageNotFound { name: String },

    #[error("diamond-pattern inheritance not supported: package `{name}` is reached twice while traversing `extends`")]
    DiamondInheritance { name: String },

    #[error("two base profiles set the same parameter `{parameter}`; set it explicitly in the descendant profile")]
    ParameterCollision { parameter: String },

    #[error("key `{key}` conflicts with another key of the same name introduced by a `when` clause{at}")]
    ConditionalConflict { key: String, at: MarkSuffix },

    #[error("`when` dict entry must contain another mapping{at}")]
    MalformedConditionalDict { at: MarkSuffix },

    #[error("`when` clause within a list must contain another list{at}")]
    MalformedConditionalList { at: MarkSuffix },

    #[error("stage `{name}` used in two separate ancestors")]
    StageCollision { name: String },

    #[error("anonymous stages with identical content collide in the same stage list")]
    AnonymousStageCollision,

    #[error("build stage lacks handler attribute")]
    MissingStageHandler,

    #[error("stage `{name}` referred to but not available")]
    DanglingStageReference { name: String },

    #[error("cycle detected among stages: {names:?}")]
    StageCycle { names: Vec<String> },

    #[error("illegal stage mode `{mode}`")]
    IllegalStageMode { mode: String },

    #[error("github source override requires exactly one existing source, found {count}")]
    SourceOverrideMisuse { count: usize },

    #[error("name `{name}` used for two different checkout keys within one scope")]
    CheckoutNameReuse { name: String },

    #[error("checkout `{name}` requires exactly one url, found {count}")]
    CheckoutUrlCount { name: String, count: usize },

    #[error("no checkout is bound to name `{name}`")]
    UnboundCheckoutName { name: String },

    #[error("expected a list for dependency section `{section}`")]
    ExpectedDependencyList { section: String },

    #[error("malformed profile include: {reason}")]
    MalformedInclude { reason: String },

    #[error("parameter `{name}` is invalid: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("failed to evaluate condition `{expr}`: {source}")]
    ConditionEval {
        expr: String,
        #[source]
        source: pkgspec_cond::ParseError,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse yaml at {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Renders as `" (at line N)"` when a mark is available, or the empty string
/// otherwise, so error messages degrade gracefully when a node has no mark.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkSuffix(pub Option<Mark>);

impl From<Option<Mark>> for MarkSuffix {
    fn from(mark: Option<Mark>) -> Self {
        MarkSuffix(mark)
    }
}

impl fmt::Display for MarkSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(mark) => write!(f, " (at line {}, column {})", mark.line, mark.column),
            None => Ok(()),
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;
