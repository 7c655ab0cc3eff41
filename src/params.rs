//! The parameter environment threaded through conditional rewriting and
//! package loading.

use indexmap::IndexMap;
use pkgspec_cond::ParamValue;

use crate::document::Document;
use crate::error::ResolveError;

/// An immutable mapping from parameter name to scalar value, consulted by
/// the conditional rewriter and folded into a package's resolved settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters(IndexMap<String, Document>);

impl Parameters {
    pub fn new() -> Self {
        Parameters(IndexMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&Document> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Document) {
        self.0.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Document)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds a parameter environment from a document mapping. Values are
    /// carried through as-is; only scalars are meaningful to the condition
    /// evaluator (see [`ParamEnv::lookup`](pkgspec_cond::ParamEnv)), but a
    /// well-formed `parameters:` section never contains anything else.
    pub fn from_map(doc: &Document) -> Self {
        let mut params = Parameters::new();
        if let Some(map) = doc.as_map() {
            for (k, v) in map {
                params.insert(k.clone(), v.value.clone());
            }
        }
        params
    }
}

impl pkgspec_cond::ParamEnv for Parameters {
    fn lookup(&self, name: &str) -> Option<ParamValue> {
        self.get(name).map(|doc| match doc {
            Document::Bool(b) => ParamValue::Bool(*b),
            Document::String(s) => ParamValue::String(s.clone()),
            Document::Int(i) => ParamValue::Int(*i),
            Document::Float(f) => ParamValue::Float(*f),
            Document::Null => ParamValue::Null,
            Document::Seq(_) | Document::Map(_) => ParamValue::Null,
        })
    }
}

/// Evaluates `when <expr>` conditions against a [`Parameters`] environment.
/// Injectable so callers can swap in a richer expression language without
/// touching the rewriter.
pub trait ConditionEvaluator {
    fn evaluate(&self, expr: &str, env: &Parameters) -> Result<bool, ResolveError>;
}

/// The default evaluator, backed by [`pkgspec_cond`]'s `all`/`any`/`not`
/// boolean grammar.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEvaluator;

impl ConditionEvaluator for DefaultEvaluator {
    fn evaluate(&self, expr: &str, env: &Parameters) -> Result<bool, ResolveError> {
        pkgspec_cond::evaluate(expr, env).map_err(|source| ResolveError::ConditionEval {
            expr: expr.to_string(),
            source,
        })
    }
}
