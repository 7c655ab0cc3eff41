//! The recursively defined value type every loaded YAML document is
//! converted into, and back out of, before it reaches a caller.

use indexmap::IndexMap;

use crate::error::ResolveError;

/// A location in a source YAML file. Only a start position is kept; this is
/// all `serde_yaml` reliably exposes for a generic `Value` tree, and it is
/// enough for the "nearest mark" error reporting the resolver promises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub line: usize,
    pub column: usize,
}

/// A value annotated with the source location it was parsed from, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct Marked<T> {
    pub value: T,
    pub mark: Option<Mark>,
}

impl<T> Marked<T> {
    pub fn new(value: T) -> Self {
        Marked { value, mark: None }
    }

    pub fn with_mark(value: T, mark: Option<Mark>) -> Self {
        Marked { value, mark }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Marked<U> {
        Marked {
            value: f(self.value),
            mark: self.mark,
        }
    }
}

impl<T> From<T> for Marked<T> {
    fn from(value: T) -> Self {
        Marked::new(value)
    }
}

/// An ordered mapping from string keys to marked documents. Iteration order
/// follows insertion order, matching the spec's requirement that mapping
/// entries preserve document order.
pub type DocMap = IndexMap<String, Marked<Document>>;

/// A document tree: a mapping, an ordered sequence, or a scalar.
///
/// "Conditional nodes" (`when <expr>` keys, `when:` sibling keys) are not a
/// distinct variant here — they are ordinary `Map`/`Seq` entries recognized
/// syntactically by the conditional rewriter (see [`crate::conditional`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<Marked<Document>>),
    Map(DocMap),
}

impl Document {
    pub fn as_map(&self) -> Option<&DocMap> {
        match self {
            Document::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut DocMap> {
        match self {
            Document::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Marked<Document>]> {
        match self {
            Document::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Document::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Document::Null)
    }

    pub fn empty_map() -> Document {
        Document::Map(DocMap::new())
    }

    /// Every string in the document interpreted as a list: a single string
    /// becomes a one-element list, a sequence is mapped element-wise, and a
    /// missing/null value becomes empty. Used for `before`/`after`.
    pub fn coerce_string_list(&self) -> Vec<String> {
        match self {
            Document::Null => Vec::new(),
            Document::String(s) => vec![s.clone()],
            Document::Seq(items) => items
                .iter()
                .filter_map(|item| item.value.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Parses a YAML document into a [`Document`] tree. An empty or all-null
/// document becomes an empty mapping, matching the external YAML loader
/// contract assumed throughout the spec ("an empty or missing document
/// becomes an empty mapping").
pub fn load_yaml_str(path: &str, text: &str) -> Result<Marked<Document>, ResolveError> {
    if text.trim().is_empty() {
        return Ok(Marked::new(Document::empty_map()));
    }
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|source| ResolveError::Yaml {
            path: path.to_string(),
            source,
        })?;
    Ok(from_yaml_value(value))
}

fn from_yaml_value(value: serde_yaml::Value) -> Marked<Document> {
    let doc = match value {
        serde_yaml::Value::Null => Document::Null,
        serde_yaml::Value::Bool(b) => Document::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Document::Int(i)
            } else {
                Document::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_yaml::Value::String(s) => Document::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Document::Seq(seq.into_iter().map(from_yaml_value).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = DocMap::new();
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    other => yaml_scalar_to_string(&other),
                };
                out.insert(key, from_yaml_value(v));
            }
            Document::Map(out)
        }
        serde_yaml::Value::Tagged(tagged) => return from_yaml_value(tagged.value),
    };
    Marked::new(doc)
}

fn yaml_scalar_to_string(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        _ => String::new(),
    }
}

/// Converts a document into a canonical [`serde_json::Value`] for hashing
/// and for re-emitting resolved documents as YAML/JSON to callers.
pub fn to_json(doc: &Document) -> serde_json::Value {
    match doc {
        Document::Null => serde_json::Value::Null,
        Document::Bool(b) => serde_json::Value::Bool(*b),
        Document::Int(i) => serde_json::Value::from(*i),
        Document::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Document::String(s) => serde_json::Value::String(s.clone()),
        Document::Seq(items) => {
            serde_json::Value::Array(items.iter().map(|i| to_json(&i.value)).collect())
        }
        Document::Map(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), to_json(&v.value));
            }
            serde_json::Value::Object(out)
        }
    }
}

pub fn to_yaml_value(doc: &Document) -> serde_yaml::Value {
    match doc {
        Document::Null => serde_yaml::Value::Null,
        Document::Bool(b) => serde_yaml::Value::Bool(*b),
        Document::Int(i) => serde_yaml::Value::Number((*i).into()),
        Document::Float(f) => serde_yaml::Value::Number((*f).into()),
        Document::String(s) => serde_yaml::Value::String(s.clone()),
        Document::Seq(items) => {
            serde_yaml::Value::Sequence(items.iter().map(|i| to_yaml_value(&i.value)).collect())
        }
        Document::Map(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(serde_yaml::Value::String(k.clone()), to_yaml_value(&v.value));
            }
            serde_yaml::Value::Mapping(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_becomes_empty_map() {
        let doc = load_yaml_str("test", "").unwrap();
        assert_eq!(doc.value, Document::empty_map());

        let doc = load_yaml_str("test", "~").unwrap();
        assert_eq!(doc.value, Document::Null);
    }

    #[test]
    fn preserves_mapping_order() {
        let doc = load_yaml_str("test", "b: 1\na: 2\nc: 3").unwrap();
        let map = doc.value.as_map().unwrap();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn coerce_string_list() {
        let doc = load_yaml_str("t", "x").unwrap();
        assert_eq!(doc.value.coerce_string_list(), vec!["x".to_string()]);

        let doc = load_yaml_str("t", "[a, b]").unwrap();
        assert_eq!(
            doc.value.coerce_string_list(),
            vec!["a".to_string(), "b".to_string()]
        );

        let doc = load_yaml_str("t", "null").unwrap();
        assert!(doc.value.coerce_string_list().is_empty());
    }
}
