//! Stable content hashing of documents, used to name anonymous stages.
//!
//! The hash must depend only on content (never on source marks) and must be
//! stable across process runs, so mapping keys are sorted before hashing —
//! a document's on-disk key order is incidental, not content.

use sha2::{Digest, Sha256};

use crate::document::Document;

/// The `digest(doc) -> string` collaborator contract. Injectable so a caller
/// can substitute a different algorithm without touching the resolver.
pub trait ContentHasher {
    fn digest(&self, doc: &Document) -> String;
}

/// Default implementation: SHA-256 over a canonical JSON encoding with
/// mapping keys sorted at every level.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn digest(&self, doc: &Document) -> String {
        let canonical = canonical_json(doc);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn canonical_json(doc: &Document) -> String {
    match doc {
        Document::Null => "null".to_string(),
        Document::Bool(b) => b.to_string(),
        Document::Int(i) => i.to_string(),
        Document::Float(f) => f.to_string(),
        Document::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Document::Seq(items) => {
            let parts: Vec<String> = items.iter().map(|i| canonical_json(&i.value)).collect();
            format!("[{}]", parts.join(","))
        }
        Document::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let key_json = serde_json::to_string(k).unwrap_or_default();
                    let value_json = canonical_json(&map[k].value);
                    format!("{key_json}:{value_json}")
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}
