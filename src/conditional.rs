//! Component A: the conditional rewriter.
//!
//! Eliminates all three `when`-forms from a document tree, bottom-up,
//! producing a new tree with the same non-conditional entries in the same
//! order.

use crate::document::{DocMap, Document, Marked};
use crate::error::{MarkSuffix, ResolveError};
use crate::params::{ConditionEvaluator, Parameters};

const WHEN_PREFIX: &str = "when ";

pub fn rewrite(
    doc: &Marked<Document>,
    params: &Parameters,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Marked<Document>, ResolveError> {
    let mark = doc.mark;
    let rewritten = match &doc.value {
        Document::Map(map) => Document::Map(rewrite_map(map, params, evaluator)?),
        Document::Seq(items) => Document::Seq(rewrite_seq(items, params, evaluator)?),
        scalar => scalar.clone(),
    };
    Ok(Marked::with_mark(rewritten, mark))
}

fn insert_checked(
    result: &mut DocMap,
    key: String,
    value: Marked<Document>,
) -> Result<(), ResolveError> {
    if result.contains_key(&key) {
        return Err(ResolveError::ConditionalConflict {
            key,
            at: MarkSuffix(value.mark),
        });
    }
    result.insert(key, value);
    Ok(())
}

fn rewrite_map(
    map: &DocMap,
    params: &Parameters,
    evaluator: &dyn ConditionEvaluator,
) -> Result<DocMap, ResolveError> {
    let mut result = DocMap::new();
    for (key, value) in map {
        if let Some(expr) = key.strip_prefix(WHEN_PREFIX) {
            if evaluator.evaluate(expr, params)? {
                let inner_map = value.value.as_map().ok_or(ResolveError::MalformedConditionalDict {
                    at: MarkSuffix(value.mark),
                })?;
                let rewritten_inner = rewrite_map(inner_map, params, evaluator)?;
                for (k, v) in rewritten_inner {
                    insert_checked(&mut result, k, v)?;
                }
            }
        } else {
            let rewritten = rewrite(value, params, evaluator)?;
            insert_checked(&mut result, key.clone(), rewritten)?;
        }
    }
    Ok(result)
}

fn rewrite_seq(
    items: &[Marked<Document>],
    params: &Parameters,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Vec<Marked<Document>>, ResolveError> {
    let mut result = Vec::new();
    for item in items {
        match singleton_when(item)? {
            Some((expr, inner_seq)) => {
                if evaluator.evaluate(expr, params)? {
                    let rewritten = rewrite_seq(inner_seq, params, evaluator)?;
                    result.extend(rewritten);
                }
                continue;
            }
            None => {}
        }
        if let Some(map) = item.value.as_map() {
            // Only a literal `when` key *with siblings* is the sibling-when
            // form (spec §4.A case 3). A lone `{when: expr}` has no siblings
            // to gate on, so it falls through to the plain-map handling
            // below and is appended verbatim, matching the original's
            // `elif 'when' in item` sitting after its `len(item) == 1`
            // branch.
            if map.len() > 1 {
                if let Some(cond) = map.get("when") {
                    let expr = cond.value.as_str().unwrap_or_default();
                    if evaluator.evaluate(expr, params)? {
                        let mut without_when = map.clone();
                        without_when.shift_remove("when");
                        let rewritten_map = rewrite_map(&without_when, params, evaluator)?;
                        result.push(Marked::with_mark(Document::Map(rewritten_map), item.mark));
                    }
                    continue;
                }
            }
        }
        result.push(rewrite(item, params, evaluator)?);
    }
    Ok(result)
}

/// Recognizes the `[..., {when EXPR: [...]}, ...]` form: a one-entry mapping
/// whose sole key is `when <expr>`. Its value must be a sequence; a match on
/// the key with a non-sequence value is the malformed case from spec §4.A,
/// not a silent fall-through to the sibling-key or plain-map handling below.
fn singleton_when(
    item: &Marked<Document>,
) -> Result<Option<(&str, &[Marked<Document>])>, ResolveError> {
    let Some(map) = item.value.as_map() else {
        return Ok(None);
    };
    if map.len() != 1 {
        return Ok(None);
    }
    let (key, value) = map.iter().next().expect("len checked above");
    let Some(expr) = key.strip_prefix(WHEN_PREFIX) else {
        return Ok(None);
    };
    match value.value.as_seq() {
        Some(seq) => Ok(Some((expr, seq))),
        None => Err(ResolveError::MalformedConditionalList {
            at: MarkSuffix(value.mark),
        }),
    }
}
