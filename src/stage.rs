//! Component B: stage normalization, inheritance merge, and topological
//! ordering.
//!
//! A "stage" is just a document mapping with a handful of recognized keys
//! (`name`, `before`, `after`, `mode`, and for build stages `handler`); the
//! rest of its fields are opaque payload carried through to the caller.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::digest::ContentHasher;
use crate::document::{DocMap, Document, Marked};
use crate::error::ResolveError;

const GENERATED_PREFIX: &str = "__";

fn stage_map(stage: &Marked<Document>) -> Option<&DocMap> {
    stage.value.as_map()
}

fn stage_name(stage: &Marked<Document>) -> Option<String> {
    stage_map(stage)?.get("name")?.value.as_str().map(str::to_string)
}

/// The `name` a stage was assigned, whether explicit or auto-generated.
pub fn name_of(stage: &Marked<Document>) -> Option<String> {
    stage_name(stage)
}

/// Assigns a stable, content-derived name to every stage in `stages` that
/// lacks an explicit `name`, so that stage identity does not depend on
/// document position. `before`/`after` are excluded from the hash: they
/// describe ordering, not stage identity.
pub fn name_anonymous_stages(
    stages: Vec<Marked<Document>>,
    hasher: &dyn ContentHasher,
) -> Result<Vec<Marked<Document>>, ResolveError> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(stages.len());
    for stage in stages {
        let mark = stage.mark;
        let mut map = stage
            .value
            .as_map()
            .cloned()
            .unwrap_or_else(DocMap::new);
        if !map.contains_key("name") {
            let mut for_hash = map.clone();
            for_hash.shift_remove("before");
            for_hash.shift_remove("after");
            let digest = hasher.digest(&Document::Map(for_hash));
            let name = format!("{GENERATED_PREFIX}{digest}");
            if !seen.insert(name.clone()) {
                return Err(ResolveError::AnonymousStageCollision);
            }
            map.insert("name".to_string(), Marked::new(Document::String(name)));
        } else if let Some(name) = map.get("name").and_then(|m| m.value.as_str()) {
            if !seen.insert(name.to_string()) {
                // explicit duplicate names within the same list are caught
                // later by `inherit`, which rejects ancestor collisions; a
                // duplicate within the same list is a collision too.
                return Err(ResolveError::StageCollision {
                    name: name.to_string(),
                });
            }
        }
        out.push(Marked::with_mark(Document::Map(map), mark));
    }
    Ok(out)
}

/// Merges stage lists from several ancestors and a single descendant list
/// into one name-keyed collection. Ancestors may not define the same stage
/// name twice; the descendant may override, replace, or remove a stage it
/// inherited, selected via its own `mode` field (default `override`).
pub fn inherit(
    descendant: Vec<Marked<Document>>,
    ancestors: Vec<Vec<Marked<Document>>>,
) -> Result<IndexMap<String, Marked<Document>>, ResolveError> {
    let mut stages: IndexMap<String, Marked<Document>> = IndexMap::new();
    for ancestor_stages in ancestors {
        for stage in ancestor_stages {
            let name = stage_name(&stage).expect("ancestor stages are always named");
            if stages.contains_key(&name) {
                return Err(ResolveError::StageCollision { name });
            }
            stages.insert(name, stage);
        }
    }

    for stage in descendant {
        let mark = stage.mark;
        let mut map = stage.value.as_map().cloned().unwrap_or_else(DocMap::new);
        let name = map
            .get("name")
            .and_then(|m| m.value.as_str())
            .map(str::to_string)
            .expect("descendant stages are always named");
        let mode = map
            .shift_remove("mode")
            .and_then(|m| m.value.as_str().map(str::to_string))
            .unwrap_or_else(|| "override".to_string());

        match mode.as_str() {
            "override" => {
                let mut merged = stages
                    .get(&name)
                    .and_then(|existing| existing.value.as_map().cloned())
                    .unwrap_or_else(DocMap::new);
                for (k, v) in map {
                    merged.insert(k, v);
                }
                stages.insert(name.clone(), Marked::with_mark(Document::Map(merged), mark));
            }
            "replace" => {
                stages.insert(name.clone(), Marked::with_mark(Document::Map(map), mark));
            }
            "remove" => {
                stages.shift_remove(&name);
            }
            other => {
                return Err(ResolveError::IllegalStageMode {
                    mode: other.to_string(),
                });
            }
        }
    }

    Ok(stages)
}

/// Sorts stages into a valid build order. Among all orderings satisfying the
/// `after` constraints, the one emitted is the unique lexicographically
/// smallest: a Kahn's-algorithm sort that, at each step, picks the
/// alphabetically smallest name with no unsatisfied predecessor — not a
/// depth-first visit order, which does not in general agree with that
/// smallest-ready-name rule once more than one stage is simultaneously ready.
pub fn topo_order(
    stages: IndexMap<String, Marked<Document>>,
) -> Result<Vec<(String, Marked<Document>)>, ResolveError> {
    let mut names: Vec<String> = stages.keys().cloned().collect();
    names.sort();

    // `after[name]` is the set of names that must be emitted before `name`.
    let mut after: HashMap<String, Vec<String>> = HashMap::new();
    for name in &names {
        after.entry(name.clone()).or_default();
    }
    for (name, stage) in &stages {
        let map = stage.value.as_map().cloned().unwrap_or_else(DocMap::new);
        let own_after = map
            .get("after")
            .map(|m| m.value.coerce_string_list())
            .unwrap_or_default();
        for a in own_after {
            if !stages.contains_key(&a) {
                return Err(ResolveError::DanglingStageReference { name: a });
            }
            after.get_mut(name).unwrap().push(a);
        }
        let before = map
            .get("before")
            .map(|m| m.value.coerce_string_list())
            .unwrap_or_default();
        for later in before {
            if !stages.contains_key(&later) {
                return Err(ResolveError::DanglingStageReference { name: later });
            }
            after.get_mut(&later).unwrap().push(name.clone());
        }
    }
    for deps in after.values_mut() {
        deps.sort();
        deps.dedup();
    }

    // `successors[name]` is the set of names that have `name` in their
    // `after` set, used to decrement indegree as each stage is emitted.
    let mut successors: HashMap<String, Vec<String>> = HashMap::new();
    for name in &names {
        successors.entry(name.clone()).or_default();
    }
    let mut indegree: HashMap<String, usize> = HashMap::new();
    for name in &names {
        indegree.insert(name.clone(), after[name].len());
        for dep in &after[name] {
            successors.get_mut(dep).unwrap().push(name.clone());
        }
    }

    let mut ready: std::collections::BTreeSet<String> = names
        .iter()
        .filter(|n| indegree[*n] == 0)
        .cloned()
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(names.len());
    while let Some(name) = ready.iter().next().cloned() {
        ready.remove(&name);
        order.push(name.clone());
        for succ in &successors[&name] {
            let remaining = indegree.get_mut(succ).unwrap();
            *remaining -= 1;
            if *remaining == 0 {
                ready.insert(succ.clone());
            }
        }
    }

    if order.len() != names.len() {
        let emitted: std::collections::HashSet<&String> = order.iter().collect();
        let mut remaining: Vec<String> = names
            .into_iter()
            .filter(|n| !emitted.contains(n))
            .collect();
        remaining.sort();
        return Err(ResolveError::StageCycle { names: remaining });
    }

    Ok(order
        .into_iter()
        .map(|name| {
            let stage = stages.get(&name).unwrap().clone();
            (name, stage)
        })
        .collect())
}

/// Strips `name`/`before`/`after` from every build stage and, for the
/// `build_stages` section only, defaults `handler` to the stage's explicit
/// name (an auto-generated name carries no meaningful handler, so that case
/// is rejected instead).
pub fn finalize_build_stage(name: &str, mut map: DocMap) -> Result<DocMap, ResolveError> {
    map.shift_remove("before");
    map.shift_remove("after");
    map.shift_remove("name");
    if !map.contains_key("handler") {
        if name.starts_with(GENERATED_PREFIX) {
            return Err(ResolveError::MissingStageHandler);
        }
        map.insert(
            "handler".to_string(),
            Marked::new(Document::String(name.to_string())),
        );
    }
    Ok(map)
}

/// Strips `name`/`before`/`after` from a non-build stage (`profile_links`,
/// `when_build_dependency`), which carry no `handler` convention.
pub fn finalize_stage(mut map: DocMap) -> DocMap {
    map.shift_remove("before");
    map.shift_remove("after");
    map.shift_remove("name");
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Sha256Hasher;
    use crate::document::load_yaml_str;

    fn stages(yaml: &str) -> Vec<Marked<Document>> {
        load_yaml_str("t", yaml).unwrap().value.as_seq().unwrap().to_vec()
    }

    #[test]
    fn basic_topo_order() {
        let raw = stages("- {name: a, after: [b]}\n- {name: b}\n- {name: c, before: [a]}\n");
        let merged = inherit(raw, vec![]).unwrap();
        let ordered = topo_order(merged).unwrap();
        let names: Vec<&str> = ordered.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn alphabetical_tie_break() {
        let raw = stages("- {name: z}\n- {name: a}\n- {name: m}\n");
        let merged = inherit(raw, vec![]).unwrap();
        let ordered = topo_order(merged).unwrap();
        let names: Vec<&str> = ordered.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }

    #[test]
    fn lex_least_prefers_globally_smallest_ready_name_over_dfs_order() {
        // p after r; q and r have no constraints. The only requirement is
        // r before p, so valid orders are qrp, rqp, rpq — lexicographically
        // least is qrp. A plain depth-first visit starting from sorted names
        // (p, q, r) would instead emit r, p, q, since it discharges p's
        // dependency on r before ever considering q.
        let raw = stages("- {name: p, after: [r]}\n- {name: q}\n- {name: r}\n");
        let merged = inherit(raw, vec![]).unwrap();
        let ordered = topo_order(merged).unwrap();
        let names: Vec<&str> = ordered.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["q", "r", "p"]);
    }

    #[test]
    fn dangling_reference_errors() {
        let raw = stages("- {name: a, after: [ghost]}\n");
        let merged = inherit(raw, vec![]).unwrap();
        let err = topo_order(merged).unwrap_err();
        assert!(matches!(err, ResolveError::DanglingStageReference { .. }));
    }

    #[test]
    fn cycle_detected() {
        let raw = stages("- {name: a, after: [b]}\n- {name: b, after: [a]}\n");
        let merged = inherit(raw, vec![]).unwrap();
        let err = topo_order(merged).unwrap_err();
        assert!(matches!(err, ResolveError::StageCycle { .. }));
    }

    #[test]
    fn override_merges_fields() {
        let ancestor = stages("- {name: configure, flags: [-O2]}\n");
        let descendant = stages("- {name: configure, mode: override, timeout: 30}\n");
        let merged = inherit(descendant, vec![ancestor]).unwrap();
        let stage = merged.get("configure").unwrap().value.as_map().unwrap();
        assert!(stage.contains_key("flags"));
        assert!(stage.contains_key("timeout"));
    }

    #[test]
    fn replace_drops_old_fields() {
        let ancestor = stages("- {name: configure, flags: [-O2]}\n");
        let descendant = stages("- {name: configure, mode: replace, timeout: 30}\n");
        let merged = inherit(descendant, vec![ancestor]).unwrap();
        let stage = merged.get("configure").unwrap().value.as_map().unwrap();
        assert!(!stage.contains_key("flags"));
        assert!(stage.contains_key("timeout"));
    }

    #[test]
    fn remove_drops_stage() {
        let ancestor = stages("- {name: configure, flags: [-O2]}\n");
        let descendant = stages("- {name: configure, mode: remove}\n");
        let merged = inherit(descendant, vec![ancestor]).unwrap();
        assert!(merged.get("configure").is_none());
    }

    #[test]
    fn ancestor_collision_errors() {
        let a = stages("- {name: configure}\n");
        let b = stages("- {name: configure}\n");
        let err = inherit(vec![], vec![a, b]).unwrap_err();
        assert!(matches!(err, ResolveError::StageCollision { .. }));
    }

    #[test]
    fn anonymous_stages_get_stable_names() {
        let raw = stages("- {handler: gcc, flags: [-O2]}\n");
        let hasher = Sha256Hasher;
        let named = name_anonymous_stages(raw, &hasher).unwrap();
        let name = stage_name(&named[0]).unwrap();
        assert!(name.starts_with("__"));
    }

    #[test]
    fn anonymous_names_ignore_before_after() {
        let hasher = Sha256Hasher;
        let a = name_anonymous_stages(stages("- {handler: gcc, after: [x]}\n"), &hasher).unwrap();
        let b = name_anonymous_stages(stages("- {handler: gcc, after: [y]}\n"), &hasher).unwrap();
        assert_eq!(stage_name(&a[0]), stage_name(&b[0]));
    }

    #[test]
    fn finalize_build_stage_defaults_handler_to_name() {
        let map = finalize_build_stage("configure", DocMap::new()).unwrap();
        assert_eq!(
            map.get("handler").unwrap().value,
            Document::String("configure".to_string())
        );
    }

    #[test]
    fn finalize_build_stage_rejects_anonymous_without_handler() {
        let err = finalize_build_stage("__deadbeef", DocMap::new()).unwrap_err();
        assert!(matches!(err, ResolveError::MissingStageHandler));
    }
}
