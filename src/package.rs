//! Component F: the package loader.
//!
//! Resolves one named package into a fully merged document: conditionals
//! evaluated, parents inherited (tree-shaped, diamonds rejected), stages
//! merged per-section, dependency sets unified, and `sources` possibly
//! overridden from the profile's `sources`/`github` parameters.

use std::collections::BTreeMap;

use crate::conditional;
use crate::digest::ContentHasher;
use crate::document::{DocMap, Document, Marked};
use crate::error::ResolveError;
use crate::params::{ConditionEvaluator, Parameters};
use crate::stage;

/// The three stage sections a package document may carry, in the order the
/// spec lists them.
const STAGE_SECTIONS: [&str; 3] = ["build_stages", "profile_links", "when_build_dependency"];

/// The `load_yaml(name, parameters) -> Option<Marked<Document>>` collaborator.
/// Implemented by [`crate::profile::Profile::load_package_yaml`]; injected
/// here so the loader has no dependency on how a package document was found.
pub trait YamlLoader {
    fn load_yaml(&self, name: &str) -> Result<Option<Marked<Document>>, ResolveError>;
}

/// The `find_file(filenames) -> Option<String>` collaborator, used only to
/// collect `<name>.py` hook files for every loader in the ancestor chain.
pub trait HookFileFinder {
    fn find_file(&self, filenames: &[String]) -> Result<Option<String>, ResolveError>;
}

fn as_map_or_default(doc: &Document) -> DocMap {
    doc.as_map().cloned().unwrap_or_default()
}

fn string_list(map: &DocMap, key: &str) -> Result<Vec<String>, ResolveError> {
    match map.get(key) {
        None => Ok(Vec::new()),
        Some(m) => match &m.value {
            Document::Seq(items) => items
                .iter()
                .map(|i| {
                    i.value
                        .as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ResolveError::ExpectedDependencyList {
                            section: key.to_string(),
                        })
                })
                .collect(),
            _ => Err(ResolveError::ExpectedDependencyList {
                section: key.to_string(),
            }),
        },
    }
}

/// Resolves one package and its transitive `extends` ancestry.
///
/// Each instance corresponds to one node in the `extends` tree; `all_parents`
/// accumulates transitive ancestors in the pre-order the spec describes
/// ("parent.all_parents ++ [parent]", closest ancestors last), which is what
/// [`hook_files`](PackageLoader::hook_files) and dependency-set union walk.
pub struct PackageLoader {
    name: String,
    doc: DocMap,
    direct_parents: Vec<PackageLoader>,
    all_parents: Vec<String>,
}

impl PackageLoader {
    /// Loads `name` and its full ancestry, running the six-step pipeline
    /// from spec §4.F. `parameters` is the single environment shared by the
    /// whole tree (conditionals are evaluated once, at load time, against
    /// this environment — ancestors do not get their own).
    pub fn load(
        name: &str,
        parameters: &Parameters,
        evaluator: &dyn ConditionEvaluator,
        hasher: &dyn ContentHasher,
        load_yaml: &dyn YamlLoader,
        find_file: &dyn HookFileFinder,
    ) -> Result<PackageLoader, ResolveError> {
        Self::load_inner(name, parameters, evaluator, hasher, load_yaml, find_file, &mut Vec::new())
    }

    fn load_inner(
        name: &str,
        parameters: &Parameters,
        evaluator: &dyn ConditionEvaluator,
        hasher: &dyn ContentHasher,
        load_yaml: &dyn YamlLoader,
        find_file: &dyn HookFileFinder,
        seen: &mut Vec<String>,
    ) -> Result<PackageLoader, ResolveError> {
        // Step 1: load document.
        let raw = load_yaml
            .load_yaml(name)?
            .ok_or_else(|| ResolveError::PackageNotFound {
                name: name.to_string(),
            })?;

        // Step 2: process conditionals. The top-level `when` key, if any, was
        // already consulted by the profile layer to decide whether this
        // package is even selected; it plays no further role here.
        let mut doc = as_map_or_default(&raw.value);
        doc.shift_remove("when");
        let rewritten = conditional::rewrite(
            &Marked::with_mark(Document::Map(doc), raw.mark),
            parameters,
            evaluator,
        )?;
        let mut doc = as_map_or_default(&rewritten.value);

        // Step 3: load parents.
        let extends = doc
            .shift_remove("extends")
            .map(|m| m.value.coerce_string_list())
            .unwrap_or_default();
        let mut sorted_extends = extends;
        sorted_extends.sort();

        if seen.contains(&name.to_string()) {
            return Err(ResolveError::DiamondInheritance {
                name: name.to_string(),
            });
        }
        seen.push(name.to_string());

        // Transitive ancestors accumulate as `parent.all_parents ++ [parent]`
        // groups, each new group prepended ahead of the ones already seen —
        // so the closest direct parents end up last in the flattened list,
        // and a name shared between this group and any earlier one is the
        // diamond this loop is checking for.
        let mut direct_parents = Vec::with_capacity(sorted_extends.len());
        let mut all_parents: Vec<String> = Vec::new();
        for parent_name in &sorted_extends {
            let parent = Self::load_inner(
                parent_name,
                parameters,
                evaluator,
                hasher,
                load_yaml,
                find_file,
                seen,
            )?;
            let mut group: Vec<String> = parent.all_parents.clone();
            group.push(parent.name.clone());
            for ancestor in &group {
                if all_parents.contains(ancestor) {
                    return Err(ResolveError::DiamondInheritance {
                        name: ancestor.clone(),
                    });
                }
            }
            group.extend(all_parents);
            all_parents = group;
            direct_parents.push(parent);
        }
        seen.pop();

        // Step 4: merge stages.
        for section in STAGE_SECTIONS {
            let self_stages = doc
                .get(section)
                .map(|m| m.value.as_seq().map(<[_]>::to_vec).unwrap_or_default())
                .unwrap_or_default();
            let self_stages = stage::name_anonymous_stages(self_stages, hasher)?;

            let mut parent_stage_lists = Vec::with_capacity(direct_parents.len());
            for parent in &direct_parents {
                let parent_stages = parent
                    .doc
                    .get(section)
                    .map(|m| m.value.as_seq().map(<[_]>::to_vec).unwrap_or_default())
                    .unwrap_or_default();
                parent_stage_lists.push(stage::name_anonymous_stages(parent_stages, hasher)?);
            }

            let merged = stage::inherit(self_stages, parent_stage_lists)?;
            let values: Vec<Marked<Document>> = merged.into_values().collect();
            doc.insert(section.to_string(), Marked::new(Document::Seq(values)));
        }

        // Step 5: merge dependencies.
        let mut dependencies = doc
            .get("dependencies")
            .map(|m| as_map_or_default(&m.value))
            .unwrap_or_default();
        for key in ["build", "run"] {
            let mut set: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
            // Union over `all_parents` of *this* node, matching
            // "{parent.doc.dependencies[key] for parent in all_parents}".
            for ancestor_name in &all_parents {
                let ancestor = find_parent_doc(&direct_parents, ancestor_name)
                    .expect("every name in all_parents is reachable from direct_parents");
                set.extend(dependency_list(ancestor, key)?);
            }
            set.extend(string_list(&dependencies, key)?);
            dependencies.insert(
                key.to_string(),
                Marked::new(Document::Seq(
                    set.into_iter().map(|s| Marked::new(Document::String(s))).collect(),
                )),
            );
        }
        doc.insert("dependencies".to_string(), Marked::new(Document::Map(dependencies)));

        // Step 6: override sources.
        apply_source_override(&mut doc, parameters)?;

        Ok(PackageLoader {
            name: name.to_string(),
            doc,
            direct_parents,
            all_parents,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved document, stages left as unordered lists (named `name`,
    /// possibly carrying `before`/`after`). Callers that want the final
    /// build-ready form should call [`stages_topo_ordered`](Self::stages_topo_ordered).
    pub fn doc(&self) -> &DocMap {
        &self.doc
    }

    /// `<name>.py` hook files for every loader in `all_parents + [self]`, in
    /// that order. Duplicates are preserved deliberately: the same hook file
    /// reachable through two ancestors is not deduplicated by this layer
    /// (spec §9 leaves this to the caller).
    pub fn hook_files(&self, find_file: &dyn HookFileFinder) -> Result<Vec<String>, ResolveError> {
        let mut names: Vec<&str> = self.all_parents.iter().map(String::as_str).collect();
        names.push(&self.name);
        let mut out = Vec::new();
        for loader_name in names {
            if let Some(path) = find_file.find_file(&[format!("{loader_name}.py")])? {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Passes each of the three stage sections through [`stage::topo_order`],
    /// applying the `handler`-defaulting rule to `build_stages`, and strips
    /// the ordering keys from every stage. Other top-level keys (`sources`,
    /// `dependencies`, any passthrough attribute) are carried unchanged.
    pub fn stages_topo_ordered(&self) -> Result<DocMap, ResolveError> {
        let mut out = self.doc.clone();
        for section in STAGE_SECTIONS {
            let stages = out
                .get(section)
                .map(|m| m.value.as_seq().map(<[_]>::to_vec).unwrap_or_default())
                .unwrap_or_default();
            let mut by_name = indexmap::IndexMap::new();
            for stage in stages {
                let name = stage::name_of(&stage).expect("every stage was auto-named in step 4");
                by_name.insert(name, stage);
            }
            let ordered = stage::topo_order(by_name)?;
            let mut finalized = Vec::with_capacity(ordered.len());
            for (name, stage) in ordered {
                let map = stage.value.as_map().cloned().unwrap_or_default();
                let map = if section == "build_stages" {
                    stage::finalize_build_stage(&name, map)?
                } else {
                    stage::finalize_stage(map)
                };
                finalized.push(Marked::with_mark(Document::Map(map), stage.mark));
            }
            out.insert(section.to_string(), Marked::new(Document::Seq(finalized)));
        }
        Ok(out)
    }
}

fn find_parent_doc<'a>(direct_parents: &'a [PackageLoader], name: &str) -> Option<&'a DocMap> {
    for parent in direct_parents {
        if parent.name == name {
            return Some(&parent.doc);
        }
        if let Some(found) = find_parent_doc(&parent.direct_parents, name) {
            return Some(found);
        }
    }
    None
}

fn dependency_list(doc: &DocMap, key: &str) -> Result<Vec<String>, ResolveError> {
    let dependencies = doc
        .get("dependencies")
        .map(|m| as_map_or_default(&m.value))
        .unwrap_or_default();
    string_list(&dependencies, key)
}

/// Step 6 of the package-load pipeline: if the profile's parameters carry a
/// `sources` list, it replaces `doc.sources` outright; else if they carry a
/// `github` URL, the single existing source's `url`/`key` are rewritten from
/// it (splitting at `/commit/` to derive the `.git` repo and commit id).
fn apply_source_override(doc: &mut DocMap, parameters: &Parameters) -> Result<(), ResolveError> {
    if let Some(sources) = parameters.get("sources") {
        doc.insert("sources".to_string(), Marked::new(sources.clone()));
        return Ok(());
    }

    let Some(github) = parameters.get("github") else {
        return Ok(());
    };
    let github_url = github.as_str().ok_or_else(|| ResolveError::InvalidParameter {
        name: "github".to_string(),
        reason: "must be a string".to_string(),
    })?;

    let sources = doc
        .get("sources")
        .and_then(|m| m.value.as_seq())
        .map(<[_]>::to_vec)
        .unwrap_or_default();
    if sources.len() != 1 {
        return Err(ResolveError::SourceOverrideMisuse {
            count: sources.len(),
        });
    }

    let (prefix, commit) = github_url
        .split_once("/commit/")
        .ok_or_else(|| ResolveError::InvalidParameter {
            name: "github".to_string(),
            reason: format!("expected a `.../commit/<id>` url, got `{github_url}`"),
        })?;
    let git_repo = format!("{prefix}.git");
    let git_id = commit.split('/').next_back().unwrap_or(commit).to_string();

    let mut source_map = sources[0].value.as_map().cloned().unwrap_or_default();
    source_map.insert("url".to_string(), Marked::new(Document::String(git_repo)));
    source_map.insert(
        "key".to_string(),
        Marked::new(Document::String(format!("git:{git_id}"))),
    );
    doc.insert(
        "sources".to_string(),
        Marked::new(Document::Seq(vec![Marked::new(Document::Map(source_map))])),
    );
    Ok(())
}

/// Convenience entry point used by the CLI: resolves `name` against `profile`
/// and returns the topologically ordered document plus its hook-file list.
pub fn resolve_package(
    name: &str,
    parameters: &Parameters,
    evaluator: &dyn ConditionEvaluator,
    hasher: &dyn ContentHasher,
    load_yaml: &dyn YamlLoader,
    find_file: &dyn HookFileFinder,
) -> Result<(DocMap, Vec<String>), ResolveError> {
    let loader = PackageLoader::load(name, parameters, evaluator, hasher, load_yaml, find_file)?;
    let hooks = loader.hook_files(find_file)?;
    let doc = loader.stages_topo_ordered()?;
    Ok((doc, hooks))
}

/// An in-memory [`YamlLoader`]/[`HookFileFinder`] pair for tests: packages
/// are supplied as raw YAML text keyed by name, and no hook files are ever
/// found. Mirrors the fakes used in [`crate::checkout`]'s own tests.
pub struct FixedYamlLoader(pub BTreeMap<String, String>);

impl YamlLoader for FixedYamlLoader {
    fn load_yaml(&self, name: &str) -> Result<Option<Marked<Document>>, ResolveError> {
        match self.0.get(name) {
            Some(text) => Ok(Some(crate::document::load_yaml_str(name, text)?)),
            None => Ok(None),
        }
    }
}

pub struct NoHookFiles;

impl HookFileFinder for NoHookFiles {
    fn find_file(&self, _filenames: &[String]) -> Result<Option<String>, ResolveError> {
        Ok(None)
    }
}
