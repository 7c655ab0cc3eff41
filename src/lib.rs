//! A resolver for source-based package-build profiles.
//!
//! Given a root profile include (possibly spread across several inherited
//! fragments, some fetched from remote sources) and a set of package YAML
//! documents, this crate produces one fully normalized build specification
//! per package: inheritance flattened, `when`-conditionals evaluated, stage
//! lists merged and topologically ordered, and dependency sets unified.
//!
//! The entry point is [`resolve_profile`], which wires together the six
//! components described in the crate's design:
//!
//! - [`conditional`] — the `when`-clause rewriter (component A)
//! - [`stage`] — stage normalization, merge, and topological sort (component B)
//! - [`checkout`] — the scoped source-checkout manager (component C)
//! - [`file_resolver`] — overlay-ordered file lookup (component D)
//! - [`profile`] — profile inheritance (component E)
//! - [`package`] — per-package resolution (component F)

pub mod checkout;
pub mod conditional;
pub mod digest;
pub mod document;
pub mod error;
pub mod file_resolver;
pub mod package;
pub mod params;
pub mod profile;
pub mod stage;

use std::cell::RefCell;
use std::rc::Rc;

use tracing::instrument;

use crate::checkout::{SourceCache, SourceCheckouts};
use crate::digest::{ContentHasher, Sha256Hasher};
use crate::document::DocMap;
use crate::error::ResolveError;
use crate::package::{resolve_package, HookFileFinder, YamlLoader};
use crate::params::{ConditionEvaluator, DefaultEvaluator, Parameters};
use crate::profile::Profile;

/// One package's fully resolved build specification, plus the hook files
/// gathered across its `extends` ancestry.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub name: String,
    pub document: DocMap,
    pub hook_files: Vec<String>,
}

/// Adapts a [`Profile`] to the [`YamlLoader`]/[`HookFileFinder`] traits
/// [`package::PackageLoader`] expects, so the package loader does not need
/// to know how package documents or hook files are actually found on disk.
struct ProfileAdapter<'a, 'c> {
    profile: &'a Profile<'c>,
}

impl<'a, 'c> YamlLoader for ProfileAdapter<'a, 'c> {
    fn load_yaml(&self, name: &str) -> Result<Option<crate::document::Marked<crate::document::Document>>, ResolveError> {
        self.profile.load_package_yaml(name)
    }
}

impl<'a, 'c> HookFileFinder for ProfileAdapter<'a, 'c> {
    fn find_file(&self, filenames: &[String]) -> Result<Option<String>, ResolveError> {
        // The package loader asks for `<ancestor-name>.py`; hook files live
        // alongside the package YAML they belong to, so the lookup reuses
        // the same `$pkgs/$filename` / `$pkgs/$name/$filename` overlay search
        // `find_package_file` performs for other per-package resources.
        let Some(filename) = filenames.first() else {
            return Ok(None);
        };
        let owner = filename.strip_suffix(".py").unwrap_or(filename);
        self.profile.find_package_file(owner, filename)
    }
}

/// Resolves every non-skipped package named in the profile rooted at
/// `profile_file` (see [`profile::load_profile`]), using `source_cache` for
/// any remote profile fragments referenced via `extends`.
///
/// Per-package parameters are the profile's effective [`Parameters`]
/// overlaid with that package's entry in `packages:` (if any); a package
/// entry carrying `skip: true` was already excluded by the profile loader.
#[instrument(skip(source_cache))]
pub fn resolve_profile(
    profile_file: &str,
    source_cache: &dyn SourceCache,
) -> Result<Vec<ResolvedPackage>, ResolveError> {
    let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(source_cache)));
    let profile = profile::load_profile(checkouts, profile_file)?;

    let mut out = Vec::new();
    for (name, _settings) in profile.packages() {
        out.push(resolve_one_package(&profile, name, &profile.parameters().clone())?);
    }
    Ok(out)
}

/// Resolves a single package by name against an already-loaded profile,
/// folding in that package's `packages:` parameter overrides (if any).
#[instrument(skip(profile))]
pub fn resolve_one_package<'c>(
    profile: &Profile<'c>,
    pkgname: &str,
    base_parameters: &Parameters,
) -> Result<ResolvedPackage, ResolveError> {
    resolve_one_package_with_overrides(profile, pkgname, base_parameters, &Parameters::new())
}

/// As [`resolve_one_package`], but `overrides` is folded in last, taking
/// precedence over both `base_parameters` and the package's own `packages:`
/// settings — the caller-supplied `--param KEY=VALUE` layer.
#[instrument(skip(profile))]
pub fn resolve_one_package_with_overrides<'c>(
    profile: &Profile<'c>,
    pkgname: &str,
    base_parameters: &Parameters,
    overrides: &Parameters,
) -> Result<ResolvedPackage, ResolveError> {
    let mut parameters = base_parameters.clone();
    if let Some(settings) = profile.packages().get(pkgname) {
        if let Some(map) = settings.value.as_map() {
            for (k, v) in map {
                parameters.insert(k.clone(), v.value.clone());
            }
        }
    }
    for (k, v) in overrides.iter() {
        parameters.insert(k.clone(), v.clone());
    }

    let evaluator: &dyn ConditionEvaluator = &DefaultEvaluator;
    let hasher: &dyn ContentHasher = &Sha256Hasher;
    let adapter = ProfileAdapter { profile };

    let (document, hook_files) =
        resolve_package(pkgname, &parameters, evaluator, hasher, &adapter, &adapter)?;

    Ok(ResolvedPackage {
        name: pkgname.to_string(),
        document,
        hook_files,
    })
}
