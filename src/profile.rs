//! Component E: the profile loader.
//!
//! A profile is a YAML document, possibly `extends`-ing one or more parent
//! profiles (each itself a recursively loaded profile, possibly fetched from
//! a remote source). Loading walks the `extends` DAG depth-first, merges
//! `package_dirs`/`hook_import_dirs`/`parameters`/`packages` from every
//! parent into the descendant, and returns a single flattened document.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use url::Url;

use crate::checkout::SourceCheckouts;
use crate::document::{load_yaml_str, DocMap, Document, Marked};
use crate::error::ResolveError;
use crate::file_resolver::FileResolver;
use crate::params::Parameters;

struct IncludeFragment {
    file: String,
    name: Option<String>,
    key: Option<String>,
    urls: Vec<Url>,
}

fn parse_include(include: &Document) -> Result<IncludeFragment, ResolveError> {
    match include {
        Document::String(s) => Ok(IncludeFragment {
            file: s.clone(),
            name: None,
            key: None,
            urls: Vec::new(),
        }),
        Document::Map(map) => {
            let file = map
                .get("file")
                .and_then(|m| m.value.as_str())
                .ok_or_else(|| ResolveError::MalformedInclude {
                    reason: "include fragment is missing `file`".to_string(),
                })?
                .to_string();
            let name = map
                .get("name")
                .and_then(|m| m.value.as_str())
                .map(str::to_string);
            let key = map
                .get("key")
                .and_then(|m| m.value.as_str())
                .map(str::to_string);
            let urls = map
                .get("urls")
                .map(|m| m.value.coerce_string_list())
                .unwrap_or_default()
                .into_iter()
                .map(|u| {
                    Url::parse(&u).map_err(|source| ResolveError::MalformedInclude {
                        reason: format!("invalid url `{u}`: {source}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(IncludeFragment {
                file,
                name,
                key,
                urls,
            })
        }
        _ => Err(ResolveError::MalformedInclude {
            reason: "include fragment must be a string or a mapping".to_string(),
        }),
    }
}

fn is_absolute(p: &str) -> bool {
    Path::new(p).is_absolute()
}

fn join_cwd(cwd: &str, p: &str) -> String {
    if is_absolute(p) || cwd.is_empty() {
        p.to_string()
    } else if cwd.ends_with('/') {
        format!("{cwd}{p}")
    } else {
        format!("{cwd}/{p}")
    }
}

fn dirname(p: &str) -> String {
    Path::new(p)
        .parent()
        .map(|d| d.display().to_string())
        .unwrap_or_default()
}

fn as_map_or_default(doc: &Document) -> DocMap {
    doc.as_map().cloned().unwrap_or_default()
}

fn merge_list_section(
    map: &mut DocMap,
    section: &str,
    new_cwd: &str,
    parents: &[Document],
) {
    let own: Vec<String> = map
        .get(section)
        .map(|m| m.value.coerce_string_list())
        .unwrap_or_default();
    let mut resolved: Vec<String> = own.iter().map(|p| join_cwd(new_cwd, p)).collect();
    for parent in parents {
        if let Some(lst) = parent.as_map().and_then(|m| m.get(section)) {
            resolved.extend(lst.value.coerce_string_list());
        }
    }
    map.insert(
        section.to_string(),
        Marked::new(Document::Seq(
            resolved.into_iter().map(|s| Marked::new(Document::String(s))).collect(),
        )),
    );
}

fn merge_parameters(map: &mut DocMap, parents: &[Document]) -> Result<(), ResolveError> {
    let mut parameters = map
        .get("parameters")
        .map(|m| as_map_or_default(&m.value))
        .unwrap_or_default();
    let overridden: HashSet<String> = parameters.keys().cloned().collect();
    for parent in parents {
        let parent_params = parent
            .as_map()
            .and_then(|m| m.get("parameters"))
            .map(|m| as_map_or_default(&m.value))
            .unwrap_or_default();
        for (k, v) in parent_params {
            if overridden.contains(&k) {
                continue;
            }
            if parameters.contains_key(&k) {
                return Err(ResolveError::ParameterCollision { parameter: k });
            }
            parameters.insert(k, v);
        }
    }
    map.insert("parameters".to_string(), Marked::new(Document::Map(parameters)));
    Ok(())
}

fn merge_packages(map: &mut DocMap, parents: &[Document]) {
    let mut packages: DocMap = DocMap::new();
    let mut overlay = |packages: &mut DocMap, pkgname: String, settings: &Document| {
        let mut merged = packages
            .get(&pkgname)
            .map(|m| as_map_or_default(&m.value))
            .unwrap_or_default();
        for (k, v) in as_map_or_default(settings) {
            merged.insert(k, v);
        }
        packages.insert(pkgname, Marked::new(Document::Map(merged)));
    };

    for parent in parents {
        if let Some(parent_pkgs) = parent.as_map().and_then(|m| m.get("packages")) {
            for (pkgname, settings) in as_map_or_default(&parent_pkgs.value) {
                overlay(&mut packages, pkgname, &settings.value);
            }
        }
    }
    if let Some(own_pkgs) = map.get("packages") {
        for (pkgname, settings) in as_map_or_default(&own_pkgs.value) {
            overlay(&mut packages, pkgname, &settings.value);
        }
    }
    packages.retain(|_, settings| {
        !settings
            .value
            .as_map()
            .and_then(|m| m.get("skip"))
            .and_then(|m| m.value.as_bool())
            .unwrap_or(false)
    });
    map.insert("packages".to_string(), Marked::new(Document::Map(packages)));
}

/// Loads an include fragment and every profile it `extends`, recursively,
/// returning a single document with `extends` resolved away.
pub fn load_and_inherit_profile<'c>(
    checkouts: &Rc<RefCell<SourceCheckouts<'c>>>,
    include: &Document,
    cwd: &str,
) -> Result<Document, ResolveError> {
    let fragment = parse_include(include)?;

    let mut cwd = cwd.to_string();
    if let Some(key) = &fragment.key {
        let name = fragment.name.clone().ok_or_else(|| ResolveError::MalformedInclude {
            reason: "include fragment has `key` but no `name`".to_string(),
        })?;
        if fragment.urls.is_empty() {
            return Err(ResolveError::MalformedInclude {
                reason: "include fragment has `key` but no `urls`".to_string(),
            });
        }
        checkouts.borrow_mut().checkout(&name, key, &fragment.urls)?;
        cwd = format!("<{name}>");
    }

    let profile_path = join_cwd(&cwd, &fragment.file);
    let new_cwd = join_cwd(&cwd, &dirname(&fragment.file));

    let physical = checkouts.borrow().resolve(&profile_path)?;
    let text = std::fs::read_to_string(&physical).map_err(|source| ResolveError::Io {
        path: physical.display().to_string(),
        source,
    })?;
    let mut map = as_map_or_default(&load_yaml_str(&profile_path, &text)?.value);

    let parents: Vec<Document> = match map.shift_remove("extends") {
        Some(extends) => {
            let items = extends.value.as_seq().ok_or_else(|| ResolveError::MalformedInclude {
                reason: "`extends` must be a list of include fragments".to_string(),
            })?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(load_and_inherit_profile(checkouts, &item.value, &new_cwd)?);
            }
            out
        }
        None => Vec::new(),
    };

    for section in ["package_dirs", "hook_import_dirs"] {
        merge_list_section(&mut map, section, &new_cwd, &parents);
    }
    merge_parameters(&mut map, &parents)?;
    merge_packages(&mut map, &parents);

    Ok(Document::Map(map))
}

/// A fully resolved, `extends`-flattened profile: parameters, package
/// overlay directories, per-package parameter overrides, and the raw
/// `packages:` overlay settings.
pub struct Profile<'c> {
    parameters: Parameters,
    file_resolver: FileResolver<'c>,
    hook_import_dirs: Vec<String>,
    packages: DocMap,
    yaml_cache: RefCell<BTreeMap<String, Option<Marked<Document>>>>,
}

impl<'c> Profile<'c> {
    fn new(doc: DocMap, checkouts: Rc<RefCell<SourceCheckouts<'c>>>) -> Self {
        let parameters = doc
            .get("parameters")
            .map(|m| Parameters::from_map(&m.value))
            .unwrap_or_default();
        let package_dirs = doc
            .get("package_dirs")
            .map(|m| m.value.coerce_string_list())
            .unwrap_or_default();
        let hook_import_dirs = doc
            .get("hook_import_dirs")
            .map(|m| m.value.coerce_string_list())
            .unwrap_or_default();
        let packages = doc
            .get("packages")
            .map(|m| as_map_or_default(&m.value))
            .unwrap_or_default();
        Profile {
            parameters,
            file_resolver: FileResolver::new(checkouts, package_dirs),
            hook_import_dirs,
            packages,
            yaml_cache: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn hook_import_dirs(&self) -> &[String] {
        &self.hook_import_dirs
    }

    pub fn packages(&self) -> &DocMap {
        &self.packages
    }

    /// Attempts to find an auxiliary resource file for `pkgname`, searching
    /// `$pkgs/$filename` before `$pkgs/$pkgname/$filename` in each overlay.
    pub fn find_package_file(&self, pkgname: &str, filename: &str) -> Result<Option<String>, ResolveError> {
        self.file_resolver.find_file(&[
            filename.to_string(),
            format!("{pkgname}/{filename}"),
        ])
    }

    /// Lists every package specification file that could define `pkgname`:
    /// `$pkgs/name.yaml`, `$pkgs/name/name.yaml`, and `$pkgs/name/name-*.yaml`.
    pub fn glob_package_specs(&self, pkgname: &str) -> Result<BTreeMap<String, PathBuf>, ResolveError> {
        self.file_resolver.glob_files(&[
            format!("{pkgname}.yaml"),
            format!("{pkgname}/{pkgname}.yaml"),
            format!("{pkgname}/{pkgname}-*.yaml"),
        ])
    }

    /// Loads (and memoizes) `pkgname.yaml`, returning `None` if no package
    /// specification file for `pkgname` exists in any overlay.
    pub fn load_package_yaml(&self, pkgname: &str) -> Result<Option<Marked<Document>>, ResolveError> {
        if let Some(cached) = self.yaml_cache.borrow().get(pkgname) {
            return Ok(cached.clone());
        }
        let found = self.find_package_file(pkgname, &format!("{pkgname}.yaml"))?;
        let doc = match found {
            Some(path) => {
                let physical = self.file_resolver.resolve(&path)?;
                let text = std::fs::read_to_string(&physical).map_err(|source| ResolveError::Io {
                    path: physical.display().to_string(),
                    source,
                })?;
                Some(load_yaml_str(&path, &text)?)
            }
            None => None,
        };
        self.yaml_cache
            .borrow_mut()
            .insert(pkgname.to_string(), doc.clone());
        Ok(doc)
    }
}

/// Loads a profile from `profile_file`, resolving its full `extends` chain.
pub fn load_profile<'c>(
    checkouts: Rc<RefCell<SourceCheckouts<'c>>>,
    profile_file: &str,
) -> Result<Profile<'c>, ResolveError> {
    let include = Document::String(profile_file.to_string());
    let doc = load_and_inherit_profile(&checkouts, &include, "")?;
    Ok(Profile::new(as_map_or_default(&doc), checkouts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::SourceCache;
    use std::path::Path as StdPath;

    struct NoopCache;
    impl SourceCache for NoopCache {
        fn fetch(&self, _url: &Url, _key: &str, _hint: &str) -> Result<(), ResolveError> {
            Ok(())
        }
        fn unpack(&self, _key: &str, _dest: &StdPath) -> Result<(), ResolveError> {
            Ok(())
        }
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn merges_packages_and_parameters_from_parent() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "base.yaml",
            "parameters: {arch: linux}\npackages: {zlib: {version: '1.2'}}\n",
        );
        write(
            dir.path(),
            "child.yaml",
            "extends: [base.yaml]\npackages: {zlib: {patch: 3}, openssl: null}\n",
        );

        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let profile_path = dir.path().join("child.yaml");
        let profile = load_profile(checkouts, &profile_path.display().to_string()).unwrap();

        assert_eq!(
            profile.parameters().get("arch").unwrap(),
            &Document::String("linux".to_string())
        );
        let zlib = profile.packages().get("zlib").unwrap().value.as_map().unwrap();
        assert_eq!(zlib.get("version").unwrap().value, Document::String("1.2".to_string()));
        assert_eq!(zlib.get("patch").unwrap().value, Document::Int(3));
        assert!(profile.packages().contains_key("openssl"));
    }

    #[test]
    fn skip_true_removes_package() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "p.yaml",
            "packages: {zlib: {skip: true}, curl: {}}\n",
        );
        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let profile_path = dir.path().join("p.yaml");
        let profile = load_profile(checkouts, &profile_path.display().to_string()).unwrap();
        assert!(!profile.packages().contains_key("zlib"));
        assert!(profile.packages().contains_key("curl"));
    }

    #[test]
    fn conflicting_parent_parameters_without_override_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "parameters: {arch: linux}\n");
        write(dir.path(), "b.yaml", "parameters: {arch: darwin}\n");
        write(
            dir.path(),
            "child.yaml",
            "extends: [a.yaml, b.yaml]\n",
        );
        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let profile_path = dir.path().join("child.yaml");
        let err = load_profile(checkouts, &profile_path.display().to_string()).unwrap_err();
        assert!(matches!(err, ResolveError::ParameterCollision { .. }));
    }

    #[test]
    fn descendant_parameter_overrides_parent_collision() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "parameters: {arch: linux}\n");
        write(dir.path(), "b.yaml", "parameters: {arch: darwin}\n");
        write(
            dir.path(),
            "child.yaml",
            "extends: [a.yaml, b.yaml]\nparameters: {arch: windows}\n",
        );
        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let profile_path = dir.path().join("child.yaml");
        let profile = load_profile(checkouts, &profile_path.display().to_string()).unwrap();
        assert_eq!(
            profile.parameters().get("arch").unwrap(),
            &Document::String("windows".to_string())
        );
    }

    #[test]
    fn remote_include_with_key_but_no_name_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "child.yaml",
            "extends:\n- {file: base.yaml, key: 'git:abc', urls: ['https://example.com/repo.git']}\n",
        );
        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let profile_path = dir.path().join("child.yaml");
        let err = load_profile(checkouts, &profile_path.display().to_string()).unwrap_err();
        assert!(matches!(err, ResolveError::MalformedInclude { .. }));
    }

    #[test]
    fn remote_include_with_key_but_no_urls_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "child.yaml",
            "extends:\n- {file: base.yaml, key: 'git:abc', name: upstream}\n",
        );
        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let profile_path = dir.path().join("child.yaml");
        let err = load_profile(checkouts, &profile_path.display().to_string()).unwrap_err();
        assert!(matches!(err, ResolveError::MalformedInclude { .. }));
    }
}
