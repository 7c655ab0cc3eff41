//! Component D: the overlay-based file resolver.
//!
//! A profile's `package_dirs` form a stack of overlays, the profile's own
//! directories listed before any inherited ones. Resolution always prefers
//! the first (highest-priority) overlay that actually contains the file.

use std::cell::RefCell;
use std::rc::Rc;

use crate::checkout::SourceCheckouts;
use crate::error::ResolveError;

pub struct FileResolver<'c> {
    checkouts: Rc<RefCell<SourceCheckouts<'c>>>,
    search_dirs: Vec<String>,
}

impl<'c> FileResolver<'c> {
    pub fn new(checkouts: Rc<RefCell<SourceCheckouts<'c>>>, search_dirs: Vec<String>) -> Self {
        FileResolver {
            checkouts,
            search_dirs,
        }
    }

    /// Expands a `<name>/rest/of/path` reference found by [`find_file`] or
    /// [`glob_files`] into a physical path.
    ///
    /// [`find_file`]: Self::find_file
    /// [`glob_files`]: Self::glob_files
    pub fn resolve(&self, path: &str) -> Result<std::path::PathBuf, ResolveError> {
        self.checkouts.borrow().resolve(path)
    }

    /// Searches every candidate filename within one overlay before moving on
    /// to the next, so a less-specific name in a higher-priority overlay
    /// still wins over a more-specific name in a lower-priority one.
    pub fn find_file(&self, filenames: &[String]) -> Result<Option<String>, ResolveError> {
        for overlay in &self.search_dirs {
            for name in filenames {
                let candidate = join(overlay, name);
                let physical = self.checkouts.borrow().resolve(&candidate)?;
                if physical.exists() {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// Matches each glob pattern against every overlay, returning a map from
    /// the path relative to its overlay root to the absolute physical path.
    /// Overlays are walked lowest-priority first so that a higher-priority
    /// overlay's match overwrites one found in a lower-priority overlay.
    pub fn glob_files(&self, patterns: &[String]) -> Result<std::collections::BTreeMap<String, std::path::PathBuf>, ResolveError> {
        let mut result = std::collections::BTreeMap::new();
        for overlay in self.search_dirs.iter().rev() {
            let basedir = self.checkouts.borrow().resolve(overlay)?;
            for pattern in patterns {
                let full_pattern = join(&basedir.display().to_string(), pattern);
                let matches = glob::glob(&full_pattern).map_err(|e| ResolveError::Io {
                    path: full_pattern.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
                })?;
                for entry in matches {
                    let path = entry.map_err(|e| ResolveError::Io {
                        path: full_pattern.clone(),
                        source: e.into_error(),
                    })?;
                    if let Ok(rel) = path.strip_prefix(&basedir) {
                        result.insert(rel.display().to_string(), path.clone());
                    }
                }
            }
        }
        Ok(result)
    }
}

fn join(overlay: &str, name: &str) -> String {
    if overlay.is_empty() {
        name.to_string()
    } else if overlay.ends_with('/') {
        format!("{overlay}{name}")
    } else {
        format!("{overlay}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::SourceCache;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;
    use url::Url;

    struct NoopCache;
    impl SourceCache for NoopCache {
        fn fetch(&self, _url: &Url, _key: &str, _hint: &str) -> Result<(), ResolveError> {
            Ok(())
        }
        fn unpack(&self, _key: &str, _dest: &Path) -> Result<(), ResolveError> {
            Ok(())
        }
    }

    #[test]
    fn find_file_prefers_first_matching_overlay() {
        let base = tempdir().unwrap();
        let high = base.path().join("high");
        let low = base.path().join("low");
        fs::create_dir_all(&high).unwrap();
        fs::create_dir_all(&low).unwrap();
        fs::write(high.join("pkg.yaml"), "x").unwrap();
        fs::write(low.join("pkg.yaml"), "y").unwrap();

        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let resolver = FileResolver::new(
            checkouts,
            vec![high.display().to_string(), low.display().to_string()],
        );
        let found = resolver
            .find_file(&["pkg.yaml".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(found, format!("{}/pkg.yaml", high.display()));
    }

    #[test]
    fn find_file_falls_back_to_later_overlay() {
        let base = tempdir().unwrap();
        let high = base.path().join("high");
        let low = base.path().join("low");
        fs::create_dir_all(&high).unwrap();
        fs::create_dir_all(&low).unwrap();
        fs::write(low.join("pkg.yaml"), "y").unwrap();

        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let resolver = FileResolver::new(
            checkouts,
            vec![high.display().to_string(), low.display().to_string()],
        );
        let found = resolver
            .find_file(&["pkg.yaml".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(found, format!("{}/pkg.yaml", low.display()));
    }

    #[test]
    fn find_file_returns_none_when_absent_everywhere() {
        let base = tempdir().unwrap();
        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let resolver = FileResolver::new(checkouts, vec![base.path().display().to_string()]);
        assert!(resolver.find_file(&["missing.yaml".to_string()]).unwrap().is_none());
    }

    #[test]
    fn glob_files_lets_higher_priority_overlay_win() {
        let base = tempdir().unwrap();
        let high = base.path().join("high");
        let low = base.path().join("low");
        fs::create_dir_all(&high).unwrap();
        fs::create_dir_all(&low).unwrap();
        fs::write(high.join("a.yaml"), "x").unwrap();
        fs::write(low.join("a.yaml"), "y").unwrap();
        fs::write(low.join("b.yaml"), "z").unwrap();

        let cache = NoopCache;
        let checkouts = Rc::new(RefCell::new(SourceCheckouts::new(&cache)));
        let resolver = FileResolver::new(
            checkouts,
            vec![high.display().to_string(), low.display().to_string()],
        );
        let matches = resolver.glob_files(&["*.yaml".to_string()]).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches.get("a.yaml").unwrap(), &high.join("a.yaml"));
    }
}
