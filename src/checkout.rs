//! Component C: the source checkout manager.
//!
//! Profiles and packages may reference files that live in a remote
//! repository rather than on the local filesystem. [`SourceCheckouts`] fetches
//! and unpacks such repositories into scratch directories, named so that
//! later path expressions of the form `<name>/rest/of/path` can be resolved
//! back to the checkout. Every checkout directory is a [`tempfile::TempDir`],
//! so the unpack destination is removed automatically if unpacking fails or
//! once the owning checkout entry is dropped — no manual rollback bookkeeping
//! is needed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use url::Url;

use crate::error::ResolveError;

/// The external source-cache collaborator: fetches a repository by URL and
/// content key, then unpacks a previously fetched key into a directory.
/// Fetching and unpacking are separate steps because a key already present
/// in the cache need not be fetched again.
pub trait SourceCache {
    fn fetch(&self, url: &Url, key: &str, hint: &str) -> Result<(), ResolveError>;
    fn unpack(&self, key: &str, dest: &Path) -> Result<(), ResolveError>;
}

struct CheckoutEntry {
    key: String,
    dir: TempDir,
}

/// Holds every source checked out while resolving a single profile, keyed by
/// the name the profile gave it (`name:` on the include fragment).
pub struct SourceCheckouts<'a> {
    source_cache: &'a dyn SourceCache,
    repos: HashMap<String, CheckoutEntry>,
}

impl<'a> SourceCheckouts<'a> {
    pub fn new(source_cache: &'a dyn SourceCache) -> Self {
        SourceCheckouts {
            source_cache,
            repos: HashMap::new(),
        }
    }

    /// Ensures `name` is checked out at `key`, fetching and unpacking it if
    /// this is the first time `name` is seen. Returns the checkout's root
    /// directory. A `name` already bound to a different `key` is an error —
    /// the same name cannot mean two different commits within one profile.
    pub fn checkout(&mut self, name: &str, key: &str, urls: &[Url]) -> Result<PathBuf, ResolveError> {
        if let Some(existing) = self.repos.get(name) {
            if existing.key != key {
                return Err(ResolveError::CheckoutNameReuse {
                    name: name.to_string(),
                });
            }
            return Ok(existing.dir.path().to_path_buf());
        }

        if urls.len() != 1 {
            return Err(ResolveError::CheckoutUrlCount {
                name: name.to_string(),
                count: urls.len(),
            });
        }

        let hint = format!("profile-{name}");
        self.source_cache.fetch(&urls[0], key, &hint)?;

        let dir = tempfile::Builder::new()
            .prefix(&hint)
            .tempdir()
            .map_err(|source| ResolveError::Io {
                path: hint.clone(),
                source,
            })?;
        self.source_cache.unpack(key, dir.path())?;

        let path = dir.path().to_path_buf();
        self.repos.insert(
            name.to_string(),
            CheckoutEntry {
                key: key.to_string(),
                dir,
            },
        );
        Ok(path)
    }

    /// Expands a `<name>/rest/of/path` reference to the temporary checkout
    /// directory bound to `name`. Paths without the `<name>` prefix pass
    /// through unchanged.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ResolveError> {
        let Some(rest_start) = path.strip_prefix('<') else {
            return Ok(PathBuf::from(path));
        };
        let Some(close) = rest_start.find('>') else {
            return Ok(PathBuf::from(path));
        };
        let name = &rest_start[..close];
        let tail = &rest_start[close + 1..];
        let entry = self
            .repos
            .get(name)
            .ok_or_else(|| ResolveError::UnboundCheckoutName {
                name: name.to_string(),
            })?;
        Ok(PathBuf::from(format!(
            "{}{tail}",
            entry.dir.path().display()
        )))
    }

    /// Releases every checkout directory. Called explicitly by callers that
    /// want teardown to happen before the end of the enclosing scope; the
    /// `Drop` impl below covers every other exit path (an early `?` return,
    /// or a panic unwinding through the scope).
    pub fn close(&mut self) {
        self.repos.clear();
    }
}

impl<'a> Drop for SourceCheckouts<'a> {
    /// Every `TempDir` is removed best-effort as its `CheckoutEntry` drops;
    /// one checkout's removal failing does not stop the others from being
    /// attempted, since each `TempDir::drop` swallows its own I/O errors.
    fn drop(&mut self) {
        self.repos.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeCache {
        unpacked: RefCell<Vec<String>>,
        fail_unpack: bool,
    }

    impl SourceCache for FakeCache {
        fn fetch(&self, _url: &Url, _key: &str, _hint: &str) -> Result<(), ResolveError> {
            Ok(())
        }

        fn unpack(&self, key: &str, dest: &Path) -> Result<(), ResolveError> {
            if self.fail_unpack {
                return Err(ResolveError::Io {
                    path: dest.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
                });
            }
            self.unpacked.borrow_mut().push(key.to_string());
            Ok(())
        }
    }

    fn url() -> Url {
        Url::parse("https://example.com/repo.git").unwrap()
    }

    #[test]
    fn checkout_returns_stable_path_for_same_name() {
        let cache = FakeCache {
            unpacked: RefCell::new(Vec::new()),
            fail_unpack: false,
        };
        let mut checkouts = SourceCheckouts::new(&cache);
        let a = checkouts.checkout("repo", "git:abc", &[url()]).unwrap();
        let b = checkouts.checkout("repo", "git:abc", &[url()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.unpacked.borrow().len(), 1);
    }

    #[test]
    fn checkout_rejects_name_reuse_with_different_key() {
        let cache = FakeCache {
            unpacked: RefCell::new(Vec::new()),
            fail_unpack: false,
        };
        let mut checkouts = SourceCheckouts::new(&cache);
        checkouts.checkout("repo", "git:abc", &[url()]).unwrap();
        let err = checkouts.checkout("repo", "git:def", &[url()]).unwrap_err();
        assert!(matches!(err, ResolveError::CheckoutNameReuse { .. }));
    }

    #[test]
    fn checkout_requires_exactly_one_url() {
        let cache = FakeCache {
            unpacked: RefCell::new(Vec::new()),
            fail_unpack: false,
        };
        let mut checkouts = SourceCheckouts::new(&cache);
        let err = checkouts.checkout("repo", "git:abc", &[]).unwrap_err();
        assert!(matches!(err, ResolveError::CheckoutUrlCount { .. }));
    }

    #[test]
    fn resolve_expands_named_checkout() {
        let cache = FakeCache {
            unpacked: RefCell::new(Vec::new()),
            fail_unpack: false,
        };
        let mut checkouts = SourceCheckouts::new(&cache);
        let root = checkouts.checkout("repo", "git:abc", &[url()]).unwrap();
        let resolved = checkouts.resolve("<repo>/profile.yaml").unwrap();
        assert_eq!(resolved, root.join("profile.yaml"));
    }

    #[test]
    fn resolve_passes_through_plain_paths() {
        let cache = FakeCache {
            unpacked: RefCell::new(Vec::new()),
            fail_unpack: false,
        };
        let checkouts = SourceCheckouts::new(&cache);
        let resolved = checkouts.resolve("plain/path.yaml").unwrap();
        assert_eq!(resolved, PathBuf::from("plain/path.yaml"));
    }

    #[test]
    fn resolve_rejects_unbound_name() {
        let cache = FakeCache {
            unpacked: RefCell::new(Vec::new()),
            fail_unpack: false,
        };
        let checkouts = SourceCheckouts::new(&cache);
        let err = checkouts.resolve("<missing>/x").unwrap_err();
        assert!(matches!(err, ResolveError::UnboundCheckoutName { .. }));
    }

    #[test]
    fn failed_unpack_does_not_register_checkout() {
        let cache = FakeCache {
            unpacked: RefCell::new(Vec::new()),
            fail_unpack: true,
        };
        let mut checkouts = SourceCheckouts::new(&cache);
        let err = checkouts.checkout("repo", "git:abc", &[url()]).unwrap_err();
        assert!(matches!(err, ResolveError::Io { .. }));
        assert!(checkouts.repos.is_empty());
    }
}
