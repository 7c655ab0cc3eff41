//! Thin CLI front-end over the [`pkgspec_resolver`] library: resolves the
//! packages named in a profile and prints the result, or validates a profile
//! without printing anything. All the logic lives in the library crate; this
//! binary is presentation and argument parsing only.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkgspec_resolver::checkout::SourceCache;
use pkgspec_resolver::document::{to_yaml_value, Document};
use pkgspec_resolver::error::ResolveError;
use pkgspec_resolver::params::Parameters;
use pkgspec_resolver::profile;
use pkgspec_resolver::{resolve_one_package, resolve_one_package_with_overrides, ResolvedPackage};

#[derive(Parser)]
#[command(name = "pkgspec", version, about = "Resolve package-build profiles")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one or all packages named in a profile and print the results as YAML.
    Resolve {
        /// Path to the root profile include file.
        profile: String,

        /// Only resolve this package, instead of every package in the profile.
        #[arg(long)]
        package: Option<String>,

        /// Override a profile parameter for this run (`KEY=VALUE`, repeatable).
        /// Takes precedence over both the profile's own `parameters:` section
        /// and any per-package override in `packages:`.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Resolve every package in a profile and report errors without printing documents.
    Validate {
        /// Path to the root profile include file.
        profile: String,
    },
}

/// A [`SourceCache`] for profiles whose `extends` entries are all local
/// files: `fetch`/`unpack` are unreachable unless an include carries a
/// `key`, which only happens for remote checkouts. Actual network fetching
/// is an external collaborator outside this crate's scope (see spec §1);
/// a caller that needs it substitutes their own `SourceCache` impl here.
struct LocalOnlySourceCache;

impl SourceCache for LocalOnlySourceCache {
    fn fetch(&self, url: &url::Url, _key: &str, _hint: &str) -> Result<(), ResolveError> {
        Err(ResolveError::Io {
            path: url.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "this build of pkgspec has no remote source cache configured",
            ),
        })
    }

    fn unpack(&self, key: &str, _dest: &Path) -> Result<(), ResolveError> {
        Err(ResolveError::Io {
            path: key.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "this build of pkgspec has no remote source cache configured",
            ),
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Resolve {
            profile,
            package,
            params,
        } => run_resolve(&profile, package.as_deref(), &params),
        Command::Validate { profile } => run_validate(&profile),
    }
}

/// Parses a `KEY=VALUE` CLI argument into a `(key, value)` pair.
fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected `KEY=VALUE`, got `{raw}`"))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_resolve(profile_path: &str, only_package: Option<&str>, param_overrides: &[(String, String)]) -> Result<()> {
    let cache = LocalOnlySourceCache;
    let checkouts = std::rc::Rc::new(std::cell::RefCell::new(
        pkgspec_resolver::checkout::SourceCheckouts::new(&cache),
    ));
    let loaded = profile::load_profile(checkouts, profile_path)
        .with_context(|| format!("failed to load profile `{profile_path}`"))?;

    let names: Vec<String> = match only_package {
        Some(name) => vec![name.to_string()],
        None => loaded.packages().keys().cloned().collect(),
    };

    let mut overrides = Parameters::new();
    for (key, value) in param_overrides {
        overrides.insert(key.clone(), Document::String(value.clone()));
    }

    for name in names {
        let resolved =
            resolve_one_package_with_overrides(&loaded, &name, loaded.parameters(), &overrides)
                .with_context(|| format!("failed to resolve package `{name}`"))?;
        print_resolved(&resolved)?;
    }
    Ok(())
}

fn run_validate(profile_path: &str) -> Result<()> {
    let cache = LocalOnlySourceCache;
    let checkouts = std::rc::Rc::new(std::cell::RefCell::new(
        pkgspec_resolver::checkout::SourceCheckouts::new(&cache),
    ));
    let loaded = profile::load_profile(checkouts, profile_path)
        .with_context(|| format!("failed to load profile `{profile_path}`"))?;

    let mut failures = Vec::new();
    for name in loaded.packages().keys() {
        if let Err(err) = resolve_package(&loaded, name) {
            failures.push(format!("{name}: {err}"));
        }
    }

    if failures.is_empty() {
        println!("ok: {} package(s) resolved cleanly", loaded.packages().len());
        Ok(())
    } else {
        for failure in &failures {
            eprintln!("error: {failure}");
        }
        anyhow::bail!("{} package(s) failed to resolve", failures.len());
    }
}

fn resolve_package(
    loaded: &profile::Profile<'_>,
    name: &str,
) -> Result<ResolvedPackage, ResolveError> {
    resolve_one_package(loaded, name, loaded.parameters())
}

fn print_resolved(resolved: &ResolvedPackage) -> Result<()> {
    println!("# {}", resolved.name);
    let yaml_doc = to_yaml_value(&pkgspec_resolver::document::Document::Map(resolved.document.clone()));
    print!("{}", serde_yaml::to_string(&yaml_doc).context("failed to render resolved document as yaml")?);
    if !resolved.hook_files.is_empty() {
        println!("# hook files: {}", resolved.hook_files.join(", "));
    }
    println!();
    Ok(())
}
