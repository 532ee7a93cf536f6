//! Version-matrix resolvers.
//!
//! [`RuntimeResolver`] builds the base tree (distro version → runtime
//! version) from the package-registry probe. [`ExtensionResolver`]
//! layers extension versions on top of a base tree under the
//! compatibility bounds of its [`ExtensionConfig`].
//!
//! Both cache their result per instance; a force-refresh flag
//! recomputes from the collaborators. Any collaborator failure is
//! fatal for the whole pass — a partial tree is never returned as if
//! complete.

use crate::hosting::SourceHost;
use crate::probe::RegistryProbe;
use crate::tree::VersionTree;
use crate::version::{Version, VersionLine};
use anyhow::{bail, Context, Result};
use tracing::{debug, info};

/// One row of a compatibility bound table: extension versions at or
/// above `min_extension` require a runtime at or above `min_runtime`.
#[derive(Debug, Clone)]
pub struct CompatBound {
    pub min_extension: Version,
    pub min_runtime: VersionLine,
}

/// Static description of one tracked extension.
#[derive(Debug, Clone)]
pub struct ExtensionConfig {
    /// Extension (and build target) name, e.g. `swoole`.
    pub name: String,
    /// Source repository, e.g. `swoole/swoole-src`.
    pub repo: String,
    /// Minor-version lines to track; each resolves to its greatest
    /// released patch. A line with no matching release tag is ignored.
    pub tracked_lines: Vec<VersionLine>,
    /// Moving branches treated as pinned, always-available versions
    /// equal to their own name.
    pub moving_branches: Vec<String>,
    /// Bound table, ascending by `min_extension`.
    pub bounds: Vec<CompatBound>,
    /// Runtime bound for moving branches. Defaults to the newest
    /// runtime line named in the bound table.
    pub branch_bound: Option<VersionLine>,
    /// Global minimum: runtime versions below this are pruned from the
    /// extension's working copy of the base tree before layering. They
    /// stay valid for the plain runtime matrix.
    pub min_runtime: Option<VersionLine>,
}

impl ExtensionConfig {
    /// Check the bound table is non-empty and ascending.
    pub fn validate(&self) -> Result<()> {
        if self.bounds.is_empty() {
            bail!("extension '{}' has an empty compatibility table", self.name);
        }
        for pair in self.bounds.windows(2) {
            if pair[0].min_extension >= pair[1].min_extension {
                bail!(
                    "extension '{}' compatibility table is not ascending at {}",
                    self.name,
                    pair[1].min_extension
                );
            }
        }
        Ok(())
    }

    /// Runtime lower bound for a resolved extension version: the last
    /// table row whose `min_extension` is at or below it. `None` means
    /// the version predates the table and contributes no tree entries.
    pub fn runtime_bound_for(&self, version: &Version) -> Option<VersionLine> {
        self.bounds
            .iter()
            .rev()
            .find(|bound| bound.min_extension <= *version)
            .map(|bound| bound.min_runtime)
    }

    /// Runtime lower bound applied to moving branches.
    pub fn branch_runtime_bound(&self) -> Option<VersionLine> {
        self.branch_bound
            .or_else(|| self.bounds.iter().map(|bound| bound.min_runtime).max())
    }
}

/// Resolves the base runtime tree.
pub struct RuntimeResolver<'a> {
    probe: &'a dyn RegistryProbe,
    distro_versions: &'a [String],
    cache: Option<VersionTree>,
}

impl<'a> RuntimeResolver<'a> {
    pub fn new(probe: &'a dyn RegistryProbe, distro_versions: &'a [String]) -> Self {
        Self {
            probe,
            distro_versions,
            cache: None,
        }
    }

    /// The distro version → runtime version tree, probing once per
    /// configured distro version. Cached per instance unless `refresh`.
    pub fn versions(&mut self, refresh: bool) -> Result<VersionTree> {
        if let Some(tree) = &self.cache {
            if !refresh {
                return Ok(tree.clone());
            }
        }

        let mut tree = VersionTree::new();
        for distro_version in self.distro_versions {
            let entries = self.probe.runtime_packages(distro_version)?;
            let mut found = 0usize;
            for entry in &entries {
                match runtime_version_from_entry(entry) {
                    Some(version) => {
                        info!("found php {version} on {distro_version}");
                        tree.insert_path([distro_version.clone(), version.to_string()]);
                        found += 1;
                    }
                    None => debug!("skipping unparsable package entry '{entry}'"),
                }
            }
            if found == 0 {
                bail!(
                    "no runtime versions discovered on distro version '{}'",
                    distro_version
                );
            }
        }

        self.cache = Some(tree.clone());
        Ok(tree)
    }
}

/// Version token of a `name-version[-release]` package entry.
fn runtime_version_from_entry(entry: &str) -> Option<Version> {
    let version = entry.split('-').nth(1)?;
    Version::parse(version).ok()
}

/// Layers one extension's versions onto a base runtime tree.
pub struct ExtensionResolver<'a> {
    config: &'a ExtensionConfig,
    host: &'a dyn SourceHost,
    cache: Option<VersionTree>,
}

impl<'a> ExtensionResolver<'a> {
    pub fn new(config: &'a ExtensionConfig, host: &'a dyn SourceHost) -> Self {
        Self {
            config,
            host,
            cache: None,
        }
    }

    /// The distro version → runtime version → extension version tree.
    ///
    /// Scans the repository's release tags once, keeps the greatest
    /// patch per tracked line, then emits an entry for every (distro,
    /// runtime, extension) combination whose runtime satisfies the
    /// computed bound. Cached per instance unless `refresh`.
    pub fn versions(&mut self, base: &VersionTree, refresh: bool) -> Result<VersionTree> {
        if let Some(tree) = &self.cache {
            if !refresh {
                return Ok(tree.clone());
            }
        }
        self.config.validate()?;

        let mut working = base.clone();
        if let Some(min) = self.config.min_runtime {
            for (_, node) in working.children_mut() {
                node.retain_children(|runtime| match Version::parse(runtime) {
                    Ok(version) => min.admits(&version),
                    Err(_) => false,
                });
            }
        }

        let resolved = self.resolve_versions()?;

        let mut tree = VersionTree::new();
        for (distro_version, runtimes) in working.children() {
            for (runtime, _) in runtimes.children() {
                let runtime_version = Version::parse(runtime).with_context(|| {
                    format!("runtime version '{runtime}' in base tree for '{}'", self.config.name)
                })?;
                for (extension_version, bound) in &resolved {
                    if bound.admits(&runtime_version) {
                        tree.insert_path([
                            distro_version.to_string(),
                            runtime.to_string(),
                            extension_version.clone(),
                        ]);
                    }
                }
            }
        }

        self.cache = Some(tree.clone());
        Ok(tree)
    }

    /// Resolved extension versions paired with their runtime bound, in
    /// tracked-line order followed by moving branches.
    fn resolve_versions(&self) -> Result<Vec<(String, VersionLine)>> {
        let tags = self.host.tag_names(&self.config.repo)?;
        let mut resolved = Vec::new();

        for line in &self.config.tracked_lines {
            let latest = tags
                .iter()
                .filter_map(|tag| Version::from_release_tag(tag))
                .filter(|version| version.line() == *line)
                .max();
            let Some(latest) = latest else {
                debug!("no release tag for {} line {line}", self.config.name);
                continue;
            };
            match self.config.runtime_bound_for(&latest) {
                Some(bound) => {
                    info!("use {} {latest} (requires php >= {bound})", self.config.name);
                    resolved.push((latest.to_string(), bound));
                }
                None => debug!(
                    "{} {latest} predates the compatibility table, skipped",
                    self.config.name
                ),
            }
        }

        if !self.config.moving_branches.is_empty() {
            let Some(bound) = self.config.branch_runtime_bound() else {
                bail!(
                    "extension '{}' tracks branches but has no runtime bound for them",
                    self.config.name
                );
            };
            for branch in &self.config.moving_branches {
                info!("use {} branch {branch} (requires php >= {bound})", self.config.name);
                resolved.push((branch.clone(), bound));
            }
        }

        Ok(resolved)
    }
}
