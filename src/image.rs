//! Image descriptors.
//!
//! An [`ImageDescriptor`] is one concrete build unit: a runtime image
//! (`php`) or an extension image (`swoole`, `swow`) at a fixed distro
//! version. It owns the canonical tag, the build-argument map handed to
//! the build tool, and the lazily computed alias set.

use crate::grammar::{SymbolTable, TagGrammar, TagSpace};
use crate::version::Version;
use anyhow::{bail, Result};
use indexmap::IndexMap;
use std::fmt;

/// Length of the short commit prefix used as a grammar terminal.
const SHORT_COMMIT_LEN: usize = 8;

/// A resolved upstream commit for an extension image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommit {
    pub sha: String,
    pub short: String,
}

impl ResolvedCommit {
    pub fn new(sha: impl Into<String>) -> Self {
        let sha = sha.into();
        let short = sha.chars().take(SHORT_COMMIT_LEN).collect();
        Self { sha, short }
    }
}

/// An extension version: either a concrete release or a moving branch
/// pinned to its own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionVersion {
    Release(Version),
    Branch(String),
}

impl ExtensionVersion {
    /// Classify a raw version string.
    ///
    /// Names listed in `branches` are moving branches and are taken
    /// verbatim; anything else must parse as a full version.
    ///
    /// # Errors
    ///
    /// Returns a malformed-version error for a string that is neither
    /// a known branch nor a `MAJOR.MINOR.PATCH[-suffix]` version.
    pub fn classify(raw: &str, branches: &[String]) -> Result<Self> {
        if branches.iter().any(|b| b == raw) {
            return Ok(Self::Branch(raw.to_string()));
        }
        Ok(Self::Release(Version::parse(raw)?))
    }

    /// The git ref this version resolves through: `v<version>` for a
    /// release, the branch name verbatim for a moving branch.
    pub fn git_ref(&self) -> String {
        match self {
            Self::Release(v) => format!("v{v}"),
            Self::Branch(name) => name.clone(),
        }
    }
}

impl fmt::Display for ExtensionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release(v) => write!(f, "{v}"),
            Self::Branch(name) => write!(f, "{name}"),
        }
    }
}

/// Extension-specific fields of a descriptor.
#[derive(Debug, Clone)]
pub struct ExtensionImage {
    pub name: String,
    pub version: ExtensionVersion,
    /// Resolved by the flattening pass, before alias computation.
    pub commit: Option<ResolvedCommit>,
    /// The runtime image this extension layers on.
    pub base_image: String,
    /// Package-manager bootstrap (composer) version baked into the
    /// image. Required for every extension image.
    pub bootstrap_version: String,
}

/// One concrete image to build and tag.
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    /// Build target: `php` for the runtime, the extension name
    /// otherwise.
    pub target: String,
    /// Image repository, e.g. `hyperf/php`.
    pub repository: String,
    pub runtime_version: Version,
    pub distro: String,
    pub distro_version: String,
    pub extension: Option<ExtensionImage>,
    pub canonical_tag: String,
    /// Index of the surviving descriptor when this one was collapsed
    /// by commit deduplication. A back-reference for reporting only.
    pub duplicate_of: Option<usize>,
    build_args: IndexMap<String, String>,
    aliases: Option<Vec<String>>,
}

impl ImageDescriptor {
    /// Descriptor for a plain runtime image.
    ///
    /// # Errors
    ///
    /// Fails on a malformed runtime version string.
    pub fn runtime(
        namespace: &str,
        runtime_version: &str,
        distro: &str,
        distro_version: &str,
    ) -> Result<Self> {
        let runtime_version = Version::parse(runtime_version)?;
        let canonical_tag = format!("{runtime_version}-{distro}-{distro_version}");

        let mut build_args = IndexMap::new();
        build_args.insert(
            format!("{}_VERSION", distro.to_uppercase()),
            distro_version.to_string(),
        );
        build_args.insert("PHP_VERSION".to_string(), runtime_version.to_string());

        Ok(Self {
            target: "php".to_string(),
            repository: format!("{namespace}/php"),
            runtime_version,
            distro: distro.to_string(),
            distro_version: distro_version.to_string(),
            extension: None,
            canonical_tag,
            duplicate_of: None,
            build_args,
            aliases: None,
        })
    }

    /// Descriptor for an extension image layered on the runtime.
    ///
    /// # Errors
    ///
    /// Fails on a malformed version string, or when no bootstrap
    /// (composer) version is supplied — extension images always carry
    /// one.
    pub fn extension(
        namespace: &str,
        extension_name: &str,
        extension_version: ExtensionVersion,
        runtime_version: &str,
        distro: &str,
        distro_version: &str,
        bootstrap_version: Option<&str>,
    ) -> Result<Self> {
        let Some(bootstrap_version) = bootstrap_version else {
            bail!(
                "extension image '{extension_name}' requires a composer bootstrap version \
                 and none was supplied"
            );
        };
        let runtime_version = Version::parse(runtime_version)?;
        let canonical_tag = format!(
            "{extension_version}-php-{runtime_version}-{distro}-{distro_version}"
        );
        let base_image =
            format!("{namespace}/php:{runtime_version}-{distro}-{distro_version}");

        let mut build_args = IndexMap::new();
        build_args.insert(
            format!("{}_VERSION", distro.to_uppercase()),
            distro_version.to_string(),
        );
        build_args.insert("PHP_VERSION".to_string(), runtime_version.to_string());
        build_args.insert(
            format!("{}_VERSION", extension_name.to_uppercase()),
            extension_version.to_string(),
        );
        build_args.insert(
            "COMPOSER_VERSION".to_string(),
            bootstrap_version.to_string(),
        );
        build_args.insert("PHP_IMAGE".to_string(), base_image.clone());

        Ok(Self {
            target: extension_name.to_string(),
            repository: format!("{namespace}/{extension_name}"),
            runtime_version,
            distro: distro.to_string(),
            distro_version: distro_version.to_string(),
            extension: Some(ExtensionImage {
                name: extension_name.to_string(),
                version: extension_version,
                commit: None,
                base_image,
                bootstrap_version: bootstrap_version.to_string(),
            }),
            canonical_tag,
            duplicate_of: None,
            build_args,
            aliases: None,
        })
    }

    /// Full image reference, repository plus canonical tag.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.repository, self.canonical_tag)
    }

    /// Attach the resolved upstream commit (extension images only).
    pub fn set_commit(&mut self, commit: ResolvedCommit) {
        if let Some(extension) = &mut self.extension {
            extension.commit = Some(commit);
        }
    }

    pub fn commit(&self) -> Option<&ResolvedCommit> {
        self.extension.as_ref().and_then(|e| e.commit.as_ref())
    }

    /// Extra descriptive build argument, not used for correctness.
    pub fn set_build_arg(&mut self, key: &str, value: &str) {
        self.build_args.insert(key.to_string(), value.to_string());
    }

    pub fn build_args(&self) -> &IndexMap<String, String> {
        &self.build_args
    }

    /// Seed the per-image symbol table for grammar expansion.
    ///
    /// Version-valued nonterminals carry the short and full forms; an
    /// extension release additionally carries the resolved commit and
    /// its short prefix, a moving branch only its name and the commit
    /// forms (it has no semver parts).
    pub fn symbol_table(&self) -> SymbolTable {
        let mut symbols = SymbolTable::new();
        symbols.set_terminal("DISTRO_NAME", &self.distro);
        symbols.set_terminal("DISTRO_VERSION_STR", &self.distro_version);

        let runtime_forms = [
            self.runtime_version.major_minor(),
            self.runtime_version.to_string(),
        ];
        match &self.extension {
            None => symbols.set_alternatives("VERSION", runtime_forms),
            Some(extension) => {
                symbols.set_alternatives("RUNTIME_VERSION", runtime_forms);
                let mut forms = match &extension.version {
                    ExtensionVersion::Release(v) => vec![v.major_minor(), v.to_string()],
                    ExtensionVersion::Branch(name) => vec![name.clone()],
                };
                if let Some(commit) = &extension.commit {
                    forms.push(commit.sha.clone());
                    forms.push(commit.short.clone());
                }
                symbols.set_alternatives("VERSION", forms);
            }
        }
        symbols
    }

    /// Compute the alias set once. Subsequent calls are no-ops.
    ///
    /// # Errors
    ///
    /// Propagates a grammar rewrite-cap failure.
    pub fn compute_aliases(&mut self, space: &mut TagSpace) -> Result<()> {
        if self.aliases.is_some() {
            return Ok(());
        }
        let grammar = if self.extension.is_some() {
            TagGrammar::extension()
        } else {
            TagGrammar::runtime()
        };
        self.aliases = Some(grammar.expand(&self.symbol_table(), space)?);
        Ok(())
    }

    /// Alias tags, empty until computed (or after transplantation).
    pub fn aliases(&self) -> &[String] {
        self.aliases.as_deref().unwrap_or(&[])
    }

    /// Replace the alias set wholesale (single-image CLI path, where
    /// aliases arrive precomputed).
    pub fn set_aliases(&mut self, aliases: Vec<String>) {
        self.aliases = Some(aliases);
    }

    /// Clear this descriptor's aliases and hand them to the caller.
    /// Used by the deduplication pass to transplant tags onto the
    /// surviving descriptor.
    pub fn take_aliases(&mut self) -> Vec<String> {
        self.aliases.replace(Vec::new()).unwrap_or_default()
    }

    /// Append transplanted aliases from a collapsed duplicate.
    pub fn extend_aliases(&mut self, extra: Vec<String>) {
        self.aliases.get_or_insert_with(Vec::new).extend(extra);
    }
}
