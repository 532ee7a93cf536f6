//! Matrix configuration.
//!
//! The tracked distro versions, the extension descriptions, and the
//! composer bootstrap version ship as built-in defaults. A
//! `matrix.toml` next to the build contexts overrides them wholesale.

use crate::resolver::{CompatBound, ExtensionConfig};
use crate::version::{Version, VersionLine};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "matrix.toml";

/// Fully parsed run configuration.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    /// Image repository namespace, e.g. `hyperf`.
    pub namespace: String,
    pub distro: String,
    /// Newest stable version first; the first discovered image claims
    /// the contended aliases.
    pub distro_versions: Vec<String>,
    /// Composer version baked into extension images.
    pub composer_version: Option<String>,
    pub extensions: Vec<ExtensionConfig>,
}

impl MatrixConfig {
    /// Built-in defaults.
    pub fn builtin() -> Self {
        let bound = |extension: &str, runtime: &str| CompatBound {
            min_extension: Version::parse(extension).expect("builtin bound version"),
            min_runtime: VersionLine::parse(runtime).expect("builtin bound line"),
        };
        Self {
            namespace: "hyperf".to_string(),
            distro: "alpine".to_string(),
            distro_versions: ["3.14", "edge", "3.13", "3.12", "3.11", "3.10"]
                .map(String::from)
                .to_vec(),
            composer_version: Some("2.1.8".to_string()),
            extensions: vec![
                ExtensionConfig {
                    name: "swoole".to_string(),
                    repo: "swoole/swoole-src".to_string(),
                    tracked_lines: vec![
                        VersionLine { major: 4, minor: 7 },
                        VersionLine { major: 4, minor: 6 },
                        VersionLine { major: 4, minor: 5 },
                    ],
                    moving_branches: vec!["master".to_string()],
                    bounds: vec![
                        bound("4.0.2", "7.3"),
                        bound("4.4.2", "7.4"),
                        bound("4.6.0", "8.0"),
                    ],
                    branch_bound: None,
                    min_runtime: None,
                },
                ExtensionConfig {
                    name: "swow".to_string(),
                    repo: "swow/swow".to_string(),
                    tracked_lines: vec![VersionLine { major: 0, minor: 1 }],
                    moving_branches: vec!["develop".to_string()],
                    bounds: vec![bound("0.1.0", "8.0")],
                    branch_bound: None,
                    // Swow never supported php 7; prune it from the
                    // working tree before layering.
                    min_runtime: Some(VersionLine { major: 8, minor: 0 }),
                },
            ],
        }
    }

    /// Load `matrix.toml` from `dir` when present, built-ins otherwise.
    pub fn load_or_builtin(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::builtin())
        }
    }

    /// Parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading matrix config '{}'", path.display()))?;
        let parsed: MatrixToml = toml::from_str(&raw)
            .with_context(|| format!("parsing matrix config '{}'", path.display()))?;
        let config = parsed
            .into_config()
            .with_context(|| format!("invalid matrix config '{}'", path.display()))?;
        for extension in &config.extensions {
            extension.validate()?;
        }
        if config.distro_versions.is_empty() {
            bail!(
                "invalid matrix config '{}': distro_versions is empty",
                path.display()
            );
        }
        Ok(config)
    }

    pub fn extension(&self, name: &str) -> Option<&ExtensionConfig> {
        self.extensions.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatrixToml {
    namespace: String,
    distro: String,
    distro_versions: Vec<String>,
    composer_version: Option<String>,
    #[serde(default, rename = "extension")]
    extensions: Vec<ExtensionToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtensionToml {
    name: String,
    repo: String,
    #[serde(default)]
    lines: Vec<String>,
    #[serde(default)]
    branches: Vec<String>,
    bounds: Vec<BoundToml>,
    branch_bound: Option<String>,
    min_runtime: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BoundToml {
    extension: String,
    runtime: String,
}

impl MatrixToml {
    fn into_config(self) -> Result<MatrixConfig> {
        let extensions = self
            .extensions
            .into_iter()
            .map(|extension| {
                let name = extension.name;
                let tracked_lines = extension
                    .lines
                    .iter()
                    .map(|line| {
                        VersionLine::parse(line)
                            .with_context(|| format!("tracked line of extension '{name}'"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let bounds = extension
                    .bounds
                    .into_iter()
                    .map(|bound| {
                        Ok(CompatBound {
                            min_extension: Version::parse(&bound.extension)
                                .with_context(|| format!("bound of extension '{name}'"))?,
                            min_runtime: VersionLine::parse(&bound.runtime)
                                .with_context(|| format!("bound of extension '{name}'"))?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let branch_bound = extension
                    .branch_bound
                    .as_deref()
                    .map(VersionLine::parse)
                    .transpose()
                    .with_context(|| format!("branch bound of extension '{name}'"))?;
                let min_runtime = extension
                    .min_runtime
                    .as_deref()
                    .map(VersionLine::parse)
                    .transpose()
                    .with_context(|| format!("minimum runtime of extension '{name}'"))?;
                Ok(ExtensionConfig {
                    name,
                    repo: extension.repo,
                    tracked_lines,
                    moving_branches: extension.branches,
                    bounds,
                    branch_bound,
                    min_runtime,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MatrixConfig {
            namespace: self.namespace,
            distro: self.distro,
            distro_versions: self.distro_versions,
            composer_version: self.composer_version,
            extensions,
        })
    }
}
