//! Tree flattening and build deduplication.
//!
//! Turns a resolved [`VersionTree`] into the ordered list of
//! [`ImageDescriptor`]s to build. Extension descriptors get their
//! upstream commit resolved here (through a run-scoped cache), then
//! descriptors that bucket to the same commit are collapsed: the first
//! owner of a (extension, runtime version, distro version, commit)
//! combination survives and inherits the duplicate's alias tags.
//!
//! Plain runtime images are never commit-deduplicated; only extension
//! descriptors enter the buckets. The asymmetry is deliberate.

use crate::builder::ContentIdentifier;
use crate::grammar::TagSpace;
use crate::hosting::SourceHost;
use crate::image::{ExtensionVersion, ImageDescriptor, ResolvedCommit};
use crate::resolver::ExtensionConfig;
use crate::tree::VersionTree;
use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::info;

/// Build argument carrying the base image's content identifier.
/// Descriptive only, not used for correctness.
pub const BASE_IMAGE_ID_ARG: &str = "BASE_IMAGE_ID";

/// What component a tree is being flattened for.
pub struct ComponentSpec<'a> {
    /// Image repository namespace, e.g. `hyperf`.
    pub namespace: &'a str,
    /// Distro name shared by every entry, e.g. `alpine`.
    pub distro: &'a str,
    /// Extension layered on the runtime, or `None` for the plain
    /// runtime component.
    pub extension: Option<&'a ExtensionConfig>,
    /// Composer version for extension images.
    pub bootstrap_version: Option<&'a str>,
}

/// Run-scoped commit cache, shared across components so a ref is
/// looked up once per run. Written exactly once per key.
#[derive(Debug, Default)]
pub struct RunContext {
    commit_cache: HashMap<(String, String), String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_commit(
        &mut self,
        host: &dyn SourceHost,
        extension: &ExtensionConfig,
        git_ref: &str,
    ) -> Result<ResolvedCommit> {
        let key = (extension.name.clone(), git_ref.to_string());
        if let Some(sha) = self.commit_cache.get(&key) {
            return Ok(ResolvedCommit::new(sha.clone()));
        }
        let sha = host.commit_sha(&extension.repo, git_ref)?;
        self.commit_cache.insert(key, sha.clone());
        Ok(ResolvedCommit::new(sha))
    }
}

/// Flatten a compatibility tree into deduplicated build units.
///
/// Returns the surviving descriptors in flattening order; descriptors
/// collapsed onto an earlier build are logged and dropped, their alias
/// tags transplanted onto the survivor.
///
/// # Errors
///
/// Fails on a leaf path whose depth does not match the component, a
/// malformed version string, a missing bootstrap version for an
/// extension, or any collaborator failure.
pub fn resolve(
    tree: &VersionTree,
    spec: &ComponentSpec<'_>,
    host: &dyn SourceHost,
    content: &dyn ContentIdentifier,
    ctx: &mut RunContext,
) -> Result<Vec<ImageDescriptor>> {
    let mut space = TagSpace::new();
    let mut images: Vec<ImageDescriptor> = Vec::new();
    let mut buckets: HashMap<(String, String, String), HashMap<String, usize>> = HashMap::new();

    for path in tree.leaf_paths() {
        let mut image = match (path.as_slice(), spec.extension) {
            ([distro_version, runtime], None) => {
                ImageDescriptor::runtime(spec.namespace, runtime, spec.distro, distro_version)?
            }
            ([distro_version, runtime, extension_version], Some(config)) => {
                let version =
                    ExtensionVersion::classify(extension_version, &config.moving_branches)?;
                ImageDescriptor::extension(
                    spec.namespace,
                    &config.name,
                    version,
                    runtime,
                    spec.distro,
                    distro_version,
                    spec.bootstrap_version,
                )?
            }
            (path, _) => bail!(
                "compatibility tree leaf at depth {} does not match the component",
                path.len()
            ),
        };

        let base_ref = match &image.extension {
            Some(extension) => extension.base_image.clone(),
            None => format!("{}:{}", image.distro, image.distro_version),
        };
        let base_id = content.content_id(&base_ref)?;
        image.set_build_arg(BASE_IMAGE_ID_ARG, &base_id);

        if let Some(config) = spec.extension {
            let git_ref = image
                .extension
                .as_ref()
                .map(|e| e.version.git_ref())
                .unwrap_or_default();
            let commit = ctx.resolve_commit(host, config, &git_ref)?;
            image.set_commit(commit);
        }

        image.compute_aliases(&mut space)?;

        if let (Some(config), Some(commit)) = (spec.extension, image.commit().cloned()) {
            let bucket = buckets
                .entry((
                    config.name.clone(),
                    image.runtime_version.to_string(),
                    image.distro_version.clone(),
                ))
                .or_default();
            if let Some(&owner) = bucket.get(&commit.sha) {
                let transplanted = image.take_aliases();
                image.duplicate_of = Some(owner);
                info!(
                    "{} duplicates {} (same commit {}), merging {} aliases",
                    image.canonical_tag,
                    images[owner].canonical_tag,
                    commit.short,
                    transplanted.len()
                );
                images[owner].extend_aliases(transplanted);
            } else {
                bucket.insert(commit.sha.clone(), images.len());
            }
        }

        images.push(image);
    }

    Ok(images
        .into_iter()
        .filter(|image| image.duplicate_of.is_none())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{CompatBound, ExtensionConfig};
    use crate::version::{Version, VersionLine};
    use std::collections::HashMap as StdHashMap;

    struct FakeHost {
        shas: StdHashMap<String, String>,
    }

    impl FakeHost {
        fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                shas: pairs
                    .iter()
                    .map(|(r, s)| (r.to_string(), s.to_string()))
                    .collect(),
            }
        }
    }

    impl SourceHost for FakeHost {
        fn tag_names(&self, _repo: &str) -> Result<Vec<String>> {
            bail!("tag list not expected in flattening tests");
        }

        fn commit_sha(&self, _repo: &str, git_ref: &str) -> Result<String> {
            self.shas
                .get(git_ref)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown ref '{git_ref}'"))
        }
    }

    struct FakeContent;

    impl ContentIdentifier for FakeContent {
        fn content_id(&self, image_ref: &str) -> Result<String> {
            Ok(format!("sha256:id-of-{image_ref}"))
        }
    }

    struct NoHost;

    impl SourceHost for NoHost {
        fn tag_names(&self, _repo: &str) -> Result<Vec<String>> {
            bail!("runtime flattening must not hit the source host");
        }

        fn commit_sha(&self, _repo: &str, _git_ref: &str) -> Result<String> {
            bail!("runtime flattening must not hit the source host");
        }
    }

    fn swoole_config() -> ExtensionConfig {
        ExtensionConfig {
            name: "swoole".into(),
            repo: "swoole/swoole-src".into(),
            tracked_lines: vec![VersionLine::parse("4.7").unwrap()],
            moving_branches: vec!["master".into()],
            bounds: vec![CompatBound {
                min_extension: Version::parse("4.0.2").unwrap(),
                min_runtime: VersionLine::parse("7.3").unwrap(),
            }],
            branch_bound: None,
            min_runtime: None,
        }
    }

    fn runtime_tree() -> VersionTree {
        let mut tree = VersionTree::new();
        tree.insert_path(["3.14", "8.0.9"]);
        tree.insert_path(["3.14", "7.4.33"]);
        tree
    }

    fn runtime_spec<'a>() -> ComponentSpec<'a> {
        ComponentSpec {
            namespace: "hyperf",
            distro: "alpine",
            extension: None,
            bootstrap_version: None,
        }
    }

    #[test]
    fn runtime_flattening_matches_worked_example() {
        let mut ctx = RunContext::new();
        let images = resolve(&runtime_tree(), &runtime_spec(), &NoHost, &FakeContent, &mut ctx)
            .unwrap();

        assert_eq!(images.len(), 2);
        let first = &images[0];
        assert_eq!(first.canonical_tag, "8.0.9-alpine-3.14");
        let aliases = first.aliases();
        for expected in ["latest", "alpine", "8.0-alpine-3.14", "8.0.9-alpine-3.14"] {
            assert!(aliases.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(
            first.build_args()[BASE_IMAGE_ID_ARG],
            "sha256:id-of-alpine:3.14"
        );

        // Second image cannot claim the contended aliases.
        assert!(!images[1].aliases().contains(&"latest".to_string()));
    }

    #[test]
    fn extension_flattening_matches_worked_example() {
        let mut tree = VersionTree::new();
        tree.insert_path(["3.14", "8.0.9", "4.7.3"]);

        let config = swoole_config();
        let spec = ComponentSpec {
            namespace: "hyperf",
            distro: "alpine",
            extension: Some(&config),
            bootstrap_version: Some("2.1.8"),
        };
        let host = FakeHost::with(&[("v4.7.3", "0123456789abcdef0123456789abcdef01234567")]);
        let mut ctx = RunContext::new();
        let images = resolve(&tree, &spec, &host, &FakeContent, &mut ctx).unwrap();

        assert_eq!(images.len(), 1);
        let image = &images[0];
        assert_eq!(image.canonical_tag, "4.7.3-php-8.0.9-alpine-3.14");
        assert_eq!(image.image_ref(), "hyperf/swoole:4.7.3-php-8.0.9-alpine-3.14");
        let aliases = image.aliases();
        for expected in [
            "latest",
            "4.7-php-8.0.9-alpine-3.14",
            "0123456789abcdef0123456789abcdef01234567-php-8.0.9-alpine-3.14",
            "01234567-php-8.0.9-alpine-3.14",
        ] {
            assert!(aliases.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(
            image.build_args()[BASE_IMAGE_ID_ARG],
            "sha256:id-of-hyperf/php:8.0.9-alpine-3.14"
        );
    }

    #[test]
    fn same_commit_collapses_to_one_build_unit() {
        let mut tree = VersionTree::new();
        tree.insert_path(["3.14", "8.0.9", "4.7.3"]);
        tree.insert_path(["3.14", "8.0.9", "master"]);

        let config = swoole_config();
        let spec = ComponentSpec {
            namespace: "hyperf",
            distro: "alpine",
            extension: Some(&config),
            bootstrap_version: Some("2.1.8"),
        };
        let sha = "0123456789abcdef0123456789abcdef01234567";
        let host = FakeHost::with(&[("v4.7.3", sha), ("master", sha)]);
        let mut ctx = RunContext::new();
        let images = resolve(&tree, &spec, &host, &FakeContent, &mut ctx).unwrap();

        assert_eq!(images.len(), 1, "duplicate must be absent from the build set");
        let survivor = &images[0];
        assert_eq!(survivor.canonical_tag, "4.7.3-php-8.0.9-alpine-3.14");
        // The survivor inherits the branch-form aliases.
        assert!(survivor
            .aliases()
            .contains(&"master-php-8.0.9-alpine-3.14".to_string()));
        assert!(survivor
            .aliases()
            .contains(&"4.7-php-8.0.9-alpine-3.14".to_string()));
    }

    #[test]
    fn distinct_commits_stay_separate() {
        let mut tree = VersionTree::new();
        tree.insert_path(["3.14", "8.0.9", "4.7.3"]);
        tree.insert_path(["3.14", "8.0.9", "master"]);

        let config = swoole_config();
        let spec = ComponentSpec {
            namespace: "hyperf",
            distro: "alpine",
            extension: Some(&config),
            bootstrap_version: Some("2.1.8"),
        };
        let host = FakeHost::with(&[
            ("v4.7.3", "1111111111111111111111111111111111111111"),
            ("master", "2222222222222222222222222222222222222222"),
        ]);
        let mut ctx = RunContext::new();
        let images = resolve(&tree, &spec, &host, &FakeContent, &mut ctx).unwrap();
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|i| i.duplicate_of.is_none()));
    }

    #[test]
    fn commit_lookups_are_cached_across_components() {
        struct CountingHost {
            calls: std::cell::Cell<usize>,
        }
        impl SourceHost for CountingHost {
            fn tag_names(&self, _repo: &str) -> Result<Vec<String>> {
                bail!("not used");
            }
            fn commit_sha(&self, _repo: &str, _git_ref: &str) -> Result<String> {
                self.calls.set(self.calls.get() + 1);
                Ok("3333333333333333333333333333333333333333".into())
            }
        }

        let mut tree = VersionTree::new();
        tree.insert_path(["3.14", "8.0.9", "4.7.3"]);
        tree.insert_path(["3.13", "8.0.9", "4.7.3"]);

        let config = swoole_config();
        let spec = ComponentSpec {
            namespace: "hyperf",
            distro: "alpine",
            extension: Some(&config),
            bootstrap_version: Some("2.1.8"),
        };
        let host = CountingHost {
            calls: std::cell::Cell::new(0),
        };
        let mut ctx = RunContext::new();
        let images = resolve(&tree, &spec, &host, &FakeContent, &mut ctx).unwrap();
        // Different distro versions bucket separately, so both survive,
        // but the ref is resolved exactly once.
        assert_eq!(images.len(), 2);
        assert_eq!(host.calls.get(), 1);
    }

    #[test]
    fn resolution_is_idempotent_given_identical_upstream_data() {
        let run = || {
            let mut ctx = RunContext::new();
            resolve(&runtime_tree(), &runtime_spec(), &NoHost, &FakeContent, &mut ctx).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.image_ref(), b.image_ref());
            assert_eq!(a.aliases(), b.aliases());
            assert_eq!(a.build_args(), b.build_args());
        }
    }

    #[test]
    fn missing_bootstrap_version_fails_extension_flattening() {
        let mut tree = VersionTree::new();
        tree.insert_path(["3.14", "8.0.9", "4.7.3"]);
        let config = swoole_config();
        let spec = ComponentSpec {
            namespace: "hyperf",
            distro: "alpine",
            extension: Some(&config),
            bootstrap_version: None,
        };
        let host = FakeHost::with(&[("v4.7.3", "4444444444444444444444444444444444444444")]);
        let mut ctx = RunContext::new();
        assert!(resolve(&tree, &spec, &host, &FakeContent, &mut ctx).is_err());
    }

    #[test]
    fn mismatched_leaf_depth_is_rejected() {
        let mut tree = VersionTree::new();
        tree.insert_path(["3.14", "8.0.9", "4.7.3"]);
        let mut ctx = RunContext::new();
        assert!(resolve(&tree, &runtime_spec(), &NoHost, &FakeContent, &mut ctx).is_err());
    }
}
