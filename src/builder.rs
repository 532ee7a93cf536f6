//! Build collaborator.
//!
//! Turns descriptors into `docker build` invocations. The matrix only
//! decides what to build and what to call it; everything here is plain
//! sequential plumbing around the external tool, and the first failing
//! invocation aborts the run.

use crate::image::ImageDescriptor;
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// One `docker build` invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    /// Alternate build-file name inside the context, when not the
    /// default `Dockerfile`.
    pub dockerfile: Option<String>,
    /// Full image references to tag the result with.
    pub tags: Vec<String>,
    pub build_args: IndexMap<String, String>,
}

/// Boundary trait for the build tool.
pub trait ImageBuilder {
    /// Run one build. Non-zero exit is fatal.
    fn build(&self, request: &BuildRequest) -> Result<()>;
}

/// Boundary trait for the base-image content identifier.
pub trait ContentIdentifier {
    /// Stable content hash of an image reference. Used purely as a
    /// descriptive build argument.
    fn content_id(&self, image_ref: &str) -> Result<String>;
}

/// Check that docker is available before probing or building.
pub fn ensure_docker() -> Result<()> {
    which::which("docker")
        .map(|_| ())
        .context("docker not found in PATH; install docker before resolving the matrix")
}

/// The real docker-backed collaborator.
pub struct Docker;

impl ImageBuilder for Docker {
    fn build(&self, request: &BuildRequest) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.arg("build").arg(&request.context_dir);
        if let Some(dockerfile) = &request.dockerfile {
            cmd.arg("-f").arg(request.context_dir.join(dockerfile));
        }
        for tag in &request.tags {
            cmd.arg("-t").arg(tag);
        }
        for (key, value) in &request.build_args {
            cmd.arg("--build-arg").arg(format!("{key}={value}"));
        }

        info!("running {cmd:?}");
        let status = cmd
            .status()
            .with_context(|| format!("running docker build in '{}'", request.context_dir.display()))?;
        if !status.success() {
            bail!(
                "docker build in '{}' failed with {}",
                request.context_dir.display(),
                status
            );
        }
        Ok(())
    }
}

impl ContentIdentifier for Docker {
    fn content_id(&self, image_ref: &str) -> Result<String> {
        let pull = Command::new("docker")
            .args(["pull", "--quiet", image_ref])
            .status()
            .with_context(|| format!("pulling '{image_ref}'"))?;
        if !pull.success() {
            bail!("pulling '{image_ref}' failed with {pull}");
        }

        let output = Command::new("docker")
            .args(["image", "inspect", "--format", "{{.Id}}", image_ref])
            .output()
            .with_context(|| format!("inspecting '{image_ref}'"))?;
        if !output.status.success() {
            bail!("inspecting '{image_ref}' failed with {}", output.status);
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            bail!("empty content identifier for '{image_ref}'");
        }
        Ok(id)
    }
}

/// The ordered build invocations for one descriptor.
///
/// `php` and `swow` are single builds carrying every tag. `swoole`
/// additionally builds a `-builder` image first and a `-debuggable`
/// image last, each from its own build file and with only its own tag.
///
/// # Errors
///
/// Fails on a build target the system does not know how to construct.
pub fn build_plans(image: &ImageDescriptor, context_root: &Path) -> Result<Vec<BuildRequest>> {
    let context_dir = context_root.join(&image.target);
    let mut tags = vec![image.image_ref()];
    tags.extend(
        image
            .aliases()
            .iter()
            .map(|alias| format!("{}:{}", image.repository, alias)),
    );
    let main = BuildRequest {
        context_dir: context_dir.clone(),
        dockerfile: None,
        tags,
        build_args: image.build_args().clone(),
    };

    match image.target.as_str() {
        "php" | "swow" => Ok(vec![main]),
        "swoole" => {
            let side = |suffix: &str, dockerfile: &str| BuildRequest {
                context_dir: context_dir.clone(),
                dockerfile: Some(dockerfile.to_string()),
                tags: vec![format!("{}-{suffix}", image.image_ref())],
                build_args: image.build_args().clone(),
            };
            Ok(vec![
                side("builder", "Dockerfile.builder"),
                main,
                side("debuggable", "Dockerfile.debuggable"),
            ])
        }
        other => bail!("not supported target '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::TagSpace;
    use crate::image::{ExtensionVersion, ResolvedCommit};

    fn runtime_image() -> ImageDescriptor {
        let mut image = ImageDescriptor::runtime("hyperf", "8.0.9", "alpine", "3.14").unwrap();
        let mut space = TagSpace::new();
        image.compute_aliases(&mut space).unwrap();
        image
    }

    fn swoole_image() -> ImageDescriptor {
        let version = ExtensionVersion::classify("4.7.3", &[]).unwrap();
        let mut image = ImageDescriptor::extension(
            "hyperf",
            "swoole",
            version,
            "8.0.9",
            "alpine",
            "3.14",
            Some("2.1.8"),
        )
        .unwrap();
        image.set_commit(ResolvedCommit::new(
            "0123456789abcdef0123456789abcdef01234567",
        ));
        let mut space = TagSpace::new();
        image.compute_aliases(&mut space).unwrap();
        image
    }

    #[test]
    fn php_target_is_a_single_build_with_all_tags() {
        let plans = build_plans(&runtime_image(), Path::new(".")).unwrap();
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.context_dir, Path::new("./php"));
        assert_eq!(plan.dockerfile, None);
        assert_eq!(plan.tags[0], "hyperf/php:8.0.9-alpine-3.14");
        assert!(plan.tags.contains(&"hyperf/php:latest".to_string()));
        assert_eq!(plan.build_args["PHP_VERSION"], "8.0.9");
    }

    #[test]
    fn swoole_target_builds_builder_main_debuggable_in_order() {
        let plans = build_plans(&swoole_image(), Path::new(".")).unwrap();
        assert_eq!(plans.len(), 3);

        assert_eq!(plans[0].dockerfile.as_deref(), Some("Dockerfile.builder"));
        assert_eq!(
            plans[0].tags,
            vec!["hyperf/swoole:4.7.3-php-8.0.9-alpine-3.14-builder".to_string()]
        );

        assert_eq!(plans[1].dockerfile, None);
        assert!(plans[1].tags.len() > 1, "main build carries the aliases");
        assert_eq!(plans[1].tags[0], "hyperf/swoole:4.7.3-php-8.0.9-alpine-3.14");

        assert_eq!(plans[2].dockerfile.as_deref(), Some("Dockerfile.debuggable"));
        assert_eq!(
            plans[2].tags,
            vec!["hyperf/swoole:4.7.3-php-8.0.9-alpine-3.14-debuggable".to_string()]
        );
    }

    #[test]
    fn unknown_target_is_rejected() {
        let mut image = runtime_image();
        image.target = "mystery".to_string();
        let err = build_plans(&image, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("not supported target"));
    }
}
