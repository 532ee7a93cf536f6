use std::path::Path;

use anyhow::{bail, Context, Result};
use imagematrix::builder::{self, Docker, ImageBuilder};
use imagematrix::hosting::GitHubHost;
use imagematrix::matrix::{self, ComponentSpec, RunContext};
use imagematrix::probe::DockerRegistryProbe;
use imagematrix::report::{self, ImageRecord};
use imagematrix::{
    ExtensionResolver, ExtensionVersion, ImageDescriptor, MatrixConfig, RuntimeResolver,
};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  imagematrix list [php|swoole|swow|all] [output.json]\n  imagematrix buildall [php|swoole|swow|all]\n  imagematrix build phpver=<ver> distrover=<ver> [distro=alpine] [swoolever=<ver>] [swowver=<ver>] [aliases=a,b]"
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [action] if action == "list" => list("all", None),
        [action, target] if action == "list" => list(target, None),
        [action, target, output] if action == "list" => list(target, Some(Path::new(output))),
        [action] if action == "buildall" => build_all("all"),
        [action, target] if action == "buildall" => build_all(target),
        [action, rest @ ..] if action == "build" && !rest.is_empty() => build_single(rest),
        _ => bail!(usage()),
    }
}

/// Which components a target name selects.
fn selected<'a>(config: &'a MatrixConfig, target: &'a str) -> Result<(bool, Vec<&'a str>)> {
    match target {
        "all" => Ok((true, config.extensions.iter().map(|e| e.name.as_str()).collect())),
        "php" => Ok((true, Vec::new())),
        name if config.extension(name).is_some() => Ok((false, vec![name])),
        other => bail!("unknown target '{other}'\n{}", usage()),
    }
}

/// Resolve the full descriptor list for the selected components.
fn resolve_targets(config: &MatrixConfig, target: &str) -> Result<Vec<ImageDescriptor>> {
    let (want_runtime, extension_names) = selected(config, target)?;

    builder::ensure_docker()?;
    let probe = DockerRegistryProbe;
    let host = GitHubHost::new();
    let content = Docker;
    let mut ctx = RunContext::new();

    let mut runtime = RuntimeResolver::new(&probe, &config.distro_versions);
    // Extensions layer on the base tree, so it is resolved either way.
    let base = runtime.versions(false)?;

    let mut images = Vec::new();
    if want_runtime {
        let spec = ComponentSpec {
            namespace: &config.namespace,
            distro: &config.distro,
            extension: None,
            bootstrap_version: None,
        };
        images.extend(matrix::resolve(&base, &spec, &host, &content, &mut ctx)?);
    }

    for name in extension_names {
        let extension = config
            .extension(name)
            .expect("selected extensions come from the config");
        let mut resolver = ExtensionResolver::new(extension, &host);
        let tree = resolver.versions(&base, false)?;
        let spec = ComponentSpec {
            namespace: &config.namespace,
            distro: &config.distro,
            extension: Some(extension),
            bootstrap_version: config.composer_version.as_deref(),
        };
        images.extend(matrix::resolve(&tree, &spec, &host, &content, &mut ctx)?);
    }

    Ok(images)
}

fn list(target: &str, output: Option<&Path>) -> Result<()> {
    let config = MatrixConfig::load_or_builtin(Path::new("."))?;
    let images = resolve_targets(&config, target)?;
    let records: Vec<ImageRecord> = images.iter().map(ImageRecord::from_descriptor).collect();
    let json = report::to_json(&records)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("writing image list to '{}'", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn build_all(target: &str) -> Result<()> {
    let config = MatrixConfig::load_or_builtin(Path::new("."))?;
    let images = resolve_targets(&config, target)?;
    build_images(&images)
}

fn build_images(images: &[ImageDescriptor]) -> Result<()> {
    let docker = Docker;
    for image in images {
        report::log_group(&format!("build {}", image.image_ref()));
        for alias in image.aliases() {
            println!("  with alias {alias}");
        }
        for plan in builder::build_plans(image, Path::new("."))? {
            docker.build(&plan)?;
        }
        report::log_endgroup();
    }
    Ok(())
}

/// Build one image from explicit arguments, skipping resolution.
fn build_single(args: &[String]) -> Result<()> {
    let config = MatrixConfig::builtin();
    let mut distro = config.distro.clone();
    let mut distrover = None;
    let mut phpver = None;
    let mut extension: Option<(String, String)> = None;
    let mut aliases = Vec::new();

    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            bail!("expected key=value, got '{arg}'\n{}", usage());
        };
        match key {
            "distro" => distro = value.to_string(),
            "distrover" => distrover = Some(value.to_string()),
            "phpver" => phpver = Some(value.to_string()),
            "swoolever" => extension = Some(("swoole".to_string(), value.to_string())),
            "swowver" => extension = Some(("swow".to_string(), value.to_string())),
            "aliases" => {
                aliases = value
                    .split(',')
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            other => bail!("unknown option '{other}'\n{}", usage()),
        }
    }

    let (Some(phpver), Some(distrover)) = (phpver, distrover) else {
        bail!("lacking phpver or distrover\n{}", usage());
    };

    let mut image = match extension {
        None => ImageDescriptor::runtime(&config.namespace, &phpver, &distro, &distrover)?,
        Some((name, raw_version)) => {
            let extension_config = config
                .extension(&name)
                .with_context(|| format!("extension '{name}' is not configured"))?;
            let version =
                ExtensionVersion::classify(&raw_version, &extension_config.moving_branches)?;
            ImageDescriptor::extension(
                &config.namespace,
                &name,
                version,
                &phpver,
                &distro,
                &distrover,
                config.composer_version.as_deref(),
            )?
        }
    };
    image.set_aliases(aliases);

    builder::ensure_docker()?;
    build_images(&[image])
}
