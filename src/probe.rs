//! Package-registry probe.
//!
//! Discovers which PHP packages a given Alpine version ships by running
//! `apk list` inside a throwaway container. The probe only returns the
//! raw `name-version` entries; parsing the version token out of them is
//! the resolver's job.

use anyhow::{bail, Context, Result};
use std::process::Command;
use tracing::info;

/// Boundary trait for the registry probe, so the resolver can be
/// exercised against canned package lists.
pub trait RegistryProbe {
    /// Raw `name-version` entries available on one distro version.
    ///
    /// # Errors
    ///
    /// A failed or empty probe is fatal; partial matrices are never
    /// resolved from missing upstream data.
    fn runtime_packages(&self, distro_version: &str) -> Result<Vec<String>>;
}

/// Probes through `docker run --rm alpine:<version>`.
pub struct DockerRegistryProbe;

impl RegistryProbe for DockerRegistryProbe {
    fn runtime_packages(&self, distro_version: &str) -> Result<Vec<String>> {
        let image = format!("alpine:{distro_version}");
        info!("probing {image} for php packages");

        let output = Command::new("docker")
            .args([
                "run",
                "--rm",
                &image,
                "sh",
                "-c",
                "apk update >&2 && apk list php8 php7",
            ])
            .output()
            .with_context(|| format!("running package probe in '{image}'"))?;

        if !output.status.success() {
            bail!(
                "package probe in '{}' failed with {}",
                image,
                output.status
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries: Vec<String> = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect();

        if entries.is_empty() {
            bail!("package probe in '{image}' returned no packages");
        }
        Ok(entries)
    }
}
