//! Build-matrix resolver and tagger for PHP container images.
//!
//! This crate decides *what* to build and *what to call it* for the
//! `hyperf/php`, `hyperf/swoole`, and `hyperf/swow` image families,
//! then drives `docker build` per resolved variant:
//!
//! - **Version resolution** - probe each supported Alpine version for
//!   its PHP packages, scan extension release tags, and merge them
//!   under the minimum-version compatibility tables into a nested
//!   [`tree::VersionTree`]
//! - **Tag grammar** - expand a small rewriting grammar into the alias
//!   tag set of every image, with a run-scoped used-tag set so each
//!   alias string has exactly one owner
//! - **Deduplication** - collapse extension builds that resolve to the
//!   same upstream commit, transplanting alias tags onto the survivor
//! - **Collaborators** - the package probe, the GitHub tag/ref API,
//!   and the docker build tool, each behind a boundary trait
//!
//! # Data flow
//!
//! ```text
//! RuntimeResolver ──────────► VersionTree (distro → php)
//!        │                          │
//! ExtensionResolver ────────► VersionTree (distro → php → ext)
//!                                   │
//! matrix::resolve ──────────► [ImageDescriptor] (deduplicated)
//!                                   │
//!              builder::build_plans / report::ImageRecord
//! ```
//!
//! Everything is single-threaded and strictly sequential; the first
//! failing collaborator call aborts the run.

pub mod builder;
pub mod config;
pub mod grammar;
pub mod hosting;
pub mod image;
pub mod matrix;
pub mod probe;
pub mod report;
pub mod resolver;
pub mod tree;
pub mod version;

pub use config::MatrixConfig;
pub use image::{ExtensionVersion, ImageDescriptor, ResolvedCommit};
pub use matrix::{ComponentSpec, RunContext};
pub use resolver::{ExtensionConfig, ExtensionResolver, RuntimeResolver};
pub use tree::VersionTree;
pub use version::{Version, VersionLine};
