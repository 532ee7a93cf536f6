//! Tag-alias grammar engine.
//!
//! Alias tags are produced by a small rewriting system. A grammar maps
//! nonterminal names to ordered alternative productions; a production
//! is an ordered sequence of tokens. A token that is a key in the
//! grammar or in the image's [`SymbolTable`] is a nonterminal, anything
//! else is a literal that passes through unchanged.
//!
//! Expansion is depth first over a stack of token sequences: the first
//! rewritable token in a popped sequence is spliced out once per
//! alternative and the results are pushed back. A fully terminal
//! sequence concatenates into a final tag. Finals are prepended to the
//! output, which compensates for the stack's LIFO order so the
//! grammar's declared alternative order is preserved.
//!
//! Rules are acyclic under substitution in practice; that precondition
//! is not checkable cheaply, so the engine carries a rewrite cap and
//! fails loudly on a misconfigured rule set instead of looping.

use anyhow::{bail, Result};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Start symbol for every expansion.
pub const START: &str = "START";

/// Upper bound on rewrite steps for a single image's expansion.
///
/// The real grammars finish in well under a hundred steps; hitting
/// this means a rule set reintroduces one of its own nonterminals.
const MAX_REWRITES: usize = 10_000;

/// Alias grammar for plain runtime images.
///
/// `latest`, the distro forms, the version forms, and version-distro
/// combinations.
const RUNTIME_RULES: &[(&str, &[&[&str]])] = &[
    (
        START,
        &[
            &["latest"],
            &["DISTRO"],
            &["VERSION"],
            &["VERSION", "-", "DISTRO"],
        ],
    ),
    ("DISTRO", &[&["DISTRO_NAME"], &["DISTRO_NAME", "DISTRO_VERSION"]]),
    ("DISTRO_VERSION", &[&["-", "DISTRO_VERSION_STR"]]),
];

/// Alias grammar for extension images layered on the runtime.
const EXTENSION_RULES: &[(&str, &[&[&str]])] = &[
    (
        START,
        &[
            &["latest"],
            &["VERSION"],
            &["VERSION", "-", "RUNTIME_DISTRO"],
            &["RUNTIME_DISTRO"],
        ],
    ),
    ("RUNTIME_DISTRO", &[&["RUNTIME"], &["RUNTIME", "-", "DISTRO"]]),
    ("RUNTIME", &[&["php-", "RUNTIME_VERSION"]]),
    ("DISTRO", &[&["DISTRO_NAME"], &["DISTRO_NAME", "DISTRO_VERSION"]]),
    ("DISTRO_VERSION", &[&["-", "DISTRO_VERSION_STR"]]),
];

/// Per-image mapping from nonterminal name to its productions.
///
/// Seeded from the image's concrete fields: terminal-valued entries
/// (distro name, distro version, commit hash) have exactly one
/// production, version-valued entries carry the short and full forms.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: IndexMap<String, Vec<Vec<String>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a nonterminal to a single terminal value.
    pub fn set_terminal(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_string(), vec![vec![value.into()]]);
    }

    /// Bind a nonterminal to an ordered list of single-token
    /// alternatives (e.g. `["8.0", "8.0.9"]` for a runtime version).
    pub fn set_alternatives<I, S>(&mut self, name: &str, alternatives: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.insert(
            name.to_string(),
            alternatives.into_iter().map(|a| vec![a.into()]).collect(),
        );
    }

    fn productions(&self, token: &str) -> Option<&[Vec<String>]> {
        self.entries.get(token).map(|p| p.as_slice())
    }
}

/// Run-scoped used-tag set.
///
/// Shared across every descriptor in one resolution pass; a tag string
/// belongs to its first claimant and later identical expansions are
/// silently dropped. Constructed once per run and threaded through
/// every expansion, never ambient process state.
#[derive(Debug, Default)]
pub struct TagSpace {
    used: HashSet<String>,
}

impl TagSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a tag for the calling descriptor. False means some
    /// earlier expansion already owns it.
    pub fn claim(&mut self, tag: &str) -> bool {
        self.used.insert(tag.to_string())
    }
}

/// One of the two built-in rule sets, selected by image kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagGrammar {
    rules: &'static [(&'static str, &'static [&'static [&'static str]])],
}

impl TagGrammar {
    /// Grammar for plain runtime images.
    pub fn runtime() -> Self {
        Self {
            rules: RUNTIME_RULES,
        }
    }

    /// Grammar for extension images.
    pub fn extension() -> Self {
        Self {
            rules: EXTENSION_RULES,
        }
    }

    fn productions(&self, token: &str) -> Option<&'static [&'static [&'static str]]> {
        self.rules
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, prods)| *prods)
    }

    /// Expand the grammar against one image's symbol table.
    ///
    /// Returns the ordered list of unique final tag strings, with tags
    /// already claimed in `space` dropped.
    ///
    /// # Errors
    ///
    /// Fails if the rewrite cap is exceeded, which indicates a cyclic
    /// rule set.
    pub fn expand(&self, symbols: &SymbolTable, space: &mut TagSpace) -> Result<Vec<String>> {
        let mut stack: Vec<Vec<String>> = vec![vec![START.to_string()]];
        let mut finals = Vec::new();
        let mut rewrites = 0usize;

        while let Some(sequence) = stack.pop() {
            let mut rewritten = false;
            for (i, token) in sequence.iter().enumerate() {
                // Grammar rules shadow symbol-table entries.
                if let Some(prods) = self.productions(token) {
                    for alternative in prods {
                        stack.push(splice(&sequence, i, alternative.iter().copied()));
                    }
                    rewritten = true;
                } else if let Some(prods) = symbols.productions(token) {
                    for alternative in prods {
                        stack.push(splice(&sequence, i, alternative.iter().map(String::as_str)));
                    }
                    rewritten = true;
                }
                if rewritten {
                    break;
                }
            }

            if rewritten {
                rewrites += 1;
                if rewrites > MAX_REWRITES {
                    bail!(
                        "tag grammar exceeded {} rewrites; rule set is cyclic",
                        MAX_REWRITES
                    );
                }
                continue;
            }

            let tag = sequence.concat();
            if space.claim(&tag) {
                finals.insert(0, tag);
            }
        }

        Ok(finals)
    }
}

fn splice<'a>(
    sequence: &[String],
    at: usize,
    replacement: impl Iterator<Item = &'a str>,
) -> Vec<String> {
    let mut out = Vec::with_capacity(sequence.len() + 2);
    out.extend_from_slice(&sequence[..at]);
    out.extend(replacement.map(str::to_string));
    out.extend_from_slice(&sequence[at + 1..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_symbols() -> SymbolTable {
        let mut symbols = SymbolTable::new();
        symbols.set_alternatives("VERSION", ["8.0", "8.0.9"]);
        symbols.set_terminal("DISTRO_NAME", "alpine");
        symbols.set_terminal("DISTRO_VERSION_STR", "3.14");
        symbols
    }

    #[test]
    fn runtime_expansion_produces_all_forms() {
        let mut space = TagSpace::new();
        let tags = TagGrammar::runtime()
            .expand(&runtime_symbols(), &mut space)
            .unwrap();
        assert_eq!(
            tags,
            vec![
                "latest",
                "alpine",
                "alpine-3.14",
                "8.0",
                "8.0.9",
                "8.0-alpine",
                "8.0-alpine-3.14",
                "8.0.9-alpine",
                "8.0.9-alpine-3.14",
            ]
        );
    }

    #[test]
    fn used_tags_are_dropped_for_later_images() {
        let mut space = TagSpace::new();
        let first = TagGrammar::runtime()
            .expand(&runtime_symbols(), &mut space)
            .unwrap();
        assert!(first.contains(&"latest".to_string()));

        let mut symbols = runtime_symbols();
        symbols.set_alternatives("VERSION", ["7.4", "7.4.33"]);
        let second = TagGrammar::runtime().expand(&symbols, &mut space).unwrap();
        assert!(!second.contains(&"latest".to_string()));
        assert!(!second.contains(&"alpine".to_string()));
        assert!(second.contains(&"7.4.33-alpine-3.14".to_string()));
    }

    #[test]
    fn extension_expansion_includes_commit_forms() {
        let mut symbols = SymbolTable::new();
        symbols.set_alternatives("VERSION", ["4.7", "4.7.3", "abcdef1234567890", "abcdef12"]);
        symbols.set_alternatives("RUNTIME_VERSION", ["8.0", "8.0.9"]);
        symbols.set_terminal("DISTRO_NAME", "alpine");
        symbols.set_terminal("DISTRO_VERSION_STR", "3.14");

        let mut space = TagSpace::new();
        let tags = TagGrammar::extension().expand(&symbols, &mut space).unwrap();
        assert!(tags.contains(&"latest".to_string()));
        assert!(tags.contains(&"4.7-php-8.0.9-alpine-3.14".to_string()));
        assert!(tags.contains(&"4.7.3-php-8.0.9-alpine-3.14".to_string()));
        assert!(tags.contains(&"abcdef1234567890-php-8.0.9-alpine-3.14".to_string()));
        assert!(tags.contains(&"abcdef12-php-8.0.9-alpine-3.14".to_string()));
        // Declared alternative order: bare `latest` first, bare version
        // forms before version-distro combinations.
        assert_eq!(tags[0], "latest");
    }

    #[test]
    fn moving_branch_has_no_major_minor_form() {
        let mut symbols = SymbolTable::new();
        symbols.set_alternatives("VERSION", ["master", "abcdef1234567890", "abcdef12"]);
        symbols.set_alternatives("RUNTIME_VERSION", ["8.0", "8.0.9"]);
        symbols.set_terminal("DISTRO_NAME", "alpine");
        symbols.set_terminal("DISTRO_VERSION_STR", "3.14");

        let mut space = TagSpace::new();
        let tags = TagGrammar::extension().expand(&symbols, &mut space).unwrap();
        assert!(tags.contains(&"master-php-8.0.9-alpine-3.14".to_string()));
        assert!(tags.iter().all(|t| !t.contains("master.")));
        assert!(!tags.iter().any(|t| t.starts_with("4.")));
    }

    #[test]
    fn cyclic_rules_hit_the_rewrite_cap() {
        // A symbol table cannot express a cycle on its own, so drive
        // the engine with a self-reproducing entry: VERSION -> VERSION.
        let mut symbols = SymbolTable::new();
        symbols.set_alternatives("VERSION", ["VERSION"]);
        symbols.set_terminal("DISTRO_NAME", "alpine");
        symbols.set_terminal("DISTRO_VERSION_STR", "3.14");

        let mut space = TagSpace::new();
        let err = TagGrammar::runtime()
            .expand(&symbols, &mut space)
            .unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn every_tag_is_unique_within_a_run() {
        let mut space = TagSpace::new();
        let mut seen = HashSet::new();
        for distro_version in ["3.14", "3.13"] {
            let mut symbols = runtime_symbols();
            symbols.set_terminal("DISTRO_VERSION_STR", distro_version);
            for tag in TagGrammar::runtime().expand(&symbols, &mut space).unwrap() {
                assert!(seen.insert(tag.clone()), "duplicate tag {tag}");
            }
        }
    }
}
