//! Include/exclude wildcard matching.
//!
//! Patterns understand `?` (exactly one character) and `*` (any run of
//! characters, including none). A pattern matches a file when it matches
//! either the bare file name or the `/`-separated path relative to the
//! watched root.

use std::path::Path;

use regex::{Regex, RegexBuilder};

use crate::error::{ConfigError, ConfigResult};

/// Compiled include and exclude wildcard sets
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::match_all()
    }
}

impl PathFilter {
    /// Compile the two sets, using the platform's case sensitivity.
    pub fn new<I, E>(include: I, exclude: E) -> ConfigResult<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self::with_case(include, exclude, !cfg!(windows))
    }

    /// Compile the two sets with explicit case sensitivity.
    pub fn with_case<I, E>(include: I, exclude: E, case_sensitive: bool) -> ConfigResult<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let compile = |patterns: Vec<String>| -> ConfigResult<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| wildcard(p, case_sensitive))
                .collect()
        };
        Ok(Self {
            include: compile(collect(include))?,
            exclude: compile(collect(exclude))?,
        })
    }

    /// A filter that accepts every file
    pub fn match_all() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Whether a file, given relative to the watched root, is of interest.
    ///
    /// An empty include set accepts everything; an exclude hit always wins.
    pub fn matches(&self, relative: &Path) -> bool {
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let hit = |set: &[Regex]| set.iter().any(|re| re.is_match(&name) || re.is_match(&rel));

        (self.include.is_empty() || hit(&self.include)) && !hit(&self.exclude)
    }
}

fn collect<I>(patterns: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| p.as_ref().trim().to_owned())
        .filter(|p| !p.is_empty())
        .collect()
}

fn wildcard(pattern: &str, case_sensitive: bool) -> ConfigResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| ConfigError::invalid_field("watch.include", format!("bad pattern '{pattern}': {e}")))
}
