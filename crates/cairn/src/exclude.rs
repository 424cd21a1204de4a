//! Path exclusion for tree walks.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::Result;

/// Decides whether a path is left out of an archive.
pub trait Exclude {
    fn is_excluded(&self, path: &Path) -> bool;
}

impl<F> Exclude for F
where
    F: Fn(&Path) -> bool,
{
    fn is_excluded(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Substring blacklist read from an exclude file.
///
/// Each non-empty line is `<op> <pattern>`; lines starting with `#` are
/// comments. Only `-` lines exclude anything: a path is excluded when any
/// pattern occurs anywhere in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternList {
    patterns: Vec<String>,
}

impl PatternList {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn parse(text: &str) -> Self {
        let mut patterns = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(pattern) = line.strip_prefix('-') {
                let pattern = pattern.trim_start();
                if !pattern.is_empty() {
                    debug!(pattern, "Exclude pattern");
                    patterns.push(pattern.to_string());
                }
            }
        }
        Self { patterns }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Exclude for PatternList {
    fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.patterns.iter().any(|p| path.contains(p.as_str()))
    }
}
