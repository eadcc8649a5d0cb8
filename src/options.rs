//! Resolved run options, independent of the command-line surface.

use std::path::{Path, PathBuf};

/// Path equality policy, injected at startup rather than baked into the
/// data structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Sensitive,
    Insensitive,
}

impl CaseMode {
    pub fn host_default() -> Self {
        if cfg!(windows) {
            CaseMode::Insensitive
        } else {
            CaseMode::Sensitive
        }
    }

    /// Canonical cache/compare key for a path.
    pub fn key(&self, path: &Path) -> String {
        let s = path.to_string_lossy().replace('\\', "/");
        match self {
            CaseMode::Sensitive => s,
            CaseMode::Insensitive => s.to_ascii_lowercase(),
        }
    }

    pub fn eq(&self, a: &str, b: &str) -> bool {
        match self {
            CaseMode::Sensitive => a == b,
            CaseMode::Insensitive => a.eq_ignore_ascii_case(b),
        }
    }
}

/// Everything the driver needs for one run.
#[derive(Debug, Clone)]
pub struct Options {
    /// Positional inclusions: files, directories, or glob patterns.
    pub includes: Vec<String>,
    /// `!`-prefixed exclusions, stored without the prefix.
    pub excludes: Vec<String>,
    /// File patterns applied to directory inclusions, `;`-separated source.
    pub patterns: Vec<String>,
    /// Baseline/report path.
    pub out: PathBuf,
    /// Root against which examined-assembly paths are relativized.
    pub root: PathBuf,
    pub list_assemblies: bool,
    pub ivt: bool,
    pub ignore_version_mismatch: bool,
    pub embedded_interop_types: bool,
    pub intptr_ctors: bool,
    /// Custom resolver directories, in declared order.
    pub search_dirs: Vec<PathBuf>,
    /// Runtime roots probed by the framework search.
    pub runtime_dirs: Vec<PathBuf>,
    pub case: CaseMode,
}

pub const DEFAULT_REPORT: &str = "BinaryCompatReport.txt";
pub const DEFAULT_PATTERNS: &str = "*.dll;*.exe;*.dll.config;*.exe.config";

impl Default for Options {
    fn default() -> Self {
        Options {
            includes: Vec::new(),
            excludes: Vec::new(),
            patterns: split_patterns(DEFAULT_PATTERNS),
            out: PathBuf::from(DEFAULT_REPORT),
            root: PathBuf::from("."),
            list_assemblies: false,
            ivt: false,
            ignore_version_mismatch: false,
            embedded_interop_types: false,
            intptr_ctors: false,
            search_dirs: Vec::new(),
            runtime_dirs: Vec::new(),
            case: CaseMode::host_default(),
        }
    }
}

pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
