//! Input discovery: expand positional inclusions/exclusions into the set of
//! candidate assemblies and application configuration files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globwalk::GlobWalkerBuilder;
use log::{debug, warn};

use crate::options::Options;

/// Expanded and routed input files.
#[derive(Debug, Default)]
pub struct InputSet {
    pub assemblies: Vec<PathBuf>,
    pub configs: Vec<PathBuf>,
}

pub fn expand(opts: &Options) -> InputSet {
    let mut files: Vec<PathBuf> = Vec::new();

    let includes: Vec<String> = if opts.includes.is_empty() {
        vec![opts.root.to_string_lossy().into_owned()]
    } else {
        opts.includes.clone()
    };

    for include in &includes {
        let as_path = Path::new(include);
        if as_path.is_file() {
            files.push(as_path.to_path_buf());
        } else if as_path.is_dir() {
            for pattern in &opts.patterns {
                collect_glob(as_path, pattern, &mut files);
            }
        } else {
            // Not an existing file or directory: a glob pattern list.
            for pattern in include.split(';').filter(|p| !p.is_empty()) {
                collect_glob(&opts.root, pattern, &mut files);
            }
        }
    }

    for pattern in opts
        .excludes
        .iter()
        .map(String::as_str)
        .chain(["*.resources.dll"])
    {
        remove_glob(&opts.root, pattern, &mut files);
    }

    files.sort();
    files.dedup();

    let mut set = InputSet::default();
    for file in files {
        if is_config(&file) {
            set.configs.push(file);
        } else {
            set.assemblies.push(file);
        }
    }
    debug!(
        "expanded inputs: {} assemblies, {} configs",
        set.assemblies.len(),
        set.configs.len()
    );
    set
}

fn is_config(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    name.ends_with(".exe.config") || name.ends_with(".dll.config")
}

/// Directory walks stay flat unless the pattern opts into recursion.
fn collect_glob(root: &Path, pattern: &str, out: &mut Vec<PathBuf>) {
    let mut builder = GlobWalkerBuilder::from_patterns(root, &[pattern]).case_insensitive(true);
    if !pattern.contains("**") {
        builder = builder.max_depth(1);
    }
    match builder.build() {
        Ok(walker) => {
            for entry in walker.filter_map(|r| r.ok()) {
                if entry.file_type().is_file() {
                    out.push(entry.path().to_path_buf());
                }
            }
        }
        Err(e) => warn!("bad include pattern '{}': {}", pattern, e),
    }
}

fn remove_glob(root: &Path, pattern: &str, files: &mut Vec<PathBuf>) {
    if let Ok(walker) = GlobWalkerBuilder::from_patterns(root, &[pattern])
        .case_insensitive(true)
        .build()
    {
        let remove: HashSet<PathBuf> = walker
            .filter_map(|r| r.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect();
        files.retain(|p| !remove.contains(p));
    }
    // Inclusions may lie outside the walk root; fall back to matching the
    // file name against simple `*suffix` / exact patterns.
    if !pattern.contains('/') && !pattern.contains('\\') {
        if let Some(suffix) = pattern.strip_prefix('*') {
            if !suffix.contains('*') && !suffix.contains('?') {
                let suffix = suffix.to_ascii_lowercase();
                files.retain(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| !n.to_ascii_lowercase().ends_with(&suffix))
                        .unwrap_or(true)
                });
                return;
            }
        }
        if !pattern.contains('*') && !pattern.contains('?') {
            files.retain(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.eq_ignore_ascii_case(pattern))
                    .unwrap_or(true)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn directory_includes_apply_patterns_and_route_configs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("App.exe"));
        touch(&dir.path().join("App.exe.config"));
        touch(&dir.path().join("Lib.dll"));
        touch(&dir.path().join("Lib.resources.dll"));
        touch(&dir.path().join("notes.txt"));
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        touch(&sub.join("Deep.dll"));

        let opts = Options {
            includes: vec![dir.path().to_string_lossy().into_owned()],
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let set = expand(&opts);
        let names: Vec<String> = set
            .assemblies
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        // Flat walk by default: sub/Deep.dll stays out; resources.dll excluded.
        assert_eq!(names, vec!["App.exe", "Lib.dll"]);
        assert_eq!(set.configs.len(), 1);
    }

    #[test]
    fn recursive_patterns_descend() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        touch(&sub.join("Deep.dll"));

        let opts = Options {
            includes: vec![dir.path().to_string_lossy().into_owned()],
            patterns: crate::options::split_patterns("**/*.dll"),
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let set = expand(&opts);
        assert_eq!(set.assemblies.len(), 1);
        assert!(set.assemblies[0].ends_with("sub/Deep.dll"));
    }

    #[test]
    fn exclusions_drop_by_name_even_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Keep.dll"));
        touch(&dir.path().join("Drop.dll"));

        let opts = Options {
            includes: vec![dir.path().to_string_lossy().into_owned()],
            excludes: vec!["Drop.dll".to_string()],
            // Root elsewhere: the filename fallback must still apply.
            root: std::env::temp_dir().join("bincompat-nonexistent-root"),
            ..Default::default()
        };
        let set = expand(&opts);
        assert_eq!(set.assemblies.len(), 1);
        assert!(set.assemblies[0].ends_with("Keep.dll"));
    }
}
