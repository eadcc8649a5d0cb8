//! Layered assembly resolution.
//!
//! Five strategies run in order; the first hit wins and is memoized by the
//! reference's full name, negative results included:
//!
//! 1. strict full-identity match among loaded assemblies
//! 2. the input file set (by filename stem, then per-directory probe)
//! 3. framework search (desktop GAC or configured runtime roots)
//! 4. user-supplied search directories
//! 5. loose short-name match among loaded assemblies

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::driver::Session;
use crate::framework;
use crate::loader;
use crate::metadata::{AssemblyData, AssemblyId, Version};

/// Ceiling for the desktop-GAC branch of the framework search.
const DESKTOP_UNIFICATION_CEILING: Version = Version(4, 0, 10, 0);

pub fn resolve(sess: &mut Session, target: &AssemblyId) -> Option<Rc<AssemblyData>> {
    let memo_key = target.full_name().to_ascii_lowercase();
    if let Some(hit) = sess.resolve_memo.get(&memo_key) {
        return hit.clone();
    }
    let result = resolve_uncached(sess, target);
    match &result {
        Some(asm) => debug!("resolved '{}' -> {}", target.full_name(), asm.path.display()),
        None => debug!("failed to resolve '{}'", target.full_name()),
    }
    sess.resolve_memo.insert(memo_key, result.clone());
    result
}

fn resolve_uncached(sess: &mut Session, target: &AssemblyId) -> Option<Rc<AssemblyData>> {
    // 1. Strict identity among everything loaded so far.
    if let Some(hit) = sess.load_order.iter().find(|a| a.id == *target) {
        return Some(hit.clone());
    }

    // 2. The input set: stems first, then {short-name}.dll next to any input.
    let stem_matches: Vec<PathBuf> = sess
        .inputs
        .iter()
        .filter(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.eq_ignore_ascii_case(&target.name))
        })
        .cloned()
        .collect();
    for path in stem_matches {
        if let Some(asm) = loader::load(sess, &path) {
            if !asm.is_facade() {
                return Some(asm);
            }
        }
    }
    for dir in input_directories(sess) {
        let candidate = dir.join(format!("{}.dll", target.name));
        if candidate.is_file() {
            if let Some(asm) = loader::load(sess, &candidate) {
                return Some(asm);
            }
        }
    }

    // 3. Framework search, only for platform names.
    if framework::is_framework_name(&target.name) {
        if let Some(asm) = framework_search(sess, target) {
            return Some(asm);
        }
    }

    // 4. Custom directories in declared order.
    let search_dirs = sess.opts.search_dirs.clone();
    for dir in search_dirs {
        let candidate = dir.join(format!("{}.dll", target.name));
        if candidate.is_file() {
            if let Some(asm) = loader::load(sess, &candidate) {
                return Some(asm);
            }
        }
    }

    // 5. Last resort: short-name match, ignoring version/culture/key.
    sess.load_order
        .iter()
        .find(|a| a.id.same_name(&target.name))
        .cloned()
}

fn input_directories(sess: &Session) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();
    for input in &sess.inputs {
        if let Some(dir) = input.parent() {
            if seen.insert(sess.opts.case.key(dir)) {
                dirs.push(dir.to_path_buf());
            }
        }
    }
    dirs
}

fn framework_search(sess: &mut Session, target: &AssemblyId) -> Option<Rc<AssemblyData>> {
    let desktop_eligible = cfg!(windows)
        && (target.version <= DESKTOP_UNIFICATION_CEILING
            || framework::in_redirect_table(&target.name));
    if desktop_eligible {
        if let Some(asm) = desktop_gac_search(sess, target) {
            return Some(asm);
        }
    }
    runtime_dir_search(sess, target)
}

/// Desktop framework lookup under `%WINDIR%/Microsoft.NET`.
fn desktop_gac_search(sess: &mut Session, target: &AssemblyId) -> Option<Rc<AssemblyData>> {
    let windir = std::env::var_os("WINDIR").map(PathBuf::from)?;

    // mscorlib never lives in the GAC; go straight to the v4 framework dir.
    if target.name.eq_ignore_ascii_case("mscorlib") {
        for arch in ["Framework64", "Framework"] {
            let candidate = windir
                .join("Microsoft.NET")
                .join(arch)
                .join("v4.0.30319")
                .join("mscorlib.dll");
            if candidate.is_file() {
                if let Some(asm) = loader::load(sess, &candidate) {
                    return Some(asm);
                }
            }
        }
        return None;
    }

    let assembly_root = windir.join("Microsoft.NET").join("assembly");
    for gac in ["GAC_MSIL", "GAC_32", "GAC_64"] {
        let name_dir = assembly_root.join(gac).join(&target.name);
        let Ok(entries) = std::fs::read_dir(&name_dir) else {
            continue;
        };
        let mut versions: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        versions.sort();
        for dir in versions {
            let candidate = dir.join(format!("{}.dll", target.name));
            if !candidate.is_file() {
                continue;
            }
            if let Some(asm) = loader::load(sess, &candidate) {
                if gac_candidate_matches(target, &asm.id) {
                    return Some(asm);
                }
            }
        }
    }
    None
}

fn gac_candidate_matches(target: &AssemblyId, candidate: &AssemblyId) -> bool {
    if !candidate.same_name(&target.name) {
        return false;
    }
    if candidate == target || target.version == Version::ZERO {
        return true;
    }
    framework::redirect_ceiling(&target.name, target.version).is_some()
}

/// Reference-assembly lookup under the configured runtime roots: pick the
/// lexicographically last version directory matching the reference's major
/// version, then probe `{short-name}.dll` there and in the root itself.
fn runtime_dir_search(sess: &mut Session, target: &AssemblyId) -> Option<Rc<AssemblyData>> {
    let roots = sess.opts.runtime_dirs.clone();
    for root in roots {
        let prefix = version_prefix(target.version);
        if let Some(dir) = last_matching_subdir(&root, &prefix) {
            let candidate = dir.join(format!("{}.dll", target.name));
            if candidate.is_file() {
                if let Some(asm) = loader::load(sess, &candidate) {
                    return Some(asm);
                }
            }
        }
        let fallback = root.join(format!("{}.dll", target.name));
        if fallback.is_file() {
            if let Some(asm) = loader::load(sess, &fallback) {
                return Some(asm);
            }
        }
    }
    None
}

/// 4.1 and 4.2 references ship in 3.x reference directories.
fn version_prefix(version: Version) -> String {
    if version.major() == 4 && matches!(version.minor(), 1 | 2) {
        "3".to_string()
    } else {
        version.major().to_string()
    }
}

fn last_matching_subdir(root: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with(prefix))
        .collect();
    names.sort();
    names.pop().map(|n| root.join(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use std::fs;

    fn session() -> Session {
        Session::new(Options::default(), Vec::new())
    }

    fn loaded(sess: &mut Session, id: AssemblyId) -> Rc<AssemblyData> {
        let asm = Rc::new(AssemblyData {
            path: PathBuf::from(format!("/mem/{}.dll", id.name)),
            id,
            ..Default::default()
        });
        sess.load_order.push(asm.clone());
        asm
    }

    #[test]
    fn strict_hit_requires_full_identity() {
        let mut sess = session();
        loaded(&mut sess, AssemblyId::new("Widgets", Version(2, 0, 0, 0)));
        let strict = AssemblyId::new("widgets", Version(2, 0, 0, 0));
        assert!(resolve(&mut sess, &strict).is_some());
        let other_version = AssemblyId::new("Widgets", Version(1, 0, 0, 0));
        // No strict hit, but the loose strategy still lands on the loaded one.
        let hit = resolve(&mut sess, &other_version).unwrap();
        assert_eq!(hit.id.version, Version(2, 0, 0, 0));
    }

    #[test]
    fn negative_results_are_cached() {
        let mut sess = session();
        let missing = AssemblyId::new("Ghost", Version(1, 0, 0, 0));
        assert!(resolve(&mut sess, &missing).is_none());
        // A later load with the same short name must not change the answer.
        loaded(&mut sess, AssemblyId::new("Ghost", Version(1, 0, 0, 0)));
        assert!(resolve(&mut sess, &missing).is_none());
    }

    #[test]
    fn version_prefix_maps_41_and_42_to_3() {
        assert_eq!(version_prefix(Version(4, 1, 0, 0)), "3");
        assert_eq!(version_prefix(Version(4, 2, 1, 0)), "3");
        assert_eq!(version_prefix(Version(4, 0, 0, 0)), "4");
        assert_eq!(version_prefix(Version(6, 0, 0, 0)), "6");
    }

    #[test]
    fn last_matching_subdir_picks_lexicographic_max() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["3.0.0", "3.1.0", "6.0.36", "other"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let hit = last_matching_subdir(dir.path(), "3").unwrap();
        assert!(hit.ends_with("3.1.0"));
        assert!(last_matching_subdir(dir.path(), "7").is_none());
    }

    #[test]
    fn gac_match_honors_wildcard_and_redirects() {
        let target = AssemblyId::new("System.Xml", Version(1, 0, 5000, 0));
        let candidate = AssemblyId::new("System.Xml", Version(2, 0, 0, 0));
        assert!(gac_candidate_matches(&target, &candidate));

        let wildcard = AssemblyId::new("Anything", Version::ZERO);
        let found = AssemblyId::new("Anything", Version(9, 9, 9, 9));
        assert!(gac_candidate_matches(&wildcard, &found));

        let uncovered = AssemblyId::new("System.Core", Version(3, 5, 0, 0));
        let newer = AssemblyId::new("System.Core", Version(4, 0, 0, 0));
        assert!(!gac_candidate_matches(&uncovered, &newer));
    }
}
