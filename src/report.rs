//! Diagnostic store and baseline comparison.
//!
//! The report is line-oriented, sorted, and byte-identical across runs for
//! identical inputs; any divergence from the checked-in baseline fails the
//! run after the baseline is refreshed.

use std::collections::HashSet;
use std::fs;

use log::{info, warn};

use crate::driver::Session;
use crate::errors::Result;

/// Deduplicated diagnostic lines; equality is case-insensitive, emission is
/// sorted ascending.
#[derive(Debug, Default)]
pub struct DiagnosticSet {
    seen: HashSet<String>,
    lines: Vec<String>,
}

impl DiagnosticSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the line was new.
    pub fn add(&mut self, line: String) -> bool {
        if self.seen.insert(line.to_ascii_lowercase()) {
            self.lines.push(line);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn sorted_lines(&self) -> Vec<String> {
        let mut out = self.lines.clone();
        out.sort();
        out
    }
}

/// End state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Report matches the baseline.
    Clean,
    /// No baseline existed; this run's report seeded it.
    Seeded,
    /// Report diverged from the baseline; the baseline was refreshed.
    Mismatch,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Clean | RunOutcome::Seeded => 0,
            RunOutcome::Mismatch => 1,
        }
    }
}

/// Render the report, compare against the baseline file, and reconcile.
pub fn finish(sess: &Session) -> Result<RunOutcome> {
    let lines = render(sess);
    let path = &sess.opts.out;

    if !path.exists() {
        fs::write(path, lines.join(""))?;
        info!("baseline seeded at {}", path.display());
        return Ok(RunOutcome::Seeded);
    }

    let baseline = fs::read_to_string(path)?;
    let baseline_lines: Vec<String> = split_report(&baseline);
    let current_lines: Vec<String> = lines.iter().map(|l| l.trim_end().to_string()).collect();

    if baseline_lines == current_lines {
        info!("report matches baseline ({} lines)", current_lines.len());
        return Ok(RunOutcome::Clean);
    }

    emit_diff(&baseline_lines, &current_lines);
    // Refresh the baseline so a deliberate change only needs a commit; the
    // run still fails.
    if let Err(e) = fs::write(path, lines.join("")) {
        warn!("could not update baseline {}: {}", path.display(), e);
    }
    Ok(RunOutcome::Mismatch)
}

/// The full report: sorted diagnostics, then (on request) the sorted
/// examined-assemblies section. Every line is newline-terminated; there is
/// no header or trailer.
pub fn render(sess: &Session) -> Vec<String> {
    let mut lines: Vec<String> = sess
        .diagnostics
        .sorted_lines()
        .into_iter()
        .map(|l| format!("{}\n", l))
        .collect();
    if sess.opts.list_assemblies {
        let mut entries: Vec<String> = sess.examined.iter().map(|e| e.render()).collect();
        entries.sort();
        lines.extend(entries.into_iter().map(|e| format!("{}\n", e)));
    }
    lines
}

fn split_report(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn emit_diff(baseline: &[String], current: &[String]) {
    let old: HashSet<&String> = baseline.iter().collect();
    let new: HashSet<&String> = current.iter().collect();
    eprintln!("Report differs from baseline:");
    for line in baseline {
        if !new.contains(line) {
            eprintln!("-{}", line);
        }
    }
    for line in current {
        if !old.contains(line) {
            eprintln!("+{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Examined, Session};
    use crate::metadata::Version;
    use crate::options::Options;

    fn session_with(out: std::path::PathBuf) -> Session {
        let opts = Options {
            out,
            ..Default::default()
        };
        Session::new(opts, Vec::new())
    }

    #[test]
    fn dedup_is_case_insensitive_and_emission_sorted() {
        let mut set = DiagnosticSet::new();
        assert!(set.add("b line".to_string()));
        assert!(set.add("A line".to_string()));
        assert!(!set.add("B LINE".to_string()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.sorted_lines(), vec!["A line".to_string(), "b line".to_string()]);
    }

    #[test]
    fn seeding_then_rerunning_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("BinaryCompatReport.txt");

        let mut sess = session_with(out.clone());
        sess.diagnostics.add("X: something".to_string());
        assert_eq!(finish(&sess).unwrap(), RunOutcome::Seeded);

        // Identical state: clean.
        assert_eq!(finish(&sess).unwrap(), RunOutcome::Clean);

        // New diagnostic: mismatch, and the baseline is refreshed.
        sess.diagnostics.add("Y: something else".to_string());
        assert_eq!(finish(&sess).unwrap(), RunOutcome::Mismatch);
        assert_eq!(finish(&sess).unwrap(), RunOutcome::Clean);
    }

    #[test]
    fn report_render_is_a_fixed_point_under_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = session_with(dir.path().join("r.txt"));
        sess.opts.list_assemblies = true;
        sess.diagnostics.add("z diag".to_string());
        sess.diagnostics.add("a diag".to_string());
        sess.examined.push(Examined {
            relative_path: "sub/Lib.dll".to_string(),
            version: Version(1, 2, 3, 4),
            target_framework: Some(".NETStandard,Version=v2.0".to_string()),
        });

        let rendered = render(&sess).join("");
        let reparsed = split_report(&rendered);
        assert_eq!(
            reparsed,
            vec![
                "a diag".to_string(),
                "z diag".to_string(),
                "sub/Lib.dll\t1.2.3.4\t.NETStandard,Version=v2.0".to_string(),
            ]
        );
        // Parsing then re-serializing reproduces the same bytes.
        let reserialized: String = reparsed.iter().map(|l| format!("{}\n", l)).collect();
        assert_eq!(reserialized, rendered);
    }

    #[test]
    fn empty_report_seeds_an_empty_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.txt");
        let sess = session_with(out.clone());
        assert_eq!(finish(&sess).unwrap(), RunOutcome::Seeded);
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
        assert_eq!(finish(&sess).unwrap(), RunOutcome::Clean);
    }
}
