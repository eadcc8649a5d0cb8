//! InternalsVisibleTo usage reports.

use std::fs;
use std::path::PathBuf;

use log::info;

use crate::driver::Session;
use crate::errors::Result;

/// One permitted cross-assembly internal access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvtUsage {
    pub exposer: String,
    pub consumer: String,
    pub member: String,
}

impl IvtUsage {
    pub fn render(&self) -> String {
        format!("{} -> {}: {}", self.exposer, self.consumer, self.member)
    }

    /// The Roslyn-facing subset: compiler/IDE internals consumed from
    /// outside the compiler/IDE codebase.
    pub fn is_roslyn_exposure(&self) -> bool {
        let roslyn = |name: &str| {
            name.contains("Microsoft.CodeAnalysis") || name.contains("VisualStudio.LanguageServices")
        };
        roslyn(&self.exposer) && !roslyn(&self.consumer)
    }
}

/// Write `{report}.ivt.txt` and `{report}.ivt.roslyn.txt` next to the
/// baseline report.
pub fn write_reports(sess: &Session) -> Result<()> {
    let all = sorted_lines(sess.ivt_usages.iter());
    let roslyn = sorted_lines(sess.ivt_usages.iter().filter(|u| u.is_roslyn_exposure()));

    let base = sess.opts.out.display().to_string();
    write_lines(PathBuf::from(format!("{}.ivt.txt", base)), &all)?;
    write_lines(PathBuf::from(format!("{}.ivt.roslyn.txt", base)), &roslyn)?;
    info!(
        "ivt report: {} usages ({} roslyn-facing)",
        all.len(),
        roslyn.len()
    );
    Ok(())
}

fn sorted_lines<'a>(usages: impl Iterator<Item = &'a IvtUsage>) -> Vec<String> {
    let mut lines: Vec<String> = usages.map(IvtUsage::render).collect();
    lines.sort();
    lines.dedup();
    lines
}

fn write_lines(path: PathBuf, lines: &[String]) -> Result<()> {
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}
