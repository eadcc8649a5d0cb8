//! Run orchestration: owns every cache, sequences the phases.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use log::info;

use crate::errors::Result;
use crate::metadata::{AssemblyData, AssemblyId, Version};
use crate::options::Options;
use crate::report::{DiagnosticSet, RunOutcome};
use crate::{checker, framework, inputs, ivt, loader, redirects, report};

/// One examined-assemblies ledger row.
#[derive(Debug, Clone)]
pub struct Examined {
    pub relative_path: String,
    pub version: Version,
    pub target_framework: Option<String>,
}

impl Examined {
    pub fn render(&self) -> String {
        match &self.target_framework {
            Some(tfm) => format!("{}\t{}\t{}", self.relative_path, self.version, tfm),
            None => format!("{}\t{}", self.relative_path, self.version),
        }
    }
}

/// A version drift awaiting the redirect processor.
#[derive(Debug, Clone)]
pub struct VersionMismatch {
    /// Display name of the referencing assembly.
    pub referencer: String,
    /// File name of the referencing assembly, matched against config names.
    pub referencer_file: String,
    /// The reference as declared.
    pub expected: AssemblyId,
    /// Version of the assembly actually located.
    pub actual: Version,
    /// Config files whose redirects cover this drift.
    pub handled_by: Vec<PathBuf>,
}

/// Single-threaded session state. Every memo lives here for the whole run;
/// nothing is evicted.
pub struct Session {
    pub opts: Options,
    /// Input assembly files, for the resolver's input-set strategy.
    pub inputs: Vec<PathBuf>,
    /// Loader memo: path key -> load result (negative results included).
    pub loaded: HashMap<String, Option<Rc<AssemblyData>>>,
    /// Load order, scanned by the strict/loose resolver strategies.
    pub load_order: Vec<Rc<AssemblyData>>,
    pub examined: Vec<Examined>,
    /// Framework classification memo by path key.
    pub framework_memo: HashMap<String, bool>,
    /// Resolver memo by lowercased reference full name.
    pub resolve_memo: HashMap<String, Option<Rc<AssemblyData>>>,
    pub diagnostics: DiagnosticSet,
    pub mismatches: Vec<VersionMismatch>,
    /// Short names (lowercased) that already failed to resolve.
    pub unresolved: HashSet<String>,
    pub ivt_usages: Vec<ivt::IvtUsage>,
}

impl Session {
    pub fn new(opts: Options, inputs: Vec<PathBuf>) -> Self {
        Session {
            opts,
            inputs,
            loaded: HashMap::new(),
            load_order: Vec::new(),
            examined: Vec::new(),
            framework_memo: HashMap::new(),
            resolve_memo: HashMap::new(),
            diagnostics: DiagnosticSet::new(),
            mismatches: Vec::new(),
            unresolved: HashSet::new(),
            ivt_usages: Vec::new(),
        }
    }

    pub fn is_unresolved(&self, short_name: &str) -> bool {
        self.unresolved.contains(&short_name.to_ascii_lowercase())
    }

    pub fn mark_unresolved(&mut self, short_name: &str) -> bool {
        self.unresolved.insert(short_name.to_ascii_lowercase())
    }
}

/// Run the whole check and compare against the baseline.
pub fn run(opts: Options) -> Result<RunOutcome> {
    let set = inputs::expand(&opts);
    let mut sess = Session::new(opts, set.assemblies.clone());

    info!(
        "checking {} assemblies against {}",
        set.assemblies.len(),
        sess.opts.out.display()
    );

    for path in &set.assemblies {
        let Some(asm) = loader::load(&mut sess, path) else {
            continue;
        };
        if framework::memoized(&mut sess, &asm) {
            continue;
        }
        checker::check_assembly(&mut sess, &asm);
    }

    redirects::apply(&mut sess, &set.configs);

    if !sess.opts.ignore_version_mismatch {
        let lines: Vec<String> = sess
            .mismatches
            .iter()
            .filter(|m| m.handled_by.is_empty())
            .map(|m| {
                format!(
                    "{}: Version mismatch for assembly reference '{}': found version '{}'",
                    m.referencer,
                    m.expected.full_name(),
                    m.actual
                )
            })
            .collect();
        for line in lines {
            sess.diagnostics.add(line);
        }
    }

    if sess.opts.ivt {
        ivt::write_reports(&sess)?;
    }

    report::finish(&sess)
}
