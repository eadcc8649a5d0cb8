//! Command-line surface: argument parsing, response-file expansion, and
//! exit-code mapping.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::error::ErrorKind;
use log::error;

use crate::driver;
use crate::options::{self, CaseMode, Options};

#[derive(Parser, Debug)]
#[command(name = "bincompat")]
#[command(about = "Checks binary compatibility across managed assemblies", version)]
pub struct Cli {
    /// Files, directories, or glob patterns to examine; prefix with '!' to
    /// exclude. Defaults to the current directory.
    pub paths: Vec<String>,

    /// Baseline/report file path
    #[arg(long, default_value = options::DEFAULT_REPORT, value_name = "PATH")]
    pub out: PathBuf,

    /// Semicolon-separated file patterns applied to directory inclusions
    #[arg(long, default_value = options::DEFAULT_PATTERNS, value_name = "GLOBS")]
    pub patterns: String,

    /// Append the examined-assemblies list to the report
    #[arg(short = 'l', long)]
    pub list_assemblies: bool,

    /// Emit InternalsVisibleTo usage reports next to the baseline
    #[arg(long)]
    pub ivt: bool,

    /// Suppress version-mismatch diagnostics
    #[arg(long)]
    pub ignore_version_mismatch: bool,

    /// Report embedded interop types
    #[arg(long)]
    pub embedded_interop_types: bool,

    /// Report platform-pointer constructor usages
    #[arg(long)]
    pub intptr_ctors: bool,

    /// Extra directory probed by the resolver, in declared order
    #[arg(long = "search-dir", value_name = "DIR")]
    pub search_dirs: Vec<PathBuf>,

    /// Runtime root whose version directories satisfy framework references
    #[arg(long = "runtime-dir", value_name = "DIR")]
    pub runtime_dirs: Vec<PathBuf>,
}

impl Cli {
    pub fn into_options(self) -> Options {
        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        for path in self.paths {
            match path.strip_prefix('!') {
                Some(excluded) if !excluded.is_empty() => excludes.push(excluded.to_string()),
                _ => includes.push(path),
            }
        }
        let mut runtime_dirs = self.runtime_dirs;
        runtime_dirs.extend(dotnet_root_dirs());
        Options {
            includes,
            excludes,
            patterns: options::split_patterns(&self.patterns),
            out: self.out,
            root: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            list_assemblies: self.list_assemblies,
            ivt: self.ivt,
            ignore_version_mismatch: self.ignore_version_mismatch,
            embedded_interop_types: self.embedded_interop_types,
            intptr_ctors: self.intptr_ctors,
            search_dirs: self.search_dirs,
            runtime_dirs,
            case: CaseMode::host_default(),
        }
    }
}

/// `DOTNET_ROOT` contributes its shared-framework and reference-pack
/// directories as runtime roots.
fn dotnet_root_dirs() -> Vec<PathBuf> {
    let Some(root) = env::var_os("DOTNET_ROOT").map(PathBuf::from) else {
        return Vec::new();
    };
    [
        root.join("shared").join("Microsoft.NETCore.App"),
        root.join("packs").join("Microsoft.NETCore.App.Ref"),
    ]
    .into_iter()
    .filter(|p| p.is_dir())
    .collect()
}

/// Parse the command line (response files expanded) and run. The returned
/// value is the process exit code: 0 clean/seeded, 1 mismatch, -1 argument
/// errors.
pub fn run() -> i32 {
    let args = match argfile::expand_args_from(
        env::args_os(),
        argfile::parse_fromfile,
        argfile::PREFIX,
    ) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error reading response file: {}", e);
            return -1;
        }
    };
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return 0;
        }
        Err(e) => {
            let _ = e.print();
            return -1;
        }
    };

    match driver::run(cli.into_options()).context("compatibility check failed") {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            1
        }
    }
}
