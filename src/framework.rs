//! Platform/runtime assembly classification and the framework-redirect table.

use std::rc::Rc;

use crate::driver::Session;
use crate::metadata::{AssemblyData, Version};

/// Short names treated as platform assemblies regardless of attributes.
const FRAMEWORK_NAMES: &[&str] = &[
    "mscorlib",
    "netstandard",
    "System",
    "Accessibility",
    "Microsoft.CSharp",
    "Microsoft.VisualBasic",
    "Microsoft.VisualC",
    "Microsoft.WindowsCE.Forms",
    "PresentationCore",
    "PresentationFramework",
    "ReachFramework",
    "UIAutomationClient",
    "UIAutomationClientsideProviders",
    "UIAutomationProvider",
    "UIAutomationTypes",
    "WindowsBase",
    "WindowsFormsIntegration",
];

/// True for short names that belong to the platform by naming alone.
pub fn is_framework_name(short_name: &str) -> bool {
    FRAMEWORK_NAMES
        .iter()
        .any(|n| n.eq_ignore_ascii_case(short_name))
        || short_name
            .get(..7)
            .is_some_and(|p| p.eq_ignore_ascii_case("System."))
}

/// Full framework verdict for a loaded assembly: name rules plus the
/// product/metadata attribute markers. Callers memoize by path.
pub fn classify(asm: &AssemblyData) -> bool {
    if is_framework_name(&asm.id.name) {
        return true;
    }
    if matches!(
        asm.product.as_deref(),
        Some("Microsoft\u{ae} .NET Framework") | Some("Microsoft\u{ae} .NET")
    ) {
        return true;
    }
    asm.net_framework_marker
}

/// Session-memoized verdict, stable for a given file path across the run.
pub fn memoized(sess: &mut Session, asm: &Rc<AssemblyData>) -> bool {
    let key = sess.opts.case.key(&asm.path);
    if let Some(&verdict) = sess.framework_memo.get(&key) {
        return verdict;
    }
    let verdict = classify(asm);
    sess.framework_memo.insert(key, verdict);
    verdict
}

/// Versions the desktop framework unifies onto newer bits. Short names may
/// accept several historical versions, so the table maps to version sets.
const FRAMEWORK_REDIRECTS: &[(&str, &[Version])] = &[
    (
        "Microsoft.VisualBasic",
        &[Version(7, 0, 5000, 0), Version(7, 0, 3300, 0), Version(8, 0, 0, 0)],
    ),
    (
        "Microsoft.WindowsCE.Forms",
        &[Version(1, 0, 5000, 0), Version(2, 0, 0, 0), Version(3, 5, 0, 0)],
    ),
    (
        "System.Data",
        &[Version(1, 0, 5000, 0), Version(2, 0, 0, 0)],
    ),
    (
        "System.Drawing",
        &[Version(1, 0, 5000, 0), Version(2, 0, 0, 0)],
    ),
    (
        "System.Windows.Forms",
        &[Version(1, 0, 5000, 0), Version(2, 0, 0, 0)],
    ),
    (
        "System.Xml",
        &[Version(1, 0, 5000, 0), Version(2, 0, 0, 0)],
    ),
];

/// Highest version the desktop framework redirects `short_name` up to, if
/// the reference is covered by the redirect table.
pub fn redirect_ceiling(short_name: &str, requested: Version) -> Option<Version> {
    FRAMEWORK_REDIRECTS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(short_name))
        .and_then(|(_, versions)| versions.iter().copied().filter(|v| requested <= *v).max())
}

pub fn in_redirect_table(short_name: &str) -> bool {
    FRAMEWORK_REDIRECTS
        .iter()
        .any(|(n, _)| n.eq_ignore_ascii_case(short_name))
}
