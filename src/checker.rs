//! Reference checker: walks every assembly, type, and member reference of an
//! examined assembly and records diagnostics for whatever does not resolve.

use std::rc::Rc;

use log::debug;

use crate::driver::{Session, VersionMismatch};
use crate::framework;
use crate::ivt;
use crate::metadata::{AssemblyData, AssemblyId, MemberParent};
use crate::resolver;

/// Transitive lookups (type-forwarder chains) stop here and report instead
/// of recursing further.
pub const MAX_RESOLVE_DEPTH: usize = 64;

/// Outcome of a type lookup in a resolved assembly, forwarders followed.
enum TypeSearch {
    Found(Rc<AssemblyData>, usize),
    Missing,
    UnresolvedScope(AssemblyId),
    TooDeep,
}

/// Check every outbound reference of `asm`. Diagnostics and version
/// mismatches land in the session; nothing aborts the walk.
pub fn check_assembly(sess: &mut Session, asm: &Rc<AssemblyData>) {
    debug!("checking {}", asm.id.full_name());

    check_assembly_refs(sess, asm);
    check_type_refs(sess, asm);
    check_member_refs(sess, asm);

    if sess.opts.embedded_interop_types {
        for name in asm.embedded_interop_types.clone() {
            sess.diagnostics
                .add(format!("{}: Embedded interop type '{}'", asm.id.name, name));
        }
    }
}

fn check_assembly_refs(sess: &mut Session, asm: &Rc<AssemblyData>) {
    let references = asm.refs.clone();
    for (index, reference) in references.iter().enumerate() {
        if framework::is_framework_name(&reference.name) {
            continue;
        }
        match resolver::resolve(sess, reference) {
            None => {
                sess.diagnostics.add(format!(
                    "{}: Failed to resolve assembly reference to '{}'",
                    asm.id.name,
                    reference.full_name()
                ));
                sess.mark_unresolved(&reference.name);
            }
            Some(resolved) => {
                if framework::memoized(sess, &resolved) {
                    continue;
                }
                check_assembly_reference(sess, asm, &resolved, reference, index);
            }
        }
    }
}

/// Version drift plus type existence for one resolved reference edge.
fn check_assembly_reference(
    sess: &mut Session,
    asm: &Rc<AssemblyData>,
    resolved: &Rc<AssemblyData>,
    reference: &AssemblyId,
    ref_index: usize,
) {
    if reference.version != resolved.id.version {
        sess.mismatches.push(VersionMismatch {
            referencer: asm.id.name.clone(),
            referencer_file: asm
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            expected: reference.clone(),
            actual: resolved.id.version,
            handled_by: Vec::new(),
        });
    }

    for idx in 0..asm.type_refs.len() {
        if asm.type_ref_assembly_index(idx) != Some(ref_index) {
            continue;
        }
        let full_name = asm.type_ref_name(idx);
        match find_type(sess, resolved.clone(), &full_name, 0) {
            TypeSearch::Found(..) => {}
            TypeSearch::Missing => {
                sess.diagnostics.add(format!(
                    "{}: Failed to resolve type reference '{}' in assembly '{}'",
                    asm.id.name, full_name, resolved.id.name
                ));
            }
            TypeSearch::UnresolvedScope(scope) => {
                report_unresolved_scope(sess, asm, &scope);
            }
            TypeSearch::TooDeep => {
                report_depth_exceeded(sess, &full_name);
            }
        }
    }
}

fn check_type_refs(sess: &mut Session, asm: &Rc<AssemblyData>) {
    for idx in 0..asm.type_refs.len() {
        let Some(scope) = asm.type_ref_scope(idx).cloned() else {
            continue;
        };
        if sess.is_unresolved(&scope.name) {
            continue;
        }
        let full_name = asm.type_ref_name(idx);
        let Some(resolved) = resolver::resolve(sess, &scope) else {
            report_unresolved_scope(sess, asm, &scope);
            continue;
        };
        match find_type(sess, resolved, &full_name, 0) {
            TypeSearch::Found(owner, type_idx) => {
                ivt_check(sess, asm, &owner, type_idx, &full_name, None);
            }
            TypeSearch::Missing => {
                // Failures scoped to platform assemblies are the host's business.
                if !framework::is_framework_name(&scope.name) {
                    sess.diagnostics.add(format!(
                        "{}: Failed to resolve type reference '{}' in assembly '{}'",
                        asm.id.name, full_name, scope.name
                    ));
                }
            }
            TypeSearch::UnresolvedScope(inner) => report_unresolved_scope(sess, asm, &inner),
            TypeSearch::TooDeep => report_depth_exceeded(sess, &full_name),
        }
    }
}

fn check_member_refs(sess: &mut Session, asm: &Rc<AssemblyData>) {
    for member in asm.member_refs.clone() {
        let declaring = match &member.parent {
            MemberParent::TypeRef(idx) => Some(*idx),
            MemberParent::TypeSpec { array: true, .. } => None, // runtime-provided members
            MemberParent::TypeSpec { type_ref, .. } => *type_ref,
            MemberParent::Local | MemberParent::MethodDef | MemberParent::ModuleRef => None,
        };
        let Some(type_ref_idx) = declaring else {
            continue;
        };
        if type_ref_idx >= asm.type_refs.len() {
            continue;
        }
        let full_type = asm.type_ref_name(type_ref_idx);

        if sess.opts.intptr_ctors
            && member.name == ".ctor"
            && matches!(full_type.as_str(), "System.IntPtr" | "System.UIntPtr")
        {
            sess.diagnostics.add(format!(
                "{}: IntPtr constructor usage '{}..ctor'",
                asm.id.name, full_type
            ));
        }

        let Some(scope) = asm.type_ref_scope(type_ref_idx).cloned() else {
            continue;
        };
        if sess.is_unresolved(&scope.name) {
            continue;
        }
        let member_display = format!("{}.{}", full_type, member.name);
        let Some(resolved) = resolver::resolve(sess, &scope) else {
            report_unresolved_scope(sess, asm, &scope);
            continue;
        };
        match find_type(sess, resolved, &full_type, 0) {
            TypeSearch::Found(owner, type_idx) => {
                match owner.types[type_idx].member(&member.name, member.kind) {
                    Some(found) => {
                        let found = found.clone();
                        ivt_check(sess, asm, &owner, type_idx, &member_display, Some(&found));
                    }
                    None => {
                        report_missing_member(sess, asm, &member_display, &scope);
                    }
                }
            }
            TypeSearch::Missing => {
                report_missing_member(sess, asm, &member_display, &scope);
            }
            TypeSearch::UnresolvedScope(inner) => report_unresolved_scope(sess, asm, &inner),
            TypeSearch::TooDeep => report_depth_exceeded(sess, &member_display),
        }
    }
}

/// Locate `full_name` in `owner`, following exported-type forwarders through
/// the resolver with an explicit depth budget.
fn find_type(
    sess: &mut Session,
    owner: Rc<AssemblyData>,
    full_name: &str,
    depth: usize,
) -> TypeSearch {
    if let Some(&idx) = owner.type_index.get(full_name) {
        return TypeSearch::Found(owner, idx);
    }
    let Some(export) = owner.exported.iter().find(|e| e.full_name == full_name) else {
        return TypeSearch::Missing;
    };
    let Some(target_ref) = export.assembly_ref.and_then(|i| owner.refs.get(i)).cloned() else {
        return TypeSearch::Missing;
    };
    if depth >= MAX_RESOLVE_DEPTH {
        return TypeSearch::TooDeep;
    }
    match resolver::resolve(sess, &target_ref) {
        Some(next) => find_type(sess, next, full_name, depth + 1),
        None => TypeSearch::UnresolvedScope(target_ref),
    }
}

/// Internal definitions are only reachable through a declared friend grant;
/// permitted accesses are recorded for the IVT report, everything else is a
/// visibility diagnostic.
fn ivt_check(
    sess: &mut Session,
    consumer: &Rc<AssemblyData>,
    owner: &Rc<AssemblyData>,
    type_idx: usize,
    signature: &str,
    member: Option<&crate::metadata::MemberDef>,
) {
    let type_def = &owner.types[type_idx];
    let internal = member.map(|m| m.is_internal()).unwrap_or(false) || type_def.is_internal();
    if !internal {
        return;
    }
    let admitted = owner.friends.iter().any(|f| f.admits(&consumer.id));
    if admitted {
        sess.ivt_usages.push(ivt::IvtUsage {
            exposer: owner.id.name.clone(),
            consumer: consumer.id.name.clone(),
            member: signature.to_string(),
        });
    } else {
        sess.diagnostics.add(format!(
            "{}: Internal member '{}' of assembly '{}' is not visible",
            consumer.id.name, signature, owner.id.name
        ));
    }
}

fn report_unresolved_scope(sess: &mut Session, asm: &Rc<AssemblyData>, scope: &AssemblyId) {
    if sess.mark_unresolved(&scope.name) {
        sess.diagnostics.add(format!(
            "{}: Failed to resolve assembly reference to '{}'",
            asm.id.name,
            scope.full_name()
        ));
    }
}

fn report_missing_member(
    sess: &mut Session,
    asm: &Rc<AssemblyData>,
    member_display: &str,
    scope: &AssemblyId,
) {
    // Failures scoped to platform assemblies are the host's business.
    if framework::is_framework_name(&scope.name) {
        return;
    }
    sess.diagnostics.add(format!(
        "{}: Failed to resolve member reference '{}' in assembly '{}'",
        asm.id.name, member_display, scope.name
    ));
}

fn report_depth_exceeded(sess: &mut Session, subject: &str) {
    sess.diagnostics.add(format!(
        "Resolution depth budget exceeded while resolving '{}'",
        subject
    ));
}
