//! Metadata reader: probes a file for managed metadata and converts the
//! dotscope raw-table view into an owned [`AssemblyData`].
//!
//! This is the only module that touches `dotscope` or `goblin` types.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use dotscope::metadata::cilobject::CilObject;
use dotscope::prelude::*;
use log::debug;
use sha1::{Digest, Sha1};

use super::blob::{self, SpecShape};
use super::{
    AssemblyData, AssemblyId, ExportedType, MemberDef, MemberKind, MemberParent, MemberRef,
    RefScope, TypeDef, TypeRef, Version, parse_friend,
};

/// Result of opening a candidate file.
pub enum ReadOutcome {
    /// Absent, unreadable, or not a managed PE. Not an error.
    NotManaged,
    /// Carries managed metadata but the reader rejected it.
    Failed(String),
    Loaded(Box<AssemblyData>),
}

/// Cheap managed-PE probe: a CLI header directory must be present before the
/// metadata reader is invited to the file.
pub fn is_managed(path: &Path) -> bool {
    let Ok(data) = fs::read(path) else {
        return false;
    };
    match goblin::pe::PE::parse(&data) {
        Ok(pe) => pe
            .header
            .optional_header
            .map(|oh| oh.data_directories.get_clr_runtime_header().is_some())
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Open `path` and produce the owned assembly view.
pub fn read_assembly(path: &Path) -> ReadOutcome {
    if !is_managed(path) {
        return ReadOutcome::NotManaged;
    }
    let object = match CilObject::from_file(path) {
        Ok(o) => o,
        Err(e) => return ReadOutcome::Failed(e.to_string()),
    };
    match extract(path, &object) {
        Some(data) => ReadOutcome::Loaded(Box::new(data)),
        None => ReadOutcome::Failed("metadata tables stream missing".to_string()),
    }
}

fn extract(path: &Path, object: &CilObject) -> Option<AssemblyData> {
    let tables = object.tables()?;
    let strings = object.strings();
    let blobs = object.blob();

    let get_str = |idx: u32| -> String {
        strings
            .and_then(|h| h.get(idx as usize).ok())
            .unwrap_or_default()
            .to_string()
    };
    let get_blob = |idx: u32| -> Vec<u8> {
        blobs
            .and_then(|h| h.get(idx as usize).ok())
            .unwrap_or_default()
            .to_vec()
    };

    let mut asm = AssemblyData {
        path: path.to_path_buf(),
        ..Default::default()
    };

    // Assembly identity. Modules without an Assembly row fall back to the
    // file stem with a zero version.
    if let Some(t) = tables.table::<AssemblyRaw>().filter(|t| t.row_count > 0) {
        if let Some(row) = t.get(1) {
            asm.id = AssemblyId {
                name: get_str(row.name),
                version: Version(
                    row.major_version as u16,
                    row.minor_version as u16,
                    row.build_number as u16,
                    row.revision_number as u16,
                ),
                culture: culture_of(get_str(row.culture)),
                public_key_token: key_token(&get_blob(row.public_key)),
            };
        }
    }
    if asm.id.name.is_empty() {
        asm.id.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
    }

    // AssemblyRef table, in declaration order.
    if let Some(t) = tables.table::<AssemblyRefRaw>() {
        for rid in 1..=t.row_count {
            let Some(row) = t.get(rid) else { continue };
            let key_blob = get_blob(row.public_key_or_token);
            // Flag 0x0001 marks a full public key rather than a token.
            let token = if row.flags & 0x0001 != 0 {
                key_token(&key_blob)
            } else {
                token_bytes(&key_blob)
            };
            asm.refs.push(AssemblyId {
                name: get_str(row.name),
                version: Version(
                    row.major_version as u16,
                    row.minor_version as u16,
                    row.build_number as u16,
                    row.revision_number as u16,
                ),
                culture: culture_of(get_str(row.culture)),
                public_key_token: token,
            });
        }
    }

    // ModuleRef names, for member-reference scopes.
    let mut module_refs: Vec<String> = Vec::new();
    if let Some(t) = tables.table::<ModuleRefRaw>() {
        for rid in 1..=t.row_count {
            if let Some(row) = t.get(rid) {
                module_refs.push(get_str(row.name));
            }
        }
    }

    // TypeRef table.
    if let Some(t) = tables.table::<TypeRefRaw>() {
        for rid in 1..=t.row_count {
            let Some(row) = t.get(rid) else { continue };
            let scope = match row.resolution_scope.tag {
                TableId::AssemblyRef => {
                    RefScope::Assembly(row.resolution_scope.row.saturating_sub(1) as usize)
                }
                TableId::TypeRef => {
                    RefScope::Nested(row.resolution_scope.row.saturating_sub(1) as usize)
                }
                TableId::ModuleRef => RefScope::ModuleRef(
                    module_refs
                        .get(row.resolution_scope.row.saturating_sub(1) as usize)
                        .cloned()
                        .unwrap_or_default(),
                ),
                _ => RefScope::Module,
            };
            asm.type_refs.push(TypeRef {
                name: get_str(row.type_name),
                namespace: get_str(row.type_namespace),
                scope,
            });
        }
    }

    // Member pools, sliced into per-type ranges below.
    let mut methods: Vec<MemberDef> = Vec::new();
    if let Some(t) = tables.table::<MethodDefRaw>() {
        for rid in 1..=t.row_count {
            if let Some(row) = t.get(rid) {
                methods.push(MemberDef {
                    name: get_str(row.name),
                    kind: MemberKind::Method,
                    flags: row.flags,
                });
            }
        }
    }
    let mut fields: Vec<MemberDef> = Vec::new();
    if let Some(t) = tables.table::<FieldRaw>() {
        for rid in 1..=t.row_count {
            if let Some(row) = t.get(rid) {
                fields.push(MemberDef {
                    name: get_str(row.name),
                    kind: MemberKind::Field,
                    flags: row.flags,
                });
            }
        }
    }

    // TypeDef table with nesting-aware full names.
    let mut raw_types: Vec<(u32, String, String, u32, u32)> = Vec::new();
    if let Some(t) = tables.table::<TypeDefRaw>() {
        for rid in 1..=t.row_count {
            if let Some(row) = t.get(rid) {
                raw_types.push((
                    row.flags,
                    get_str(row.type_name),
                    get_str(row.type_namespace),
                    row.field_list,
                    row.method_list,
                ));
            }
        }
    }
    let mut enclosing: HashMap<usize, usize> = HashMap::new();
    if let Some(t) = tables.table::<NestedClassRaw>() {
        for rid in 1..=t.row_count {
            if let Some(row) = t.get(rid) {
                enclosing.insert(
                    row.nested_class.saturating_sub(1) as usize,
                    row.enclosing_class.saturating_sub(1) as usize,
                );
            }
        }
    }
    let full_names: Vec<String> = (0..raw_types.len())
        .map(|i| typedef_full_name(i, &raw_types, &enclosing, 0))
        .collect();
    for (i, (flags, _, _, field_start, method_start)) in raw_types.iter().enumerate() {
        let method_end = raw_types
            .get(i + 1)
            .map(|r| r.4.saturating_sub(1) as usize)
            .unwrap_or(methods.len())
            .min(methods.len());
        let field_end = raw_types
            .get(i + 1)
            .map(|r| r.3.saturating_sub(1) as usize)
            .unwrap_or(fields.len())
            .min(fields.len());
        let method_start = (method_start.saturating_sub(1) as usize).min(method_end);
        let field_start = (field_start.saturating_sub(1) as usize).min(field_end);
        asm.types.push(TypeDef {
            full_name: full_names[i].clone(),
            flags: *flags,
            methods: methods[method_start..method_end].to_vec(),
            fields: fields[field_start..field_end].to_vec(),
        });
    }
    for (i, t) in asm.types.iter().enumerate() {
        asm.type_index.entry(t.full_name.clone()).or_insert(i);
    }

    // TypeSpec signatures feed the member-parent classification.
    let mut spec_shapes: Vec<SpecShape> = Vec::new();
    if let Some(t) = tables.table::<TypeSpecRaw>() {
        for rid in 1..=t.row_count {
            if let Some(row) = t.get(rid) {
                spec_shapes.push(blob::spec_shape(&get_blob(row.signature)));
            }
        }
    }

    // MemberRef table.
    let mut member_ref_rows: Vec<CodedIndex> = Vec::new();
    if let Some(t) = tables.table::<MemberRefRaw>() {
        for rid in 1..=t.row_count {
            let Some(row) = t.get(rid) else { continue };
            member_ref_rows.push(row.class.clone());
            let parent = match row.class.tag {
                TableId::TypeRef => MemberParent::TypeRef(row.class.row.saturating_sub(1) as usize),
                TableId::TypeDef => MemberParent::Local,
                TableId::MethodDef => MemberParent::MethodDef,
                TableId::ModuleRef => MemberParent::ModuleRef,
                TableId::TypeSpec => {
                    let shape = spec_shapes
                        .get(row.class.row.saturating_sub(1) as usize)
                        .copied()
                        .unwrap_or(SpecShape::Opaque);
                    match shape {
                        SpecShape::Array => MemberParent::TypeSpec {
                            array: true,
                            type_ref: None,
                        },
                        SpecShape::TypeRefRow(r) => MemberParent::TypeSpec {
                            array: false,
                            type_ref: Some(r.saturating_sub(1) as usize),
                        },
                        SpecShape::Local | SpecShape::Opaque => MemberParent::TypeSpec {
                            array: false,
                            type_ref: None,
                        },
                    }
                }
                _ => MemberParent::Local,
            };
            let kind = if blob::signature_is_field(&get_blob(row.signature)) {
                MemberKind::Field
            } else {
                MemberKind::Method
            };
            asm.member_refs.push(MemberRef {
                name: get_str(row.name),
                parent,
                kind,
            });
        }
    }

    // ExportedType table: forwarders, with nested entries chained onto their
    // enclosing exported type.
    let mut raw_exports: Vec<(String, CodedIndex)> = Vec::new();
    if let Some(t) = tables.table::<ExportedTypeRaw>() {
        for rid in 1..=t.row_count {
            if let Some(row) = t.get(rid) {
                let ns = get_str(row.namespace);
                let name = get_str(row.name);
                let simple = if ns.is_empty() {
                    name
                } else {
                    format!("{}.{}", ns, name)
                };
                raw_exports.push((simple, row.implementation));
            }
        }
    }
    for i in 0..raw_exports.len() {
        let (full_name, assembly_ref) = exported_target(i, &raw_exports, 0);
        asm.exported.push(ExportedType {
            full_name,
            assembly_ref,
        });
    }

    // Assembly- and type-level custom attributes the checker cares about.
    let type_ref_names: Vec<String> = asm.type_refs.iter().map(|t| t.name.clone()).collect();
    let attr_type_name = |ctor: &CodedIndex| -> Option<String> {
        match ctor.tag {
            TableId::MemberRef => {
                let class = member_ref_rows.get(ctor.row.saturating_sub(1) as usize)?;
                if class.tag == TableId::TypeRef {
                    type_ref_names
                        .get(class.row.saturating_sub(1) as usize)
                        .cloned()
                } else {
                    None
                }
            }
            TableId::MethodDef => {
                let target = ctor.row.saturating_sub(1) as usize;
                raw_types.iter().enumerate().find_map(|(i, r)| {
                    let start = r.4.saturating_sub(1) as usize;
                    let end = raw_types
                        .get(i + 1)
                        .map(|n| n.4.saturating_sub(1) as usize)
                        .unwrap_or(methods.len());
                    (start..end).contains(&target).then(|| r.1.clone())
                })
            }
            _ => None,
        }
    };
    if let Some(t) = tables.table::<CustomAttributeRaw>() {
        for rid in 1..=t.row_count {
            let Some(row) = t.get(rid) else { continue };
            let Some(attr_name) = attr_type_name(&row.constructor) else {
                continue;
            };
            match row.parent.tag {
                TableId::Assembly => {
                    let value = get_blob(row.value);
                    match attr_name.as_str() {
                        "InternalsVisibleToAttribute" => {
                            let args = blob::attribute_string_args(&value, 1);
                            if let Some(decl) = args.first() {
                                if let Some(friend) = parse_friend(decl) {
                                    asm.friends.push(friend);
                                }
                            }
                        }
                        "AssemblyProductAttribute" => {
                            asm.product = blob::attribute_string_args(&value, 1).into_iter().next();
                        }
                        "AssemblyMetadataAttribute" => {
                            let args = blob::attribute_string_args(&value, 2);
                            if args.first().map(String::as_str) == Some(".NETFrameworkAssembly") {
                                asm.net_framework_marker = true;
                            }
                        }
                        "TargetFrameworkAttribute" => {
                            asm.target_framework =
                                blob::attribute_string_args(&value, 1).into_iter().next();
                        }
                        _ => {}
                    }
                }
                TableId::TypeDef if attr_name == "TypeIdentifierAttribute" => {
                    if let Some(name) = full_names.get(row.parent.row.saturating_sub(1) as usize) {
                        asm.embedded_interop_types.push(name.clone());
                    }
                }
                _ => {}
            }
        }
    }
    asm.embedded_interop_types.sort();
    asm.embedded_interop_types.dedup();

    debug!(
        "read {}: {} refs, {} types, {} member refs, {} exports",
        asm.id.full_name(),
        asm.refs.len(),
        asm.types.len(),
        asm.member_refs.len(),
        asm.exported.len()
    );
    Some(asm)
}

fn typedef_full_name(
    idx: usize,
    raw: &[(u32, String, String, u32, u32)],
    enclosing: &HashMap<usize, usize>,
    depth: usize,
) -> String {
    let (_, name, namespace, _, _) = &raw[idx];
    let simple = if namespace.is_empty() {
        name.clone()
    } else {
        format!("{}.{}", namespace, name)
    };
    // Nesting chains in real metadata are shallow; the bound only guards
    // against malformed circular NestedClass rows.
    if depth > 64 {
        return simple;
    }
    match enclosing.get(&idx) {
        Some(&outer) if outer < raw.len() && outer != idx => {
            format!(
                "{}/{}",
                typedef_full_name(outer, raw, enclosing, depth + 1),
                simple
            )
        }
        _ => simple,
    }
}

fn exported_target(
    idx: usize,
    raw: &[(String, CodedIndex)],
    depth: usize,
) -> (String, Option<usize>) {
    let (simple, implementation) = &raw[idx];
    if depth > 64 {
        return (simple.clone(), None);
    }
    match implementation.tag {
        TableId::AssemblyRef => (
            simple.clone(),
            Some(implementation.row.saturating_sub(1) as usize),
        ),
        TableId::ExportedType => {
            let outer = implementation.row.saturating_sub(1) as usize;
            if outer >= raw.len() || outer == idx {
                return (simple.clone(), None);
            }
            let (outer_name, target) = exported_target(outer, raw, depth + 1);
            (format!("{}/{}", outer_name, simple), target)
        }
        // TableId::File: another module of this assembly, nothing to follow.
        _ => (simple.clone(), None),
    }
}

fn culture_of(raw: String) -> Option<String> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("neutral") {
        None
    } else {
        Some(raw)
    }
}

/// Strong-name token: the last eight bytes of the key's SHA-1, reversed.
fn key_token(public_key: &[u8]) -> Option<[u8; 8]> {
    if public_key.is_empty() {
        return None;
    }
    let digest = Sha1::digest(public_key);
    let mut token = [0u8; 8];
    for (slot, byte) in token.iter_mut().zip(digest[digest.len() - 8..].iter().rev()) {
        *slot = *byte;
    }
    Some(token)
}

fn token_bytes(blob: &[u8]) -> Option<[u8; 8]> {
    <[u8; 8]>::try_from(blob).ok()
}
