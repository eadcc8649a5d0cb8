//! Owned, eagerly-parsed view of a managed assembly.
//!
//! Everything downstream of the loader works on these types; the metadata
//! reader itself is confined to [`read`].

pub mod blob;
pub mod read;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Four-part assembly version, ordered and displayed as `1.2.3.4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u16, pub u16, pub u16, pub u16);

impl Version {
    pub const ZERO: Version = Version(0, 0, 0, 0);

    pub fn major(&self) -> u16 {
        self.0
    }

    pub fn minor(&self) -> u16 {
        self.1
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0, self.1, self.2, self.3)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u16; 4];
        let mut n = 0;
        for piece in s.split('.') {
            if n == 4 {
                return Err(format!("too many version components in '{}'", s));
            }
            parts[n] = piece
                .parse::<u16>()
                .map_err(|_| format!("invalid version component '{}' in '{}'", piece, s))?;
            n += 1;
        }
        if n == 0 {
            return Err(format!("empty version string '{}'", s));
        }
        Ok(Version(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// Symbolic assembly identity: short name, version, culture, public key token.
///
/// Name and culture compare case-insensitively; the tuple as a whole is the
/// strict identity used by the resolver's first strategy.
#[derive(Debug, Clone, Default)]
pub struct AssemblyId {
    pub name: String,
    pub version: Version,
    pub culture: Option<String>,
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        AssemblyId {
            name: name.into(),
            version,
            culture: None,
            public_key_token: None,
        }
    }

    /// .NET display form, e.g.
    /// `Foo, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null`.
    pub fn full_name(&self) -> String {
        let culture = self.culture.as_deref().unwrap_or("neutral");
        let token = match &self.public_key_token {
            Some(t) => t.iter().map(|b| format!("{:02x}", b)).collect::<String>(),
            None => "null".to_string(),
        };
        format!(
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name, self.version, culture, token
        )
    }

    pub fn same_name(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for AssemblyId {
    fn eq(&self, other: &Self) -> bool {
        let culture_eq = match (&self.culture, &other.culture) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        self.name.eq_ignore_ascii_case(&other.name)
            && self.version == other.version
            && culture_eq
            && self.public_key_token == other.public_key_token
    }
}

impl Eq for AssemblyId {}

impl fmt::Display for AssemblyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Kind of a member definition or reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Field,
}

/// A member definition inside a type definition.
#[derive(Debug, Clone)]
pub struct MemberDef {
    pub name: String,
    pub kind: MemberKind,
    /// Raw accessibility flags (`MethodAttributes` / `FieldAttributes`).
    pub flags: u32,
}

impl MemberDef {
    /// Member access bits: 3 = Assembly, 2 = FamANDAssem. Both are invisible
    /// outside the declaring assembly unless an IVT grant applies.
    pub fn is_internal(&self) -> bool {
        matches!(self.flags & 0x7, 0x2 | 0x3)
    }
}

/// A type definition with its declared members.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Namespace-qualified name; nested types use `Outer/Inner`.
    pub full_name: String,
    /// Raw `TypeAttributes`.
    pub flags: u32,
    pub methods: Vec<MemberDef>,
    pub fields: Vec<MemberDef>,
}

impl TypeDef {
    /// Visibility bits 0-2: 0 = NotPublic, 5 = NestedAssembly,
    /// 6 = NestedFamANDAssem. These are the scopes an IVT grant can widen;
    /// NestedPrivate(3) and NestedFamily(4) stay invisible regardless.
    pub fn is_internal(&self) -> bool {
        matches!(self.flags & 0x7, 0x0 | 0x5 | 0x6)
    }

    pub fn member(&self, name: &str, kind: MemberKind) -> Option<&MemberDef> {
        let pool = match kind {
            MemberKind::Method => &self.methods,
            MemberKind::Field => &self.fields,
        };
        pool.iter().find(|m| m.name == name)
    }
}

/// Resolution scope of a type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefScope {
    /// Index into [`AssemblyData::refs`].
    Assembly(usize),
    /// Defined in the current module (rare compiler artifact).
    Module,
    /// Another module of the same assembly.
    ModuleRef(String),
    /// Nested inside another type reference (index into `type_refs`).
    Nested(usize),
}

/// A symbolic reference to a type in some scope.
#[derive(Debug, Clone)]
pub struct TypeRef {
    pub name: String,
    pub namespace: String,
    pub scope: RefScope,
}

impl TypeRef {
    pub fn simple_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// Declaring scope of a member reference.
#[derive(Debug, Clone)]
pub enum MemberParent {
    /// Index into [`AssemblyData::type_refs`].
    TypeRef(usize),
    /// Declared on a local type definition; nothing to check.
    Local,
    /// Generic instantiation or array shape from the TypeSpec table.
    TypeSpec {
        array: bool,
        /// Underlying type reference when the TypeSpec wraps a
        /// `Class`/`ValueType` that lives in another assembly.
        type_ref: Option<usize>,
    },
    /// Vararg call-site signature on a local method.
    MethodDef,
    /// Scoped to a module reference of the same assembly.
    ModuleRef,
}

/// A symbolic reference to a member of some type.
#[derive(Debug, Clone)]
pub struct MemberRef {
    pub name: String,
    pub parent: MemberParent,
    pub kind: MemberKind,
}

/// A forwarded (exported) type entry.
#[derive(Debug, Clone)]
pub struct ExportedType {
    pub full_name: String,
    /// Index into [`AssemblyData::refs`] naming the implementation assembly;
    /// `None` when the implementation is a file of the same assembly.
    pub assembly_ref: Option<usize>,
}

/// One `InternalsVisibleTo` grant.
#[derive(Debug, Clone)]
pub struct Friend {
    pub name: String,
    /// Declared `PublicKey=` clause, decoded from hex. Compared as a token
    /// only when it is exactly token-sized.
    pub public_key: Option<Vec<u8>>,
}

impl Friend {
    /// Short-name match is mandatory; the key clause participates only when
    /// both sides carry one and the declared blob is token-sized.
    pub fn admits(&self, consumer: &AssemblyId) -> bool {
        if !consumer.name.eq_ignore_ascii_case(&self.name) {
            return false;
        }
        match (&self.public_key, &consumer.public_key_token) {
            (Some(key), Some(token)) if key.len() == 8 => key[..] == token[..],
            _ => true,
        }
    }
}

/// Parse an `InternalsVisibleTo` argument of the form
/// `Name` or `Name, PublicKey=<hex>`.
pub fn parse_friend(decl: &str) -> Option<Friend> {
    let mut parts = decl.split(',');
    let name = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    let mut public_key = None;
    for clause in parts {
        let clause = clause.trim();
        if let Some(hex) = clause
            .strip_prefix("PublicKey=")
            .or_else(|| clause.strip_prefix("publicKey="))
        {
            public_key = decode_hex(hex);
        }
    }
    Some(Friend {
        name: name.to_string(),
        public_key,
    })
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Loaded assembly view. Immutable once produced by the reader; shared via
/// `Rc` between the loader memo and the resolver memo.
#[derive(Debug, Default)]
pub struct AssemblyData {
    pub id: AssemblyId,
    pub path: PathBuf,
    /// Outbound assembly references in table order.
    pub refs: Vec<AssemblyId>,
    pub types: Vec<TypeDef>,
    /// Full name -> index into `types`.
    pub type_index: HashMap<String, usize>,
    pub type_refs: Vec<TypeRef>,
    pub member_refs: Vec<MemberRef>,
    pub exported: Vec<ExportedType>,
    pub friends: Vec<Friend>,
    /// `AssemblyProductAttribute` argument, when declared.
    pub product: Option<String>,
    /// True when an `AssemblyMetadataAttribute` marks `.NETFrameworkAssembly`.
    pub net_framework_marker: bool,
    /// `TargetFrameworkAttribute` moniker, when declared.
    pub target_framework: Option<String>,
    /// Type definitions carrying `TypeIdentifierAttribute`.
    pub embedded_interop_types: Vec<String>,
}

impl AssemblyData {
    /// A facade carries no concrete types beyond the `<Module>` stub and
    /// forwards everything it exports.
    pub fn is_facade(&self) -> bool {
        self.types.len() == 1 && self.types[0].full_name == "<Module>" && !self.exported.is_empty()
    }

    pub fn type_def(&self, full_name: &str) -> Option<&TypeDef> {
        self.type_index.get(full_name).map(|&i| &self.types[i])
    }

    /// Full name of a type reference, following nesting chains. The hop
    /// bound guards against malformed circular scope rows.
    pub fn type_ref_name(&self, mut idx: usize) -> String {
        let mut segments = vec![self.type_refs[idx].simple_name()];
        let mut hops = 0;
        while let RefScope::Nested(outer) = self.type_refs[idx].scope {
            hops += 1;
            if outer >= self.type_refs.len() || outer == idx || hops > 64 {
                break;
            }
            segments.push(self.type_refs[outer].simple_name());
            idx = outer;
        }
        segments.reverse();
        segments.join("/")
    }

    /// Assembly-reference scope of a type reference, through nesting.
    pub fn type_ref_scope(&self, idx: usize) -> Option<&AssemblyId> {
        self.type_ref_assembly_index(idx)
            .and_then(|r| self.refs.get(r))
    }

    /// Index into [`AssemblyData::refs`] a type reference is scoped to.
    pub fn type_ref_assembly_index(&self, mut idx: usize) -> Option<usize> {
        let mut hops = 0;
        loop {
            match &self.type_refs.get(idx)?.scope {
                RefScope::Assembly(r) => return Some(*r),
                RefScope::Nested(outer) => {
                    hops += 1;
                    if *outer >= self.type_refs.len() || *outer == idx || hops > 64 {
                        return None;
                    }
                    idx = *outer;
                }
                RefScope::Module | RefScope::ModuleRef(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parses_and_orders() {
        let v: Version = "4.0.10.0".parse().unwrap();
        assert_eq!(v, Version(4, 0, 10, 0));
        assert!(Version(4, 0, 0, 0) < v);
        assert!("1.2.3.4.5".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
        assert_eq!("2".parse::<Version>().unwrap(), Version(2, 0, 0, 0));
    }

    #[test]
    fn full_name_renders_dotnet_display_form() {
        let mut id = AssemblyId::new("Widgets", Version(1, 2, 3, 4));
        assert_eq!(
            id.full_name(),
            "Widgets, Version=1.2.3.4, Culture=neutral, PublicKeyToken=null"
        );
        id.public_key_token = Some([0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a]);
        id.culture = Some("en-US".to_string());
        assert_eq!(
            id.full_name(),
            "Widgets, Version=1.2.3.4, Culture=en-US, PublicKeyToken=b03f5f7f11d50a3a"
        );
    }

    #[test]
    fn identity_equality_ignores_name_case() {
        let a = AssemblyId::new("widgets", Version(1, 0, 0, 0));
        let b = AssemblyId::new("Widgets", Version(1, 0, 0, 0));
        let c = AssemblyId::new("Widgets", Version(2, 0, 0, 0));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn friend_grants_by_name_and_token() {
        let friend = parse_friend("Widgets.Tests").unwrap();
        let mut consumer = AssemblyId::new("widgets.tests", Version::ZERO);
        assert!(friend.admits(&consumer));

        let keyed = parse_friend("Widgets.Tests, PublicKey=b03f5f7f11d50a3a").unwrap();
        assert!(keyed.admits(&consumer)); // no token on the consumer: name wins
        consumer.public_key_token = Some([0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a]);
        assert!(keyed.admits(&consumer));
        consumer.public_key_token = Some([0; 8]);
        assert!(!keyed.admits(&consumer));
    }

    #[test]
    fn type_visibility_marks_only_ivt_widenable_scopes() {
        let with_flags = |flags| TypeDef {
            full_name: "T".to_string(),
            flags,
            methods: Vec::new(),
            fields: Vec::new(),
        };
        assert!(with_flags(0x0).is_internal()); // NotPublic
        assert!(with_flags(0x5).is_internal()); // NestedAssembly
        assert!(with_flags(0x6).is_internal()); // NestedFamANDAssem
        assert!(!with_flags(0x1).is_internal()); // Public
        assert!(!with_flags(0x2).is_internal()); // NestedPublic
        assert!(!with_flags(0x3).is_internal()); // NestedPrivate
        assert!(!with_flags(0x4).is_internal()); // NestedFamily
        assert!(!with_flags(0x7).is_internal()); // NestedFamORAssem
    }

    #[test]
    fn facade_detection_requires_module_stub_and_forwarders() {
        let mut asm = AssemblyData {
            types: vec![TypeDef {
                full_name: "<Module>".to_string(),
                flags: 0,
                methods: Vec::new(),
                fields: Vec::new(),
            }],
            ..Default::default()
        };
        assert!(!asm.is_facade());
        asm.exported.push(ExportedType {
            full_name: "System.Tuple".to_string(),
            assembly_ref: Some(0),
        });
        assert!(asm.is_facade());
        asm.types.push(TypeDef {
            full_name: "Real".to_string(),
            flags: 0x1,
            methods: Vec::new(),
            fields: Vec::new(),
        });
        assert!(!asm.is_facade());
    }

    #[test]
    fn nested_type_ref_names_chain_with_slash() {
        let asm = AssemblyData {
            refs: vec![AssemblyId::new("Other", Version::ZERO)],
            type_refs: vec![
                TypeRef {
                    name: "Outer".to_string(),
                    namespace: "N".to_string(),
                    scope: RefScope::Assembly(0),
                },
                TypeRef {
                    name: "Inner".to_string(),
                    namespace: String::new(),
                    scope: RefScope::Nested(0),
                },
            ],
            ..Default::default()
        };
        assert_eq!(asm.type_ref_name(1), "N.Outer/Inner");
        assert_eq!(asm.type_ref_scope(1).unwrap().name, "Other");
    }
}
