//! Application-configuration binding redirects: parse `*.exe.config` /
//! `*.dll.config` files and mark the version mismatches they cover.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;

use crate::driver::Session;
use crate::metadata::Version;
use crate::options::CaseMode;

/// One `<dependentAssembly>` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub name: String,
    pub public_key_token: Option<[u8; 8]>,
    pub culture: Option<String>,
    pub old_lo: Version,
    pub old_hi: Version,
    pub new_version: Version,
}

impl Redirect {
    /// Does this entry cover a drift from `expected` to `actual` for the
    /// given reference identity?
    pub fn covers(&self, reference: &crate::metadata::AssemblyId, actual: Version) -> bool {
        if !reference.name.eq_ignore_ascii_case(&self.name) {
            return false;
        }
        let culture_ok = match (&self.culture, &reference.culture) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (Some(_), None) | (None, Some(_)) => false,
            (None, None) => true,
        };
        if !culture_ok {
            return false;
        }
        if let (Some(declared), Some(actual_token)) =
            (&self.public_key_token, &reference.public_key_token)
        {
            if declared != actual_token {
                return false;
            }
        }
        self.old_lo <= reference.version
            && reference.version <= self.old_hi
            && actual == self.new_version
    }
}

/// Parse all `<dependentAssembly>` entries of one config file.
pub fn parse_config(content: &str) -> Result<Vec<Redirect>, String> {
    let mut reader = XmlReader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut redirects = Vec::new();
    let mut current: Option<PartialRedirect> = None;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if name.ends_with(b"dependentassembly") {
                    current = Some(PartialRedirect::default());
                } else if name.ends_with(b"assemblyidentity") {
                    if let Some(partial) = current.as_mut() {
                        for attr in e.attributes().flatten() {
                            let key = attr.key.as_ref().to_ascii_lowercase();
                            let value = attr
                                .unescape_value()
                                .map(|v| v.trim().to_string())
                                .unwrap_or_default();
                            match key.as_slice() {
                                b"name" => partial.name = Some(value),
                                b"publickeytoken" => {
                                    partial.public_key_token = parse_token(&value);
                                }
                                b"culture" => {
                                    if !value.is_empty() && !value.eq_ignore_ascii_case("neutral") {
                                        partial.culture = Some(value);
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                } else if name.ends_with(b"bindingredirect") {
                    if let Some(partial) = current.as_mut() {
                        for attr in e.attributes().flatten() {
                            let key = attr.key.as_ref().to_ascii_lowercase();
                            let value = attr
                                .unescape_value()
                                .map(|v| v.trim().to_string())
                                .unwrap_or_default();
                            match key.as_slice() {
                                b"oldversion" => partial.old = parse_range(&value),
                                b"newversion" => partial.new_version = value.parse().ok(),
                                _ => {}
                            }
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if name.ends_with(b"dependentassembly") {
                    if let Some(done) = current.take().and_then(PartialRedirect::complete) {
                        redirects.push(done);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(redirects)
}

#[derive(Debug, Default)]
struct PartialRedirect {
    name: Option<String>,
    public_key_token: Option<[u8; 8]>,
    culture: Option<String>,
    old: Option<(Version, Version)>,
    new_version: Option<Version>,
}

impl PartialRedirect {
    fn complete(self) -> Option<Redirect> {
        let (old_lo, old_hi) = self.old?;
        Some(Redirect {
            name: self.name?,
            public_key_token: self.public_key_token,
            culture: self.culture,
            old_lo,
            old_hi,
            new_version: self.new_version?,
        })
    }
}

/// `oldVersion` is either a single version or an inclusive `lo-hi` range.
fn parse_range(raw: &str) -> Option<(Version, Version)> {
    match raw.split_once('-') {
        Some((lo, hi)) => Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?)),
        None => {
            let v: Version = raw.trim().parse().ok()?;
            Some((v, v))
        }
    }
}

fn parse_token(hex: &str) -> Option<[u8; 8]> {
    if hex.len() != 16 {
        return None;
    }
    let mut token = [0u8; 8];
    for (i, slot) in token.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).ok()?;
    }
    Some(token)
}

/// Apply every parsed config file to the pending version mismatches. A file
/// only speaks for the executable it sits next to: `A.exe.config` covers
/// references made by `A.exe`.
pub fn apply(sess: &mut Session, configs: &[PathBuf]) {
    for path in configs {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                sess.diagnostics.add(format!(
                    "{}: Failed to read config: {}",
                    display_name(path),
                    e
                ));
                continue;
            }
        };
        let redirects = match parse_config(&content) {
            Ok(r) => r,
            Err(e) => {
                sess.diagnostics.add(format!(
                    "{}: Failed to parse config: {}",
                    display_name(path),
                    e
                ));
                continue;
            }
        };
        let Some(owner) = config_owner(path) else {
            continue;
        };
        let case = sess.opts.case;
        let mut handled = 0usize;
        for mismatch in sess.mismatches.iter_mut() {
            if !applies_to(&owner, &mismatch.referencer_file, case) {
                continue;
            }
            if redirects
                .iter()
                .any(|r| r.covers(&mismatch.expected, mismatch.actual))
            {
                mismatch.handled_by.push(path.clone());
                handled += 1;
            }
        }
        debug!(
            "{}: {} redirects, {} mismatches handled",
            path.display(),
            redirects.len(),
            handled
        );
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// `A.exe.config` -> `A.exe`.
fn config_owner(path: &Path) -> Option<String> {
    display_name(path).strip_suffix(".config").map(str::to_string)
}

fn applies_to(owner: &str, referencer_file: &str, case: CaseMode) -> bool {
    case.eq(owner, referencer_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::AssemblyId;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<configuration>
  <runtime>
    <assemblyBinding xmlns="urn:schemas-microsoft-com:asm.v1">
      <dependentAssembly>
        <assemblyIdentity name="Widgets" publicKeyToken="b03f5f7f11d50a3a" culture="neutral" />
        <bindingRedirect oldVersion="1.0.0.0-2.0.0.0" newVersion="2.0.0.0" />
      </dependentAssembly>
      <dependentAssembly>
        <assemblyIdentity name="Gadgets" />
        <bindingRedirect oldVersion="3.0.0.0" newVersion="3.5.0.0" />
      </dependentAssembly>
    </assemblyBinding>
  </runtime>
</configuration>"#;

    #[test]
    fn parses_identities_and_ranges() {
        let redirects = parse_config(CONFIG).unwrap();
        assert_eq!(redirects.len(), 2);
        assert_eq!(redirects[0].name, "Widgets");
        assert_eq!(
            redirects[0].public_key_token,
            Some([0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a])
        );
        assert_eq!(redirects[0].old_lo, Version(1, 0, 0, 0));
        assert_eq!(redirects[0].old_hi, Version(2, 0, 0, 0));
        assert_eq!(redirects[0].new_version, Version(2, 0, 0, 0));
        // Single-version oldVersion collapses to a one-point range.
        assert_eq!(redirects[1].old_lo, redirects[1].old_hi);
    }

    #[test]
    fn malformed_xml_is_an_error_not_a_panic() {
        // EOF in the middle of a tag.
        assert!(parse_config("<configuration><assemblyBinding").is_err());
    }

    #[test]
    fn coverage_requires_identity_range_and_target() {
        let redirect = Redirect {
            name: "Widgets".to_string(),
            public_key_token: None,
            culture: None,
            old_lo: Version(1, 0, 0, 0),
            old_hi: Version(2, 0, 0, 0),
            new_version: Version(2, 0, 0, 0),
        };
        let reference = AssemblyId::new("widgets", Version(1, 5, 0, 0));
        assert!(redirect.covers(&reference, Version(2, 0, 0, 0)));
        // Actual version must equal the redirect target.
        assert!(!redirect.covers(&reference, Version(2, 1, 0, 0)));
        // Reference outside the old range.
        let outside = AssemblyId::new("Widgets", Version(3, 0, 0, 0));
        assert!(!redirect.covers(&outside, Version(2, 0, 0, 0)));
        // Different identity.
        let other = AssemblyId::new("Gadgets", Version(1, 5, 0, 0));
        assert!(!redirect.covers(&other, Version(2, 0, 0, 0)));
    }

    #[test]
    fn apply_marks_only_the_owning_executables_mismatches() {
        use crate::driver::{Session, VersionMismatch};
        use crate::options::Options;

        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("App.exe.config");
        std::fs::write(&config, CONFIG).unwrap();

        let mut sess = Session::new(Options::default(), Vec::new());
        let mismatch = |file: &str, name: &str| VersionMismatch {
            referencer: "App".to_string(),
            referencer_file: file.to_string(),
            expected: AssemblyId {
                name: name.to_string(),
                version: Version(1, 0, 0, 0),
                culture: None,
                public_key_token: Some([0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a]),
            },
            actual: Version(2, 0, 0, 0),
            handled_by: Vec::new(),
        };
        sess.mismatches.push(mismatch("App.exe", "Widgets"));
        sess.mismatches.push(mismatch("Other.exe", "Widgets"));
        sess.mismatches.push(mismatch("App.exe", "Sprockets"));

        apply(&mut sess, &[config.clone()]);

        assert_eq!(sess.mismatches[0].handled_by, vec![config]);
        // Wrong executable and wrong identity stay pending.
        assert!(sess.mismatches[1].handled_by.is_empty());
        assert!(sess.mismatches[2].handled_by.is_empty());
        assert!(sess.diagnostics.is_empty());
    }

    #[test]
    fn config_owner_strips_only_the_config_suffix() {
        assert_eq!(
            config_owner(Path::new("/x/App.exe.config")).as_deref(),
            Some("App.exe")
        );
        assert_eq!(
            config_owner(Path::new("Lib.dll.config")).as_deref(),
            Some("Lib.dll")
        );
        assert_eq!(config_owner(Path::new("plain.txt")), None);
    }
}
