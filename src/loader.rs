//! Assembly loader: path-memoized metadata loading plus the
//! examined-assemblies ledger.

use std::path::Path;
use std::rc::Rc;

use log::debug;

use crate::driver::{Examined, Session};
use crate::framework;
use crate::metadata::AssemblyData;
use crate::metadata::read::{ReadOutcome, read_assembly};

/// Load `path`, memoized by the session's path-case policy. Returns `None`
/// for absent/unmanaged files and for metadata failures (which also record a
/// diagnostic). Every distinct path is read at most once per run.
pub fn load(sess: &mut Session, path: &Path) -> Option<Rc<AssemblyData>> {
    let key = sess.opts.case.key(path);
    if let Some(memo) = sess.loaded.get(&key) {
        return memo.clone();
    }

    let result = match read_assembly(path) {
        ReadOutcome::NotManaged => {
            debug!("skipping unmanaged file {}", path.display());
            None
        }
        ReadOutcome::Failed(message) => {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            sess.diagnostics
                .add(format!("{}: Failed to read metadata: {}", name, message));
            None
        }
        ReadOutcome::Loaded(data) => {
            let asm = Rc::new(*data);
            sess.load_order.push(asm.clone());
            if !framework::memoized(sess, &asm) {
                sess.examined.push(Examined {
                    relative_path: relative_to_root(sess, path),
                    version: asm.id.version,
                    target_framework: asm.target_framework.clone(),
                });
            }
            Some(asm)
        }
    };

    sess.loaded.insert(key, result.clone());
    result
}

fn relative_to_root(sess: &Session, path: &Path) -> String {
    let root = sess
        .opts
        .root
        .canonicalize()
        .unwrap_or_else(|_| sess.opts.root.clone());
    let full = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    full.strip_prefix(&root)
        .unwrap_or(&full)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use std::fs;

    #[test]
    fn unmanaged_files_are_negatively_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.dll");
        fs::write(&path, b"MZ but not really").unwrap();

        let opts = Options {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut sess = Session::new(opts, vec![path.clone()]);
        assert!(load(&mut sess, &path).is_none());
        assert!(load(&mut sess, &path).is_none());
        assert_eq!(sess.loaded.len(), 1);
        assert!(sess.diagnostics.is_empty());
    }
}
