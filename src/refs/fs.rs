//! Filesystem-backed [`RefStore`].
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── refs/
//! │   ├── HEAD               ← "ref: heads/main\n"
//! │   ├── heads/main         ← "<64 hex>\n"
//! │   └── heads/main.lock    ← present only while an update is in flight
//! └── logs/
//!     ├── HEAD               ← JSON lines, oldest first
//!     └── heads%2Fmain
//! ```
//!
//! Reflog files are flat: `/` in the ref name is escaped so that a retained
//! log of a deleted ref can never block a later ref from using its name as a
//! directory.
//!
//! # Update protocol
//!
//! 1. Create `<name>.lock` exclusively. If it exists, fail with
//!    [`RefError::Locked`].
//! 2. Re-read the ref and compare with the expected value.
//! 3. Write the new value to a temporary file beside the ref, fsync it and
//!    rename it over the ref.
//! 4. Append the reflog entry.
//! 5. Remove the lock.
//!
//! Any failure before the rename in step 3 leaves both the ref and its reflog
//! untouched. A failed append in step 4 is reported, but the ref has already
//! moved.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use super::{
    DEFAULT_MAX_SYMBOLIC_DEPTH, RefError, RefLogMessage, RefName, RefStore, RefValue,
    ReflogEntry, RetentionPolicy, reflog_id,
};

const LOCK_SUFFIX: &str = ".lock";

/// Reference store rooted at a repository directory.
#[derive(Clone, Debug)]
pub struct FsRefStore {
    refs_dir: PathBuf,
    logs_dir: PathBuf,
    max_depth: usize,
}

impl FsRefStore {
    /// Open (creating if needed) `refs/` and `logs/` under `root`.
    ///
    /// # Errors
    /// Returns [`RefError::Io`] if the directories cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, RefError> {
        let root = root.as_ref();
        let refs_dir = root.join("refs");
        let logs_dir = root.join("logs");
        fs::create_dir_all(&refs_dir).map_err(|e| RefError::io(&refs_dir, e))?;
        fs::create_dir_all(&logs_dir).map_err(|e| RefError::io(&logs_dir, e))?;
        Ok(Self {
            refs_dir,
            logs_dir,
            max_depth: DEFAULT_MAX_SYMBOLIC_DEPTH,
        })
    }

    /// Override the symbolic-chain limit.
    #[must_use]
    pub const fn with_max_symbolic_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Path of the file holding `name`.
    #[must_use]
    pub fn ref_path(&self, name: &RefName) -> PathBuf {
        name.components()
            .fold(self.refs_dir.clone(), |path, part| path.join(part))
    }

    /// Path of the lock file guarding `name`.
    #[must_use]
    pub fn lock_path(&self, name: &RefName) -> PathBuf {
        let mut path = self.ref_path(name);
        let mut file = path.file_name().unwrap_or_default().to_os_string();
        file.push(LOCK_SUFFIX);
        path.set_file_name(file);
        path
    }

    /// Path of `name`'s reflog.
    #[must_use]
    pub fn log_path(&self, name: &RefName) -> PathBuf {
        let escaped = name.as_str().replace('%', "%25").replace('/', "%2F");
        self.logs_dir.join(escaped)
    }

    fn read_value(&self, name: &RefName) -> Result<Option<RefValue>, RefError> {
        let path = self.ref_path(name);
        if path.is_dir() {
            return Ok(None);
        }
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(None);
            }
            Err(e) => return Err(RefError::io(&path, e)),
        };
        RefValue::parse_text(&text)
            .map(Some)
            .ok_or_else(|| RefError::Corrupt {
                name: name.clone(),
                content: text.trim_end().to_owned(),
            })
    }

    /// Reject `name` if a ref exists at one of its parent paths, or if refs
    /// exist below it.
    fn check_directory_conflict(&self, name: &RefName) -> Result<(), RefError> {
        let components: Vec<&str> = name.components().collect();
        for depth in 1..components.len() {
            let prefix = components[..depth].join("/");
            let path = components[..depth]
                .iter()
                .fold(self.refs_dir.clone(), |p, c| p.join(c));
            if path.is_file() {
                return Err(RefError::DirectoryConflict {
                    name: name.clone(),
                    existing: RefName::new(&prefix)?,
                });
            }
        }

        let path = self.ref_path(name);
        if path.is_dir() {
            if let Some((existing, _)) = self.list(&format!("{name}/"))?.into_iter().next() {
                return Err(RefError::DirectoryConflict {
                    name: name.clone(),
                    existing,
                });
            }
            // Only empty directories or in-flight locks below; the former can go.
            if fs::remove_dir(&path).is_err() {
                return Err(RefError::Locked { name: name.clone() });
            }
        }
        Ok(())
    }

    fn lock(&self, name: &RefName) -> Result<LockFile, RefError> {
        let path = self.lock_path(name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| RefError::io(dir, e))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(LockFile { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(%name, "ref lock held elsewhere");
                Err(RefError::Locked { name: name.clone() })
            }
            Err(e) => Err(RefError::io(&path, e)),
        }
    }

    /// Atomically replace the file behind `name` with `value`.
    fn write_ref_file(&self, name: &RefName, value: &RefValue) -> Result<(), RefError> {
        let path = self.ref_path(name);
        let dir = path.parent().unwrap_or(&self.refs_dir);
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RefError::io(dir, e))?;
        writeln!(tmp, "{}", value.to_text()).map_err(|e| RefError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| RefError::io(tmp.path(), e))?;
        crate::fp!("FP_REF_BEFORE_RENAME")
            .map_err(|msg| RefError::io(&path, std::io::Error::other(msg)))?;
        tmp.persist(&path).map_err(|e| RefError::io(&path, e.error))?;
        Ok(())
    }

    fn append_reflog(&self, name: &RefName, entry: &ReflogEntry) -> Result<(), RefError> {
        let path = self.log_path(name);
        let mut line = serde_json::to_string(entry).map_err(|e| {
            RefError::io(&path, std::io::Error::new(ErrorKind::InvalidData, e))
        })?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RefError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RefError::io(&path, e))?;
        file.sync_all().map_err(|e| RefError::io(&path, e))
    }

    fn remove_empty_parents(&self, name: &RefName) {
        let mut dir = self.ref_path(name).parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.refs_dir || fs::remove_dir(&current).is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
    }

    fn collect(&self, dir: &Path, out: &mut Vec<RefName>) -> Result<(), RefError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RefError::io(dir, e)),
        };
        for entry in entries {
            let path = entry.map_err(|e| RefError::io(dir, e))?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.refs_dir) else {
                continue;
            };
            let joined = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            // Lock files and stray temporaries fail name validation.
            if let Ok(name) = RefName::new(&joined) {
                out.push(name);
            }
        }
        Ok(())
    }
}

impl RefStore for FsRefStore {
    fn read(&self, name: &RefName) -> Result<Option<RefValue>, RefError> {
        self.read_value(name)
    }

    #[instrument(level = "debug", skip_all, fields(%name, %new))]
    fn update(
        &self,
        name: &RefName,
        expected: Option<&RefValue>,
        new: &RefValue,
        message: &RefLogMessage,
    ) -> Result<(), RefError> {
        if expected.is_none() {
            self.check_directory_conflict(name)?;
        }
        let _lock = self.lock(name)?;

        let current = self.read_value(name)?;
        if current.as_ref() != expected {
            return Err(RefError::Conflict {
                name: name.clone(),
                expected: expected.cloned(),
                actual: current,
            });
        }

        let old_id = reflog_id(|n| self.read_value(n), current.as_ref(), self.max_depth);
        let new_id = reflog_id(|n| self.read_value(n), Some(new), self.max_depth);

        self.write_ref_file(name, new)?;
        self.append_reflog(name, &ReflogEntry::from_message(old_id, new_id, message))?;

        debug!(%name, old = %old_id.short(), new = %new_id.short(), "ref updated");
        Ok(())
    }

    fn delete(
        &self,
        name: &RefName,
        expected: &RefValue,
        message: &RefLogMessage,
    ) -> Result<(), RefError> {
        let lock = self.lock(name)?;
        let current = self.read_value(name)?;
        match current.as_ref() {
            None => return Err(RefError::NotFound { name: name.clone() }),
            Some(value) if value != expected => {
                return Err(RefError::Conflict {
                    name: name.clone(),
                    expected: Some(expected.clone()),
                    actual: current,
                });
            }
            Some(_) => {}
        }

        let old_id = reflog_id(|n| self.read_value(n), current.as_ref(), self.max_depth);
        let path = self.ref_path(name);
        fs::remove_file(&path).map_err(|e| RefError::io(&path, e))?;
        self.append_reflog(
            name,
            &ReflogEntry::from_message(old_id, grove_store::ObjectId::ZERO, message),
        )?;
        drop(lock);
        self.remove_empty_parents(name);

        debug!(%name, old = %old_id.short(), "ref deleted");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(RefName, RefValue)>, RefError> {
        let mut names = Vec::new();
        self.collect(&self.refs_dir, &mut names)?;
        names.retain(|n| n.as_str().starts_with(prefix));
        names.sort();

        let mut refs = Vec::with_capacity(names.len());
        for name in names {
            // A concurrent delete between listing and reading is not an error.
            if let Some(value) = self.read_value(&name)? {
                refs.push((name, value));
            }
        }
        Ok(refs)
    }

    fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
        read_log(name, &self.log_path(name))
    }

    fn reflog_names(&self) -> Result<Vec<RefName>, RefError> {
        let entries = fs::read_dir(&self.logs_dir).map_err(|e| RefError::io(&self.logs_dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RefError::io(&self.logs_dir, e))?;
            let Some(file) = entry.file_name().to_str().map(unescape_log_name) else {
                continue;
            };
            // Temp files from an interrupted prune are not valid names.
            if let Ok(name) = RefName::new(&file) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn prune_reflog(
        &self,
        name: &RefName,
        policy: &RetentionPolicy,
        now: i64,
    ) -> Result<usize, RefError> {
        let _lock = self.lock(name)?;
        let path = self.log_path(name);
        let entries = read_log(name, &path)?;
        let (kept, dropped) = policy.apply(entries, now);
        if dropped == 0 {
            return Ok(0);
        }

        let mut tmp = NamedTempFile::new_in(&self.logs_dir)
            .map_err(|e| RefError::io(&self.logs_dir, e))?;
        for entry in &kept {
            serde_json::to_writer(&mut tmp, entry)
                .map_err(|e| RefError::io(tmp.path(), std::io::Error::other(e)))?;
            tmp.write_all(b"\n").map_err(|e| RefError::io(tmp.path(), e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| RefError::io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| RefError::io(&path, e.error))?;

        debug!(%name, dropped, kept = kept.len(), "reflog pruned");
        Ok(dropped)
    }

    fn max_symbolic_depth(&self) -> usize {
        self.max_depth
    }
}

/// Inverse of the escaping in [`FsRefStore::log_path`].
fn unescape_log_name(file: &str) -> String {
    file.replace("%2F", "/").replace("%25", "%")
}

fn read_log(name: &RefName, path: &Path) -> Result<Vec<ReflogEntry>, RefError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RefError::io(path, e)),
    };
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| RefError::ReflogCorrupt {
                name: name.clone(),
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// LockFile
// ---------------------------------------------------------------------------

/// An exclusively created `<name>.lock`, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use grove_store::ObjectId;
    use tempfile::TempDir;

    use super::*;

    fn setup() -> (TempDir, FsRefStore) {
        let dir = TempDir::new().unwrap();
        let store = FsRefStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_bytes([b; 32])
    }

    fn msg(reason: &str) -> RefLogMessage {
        RefLogMessage::new("tester", 100, reason)
    }

    fn name(s: &str) -> RefName {
        RefName::new(s).unwrap()
    }

    #[test]
    fn create_read_and_log() {
        let (_dir, store) = setup();
        let main = name("heads/main");
        store
            .update(&main, None, &RefValue::Direct(oid(1)), &msg("create"))
            .unwrap();
        assert_eq!(store.read(&main).unwrap(), Some(RefValue::Direct(oid(1))));
        assert_eq!(
            fs::read_to_string(store.ref_path(&main)).unwrap(),
            format!("{}\n", oid(1))
        );
        let log = store.reflog(&main).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].old, ObjectId::ZERO);
        assert_eq!(log[0].new, oid(1));
        assert!(!store.lock_path(&main).exists());
    }

    #[test]
    fn stale_expected_is_conflict() {
        let (_dir, store) = setup();
        let main = name("heads/main");
        store
            .update(&main, None, &RefValue::Direct(oid(1)), &msg("create"))
            .unwrap();
        let err = store
            .update(&main, None, &RefValue::Direct(oid(2)), &msg("again"))
            .unwrap_err();
        assert!(matches!(err, RefError::Conflict { .. }));
        let err = store
            .update(
                &main,
                Some(&RefValue::Direct(oid(9))),
                &RefValue::Direct(oid(2)),
                &msg("stale"),
            )
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.read(&main).unwrap(), Some(RefValue::Direct(oid(1))));
        assert_eq!(store.reflog(&main).unwrap().len(), 1);
        assert!(!store.lock_path(&main).exists());
    }

    #[test]
    fn existing_lock_fails_fast() {
        let (_dir, store) = setup();
        let main = name("heads/main");
        fs::create_dir_all(store.lock_path(&main).parent().unwrap()).unwrap();
        fs::write(store.lock_path(&main), b"").unwrap();
        let err = store
            .update(&main, None, &RefValue::Direct(oid(1)), &msg("create"))
            .unwrap_err();
        assert!(matches!(err, RefError::Locked { .. }));
        // The foreign lock is not ours to remove.
        assert!(store.lock_path(&main).exists());
    }

    #[test]
    fn failed_ref_write_leaves_reflog_untouched() {
        let (_dir, store) = setup();
        let main = name("heads/main");
        store
            .update(&main, None, &RefValue::Direct(oid(1)), &msg("create"))
            .unwrap();

        crate::failpoints::set("FP_REF_BEFORE_RENAME", "disk full");
        let err = store
            .update(
                &main,
                Some(&RefValue::Direct(oid(1))),
                &RefValue::Direct(oid(2)),
                &msg("move"),
            )
            .unwrap_err();
        crate::failpoints::clear("FP_REF_BEFORE_RENAME");

        assert!(matches!(err, RefError::Io { .. }), "{err}");
        assert_eq!(store.read(&main).unwrap(), Some(RefValue::Direct(oid(1))));
        assert_eq!(store.reflog(&main).unwrap().len(), 1);
        assert!(!store.lock_path(&main).exists());
        let leftovers: Vec<_> = fs::read_dir(store.ref_path(&main).parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["main".to_owned()]);

        store
            .update(
                &main,
                Some(&RefValue::Direct(oid(1))),
                &RefValue::Direct(oid(2)),
                &msg("move"),
            )
            .unwrap();
        let log = store.reflog(&main).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!((log[1].old, log[1].new), (oid(1), oid(2)));
    }

    #[test]
    fn symbolic_head_resolves_and_logs_resolved_ids() {
        let (_dir, store) = setup();
        let main = name("heads/main");
        store
            .update(&main, None, &RefValue::Direct(oid(1)), &msg("create"))
            .unwrap();
        store
            .update(
                &RefName::head(),
                None,
                &RefValue::Symbolic(main.clone()),
                &msg("init"),
            )
            .unwrap();
        assert_eq!(store.resolve(&RefName::head()).unwrap(), Some(oid(1)));
        assert_eq!(store.resolve_target(&RefName::head()).unwrap(), main);
        assert_eq!(store.reflog(&RefName::head()).unwrap()[0].new, oid(1));
    }

    #[test]
    fn symbolic_cycle_is_detected() {
        let (_dir, store) = setup();
        let a = name("heads/a");
        let b = name("heads/b");
        store
            .update(&a, None, &RefValue::Symbolic(b.clone()), &msg("a"))
            .unwrap();
        store
            .update(&b, None, &RefValue::Symbolic(a.clone()), &msg("b"))
            .unwrap();
        assert!(matches!(
            store.resolve(&a),
            Err(RefError::SymbolicCycle { .. })
        ));
    }

    #[test]
    fn directory_conflicts_are_rejected() {
        let (_dir, store) = setup();
        store
            .update(&name("heads/a"), None, &RefValue::Direct(oid(1)), &msg("a"))
            .unwrap();
        let err = store
            .update(&name("heads/a/b"), None, &RefValue::Direct(oid(1)), &msg("ab"))
            .unwrap_err();
        assert!(matches!(err, RefError::DirectoryConflict { existing, .. } if existing.as_str() == "heads/a"));

        store
            .update(&name("heads/x/y"), None, &RefValue::Direct(oid(1)), &msg("xy"))
            .unwrap();
        let err = store
            .update(&name("heads/x"), None, &RefValue::Direct(oid(1)), &msg("x"))
            .unwrap_err();
        assert!(matches!(err, RefError::DirectoryConflict { .. }));
    }

    #[test]
    fn delete_keeps_reflog_and_frees_the_name() {
        let (_dir, store) = setup();
        let a = name("heads/a");
        store
            .update(&a, None, &RefValue::Direct(oid(1)), &msg("create"))
            .unwrap();
        store
            .delete(&a, &RefValue::Direct(oid(1)), &msg("delete"))
            .unwrap();
        assert_eq!(store.read(&a).unwrap(), None);
        let log = store.reflog(&a).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].new, ObjectId::ZERO);

        // The name can now be used as a directory.
        store
            .update(&name("heads/a/b"), None, &RefValue::Direct(oid(2)), &msg("ab"))
            .unwrap();
    }

    #[test]
    fn delete_with_stale_expected_is_conflict() {
        let (_dir, store) = setup();
        let a = name("heads/a");
        store
            .update(&a, None, &RefValue::Direct(oid(1)), &msg("create"))
            .unwrap();
        let err = store
            .delete(&a, &RefValue::Direct(oid(2)), &msg("delete"))
            .unwrap_err();
        assert!(matches!(err, RefError::Conflict { .. }));
        assert!(matches!(
            store.delete(&name("heads/none"), &RefValue::Direct(oid(2)), &msg("x")),
            Err(RefError::NotFound { .. })
        ));
    }

    #[test]
    fn list_is_sorted_and_filtered() {
        let (_dir, store) = setup();
        for n in ["tags/v1", "heads/z", "heads/a", "heads/m/n"] {
            store
                .update(&name(n), None, &RefValue::Direct(oid(1)), &msg("c"))
                .unwrap();
        }
        fs::write(store.refs_dir.join("heads").join("q.lock"), b"").unwrap();
        let names: Vec<String> = store
            .list("heads/")
            .unwrap()
            .into_iter()
            .map(|(n, _)| n.to_string())
            .collect();
        assert_eq!(names, ["heads/a", "heads/m/n", "heads/z"]);
        assert_eq!(store.list("").unwrap().len(), 4);
    }

    #[test]
    fn corrupt_ref_file_is_reported() {
        let (_dir, store) = setup();
        let a = name("heads/a");
        fs::create_dir_all(store.refs_dir.join("heads")).unwrap();
        fs::write(store.ref_path(&a), b"not a value\n").unwrap();
        assert!(matches!(store.read(&a), Err(RefError::Corrupt { .. })));
    }

    #[test]
    fn prune_rewrites_log() {
        let (_dir, store) = setup();
        let a = name("heads/a");
        let mut prev = None;
        for i in 1..=5u8 {
            let value = RefValue::Direct(oid(i));
            store
                .update(&a, prev.as_ref(), &value, &RefLogMessage::new("t", i64::from(i), "step"))
                .unwrap();
            prev = Some(value);
        }
        let policy = RetentionPolicy {
            max_entries: Some(2),
            max_age_secs: None,
        };
        assert_eq!(store.prune_reflog(&a, &policy, 10).unwrap(), 3);
        let log = store.reflog(&a).unwrap();
        assert_eq!(log.iter().map(|e| e.timestamp).collect::<Vec<_>>(), [4, 5]);
        assert_eq!(store.prune_reflog(&a, &policy, 10).unwrap(), 0);
    }

    #[test]
    fn corrupt_reflog_line_is_reported() {
        let (_dir, store) = setup();
        let a = name("heads/a");
        fs::write(store.log_path(&a), b"{not json}\n").unwrap();
        assert!(matches!(
            store.reflog(&a),
            Err(RefError::ReflogCorrupt { line: 1, .. })
        ));
    }
}
