//! Folder tap — enumerates message files in a directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::TapError;
use crate::message::MailMessage;
use crate::tap::{FixedTag, MessageHandle, MessageItem, SelectPolicy, Tap};

/// A tap over a directory of message files.
///
/// The file list is snapshotted at `start()`; files appearing later are
/// not observed by the current run. A file that fails to decode is
/// reported and skipped, never aborting the enumeration.
pub struct FolderTap {
    name: String,
    path: PathBuf,
    recursive: bool,
    try_latin1: bool,
    do_move: bool,
    policy: Arc<dyn SelectPolicy>,
    files: Vec<PathBuf>,
}

impl FolderTap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: "folder tap".to_string(),
            path: path.into(),
            recursive: false,
            try_latin1: false,
            do_move: false,
            policy: Arc::new(FixedTag("Default".to_string())),
            files: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Descend into subdirectories at snapshot time.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Retry undecodable files as Latin-1.
    pub fn with_try_latin1(mut self, try_latin1: bool) -> Self {
        self.try_latin1 = try_latin1;
        self
    }

    /// Delete files whose message was accepted by at least one sink.
    pub fn with_move(mut self, do_move: bool) -> Self {
        self.do_move = do_move;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn SelectPolicy>) -> Self {
        self.policy = policy;
        self
    }

    fn snapshot(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_files(&self.path, self.recursive, &mut files)?;
        files.sort();
        Ok(files)
    }
}

fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_files(&path, true, out)?;
            }
        } else {
            out.push(path);
        }
    }
    Ok(())
}

impl Tap for FolderTap {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_move(&self) -> bool {
        self.do_move
    }

    fn start(&mut self) -> Result<(), TapError> {
        self.files = self.snapshot().map_err(|e| TapError::StartupFailed {
            name: self.name.clone(),
            reason: format!("cannot list {}: {e}", self.path.display()),
        })?;
        tracing::info!(
            tap = %self.name,
            files = self.files.len(),
            path = %self.path.display(),
            "folder tap started"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), TapError> {
        self.files.clear();
        Ok(())
    }

    fn policy(&self) -> Arc<dyn SelectPolicy> {
        Arc::clone(&self.policy)
    }

    fn all_messages(&mut self) -> Box<dyn Iterator<Item = MessageItem> + '_> {
        let try_latin1 = self.try_latin1;
        let files = self.files.clone();
        Box::new(files.into_iter().map(move |path| {
            let bytes = std::fs::read(&path).map_err(|e| TapError::Decode {
                path: path.clone(),
                reason: format!("read failed: {e}"),
            })?;
            let msg =
                MailMessage::decode(bytes, try_latin1).map_err(|e| TapError::Decode {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            Ok((MessageHandle::Path(path), msg))
        }))
    }

    fn delete(&mut self, handle: &MessageHandle) -> Result<(), TapError> {
        match handle {
            MessageHandle::Path(path) => {
                tracing::info!(tap = %self.name, path = %path.display(), "removing file");
                std::fs::remove_file(path).map_err(|source| TapError::Delete {
                    handle: handle.to_string(),
                    source,
                })
            }
            MessageHandle::Ordinal(_) => Err(TapError::ForeignHandle {
                name: self.name.clone(),
                handle: handle.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::tap::SelectedItem;

    fn write_message(dir: &Path, name: &str, subject: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(
            &path,
            format!("Subject: {subject}\r\nMessage-ID: <{name}@test>\r\n\r\nbody\r\n"),
        )
        .unwrap();
        path
    }

    #[test]
    fn enumerates_snapshot_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_message(dir.path(), "a.eml", "first");
        write_message(dir.path(), "b.eml", "second");

        let mut tap = FolderTap::new(dir.path());
        tap.start().unwrap();

        let subjects: Vec<String> = tap
            .all_messages()
            .map(|item| item.unwrap().1.header("Subject").unwrap())
            .collect();
        assert_eq!(subjects, vec!["first", "second"]);
    }

    #[test]
    fn snapshot_ignores_files_added_after_start() {
        let dir = tempfile::tempdir().unwrap();
        write_message(dir.path(), "a.eml", "first");

        let mut tap = FolderTap::new(dir.path());
        tap.start().unwrap();
        write_message(dir.path(), "b.eml", "late");

        assert_eq!(tap.all_messages().count(), 1);
    }

    #[test]
    fn decode_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..9 {
            write_message(dir.path(), &format!("{i}.eml"), &format!("msg {i}"));
        }
        fs::write(dir.path().join("bad.eml"), [0x42, 0xFF, 0xFE, 0x00]).unwrap();

        let mut tap = FolderTap::new(dir.path());
        tap.start().unwrap();

        let items: Vec<SelectedItem> = tap.selected_messages().collect();
        let ok = items.iter().filter(|i| i.is_ok()).count();
        let failed = items.iter().filter(|i| i.is_err()).count();
        assert_eq!(ok, 9);
        assert_eq!(failed, 1);
    }

    #[test]
    fn latin1_fallback_rescues_legacy_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"Subject: caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"\r\n\r\nbody\r\n");
        fs::write(dir.path().join("legacy.eml"), &bytes).unwrap();

        let mut strict = FolderTap::new(dir.path());
        strict.start().unwrap();
        assert!(strict.all_messages().next().unwrap().is_err());

        let mut lenient = FolderTap::new(dir.path()).with_try_latin1(true);
        lenient.start().unwrap();
        assert!(lenient.all_messages().next().unwrap().is_ok());
    }

    #[test]
    fn recursive_scan_descends() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("2025");
        fs::create_dir(&sub).unwrap();
        write_message(dir.path(), "top.eml", "top");
        write_message(&sub, "nested.eml", "nested");

        let mut flat = FolderTap::new(dir.path());
        flat.start().unwrap();
        assert_eq!(flat.all_messages().count(), 1);

        let mut deep = FolderTap::new(dir.path()).with_recursive(true);
        deep.start().unwrap();
        assert_eq!(deep.all_messages().count(), 2);
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_message(dir.path(), "a.eml", "bye");

        let mut tap = FolderTap::new(dir.path());
        tap.start().unwrap();
        tap.delete(&MessageHandle::Path(path.clone())).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn delete_rejects_foreign_handles() {
        let dir = tempfile::tempdir().unwrap();
        let mut tap = FolderTap::new(dir.path());
        tap.start().unwrap();
        assert!(matches!(
            tap.delete(&MessageHandle::Ordinal(1)).unwrap_err(),
            TapError::ForeignHandle { .. }
        ));
    }

    #[test]
    fn custom_policy_discards_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        write_message(dir.path(), "a.eml", "invoice #9");
        write_message(dir.path(), "b.eml", "newsletter");

        let policy = |msg: &MailMessage| {
            msg.header("Subject")
                .filter(|s| s.contains("invoice"))
                .map(|_| "Billing".to_string())
        };
        let mut tap = FolderTap::new(dir.path()).with_policy(Arc::new(policy));
        tap.start().unwrap();

        let selected: Vec<_> = tap
            .selected_messages()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "Billing");
    }
}
