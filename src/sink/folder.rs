//! Folder sink — writes messages as sequentially numbered files.

use std::path::PathBuf;

use crate::error::SinkError;
use crate::message::MailMessage;
use crate::sink::Sink;

/// Stores each message as `<n>.<extension>` in a target directory.
///
/// At `start()` the directory is scanned for existing numeric names and
/// numbering resumes above the current maximum, so successive runs
/// never overwrite earlier output. What `store` reports is a policy
/// knob: a local archive copy may or may not count as "stored" for
/// purposes of deleting the source message.
pub struct FolderSink {
    name: String,
    path: PathBuf,
    extension: String,
    report_stored: bool,
    next_file_no: u32,
}

impl FolderSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("folder sink {}", path.display()),
            path,
            extension: "eml".to_string(),
            report_stored: true,
            next_file_no: 1,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Whether `store` reports acceptance.
    pub fn with_report_stored(mut self, report_stored: bool) -> Self {
        self.report_stored = report_stored;
        self
    }
}

/// The numeric prefix of a filename like `17.eml`, if any.
fn numeric_stem(file_name: &str) -> Option<u32> {
    let stem = file_name.split_once('.').map_or(file_name, |(s, _)| s);
    stem.parse().ok()
}

impl Sink for FolderSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.path).map_err(|e| SinkError::StartupFailed {
            name: self.name.clone(),
            reason: format!("cannot create {}: {e}", self.path.display()),
        })?;

        let mut max_seen = 0;
        for entry in std::fs::read_dir(&self.path).map_err(|e| SinkError::StartupFailed {
            name: self.name.clone(),
            reason: format!("cannot list {}: {e}", self.path.display()),
        })? {
            let entry = entry?;
            if let Some(n) = entry.file_name().to_str().and_then(numeric_stem) {
                max_seen = max_seen.max(n);
            }
        }
        self.next_file_no = max_seen + 1;
        tracing::info!(
            sink = %self.name,
            next = self.next_file_no,
            "folder sink started"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn store(&mut self, _tag: &str, msg: &MailMessage) -> Result<bool, SinkError> {
        let path = self
            .path
            .join(format!("{}.{}", self.next_file_no, self.extension));
        std::fs::write(&path, msg.as_bytes())?;
        self.next_file_no += 1;
        tracing::debug!(sink = %self.name, path = %path.display(), "message written");
        Ok(self.report_stored)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn sample() -> MailMessage {
        MailMessage::from_bytes(b"Subject: s\r\n\r\nbody\r\n".to_vec()).unwrap()
    }

    #[test]
    fn numbering_starts_at_one_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(dir.path());
        sink.start().unwrap();

        assert!(sink.store("Default", &sample()).unwrap());
        assert!(dir.path().join("1.eml").exists());
    }

    #[test]
    fn numbering_resumes_above_existing_maximum() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("3.eml"), "x").unwrap();
        fs::write(dir.path().join("7.eml"), "x").unwrap();

        let mut sink = FolderSink::new(dir.path());
        sink.start().unwrap();
        sink.store("Default", &sample()).unwrap();

        assert!(dir.path().join("8.eml").exists());
    }

    #[test]
    fn non_numeric_names_are_ignored_when_resuming() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("2.eml"), "x").unwrap();

        let mut sink = FolderSink::new(dir.path());
        sink.start().unwrap();
        sink.store("Default", &sample()).unwrap();

        assert!(dir.path().join("3.eml").exists());
    }

    #[test]
    fn consecutive_stores_increment() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(dir.path());
        sink.start().unwrap();
        sink.store("a", &sample()).unwrap();
        sink.store("b", &sample()).unwrap();

        assert!(dir.path().join("1.eml").exists());
        assert!(dir.path().join("2.eml").exists());
    }

    #[test]
    fn report_stored_false_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(dir.path()).with_report_stored(false);
        sink.start().unwrap();

        assert!(!sink.store("Default", &sample()).unwrap());
        assert!(dir.path().join("1.eml").exists());
    }

    #[test]
    fn custom_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(dir.path()).with_extension("msg");
        sink.start().unwrap();
        sink.store("Default", &sample()).unwrap();
        assert!(dir.path().join("1.msg").exists());
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out/sub");
        let mut sink = FolderSink::new(&nested);
        sink.start().unwrap();
        sink.store("Default", &sample()).unwrap();
        assert!(nested.join("1.eml").exists());
    }

    #[test]
    fn numeric_stem_parsing() {
        assert_eq!(numeric_stem("17.eml"), Some(17));
        assert_eq!(numeric_stem("17"), Some(17));
        assert_eq!(numeric_stem("17.backup.eml"), Some(17));
        assert_eq!(numeric_stem("notes.txt"), None);
        assert_eq!(numeric_stem(".hidden"), None);
    }
}
