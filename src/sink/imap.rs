//! IMAP sink — files messages into remote folders chosen by tag.

use std::collections::HashMap;

use crate::auth::UserPass;
use crate::config::Locator;
use crate::error::{NetError, SinkError};
use crate::message::MailMessage;
use crate::net::ImapSession;
use crate::sink::Sink;

/// Standard IMAP-over-TLS port.
const IMAPS_PORT: u16 = 993;

/// Internal-date format expected by `APPEND`, per RFC 3501.
const INTERNAL_DATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// The slice of an IMAP session the sink drives. Keeping the sink
/// behind this seam lets tests exercise the folder, dedup and append
/// logic without a live connection.
trait MailboxSession {
    fn select(&mut self, mailbox: &str) -> Result<bool, NetError>;
    fn create(&mut self, mailbox: &str) -> Result<bool, NetError>;
    fn search_header(&mut self, header: &str, value: &str) -> Result<Vec<u32>, NetError>;
    fn append(&mut self, mailbox: &str, internal_date: &str, body: &[u8])
    -> Result<(), NetError>;
    fn logout(&mut self) -> Result<(), NetError>;
}

impl MailboxSession for ImapSession {
    fn select(&mut self, mailbox: &str) -> Result<bool, NetError> {
        ImapSession::select(self, mailbox)
    }

    fn create(&mut self, mailbox: &str) -> Result<bool, NetError> {
        ImapSession::create(self, mailbox)
    }

    fn search_header(&mut self, header: &str, value: &str) -> Result<Vec<u32>, NetError> {
        ImapSession::search_header(self, header, value)
    }

    fn append(
        &mut self,
        mailbox: &str,
        internal_date: &str,
        body: &[u8],
    ) -> Result<(), NetError> {
        ImapSession::append(self, mailbox, internal_date, body)
    }

    fn logout(&mut self) -> Result<(), NetError> {
        ImapSession::logout(self)
    }
}

/// Stores messages in an IMAP account, one folder per tag.
///
/// The tag-to-folder map defaults to identity: a message tagged
/// `Billing` lands in the `Billing` mailbox unless remapped. Missing
/// folders are created when `auto_create_folders` is on; otherwise the
/// message is declined. With deduplication on, a message whose
/// Message-ID is already present in the target folder is not appended
/// again; whether that counts as "stored" (and thus may trigger a
/// source delete) is governed by `dupes_reported_as_stored`.
pub struct ImapSink {
    name: String,
    url: Locator,
    credential: UserPass,
    auto_create_folders: bool,
    deduplicate: bool,
    dupes_reported_as_stored: bool,
    folder_map: HashMap<String, String>,
    session: Option<Box<dyn MailboxSession>>,
}

impl ImapSink {
    pub fn new(url: Locator, credential: UserPass) -> Self {
        Self {
            name: format!("imap sink {}", url.host),
            url,
            credential,
            auto_create_folders: true,
            deduplicate: true,
            dupes_reported_as_stored: false,
            folder_map: HashMap::new(),
            session: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_auto_create_folders(mut self, auto_create: bool) -> Self {
        self.auto_create_folders = auto_create;
        self
    }

    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Whether a skipped duplicate counts as stored.
    pub fn with_dupes_reported_as_stored(mut self, reported: bool) -> Self {
        self.dupes_reported_as_stored = reported;
        self
    }

    /// Route tag `tag` into mailbox `folder` instead of a mailbox of
    /// the same name.
    pub fn with_folder_for_tag(
        mut self,
        tag: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        self.folder_map.insert(tag.into(), folder.into());
        self
    }

    pub fn with_folder_map(mut self, folder_map: HashMap<String, String>) -> Self {
        self.folder_map = folder_map;
        self
    }

    #[cfg(test)]
    fn with_session(mut self, session: Box<dyn MailboxSession>) -> Self {
        self.session = Some(session);
        self
    }

    fn folder_for(&self, tag: &str) -> String {
        self.folder_map
            .get(tag)
            .cloned()
            .unwrap_or_else(|| tag.to_string())
    }

    fn session(&mut self) -> Result<&mut dyn MailboxSession, SinkError> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(SinkError::NotStarted {
                name: self.name.clone(),
            }),
        }
    }

    /// Select `folder`, creating it first if allowed. `Ok(false)` means
    /// the folder is unavailable and the message must be declined.
    fn ensure_folder(&mut self, folder: &str) -> Result<bool, SinkError> {
        let auto_create = self.auto_create_folders;
        let name = self.name.clone();
        let session = self.session()?;

        if session.select(folder)? {
            return Ok(true);
        }
        if !auto_create {
            tracing::warn!(sink = %name, folder, "folder missing and auto-create is off");
            return Ok(false);
        }
        tracing::info!(sink = %name, folder, "creating folder");
        if !session.create(folder)? {
            tracing::warn!(sink = %name, folder, "folder creation refused");
            return Ok(false);
        }
        Ok(session.select(folder)?)
    }

    /// Whether the selected folder already holds `message_id`.
    fn is_duplicate(&mut self, message_id: &str) -> Result<bool, SinkError> {
        let hits = self.session()?.search_header("Message-ID", message_id)?;
        Ok(!hits.is_empty())
    }
}

impl Sink for ImapSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), SinkError> {
        if self.url.scheme != "imap4+ssl" {
            return Err(SinkError::StartupFailed {
                name: self.name.clone(),
                reason: format!("unsupported scheme {:?}", self.url.scheme),
            });
        }
        let port = self.url.port_or(IMAPS_PORT);
        tracing::info!(sink = %self.name, host = %self.url.host, port, "connecting");
        let mut session = ImapSession::connect(&self.url.host, port)?;
        self.credential.login(&mut session)?;
        self.session = Some(Box::new(session));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut session) = self.session.take() {
            session.logout()?;
        }
        Ok(())
    }

    fn store(&mut self, tag: &str, msg: &MailMessage) -> Result<bool, SinkError> {
        self.session()?;
        let folder = self.folder_for(tag);

        if !self.ensure_folder(&folder)? {
            return Ok(false);
        }

        if self.deduplicate {
            match msg.message_id() {
                // Legitimate mail carries a Message-ID; store the rest
                // unconditionally and let a downstream filter judge it.
                None => {
                    tracing::warn!(sink = %self.name, "message without Message-ID, not deduplicating")
                }
                Some(id) => match self.is_duplicate(&id) {
                    Ok(true) => {
                        tracing::info!(
                            sink = %self.name, folder, message_id = %id,
                            "duplicate, skipping append"
                        );
                        return Ok(self.dupes_reported_as_stored);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(sink = %self.name, error = %e, "duplicate lookup failed");
                        return Ok(false);
                    }
                },
            }
        }

        let internal_date = chrono::Local::now().format(INTERNAL_DATE_FORMAT).to_string();
        let name = self.name.clone();
        match self.session()?.append(&folder, &internal_date, msg.as_bytes()) {
            Ok(()) => {
                tracing::info!(sink = %name, folder, "message appended");
                Ok(true)
            }
            Err(NetError::CommandRejected { command, response }) => {
                tracing::warn!(sink = %name, folder, %command, %response, "append rejected");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
