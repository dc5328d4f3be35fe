//! Sinks — destinations that accept or decline messages.

use crate::error::SinkError;
use crate::message::MailMessage;

pub mod folder;
pub mod imap;
pub mod smtp;

pub use folder::FolderSink;
pub use imap::ImapSink;
pub use smtp::SmtpSink;

/// A message destination.
///
/// `store` returns whether the sink accepted the message; the engine
/// ORs the answers of all sinks to decide whether the source copy may
/// be deleted.
pub trait Sink {
    fn name(&self) -> &str;

    /// Acquire resources (connect, authenticate, scan output).
    fn start(&mut self) -> Result<(), SinkError>;

    /// Release resources; must be called even after mid-run errors.
    fn close(&mut self) -> Result<(), SinkError>;

    /// Offer a tagged message; `Ok(true)` means accepted and stored.
    fn store(&mut self, tag: &str, msg: &MailMessage) -> Result<bool, SinkError>;
}
