//! Taps — sources of candidate messages.
//!
//! A tap enumerates messages lazily (single pass, not restartable),
//! attaches a tag to each one via its selection policy, and can delete
//! a message by the handle it handed out. Handles are tap-scoped and
//! only valid for the lifetime of the enumeration that produced them.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::TapError;
use crate::message::MailMessage;

pub mod folder;
pub mod pop3;

pub use folder::FolderTap;
pub use pop3::Pop3Tap;

/// Opaque, tap-scoped message identifier.
///
/// Only ever handed back to the tap that produced it; never compared
/// across taps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageHandle {
    /// The file backing a folder-tap message.
    Path(PathBuf),
    /// A session-scoped sequence number (POP3); invalid after `close()`.
    Ordinal(u32),
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Ordinal(n) => write!(f, "#{n}"),
        }
    }
}

/// Selection policy: decides whether a message is routed and under
/// which tag. Returning `None` discards the message.
pub trait SelectPolicy: Send + Sync {
    fn select_and_tag(&self, msg: &MailMessage) -> Option<String>;
}

impl<F> SelectPolicy for F
where
    F: Fn(&MailMessage) -> Option<String> + Send + Sync,
{
    fn select_and_tag(&self, msg: &MailMessage) -> Option<String> {
        self(msg)
    }
}

/// Tags every message identically — the default policy; real
/// deployments usually inject something header-aware instead.
pub struct FixedTag(pub String);

impl SelectPolicy for FixedTag {
    fn select_and_tag(&self, _msg: &MailMessage) -> Option<String> {
        Some(self.0.clone())
    }
}

/// One enumerated message, or a per-item failure the caller is expected
/// to report and skip.
pub type MessageItem = Result<(MessageHandle, MailMessage), TapError>;

/// One selected-and-tagged message.
pub type SelectedItem = Result<(String, MessageHandle, MailMessage), TapError>;

/// A source of messages.
pub trait Tap {
    fn name(&self) -> &str;

    /// Whether messages accepted by a sink should be deleted here.
    fn do_move(&self) -> bool;

    /// Acquire resources (connect, authenticate, snapshot a directory).
    fn start(&mut self) -> Result<(), TapError>;

    /// Release resources; must be called even after mid-run errors.
    fn close(&mut self) -> Result<(), TapError>;

    /// The tap's selection policy.
    fn policy(&self) -> Arc<dyn SelectPolicy>;

    /// Tag `msg`, or `None` to discard it.
    fn select_and_tag(&self, msg: &MailMessage) -> Option<String> {
        self.policy().select_and_tag(msg)
    }

    /// Lazy, single-pass enumeration of every message in the tap.
    fn all_messages(&mut self) -> Box<dyn Iterator<Item = MessageItem> + '_>;

    /// Lazy enumeration of the selected-and-tagged messages.
    ///
    /// Implementations may override this for transport-side filtering,
    /// as long as the observable (tag, handle, message) triples and
    /// their order stay the same.
    fn selected_messages(&mut self) -> Box<dyn Iterator<Item = SelectedItem> + '_> {
        let policy = self.policy();
        let name = self.name().to_string();
        Box::new(self.all_messages().filter_map(move |item| match item {
            Ok((handle, msg)) => match policy.select_and_tag(&msg) {
                Some(tag) => {
                    tracing::info!(tap = %name, %handle, %tag, "selecting message");
                    Some(Ok((tag, handle, msg)))
                }
                None => {
                    tracing::info!(tap = %name, %handle, "ignoring message");
                    None
                }
            },
            Err(e) => Some(Err(e)),
        }))
    }

    /// Delete the message behind `handle` from this tap.
    fn delete(&mut self, handle: &MessageHandle) -> Result<(), TapError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(subject: &str) -> MailMessage {
        let raw = format!("Subject: {subject}\r\n\r\nbody\r\n");
        MailMessage::from_bytes(raw.into_bytes()).unwrap()
    }

    #[test]
    fn fixed_tag_selects_everything() {
        let policy = FixedTag("Archive".into());
        let msg = sample_message("anything");
        assert_eq!(policy.select_and_tag(&msg).as_deref(), Some("Archive"));
    }

    #[test]
    fn closure_policy_can_discard() {
        let policy = |msg: &MailMessage| {
            msg.header("Subject")
                .filter(|s| s.contains("invoice"))
                .map(|_| "Billing".to_string())
        };
        assert_eq!(
            policy.select_and_tag(&sample_message("invoice #42")).as_deref(),
            Some("Billing")
        );
        assert_eq!(policy.select_and_tag(&sample_message("newsletter")), None);
    }

    #[test]
    fn handle_display_forms() {
        assert_eq!(MessageHandle::Ordinal(7).to_string(), "#7");
        assert_eq!(
            MessageHandle::Path(PathBuf::from("/mail/1.eml")).to_string(),
            "/mail/1.eml"
        );
    }
}
