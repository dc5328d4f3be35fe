//! POP3 tap — drains a remote maildrop over TLS.

use std::sync::Arc;

use crate::auth::UserPass;
use crate::config::Locator;
use crate::error::TapError;
use crate::message::MailMessage;
use crate::net::Pop3Session;
use crate::tap::{FixedTag, MessageHandle, MessageItem, SelectPolicy, Tap};

/// Standard POP3-over-TLS port.
const POP3S_PORT: u16 = 995;

/// A tap over a remote POP3 mailbox.
///
/// Connects and authenticates at `start()`. Enumeration walks the
/// sequence numbers 1..=count, with the count captured once when the
/// iteration begins; a mid-run change on the server is not observed.
/// Handles are session-scoped ordinals and invalid after `close()`.
pub struct Pop3Tap {
    name: String,
    url: Locator,
    credential: UserPass,
    do_move: bool,
    policy: Arc<dyn SelectPolicy>,
    session: Option<Pop3Session>,
}

impl Pop3Tap {
    pub fn new(url: Locator, credential: UserPass) -> Self {
        Self {
            name: format!("pop3 tap {}", url.host),
            url,
            credential,
            do_move: false,
            policy: Arc::new(FixedTag("Default".to_string())),
            session: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Delete messages accepted by at least one sink.
    pub fn with_move(mut self, do_move: bool) -> Self {
        self.do_move = do_move;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn SelectPolicy>) -> Self {
        self.policy = policy;
        self
    }

    fn session(&mut self) -> Result<&mut Pop3Session, TapError> {
        self.session.as_mut().ok_or_else(|| TapError::NotStarted {
            name: self.name.clone(),
        })
    }
}

impl Tap for Pop3Tap {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_move(&self) -> bool {
        self.do_move
    }

    fn start(&mut self) -> Result<(), TapError> {
        if self.url.scheme != "pop3+ssl" {
            return Err(TapError::StartupFailed {
                name: self.name.clone(),
                reason: format!("unsupported scheme {:?}", self.url.scheme),
            });
        }
        let port = self.url.port_or(POP3S_PORT);
        tracing::info!(tap = %self.name, host = %self.url.host, port, "connecting");
        let mut session = Pop3Session::connect(&self.url.host, port)?;
        self.credential.login(&mut session)?;
        self.session = Some(session);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TapError> {
        if let Some(mut session) = self.session.take() {
            session.quit()?;
        }
        Ok(())
    }

    fn policy(&self) -> Arc<dyn SelectPolicy> {
        Arc::clone(&self.policy)
    }

    fn all_messages(&mut self) -> Box<dyn Iterator<Item = MessageItem> + '_> {
        let name = self.name.clone();
        let session = match self.session() {
            Ok(session) => session,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        let count = match session.message_count() {
            Ok(count) => count,
            Err(e) => {
                return Box::new(std::iter::once(Err(TapError::Net(e))));
            }
        };
        tracing::info!(tap = %name, count, "enumerating maildrop");
        Box::new(Pop3Messages {
            session,
            next: 1,
            count,
        })
    }

    fn delete(&mut self, handle: &MessageHandle) -> Result<(), TapError> {
        match handle {
            MessageHandle::Ordinal(ordinal) => {
                tracing::info!(tap = %self.name, ordinal, "marking message deleted");
                self.session()?.delete(*ordinal)?;
                Ok(())
            }
            MessageHandle::Path(_) => Err(TapError::ForeignHandle {
                name: self.name.clone(),
                handle: handle.to_string(),
            }),
        }
    }
}

/// Single-pass walk of sequence numbers 1..=count.
struct Pop3Messages<'a> {
    session: &'a mut Pop3Session,
    next: u32,
    count: u32,
}

impl Iterator for Pop3Messages<'_> {
    type Item = MessageItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.count {
            return None;
        }
        let ordinal = self.next;
        self.next += 1;

        let item = self
            .session
            .retrieve(ordinal)
            .map_err(|e| TapError::Retrieve {
                ordinal,
                reason: e.to_string(),
            })
            .and_then(|raw| {
                MailMessage::from_bytes(raw).map_err(|e| TapError::Retrieve {
                    ordinal,
                    reason: e.to_string(),
                })
            })
            .map(|msg| (MessageHandle::Ordinal(ordinal), msg));
        Some(item)
    }
}
