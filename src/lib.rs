//! mailshake — moves email messages from taps to sinks.
//!
//! A [`engine::MailShaker`] drains every configured [`tap::Tap`]
//! (folder of message files, POP3 mailbox), offers each selected
//! message to every configured [`sink::Sink`] (folder, IMAP, SMTP
//! forward), and deletes the source copy once at least one sink has
//! accepted it. Credentials are configured as references and resolved
//! lazily; see [`secret`].

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod net;
pub mod observer;
pub mod secret;
pub mod sink;
pub mod tap;

pub use engine::{MailShaker, ShakeSummary};
pub use error::{Error, Result};
