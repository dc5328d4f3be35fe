//! Configuration types.
//!
//! A run is described by a [`ShakeConfig`]: a name, a list of taps and
//! a list of sinks, each with its connection locator, credential
//! reference and policy flags. Loaded from a JSON file; secrets appear
//! only as references (see [`crate::secret`]), never as mandatory
//! plaintext.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// A connection locator: scheme, host and optional port.
///
/// `pop3+ssl://pop.example.com:9995` — the port falls back to the
/// transport's standard port when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Locator {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Locator {
    /// Parse `scheme://host[:port]`. The scheme is normalized to
    /// lowercase; anything after a `/` in the authority is rejected.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLocator {
            locator: input.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }
        if rest.contains('/') {
            return Err(invalid("path components are not allowed"));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| invalid("port is not a number in 1-65535"))?;
                (host, Some(port))
            }
            None => (rest, None),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
        })
    }

    /// The configured port, or `default` when omitted.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

impl TryFrom<String> for Locator {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

/// One full run: at least one tap and at least one sink.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShakeConfig {
    #[serde(default = "default_shake_name")]
    pub shake_name: String,
    #[serde(default)]
    pub taps: Vec<TapConfig>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl ShakeConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Credential reference shared by remote taps and sinks.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub user: String,
    /// Secret reference; see the resolver grammar in [`crate::secret`].
    pub secret: String,
    /// Memoize the resolved secret for the process lifetime.
    #[serde(default)]
    pub cache_secret: bool,
}

/// Tap variants.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TapConfig {
    /// Enumerate message files in a directory.
    Folder {
        #[serde(default)]
        name: Option<String>,
        path: PathBuf,
        #[serde(default)]
        recursive: bool,
        /// Retry undecodable files as Latin-1.
        #[serde(default)]
        try_latin1: bool,
        /// Delete messages accepted by at least one sink.
        #[serde(default)]
        move_on_success: bool,
        /// Tag attached to every selected message.
        #[serde(default = "default_tag")]
        tag: String,
    },
    /// Remote POP3 mailbox.
    Pop3 {
        #[serde(default)]
        name: Option<String>,
        url: Locator,
        #[serde(flatten)]
        credential: CredentialConfig,
        #[serde(default)]
        move_on_success: bool,
        #[serde(default = "default_tag")]
        tag: String,
    },
}

/// Sink variants.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Write messages as sequentially numbered files.
    Folder {
        path: PathBuf,
        #[serde(default = "default_extension")]
        extension: String,
        /// What `store` reports; decides whether a local copy counts as
        /// stored for purposes of source deletion.
        #[serde(default = "default_true")]
        report_stored: bool,
    },
    /// Append messages into a remote IMAP mailbox.
    Imap {
        url: Locator,
        #[serde(flatten)]
        credential: CredentialConfig,
        #[serde(default = "default_true")]
        auto_create_folders: bool,
        #[serde(default = "default_true")]
        deduplicate: bool,
        /// Report an already-present duplicate as stored, so the source
        /// copy gets cleaned up anyway.
        #[serde(default)]
        dupes_reported_as_stored: bool,
        /// Tag → mailbox overrides; unmapped tags are used verbatim.
        #[serde(default)]
        folder_map: HashMap<String, String>,
    },
    /// Forward messages to a fixed recipient over SMTP.
    Smtp {
        host: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
        #[serde(flatten)]
        credential: CredentialConfig,
        from: String,
        to: String,
    },
}

fn default_shake_name() -> String {
    "mailshake run".to_string()
}

fn default_tag() -> String {
    "Default".to_string()
}

fn default_extension() -> String {
    "eml".to_string()
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    587
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_with_port() {
        let locator = Locator::parse("pop3+ssl://pop.example.com:9995").unwrap();
        assert_eq!(locator.scheme, "pop3+ssl");
        assert_eq!(locator.host, "pop.example.com");
        assert_eq!(locator.port, Some(9995));
    }

    #[test]
    fn locator_without_port_uses_default() {
        let locator = Locator::parse("imap4+ssl://mail.example.com").unwrap();
        assert_eq!(locator.port, None);
        assert_eq!(locator.port_or(993), 993);
    }

    #[test]
    fn locator_scheme_is_lowercased() {
        let locator = Locator::parse("POP3+SSL://pop.example.com").unwrap();
        assert_eq!(locator.scheme, "pop3+ssl");
    }

    #[test]
    fn locator_rejects_missing_scheme() {
        assert!(Locator::parse("pop.example.com:995").is_err());
    }

    #[test]
    fn locator_rejects_bad_port() {
        assert!(Locator::parse("pop3+ssl://pop.example.com:notaport").is_err());
    }

    #[test]
    fn locator_rejects_path() {
        assert!(Locator::parse("imap4+ssl://mail.example.com/INBOX").is_err());
    }

    #[test]
    fn full_config_parses() {
        let json = r#"{
            "shake_name": "nightly sweep",
            "taps": [
                {
                    "kind": "pop3",
                    "url": "pop3+ssl://pop.example.com",
                    "user": "alice",
                    "secret": "gpg2:///home/alice/.mail.gpg",
                    "move_on_success": true
                },
                {
                    "kind": "folder",
                    "path": "/var/mail/backlog",
                    "recursive": true,
                    "try_latin1": true
                }
            ],
            "sinks": [
                {
                    "kind": "imap",
                    "url": "imap4+ssl://mail.example.com:993",
                    "user": "alice",
                    "secret": "plain://hunter2",
                    "dupes_reported_as_stored": true,
                    "folder_map": { "Default": "INBOX" }
                },
                {
                    "kind": "folder",
                    "path": "/var/mail/archive",
                    "report_stored": false
                }
            ]
        }"#;

        let config: ShakeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.shake_name, "nightly sweep");
        assert_eq!(config.taps.len(), 2);
        assert_eq!(config.sinks.len(), 2);

        match &config.taps[0] {
            TapConfig::Pop3 {
                url,
                credential,
                move_on_success,
                tag,
                ..
            } => {
                assert_eq!(url.host, "pop.example.com");
                assert_eq!(credential.user, "alice");
                assert!(!credential.cache_secret);
                assert!(move_on_success);
                assert_eq!(tag, "Default");
            }
            other => panic!("unexpected tap: {other:?}"),
        }

        match &config.sinks[0] {
            SinkConfig::Imap {
                deduplicate,
                dupes_reported_as_stored,
                auto_create_folders,
                folder_map,
                ..
            } => {
                assert!(deduplicate);
                assert!(dupes_reported_as_stored);
                assert!(auto_create_folders);
                assert_eq!(folder_map.get("Default").map(String::as_str), Some("INBOX"));
            }
            other => panic!("unexpected sink: {other:?}"),
        }
    }

    #[test]
    fn unknown_tap_kind_is_rejected() {
        let json = r#"{ "taps": [ { "kind": "carrier_pigeon" } ] }"#;
        assert!(serde_json::from_str::<ShakeConfig>(json).is_err());
    }
}
