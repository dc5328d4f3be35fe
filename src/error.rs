//! Error types for mailshake.

use std::path::PathBuf;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Net(#[from] NetError),

    #[error("Tap error: {0}")]
    Tap(#[from] TapError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid connection locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("Unsupported scheme {scheme:?} for {component}")]
    UnsupportedScheme { scheme: String, component: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Secret-reference resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Helper {helper:?} exited with {status}: {stderr}")]
    HelperFailed {
        helper: String,
        status: String,
        stderr: String,
    },

    #[error("Helper {helper:?} does not accept an inline reference")]
    HelperNotInline { helper: String },

    #[error("Failed to invoke helper {helper:?}: {source}")]
    HelperSpawn {
        helper: String,
        source: std::io::Error,
    },

    #[error("Helper {helper:?} produced non-UTF-8 output")]
    HelperOutput { helper: String },

    #[error("Unrecognized secret-reference scheme {scheme:?}")]
    UnknownScheme { scheme: String },

    #[error("Malformed encrypted blob: {0}")]
    MalformedBlob(String),

    #[error("Decryption failed: {0}")]
    DecryptFailed(String),

    #[error("Failed to read passphrase: {0}")]
    Prompt(std::io::Error),
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Session exposes no supported login capability")]
    UnsupportedTransport,

    #[error("Login rejected for user {user}: {reason}")]
    LoginRejected { user: String, reason: String },

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Transport error: {0}")]
    Net(#[from] NetError),
}

/// Low-level transport errors (TLS, line protocol).
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("TLS setup for {host} failed: {reason}")]
    Tls { host: String, reason: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Server rejected {command}: {response}")]
    CommandRejected { command: String, response: String },

    #[error("Value {value:?} cannot be sent as an IMAP quoted string")]
    UnquotableValue { value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tap-side errors.
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("Tap {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Tap {name} was used before start()")]
    NotStarted { name: String },

    #[error("Failed to decode message {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to retrieve message {ordinal}: {reason}")]
    Retrieve { ordinal: u32, reason: String },

    #[error("Handle {handle} does not belong to tap {name}")]
    ForeignHandle { name: String, handle: String },

    #[error("Failed to delete {handle}: {source}")]
    Delete {
        handle: String,
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Net(#[from] NetError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink-side errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Sink {name} was used before start()")]
    NotStarted { name: String },

    #[error("Failed to write message: {0}")]
    Write(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Net(#[from] NetError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("SMTP error: {0}")]
    Smtp(String),
}

/// Orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No taps configured; provide at least one tap")]
    NoTaps,

    #[error("No sinks configured; provide at least one sink")]
    NoSinks,
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
