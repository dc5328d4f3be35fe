//! Blocking TLS transport and the minimal POP3/IMAP wire clients.
//!
//! Both clients speak just enough of their protocol for the taps and
//! sinks in this crate: greeting, login, enumeration, retrieval,
//! deletion and append. TLS is rustls with the webpki root store; all
//! IO is synchronous and sequential.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::auth::{CombinedLogin, LoginCapability, SequentialLogin, TransportSession};
use crate::error::NetError;

/// Read timeout for remote mailbox servers.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Open a TLS connection to `host:port`.
pub fn connect_tls(host: &str, port: u16) -> Result<TlsStream, NetError> {
    let tcp = TcpStream::connect((host, port)).map_err(|source| NetError::Connect {
        host: host.to_string(),
        port,
        source,
    })?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string()).map_err(|e| {
        NetError::Tls {
            host: host.to_string(),
            reason: e.to_string(),
        }
    })?;
    let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| NetError::Tls {
        host: host.to_string(),
        reason: e.to_string(),
    })?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Read one CRLF-terminated line as raw bytes, terminator stripped.
fn read_line_bytes(stream: &mut TlsStream) -> Result<Vec<u8>, NetError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match stream.read(&mut byte) {
            Ok(0) => return Err(NetError::ConnectionClosed),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    buf.truncate(buf.len() - 2);
                    return Ok(buf);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read one protocol line as text. Status and response lines are ASCII;
/// message payload must go through [`read_line_bytes`] instead, as mail
/// bodies are not guaranteed to be UTF-8.
fn read_line(stream: &mut TlsStream) -> Result<String, NetError> {
    Ok(String::from_utf8_lossy(&read_line_bytes(stream)?).to_string())
}

/// Strip RFC 1939 dot-stuffing from one payload line.
fn unstuff(line: &[u8]) -> &[u8] {
    line.strip_prefix(b".").unwrap_or(line)
}

fn write_all(stream: &mut TlsStream, bytes: &[u8]) -> Result<(), NetError> {
    stream.write_all(bytes)?;
    stream.flush()?;
    Ok(())
}

/// Quote a string for IMAP (mailbox names, search values).
///
/// Quoted strings cannot legally carry CR, LF, control characters or
/// 8-bit bytes; such values are rejected up front rather than sent
/// malformed.
fn imap_quote(value: &str) -> Result<String, NetError> {
    if value.bytes().any(|b| b < 0x20 || b >= 0x7F) {
        return Err(NetError::UnquotableValue {
            value: value.to_string(),
        });
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("\"{escaped}\""))
}

// ── POP3 ────────────────────────────────────────────────────────────

/// A logged-in-or-not POP3 session over TLS.
pub struct Pop3Session {
    stream: TlsStream,
}

impl Pop3Session {
    /// Connect and consume the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, NetError> {
        let mut stream = connect_tls(host, port)?;
        let greeting = read_line(&mut stream)?;
        if !greeting.starts_with("+OK") {
            return Err(NetError::CommandRejected {
                command: "greeting".into(),
                response: greeting,
            });
        }
        Ok(Self { stream })
    }

    /// Send one command and read the single status line.
    fn command(&mut self, command: &str, redacted: &str) -> Result<String, NetError> {
        tracing::trace!(command = redacted, "POP3 >");
        write_all(&mut self.stream, format!("{command}\r\n").as_bytes())?;
        let response = read_line(&mut self.stream)?;
        if response.starts_with("+OK") {
            Ok(response)
        } else {
            Err(NetError::CommandRejected {
                command: redacted.to_string(),
                response,
            })
        }
    }

    /// Number of messages currently in the maildrop (`STAT`).
    pub fn message_count(&mut self) -> Result<u32, NetError> {
        let response = self.command("STAT", "STAT")?;
        response
            .split_whitespace()
            .nth(1)
            .and_then(|n| n.parse().ok())
            .ok_or(NetError::CommandRejected {
                command: "STAT".into(),
                response,
            })
    }

    /// Retrieve message `ordinal` (1-based) as raw bytes.
    ///
    /// Reads the multi-line response up to the terminating dot,
    /// un-stuffing leading double dots per RFC 1939. Payload lines are
    /// kept byte-for-byte; 8-bit bodies pass through untouched.
    pub fn retrieve(&mut self, ordinal: u32) -> Result<Vec<u8>, NetError> {
        self.command(&format!("RETR {ordinal}"), "RETR")?;
        let mut raw = Vec::new();
        loop {
            let line = read_line_bytes(&mut self.stream)?;
            if line == b"." {
                break;
            }
            raw.extend_from_slice(unstuff(&line));
            raw.extend_from_slice(b"\r\n");
        }
        Ok(raw)
    }

    /// Mark message `ordinal` as deleted (commits at `QUIT`).
    pub fn delete(&mut self, ordinal: u32) -> Result<(), NetError> {
        self.command(&format!("DELE {ordinal}"), "DELE")?;
        Ok(())
    }

    /// End the session, committing pending deletions.
    pub fn quit(&mut self) -> Result<(), NetError> {
        self.command("QUIT", "QUIT")?;
        Ok(())
    }
}

impl SequentialLogin for Pop3Session {
    fn supply_user(&mut self, user: &str) -> Result<(), NetError> {
        self.command(&format!("USER {user}"), "USER")?;
        Ok(())
    }

    fn supply_pass(&mut self, pass: &SecretString) -> Result<(), NetError> {
        // The secret goes straight to the wire; only the verb is logged.
        self.command(&format!("PASS {}", pass.expose_secret()), "PASS")?;
        Ok(())
    }
}

impl TransportSession for Pop3Session {
    fn login_capability(&mut self) -> Option<LoginCapability<'_>> {
        Some(LoginCapability::Sequential(self))
    }
}

// ── IMAP ────────────────────────────────────────────────────────────

/// A logged-in-or-not IMAP session over TLS.
pub struct ImapSession {
    stream: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    /// Connect and consume the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, NetError> {
        let mut stream = connect_tls(host, port)?;
        let greeting = read_line(&mut stream)?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(NetError::CommandRejected {
                command: "greeting".into(),
                response: greeting,
            });
        }
        Ok(Self {
            stream,
            next_tag: 1,
        })
    }

    fn fresh_tag(&mut self) -> String {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Send one command, collect untagged lines, and return
    /// `(completed_ok, untagged_lines, tagged_line)`.
    fn send_command(
        &mut self,
        command: &str,
        redacted: &str,
    ) -> Result<(bool, Vec<String>, String), NetError> {
        let tag = self.fresh_tag();
        tracing::trace!(command = redacted, "IMAP >");
        write_all(&mut self.stream, format!("{tag} {command}\r\n").as_bytes())?;
        self.collect_response(&tag)
    }

    fn collect_response(&mut self, tag: &str) -> Result<(bool, Vec<String>, String), NetError> {
        let mut untagged = Vec::new();
        loop {
            let line = read_line(&mut self.stream)?;
            if let Some(status) = line.strip_prefix(tag).and_then(|l| l.strip_prefix(' ')) {
                let ok = status.starts_with("OK");
                return Ok((ok, untagged, line));
            }
            untagged.push(line);
        }
    }

    /// Send a command that must complete `OK`.
    fn command_ok(&mut self, command: &str, redacted: &str) -> Result<Vec<String>, NetError> {
        let (ok, untagged, tagged) = self.send_command(command, redacted)?;
        if ok {
            Ok(untagged)
        } else {
            Err(NetError::CommandRejected {
                command: redacted.to_string(),
                response: tagged,
            })
        }
    }

    /// `SELECT` a mailbox; `Ok(false)` when the server answers `NO`
    /// (mailbox missing), which callers treat as a policy decision.
    pub fn select(&mut self, mailbox: &str) -> Result<bool, NetError> {
        let command = format!("SELECT {}", imap_quote(mailbox)?);
        let (ok, _, _) = self.send_command(&command, "SELECT")?;
        Ok(ok)
    }

    /// `CREATE` a mailbox; `Ok(false)` when the server refuses.
    pub fn create(&mut self, mailbox: &str) -> Result<bool, NetError> {
        let command = format!("CREATE {}", imap_quote(mailbox)?);
        let (ok, _, _) = self.send_command(&command, "CREATE")?;
        Ok(ok)
    }

    /// Search the selected mailbox for messages with `header: value`;
    /// returns matching sequence numbers.
    pub fn search_header(&mut self, header: &str, value: &str) -> Result<Vec<u32>, NetError> {
        let command = format!("SEARCH HEADER {header} {}", imap_quote(value)?);
        let untagged = self.command_ok(&command, "SEARCH")?;
        let mut hits = Vec::new();
        for line in &untagged {
            if let Some(rest) = line.strip_prefix("* SEARCH") {
                hits.extend(rest.split_whitespace().filter_map(|n| n.parse::<u32>().ok()));
            }
        }
        Ok(hits)
    }

    /// `APPEND` raw message bytes to a mailbox with the given internal
    /// date, using a literal with continuation.
    pub fn append(&mut self, mailbox: &str, internal_date: &str, body: &[u8]) -> Result<(), NetError> {
        let mailbox = imap_quote(mailbox)?;
        let tag = self.fresh_tag();
        let command = format!(
            "{tag} APPEND {mailbox} () \"{internal_date}\" {{{}}}\r\n",
            body.len()
        );
        tracing::trace!(%mailbox, bytes = body.len(), "IMAP > APPEND");
        write_all(&mut self.stream, command.as_bytes())?;

        // Wait for the continuation request before sending the literal.
        loop {
            let line = read_line(&mut self.stream)?;
            if line.starts_with('+') {
                break;
            }
            if line.strip_prefix(tag.as_str()).is_some_and(|l| l.starts_with(' ')) {
                return Err(NetError::CommandRejected {
                    command: "APPEND".into(),
                    response: line,
                });
            }
        }

        write_all(&mut self.stream, body)?;
        write_all(&mut self.stream, b"\r\n")?;
        let (ok, _, tagged) = self.collect_response(&tag)?;
        if ok {
            Ok(())
        } else {
            Err(NetError::CommandRejected {
                command: "APPEND".into(),
                response: tagged,
            })
        }
    }

    /// End the session.
    pub fn logout(&mut self) -> Result<(), NetError> {
        self.command_ok("LOGOUT", "LOGOUT")?;
        Ok(())
    }
}

impl CombinedLogin for ImapSession {
    fn login(&mut self, user: &str, pass: &SecretString) -> Result<(), NetError> {
        // A secret must never leak through the error path.
        let quoted_pass =
            imap_quote(pass.expose_secret()).map_err(|_| NetError::UnquotableValue {
                value: "<password>".to_string(),
            })?;
        let command = format!("LOGIN {} {quoted_pass}", imap_quote(user)?);
        self.command_ok(&command, "LOGIN")?;
        Ok(())
    }
}

impl TransportSession for ImapSession {
    fn login_capability(&mut self) -> Option<LoginCapability<'_>> {
        Some(LoginCapability::Combined(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imap_quote_plain() {
        assert_eq!(imap_quote("INBOX").unwrap(), "\"INBOX\"");
    }

    #[test]
    fn imap_quote_escapes_quotes_and_backslashes() {
        assert_eq!(imap_quote(r#"a"b\c"#).unwrap(), r#""a\"b\\c""#);
    }

    #[test]
    fn imap_quote_rejects_line_breaks() {
        assert!(matches!(
            imap_quote("INBOX\r\nA2 DELETE INBOX").unwrap_err(),
            NetError::UnquotableValue { .. }
        ));
    }

    #[test]
    fn imap_quote_rejects_non_ascii() {
        assert!(imap_quote("Boîte").is_err());
        assert!(imap_quote("tab\there").is_err());
    }

    #[test]
    fn unstuff_strips_one_leading_dot() {
        assert_eq!(unstuff(b"..dotted line"), b".dotted line");
        assert_eq!(unstuff(b"plain line"), b"plain line");
        assert_eq!(unstuff(b""), b"");
    }

    #[test]
    fn retrieved_payload_keeps_non_utf8_bytes() {
        // Latin-1 body lines must reach the caller byte-for-byte, the
        // way `retrieve` assembles them.
        let lines: [&[u8]; 2] = [b"Subject: caf\xE9", b"..stuffed"];
        let mut raw = Vec::new();
        for line in lines {
            raw.extend_from_slice(unstuff(line));
            raw.extend_from_slice(b"\r\n");
        }
        assert_eq!(raw, b"Subject: caf\xE9\r\n.stuffed\r\n");
    }
}
