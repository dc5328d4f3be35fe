//! Message model — raw bytes plus header lookup.
//!
//! The engine treats a message as an opaque document: taps produce one,
//! sinks consume one, and the only structure anyone relies on is
//! case-insensitive header access (select policies, IMAP dedup) and a
//! byte-faithful serialization (folder writes, IMAP APPEND, SMTP relay).
//! Header parsing is delegated to `mail-parser`.

use mail_parser::MessageParser;

/// Decode failures for a single message.
///
/// These are per-item recoverable: a tap reports them and keeps
/// enumerating (see `tap::Tap::all_messages`).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("not valid UTF-8 (byte {position})")]
    NotUtf8 { position: usize },

    #[error("not parseable as a mail message")]
    Unparseable,
}

/// An immutable mail message.
///
/// Owns its raw serialized bytes; header lookups parse on demand, which
/// keeps the type free of self-referential borrows and is cheap at the
/// one-or-two lookups a routing decision actually makes.
#[derive(Debug, Clone)]
pub struct MailMessage {
    raw: Vec<u8>,
}

impl MailMessage {
    /// Wrap already-decoded message bytes.
    ///
    /// Fails if `mail-parser` cannot make a message out of them at all.
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, DecodeError> {
        if MessageParser::default().parse(&raw).is_none() {
            return Err(DecodeError::Unparseable);
        }
        Ok(Self { raw })
    }

    /// Decode message bytes that are expected to be text.
    ///
    /// The primary encoding is UTF-8. When `try_latin1` is set, bytes
    /// that fail UTF-8 validation are re-read as Latin-1 (every byte maps
    /// to the code point of the same value), which matches how legacy
    /// mail folders were commonly written.
    pub fn decode(bytes: Vec<u8>, try_latin1: bool) -> Result<Self, DecodeError> {
        match std::str::from_utf8(&bytes) {
            Ok(_) => Self::from_bytes(bytes),
            Err(e) if try_latin1 => {
                tracing::debug!(
                    position = e.valid_up_to(),
                    "UTF-8 decode failed, retrying as Latin-1"
                );
                let transcoded: String = bytes.iter().map(|&b| b as char).collect();
                Self::from_bytes(transcoded.into_bytes())
            }
            Err(e) => Err(DecodeError::NotUtf8 {
                position: e.valid_up_to(),
            }),
        }
    }

    /// Case-insensitive header lookup.
    ///
    /// Returns the parsed text of the first header with that name, or
    /// `None` when the header is absent.
    pub fn header(&self, name: &str) -> Option<String> {
        if let Some(parsed) = MessageParser::default().parse(&self.raw)
            && let Some(text) = parsed.header(name).and_then(|value| value.as_text())
        {
            return Some(text.to_string());
        }
        // Structured values (addresses, dates) have no single text form;
        // fall back to the raw, unfolded header line.
        raw_header(&self.raw, name)
    }

    /// The Message-ID header, if present.
    ///
    /// `mail-parser` strips the surrounding angle brackets.
    pub fn message_id(&self) -> Option<String> {
        self.header("Message-ID")
    }

    /// Stable byte serialization of the whole message.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Message size in bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the message is empty.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Scan the raw header block for `name`, unfolding continuation lines.
fn raw_header(raw: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let mut found: Option<String> = None;
    for line in text.lines() {
        if line.is_empty() {
            break; // end of header block
        }
        if let Some(ref mut value) = found {
            if line.starts_with(' ') || line.starts_with('\t') {
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }
            break;
        }
        if let Some((key, rest)) = line.split_once(':')
            && key.trim().eq_ignore_ascii_case(name)
        {
            found = Some(rest.trim().to_string());
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Message-ID: <abc123@example.com>\r\n\
                          From: alice@example.com\r\n\
                          Subject: Hello\r\n\
                          \r\n\
                          Body text\r\n";

    #[test]
    fn header_lookup_is_case_insensitive() {
        let msg = MailMessage::from_bytes(SAMPLE.as_bytes().to_vec()).unwrap();
        assert_eq!(msg.header("Subject").as_deref(), Some("Hello"));
        assert_eq!(msg.header("subject").as_deref(), Some("Hello"));
        assert_eq!(msg.header("SUBJECT").as_deref(), Some("Hello"));
    }

    #[test]
    fn absent_header_is_none() {
        let msg = MailMessage::from_bytes(SAMPLE.as_bytes().to_vec()).unwrap();
        assert_eq!(msg.header("X-Does-Not-Exist"), None);
    }

    #[test]
    fn message_id_without_brackets() {
        let msg = MailMessage::from_bytes(SAMPLE.as_bytes().to_vec()).unwrap();
        assert_eq!(msg.message_id().as_deref(), Some("abc123@example.com"));
    }

    #[test]
    fn missing_message_id_is_none() {
        let raw = "From: a@b.c\r\nSubject: x\r\n\r\nhi\r\n";
        let msg = MailMessage::from_bytes(raw.as_bytes().to_vec()).unwrap();
        assert_eq!(msg.message_id(), None);
    }

    #[test]
    fn bytes_round_trip_unchanged() {
        let msg = MailMessage::from_bytes(SAMPLE.as_bytes().to_vec()).unwrap();
        assert_eq!(msg.as_bytes(), SAMPLE.as_bytes());
    }

    #[test]
    fn decode_rejects_invalid_utf8_without_fallback() {
        let mut bytes = b"Subject: caf".to_vec();
        bytes.push(0xE9); // Latin-1 e-acute
        bytes.extend_from_slice(b"\r\n\r\nbody\r\n");
        let err = MailMessage::decode(bytes, false).unwrap_err();
        assert!(matches!(err, DecodeError::NotUtf8 { .. }));
    }

    #[test]
    fn decode_latin1_fallback_transcodes() {
        let mut bytes = b"Subject: caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"\r\n\r\nbody\r\n");
        let msg = MailMessage::decode(bytes, true).unwrap();
        assert_eq!(msg.header("Subject").as_deref(), Some("caf\u{e9}"));
    }

    #[test]
    fn decode_accepts_plain_utf8() {
        let msg = MailMessage::decode(SAMPLE.as_bytes().to_vec(), false).unwrap();
        assert_eq!(msg.header("From").as_deref(), Some("alice@example.com"));
    }
}
