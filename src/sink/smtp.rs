//! SMTP sink — forwards messages to a fixed recipient.

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::error::SinkError;
use crate::message::MailMessage;
use crate::secret::SecretResolver;
use crate::sink::Sink;

/// Forwards every offered message over authenticated submission
/// (STARTTLS) to a single recipient, preserving the raw message bytes.
///
/// The original sender is replaced by the configured `from` address in
/// the envelope; the message headers are not rewritten.
pub struct SmtpSink {
    name: String,
    host: String,
    port: u16,
    user: String,
    secret: SecretResolver,
    from: String,
    to: String,
    mailer: Option<(SmtpTransport, Envelope)>,
}

impl SmtpSink {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        secret: SecretResolver,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let host = host.into();
        Self {
            name: format!("smtp sink {host}"),
            host,
            port: 587,
            user: user.into(),
            secret,
            from: from.into(),
            to: to.into(),
            mailer: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn startup_error(&self, reason: impl Into<String>) -> SinkError {
        SinkError::StartupFailed {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl Sink for SmtpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), SinkError> {
        let from: Address = self
            .from
            .parse()
            .map_err(|e| self.startup_error(format!("bad from address: {e}")))?;
        let to: Address = self
            .to
            .parse()
            .map_err(|e| self.startup_error(format!("bad to address: {e}")))?;
        let envelope = Envelope::new(Some(from), vec![to])
            .map_err(|e| self.startup_error(format!("bad envelope: {e}")))?;

        let pass = self
            .secret
            .resolve()
            .map_err(crate::error::AuthError::from)?;
        let transport = SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| self.startup_error(format!("relay setup failed: {e}")))?
            .port(self.port)
            .credentials(Credentials::new(
                self.user.clone(),
                pass.expose_secret().to_string(),
            ))
            .build();

        tracing::info!(sink = %self.name, host = %self.host, port = self.port, "smtp sink ready");
        self.mailer = Some((transport, envelope));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.mailer = None;
        Ok(())
    }

    fn store(&mut self, _tag: &str, msg: &MailMessage) -> Result<bool, SinkError> {
        let (transport, envelope) = self.mailer.as_ref().ok_or_else(|| SinkError::NotStarted {
            name: self.name.clone(),
        })?;
        match transport.send_raw(envelope, msg.as_bytes()) {
            Ok(_) => {
                tracing::info!(sink = %self.name, to = %self.to, "message forwarded");
                Ok(true)
            }
            Err(e) if e.is_permanent() || e.is_transient() => {
                tracing::warn!(sink = %self.name, error = %e, "submission rejected");
                Ok(false)
            }
            Err(e) => Err(SinkError::Smtp(e.to_string())),
        }
    }
}
