//! Authentication — binds a credential to a transport session.
//!
//! Dispatch is by declared capability, not by concrete session type: a
//! session advertises either a sequential user-then-pass handshake
//! (POP3's `USER`/`PASS`) or a single combined login command (IMAP's
//! `LOGIN`). The authenticator performs exactly one handshake and never
//! retries.

use secrecy::SecretString;

use crate::error::{AuthError, NetError};
use crate::secret::SecretResolver;

/// Sequential user-then-pass login (POP3 style).
pub trait SequentialLogin {
    fn supply_user(&mut self, user: &str) -> Result<(), NetError>;
    fn supply_pass(&mut self, pass: &SecretString) -> Result<(), NetError>;
}

/// Single combined login command (IMAP style).
pub trait CombinedLogin {
    fn login(&mut self, user: &str, pass: &SecretString) -> Result<(), NetError>;
}

/// The login capability a session declares.
pub enum LoginCapability<'a> {
    Sequential(&'a mut dyn SequentialLogin),
    Combined(&'a mut dyn CombinedLogin),
}

/// A transport session that may be logged into.
pub trait TransportSession {
    /// The capability this session supports, or `None` when it has no
    /// login mechanism the authenticator understands.
    fn login_capability(&mut self) -> Option<LoginCapability<'_>>;
}

/// A username plus a resolvable secret reference.
pub struct UserPass {
    user: String,
    secret: SecretResolver,
}

impl UserPass {
    /// Credential from a username and a secret reference (see
    /// [`SecretResolver`] for the reference grammar).
    pub fn new(user: impl Into<String>, secret_reference: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: SecretResolver::new(secret_reference),
        }
    }

    /// Credential with a fully configured resolver (custom helpers,
    /// prompt, or caching).
    pub fn with_resolver(user: impl Into<String>, secret: SecretResolver) -> Self {
        Self {
            user: user.into(),
            secret,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Perform one login handshake on `session`.
    ///
    /// The resolved secret lives only for the duration of this call;
    /// it is zeroized on drop unless the resolver caches it.
    pub fn login(&self, session: &mut dyn TransportSession) -> Result<(), AuthError> {
        let secret = self.secret.resolve()?;

        let outcome = match session.login_capability() {
            Some(LoginCapability::Sequential(seq)) => {
                tracing::info!(user = %self.user, "authenticating via sequential user/pass");
                seq.supply_user(&self.user)
                    .and_then(|()| seq.supply_pass(&secret))
            }
            Some(LoginCapability::Combined(combined)) => {
                tracing::info!(user = %self.user, "authenticating via combined login");
                combined.login(&self.user, &secret)
            }
            None => return Err(AuthError::UnsupportedTransport),
        };

        outcome.map_err(|e| match e {
            NetError::CommandRejected { response, .. } => AuthError::LoginRejected {
                user: self.user.clone(),
                reason: response,
            },
            other => AuthError::Net(other),
        })
    }
}
