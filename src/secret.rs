//! Credential resolver — turns a secret reference into a plaintext secret.
//!
//! A secret reference is a string in one of five encodings, dispatched by
//! prefix, first match wins:
//!
//! 1. `plain://<literal>`        — explicit plaintext marker, remainder
//!    returned verbatim (for passwords that would otherwise look like a
//!    reference).
//! 2. `<helper>://<file>`        — a configured helper command decrypts
//!    the file; its stdout is the secret.
//! 3. `<helper>:<inline>`        — as (2), but the ciphertext is piped to
//!    the helper's stdin.
//! 4. `aes256cbc:<armored>`      — built-in decryption of an OpenSSL
//!    `aes-256-cbc -a` armored blob, passphrase obtained from the
//!    injected prompt.
//! 5. bare token                 — already plaintext.
//!
//! Helper output is captured in-memory through the child's piped stdout;
//! no plaintext ever touches persistent storage. Resolved secrets are
//! [`SecretString`]s, zeroized on drop.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};

use crate::error::CredentialError;

/// Prefix handled by the built-in armored-blob branch.
const AES_ARMORED_PREFIX: &str = "aes256cbc:";

/// Source of an interactively-typed passphrase.
///
/// Injected so tests (and non-interactive deployments) can supply one
/// without a terminal.
pub trait PassphrasePrompt: Send + Sync {
    fn read_passphrase(&self, prompt: &str) -> std::io::Result<SecretString>;
}

/// Reads a passphrase from standard input.
pub struct StdinPrompt;

impl PassphrasePrompt for StdinPrompt {
    fn read_passphrase(&self, prompt: &str) -> std::io::Result<SecretString> {
        eprint!("{prompt}");
        std::io::Write::flush(&mut std::io::stderr())?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(SecretString::from(line.trim_end_matches(['\r', '\n'])))
    }
}

/// An external decryption helper.
///
/// `args` may contain a `{}` placeholder, replaced by the referenced
/// file path in file mode. In inline mode the placeholder argument is
/// dropped and the ciphertext is piped to stdin instead.
#[derive(Debug, Clone)]
pub struct HelperCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Whether the helper accepts ciphertext on stdin (`<name>:<inline>`).
    pub accepts_inline: bool,
}

/// Ordered registry of decryption helpers. First match wins, so
/// registration order matters when prefixes could overlap.
#[derive(Debug, Clone)]
pub struct HelperRegistry {
    helpers: Vec<(String, HelperCommand)>,
}

impl HelperRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            helpers: Vec::new(),
        }
    }

    /// The stock deployment: `gpg2` (file and inline) and `aes256cbc`
    /// file references delegated to openssl. Inline `aes256cbc:` blobs
    /// are handled by the built-in branch, not a helper.
    pub fn defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "gpg2",
            HelperCommand {
                program: "gpg2".into(),
                args: vec!["-q".into(), "--yes".into(), "-d".into(), "{}".into()],
                accepts_inline: true,
            },
        );
        registry.register(
            "aes256cbc",
            HelperCommand {
                program: "openssl".into(),
                args: vec![
                    "aes-256-cbc".into(),
                    "-d".into(),
                    "-a".into(),
                    "-in".into(),
                    "{}".into(),
                ],
                accepts_inline: false,
            },
        );
        registry
    }

    /// Register a helper under `name`, handling `<name>://` references.
    pub fn register(&mut self, name: impl Into<String>, command: HelperCommand) {
        self.helpers.push((name.into(), command));
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &HelperCommand)> {
        self.helpers.iter().map(|(n, c)| (n.as_str(), c))
    }
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Resolves one secret reference, optionally memoizing the result.
///
/// Caching is opt-in: an interactively-typed passphrase should prompt
/// once per logical secret, not once per call, but a resolver shared by
/// nothing gains nothing from holding plaintext longer than one login.
pub struct SecretResolver {
    reference: String,
    helpers: HelperRegistry,
    prompt: Arc<dyn PassphrasePrompt>,
    cache_enabled: bool,
    cached: Mutex<Option<SecretString>>,
}

impl SecretResolver {
    /// Resolver with the default helper registry, a stdin passphrase
    /// prompt, and caching disabled.
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            helpers: HelperRegistry::defaults(),
            prompt: Arc::new(StdinPrompt),
            cache_enabled: false,
            cached: Mutex::new(None),
        }
    }

    /// Enable or disable memoization of the resolved secret.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Replace the passphrase prompt.
    pub fn with_prompt(mut self, prompt: Arc<dyn PassphrasePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Replace the helper registry.
    pub fn with_helpers(mut self, helpers: HelperRegistry) -> Self {
        self.helpers = helpers;
        self
    }

    /// Recover the plaintext secret.
    pub fn resolve(&self) -> Result<SecretString, CredentialError> {
        if self.cache_enabled
            && let Some(cached) = self.cached.lock().unwrap().as_ref()
        {
            return Ok(cached.clone());
        }

        let secret = self.resolve_uncached()?;

        if self.cache_enabled {
            *self.cached.lock().unwrap() = Some(secret.clone());
        }
        Ok(secret)
    }

    fn resolve_uncached(&self) -> Result<SecretString, CredentialError> {
        let reference = self.reference.as_str();

        if let Some(literal) = reference.strip_prefix("plain://") {
            return Ok(SecretString::from(literal));
        }

        for (name, command) in self.helpers.iter() {
            if let Some(path) = strip_scheme(reference, name, "://") {
                tracing::debug!(helper = name, "resolving secret via helper (file)");
                return run_helper(name, command, HelperInput::File(path));
            }
        }

        for (name, command) in self.helpers.iter() {
            if let Some(inline) = strip_scheme(reference, name, ":") {
                if !command.accepts_inline {
                    if name == "aes256cbc" {
                        break; // built-in armored branch below
                    }
                    return Err(CredentialError::HelperNotInline {
                        helper: name.to_string(),
                    });
                }
                tracing::debug!(helper = name, "resolving secret via helper (inline)");
                return run_helper(name, command, HelperInput::Inline(inline));
            }
        }

        if let Some(armored) = reference.strip_prefix(AES_ARMORED_PREFIX) {
            tracing::debug!("resolving secret via built-in aes-256-cbc");
            let passphrase = self
                .prompt
                .read_passphrase("Enter passcode: ")
                .map_err(CredentialError::Prompt)?;
            return decrypt_armored(armored, &passphrase);
        }

        if let Some((scheme, _)) = reference.split_once("://") {
            return Err(CredentialError::UnknownScheme {
                scheme: scheme.to_string(),
            });
        }

        // Bare token: already plaintext.
        Ok(SecretString::from(reference))
    }
}

/// Strip `<name><separator>` from the front of `reference`.
fn strip_scheme<'a>(reference: &'a str, name: &str, separator: &str) -> Option<&'a str> {
    reference
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(separator))
}

enum HelperInput<'a> {
    File(&'a str),
    Inline(&'a str),
}

/// Spawn a helper and capture its stdout in-memory.
///
/// The decrypted secret travels child stdout → pipe → our address space;
/// nothing is written to disk and no auxiliary reader thread is needed.
fn run_helper(
    name: &str,
    command: &HelperCommand,
    input: HelperInput<'_>,
) -> Result<SecretString, CredentialError> {
    let mut cmd = Command::new(&command.program);
    match input {
        HelperInput::File(path) => {
            for arg in &command.args {
                if arg == "{}" {
                    cmd.arg(path);
                } else {
                    cmd.arg(arg);
                }
            }
            cmd.stdin(Stdio::null());
        }
        HelperInput::Inline(_) => {
            for arg in command.args.iter().filter(|a| *a != "{}") {
                cmd.arg(arg);
            }
            cmd.stdin(Stdio::piped());
        }
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| CredentialError::HelperSpawn {
        helper: name.to_string(),
        source,
    })?;

    if let HelperInput::Inline(ciphertext) = input
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin
            .write_all(ciphertext.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .map_err(|source| CredentialError::HelperSpawn {
                helper: name.to_string(),
                source,
            })?;
        // Dropping stdin closes the pipe so the helper sees EOF.
    }

    let output = child
        .wait_with_output()
        .map_err(|source| CredentialError::HelperSpawn {
            helper: name.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(CredentialError::HelperFailed {
            helper: name.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8(output.stdout).map_err(|_| CredentialError::HelperOutput {
        helper: name.to_string(),
    })?;
    Ok(SecretString::from(stdout.trim()))
}

/// Decrypt an OpenSSL-armored `aes-256-cbc` blob.
///
/// Layout after base64 decode: `Salted__` magic, 8-byte salt, then the
/// CBC ciphertext. Key and IV come from MD5-based key stretching over
/// the passphrase and salt (OpenSSL's legacy EVP_BytesToKey, one
/// iteration), and PKCS#7 padding is stripped from the final block.
fn decrypt_armored(
    armored: &str,
    passphrase: &SecretString,
) -> Result<SecretString, CredentialError> {
    use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
    use base64::Engine;

    let blob = base64::engine::general_purpose::STANDARD
        .decode(armored.trim())
        .map_err(|e| CredentialError::MalformedBlob(format!("invalid base64: {e}")))?;

    if blob.len() < 16 || &blob[..8] != b"Salted__" {
        return Err(CredentialError::MalformedBlob(
            "missing Salted__ header".into(),
        ));
    }
    let salt = &blob[8..16];
    let ciphertext = &blob[16..];
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CredentialError::MalformedBlob(format!(
            "ciphertext length {} is not a positive multiple of the block size",
            ciphertext.len()
        )));
    }

    let (key, iv) = derive_key_iv(passphrase.expose_secret().as_bytes(), salt);

    let plaintext = cbc::Decryptor::<aes::Aes256>::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CredentialError::DecryptFailed("bad key or corrupt blob".into()))?;

    let text = String::from_utf8(plaintext)
        .map_err(|_| CredentialError::DecryptFailed("plaintext is not UTF-8".into()))?;
    Ok(SecretString::from(text.trim()))
}

/// OpenSSL legacy key derivation: hash [previous digest ‖ passphrase ‖
/// salt] with MD5 until 48 bytes of key+IV material exist.
fn derive_key_iv(passphrase: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 16]) {
    use md5::{Digest, Md5};

    let mut material = Vec::with_capacity(48);
    let mut previous: Vec<u8> = Vec::new();
    while material.len() < 48 {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(passphrase);
        hasher.update(salt);
        previous = hasher.finalize().to_vec();
        material.extend_from_slice(&previous);
    }

    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&material[..32]);
    iv.copy_from_slice(&material[32..48]);
    (key, iv)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Prompt returning a fixed passphrase, counting invocations.
    struct FixedPrompt {
        passphrase: String,
        calls: AtomicUsize,
    }

    impl FixedPrompt {
        fn new(passphrase: &str) -> Arc<Self> {
            Arc::new(Self {
                passphrase: passphrase.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PassphrasePrompt for FixedPrompt {
        fn read_passphrase(&self, _prompt: &str) -> std::io::Result<SecretString> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::from(self.passphrase.as_str()))
        }
    }

    /// Build an OpenSSL-compatible armored blob for tests.
    fn encrypt_armored(plaintext: &str, passphrase: &str, salt: [u8; 8]) -> String {
        use aes::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
        use base64::Engine;

        let (key, iv) = derive_key_iv(passphrase.as_bytes(), &salt);
        let ciphertext = cbc::Encryptor::<aes::Aes256>::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut blob = b"Salted__".to_vec();
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&ciphertext);
        base64::engine::general_purpose::STANDARD.encode(blob)
    }

    #[test]
    fn plain_prefix_returns_remainder_verbatim() {
        let resolver = SecretResolver::new("plain://hunter2");
        assert_eq!(resolver.resolve().unwrap().expose_secret(), "hunter2");
    }

    #[test]
    fn plain_prefix_protects_scheme_looking_passwords() {
        let resolver = SecretResolver::new("plain://gpg2://not-a-reference");
        assert_eq!(
            resolver.resolve().unwrap().expose_secret(),
            "gpg2://not-a-reference"
        );
    }

    #[test]
    fn bare_token_is_already_plaintext() {
        let resolver = SecretResolver::new("swordfish");
        assert_eq!(resolver.resolve().unwrap().expose_secret(), "swordfish");
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        let resolver = SecretResolver::new("vault9://whatever");
        let err = resolver.resolve().unwrap_err();
        assert!(matches!(
            err,
            CredentialError::UnknownScheme { scheme } if scheme == "vault9"
        ));
    }

    #[test]
    fn aes_armored_round_trip() {
        let armored = encrypt_armored("s3cret value", "correct horse", *b"\x01\x02\x03\x04\x05\x06\x07\x08");
        let resolver = SecretResolver::new(format!("aes256cbc:{armored}"))
            .with_prompt(FixedPrompt::new("correct horse"));
        assert_eq!(resolver.resolve().unwrap().expose_secret(), "s3cret value");
    }

    #[test]
    fn aes_armored_wrong_passphrase_does_not_yield_plaintext() {
        let armored = encrypt_armored("s3cret value", "correct horse", [9; 8]);
        let resolver = SecretResolver::new(format!("aes256cbc:{armored}"))
            .with_prompt(FixedPrompt::new("wrong horse"));
        match resolver.resolve() {
            Err(CredentialError::DecryptFailed(_)) => {}
            Ok(secret) => assert_ne!(secret.expose_secret(), "s3cret value"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn aes_armored_rejects_bad_base64() {
        let resolver = SecretResolver::new("aes256cbc:!!!not-base64!!!")
            .with_prompt(FixedPrompt::new("irrelevant"));
        assert!(matches!(
            resolver.resolve().unwrap_err(),
            CredentialError::MalformedBlob(_)
        ));
    }

    #[test]
    fn aes_armored_rejects_missing_magic() {
        use base64::Engine;
        let armored = base64::engine::general_purpose::STANDARD.encode(b"NotSalted_123456");
        let resolver = SecretResolver::new(format!("aes256cbc:{armored}"))
            .with_prompt(FixedPrompt::new("irrelevant"));
        assert!(matches!(
            resolver.resolve().unwrap_err(),
            CredentialError::MalformedBlob(_)
        ));
    }

    #[test]
    fn caching_prompts_once() {
        let armored = encrypt_armored("memoized", "pass", [7; 8]);
        let prompt = FixedPrompt::new("pass");
        let resolver = SecretResolver::new(format!("aes256cbc:{armored}"))
            .with_prompt(prompt.clone())
            .with_cache(true);

        let first = resolver.resolve().unwrap();
        let second = resolver.resolve().unwrap();
        assert_eq!(first.expose_secret(), second.expose_secret());
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_caching_prompts_every_call() {
        let armored = encrypt_armored("ephemeral", "pass", [7; 8]);
        let prompt = FixedPrompt::new("pass");
        let resolver = SecretResolver::new(format!("aes256cbc:{armored}"))
            .with_prompt(prompt.clone());

        resolver.resolve().unwrap();
        resolver.resolve().unwrap();
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn helper_file_reference_captures_stdout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-the-file").unwrap();

        let mut helpers = HelperRegistry::new();
        helpers.register(
            "cat",
            HelperCommand {
                program: "cat".into(),
                args: vec!["{}".into()],
                accepts_inline: true,
            },
        );

        let reference = format!("cat://{}", file.path().display());
        let resolver = SecretResolver::new(reference).with_helpers(helpers);
        assert_eq!(resolver.resolve().unwrap().expose_secret(), "from-the-file");
    }

    #[test]
    fn helper_inline_reference_pipes_stdin() {
        let mut helpers = HelperRegistry::new();
        helpers.register(
            "cat",
            HelperCommand {
                program: "cat".into(),
                args: vec!["{}".into()],
                accepts_inline: true,
            },
        );

        let resolver = SecretResolver::new("cat:open-sesame").with_helpers(helpers);
        assert_eq!(resolver.resolve().unwrap().expose_secret(), "open-sesame");
    }

    #[test]
    fn helper_failure_is_reported_with_stderr() {
        let mut helpers = HelperRegistry::new();
        helpers.register(
            "bad",
            HelperCommand {
                program: "sh".into(),
                args: vec!["-c".into(), "echo doom >&2; exit 3".into()],
                accepts_inline: true,
            },
        );

        let resolver = SecretResolver::new("bad:whatever").with_helpers(helpers);
        match resolver.resolve().unwrap_err() {
            CredentialError::HelperFailed { helper, stderr, .. } => {
                assert_eq!(helper, "bad");
                assert_eq!(stderr, "doom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_helper_binary_is_a_spawn_error() {
        let mut helpers = HelperRegistry::new();
        helpers.register(
            "ghost",
            HelperCommand {
                program: "definitely-not-installed-anywhere".into(),
                args: vec!["{}".into()],
                accepts_inline: false,
            },
        );

        let resolver = SecretResolver::new("ghost:///tmp/nothing").with_helpers(helpers);
        assert!(matches!(
            resolver.resolve().unwrap_err(),
            CredentialError::HelperSpawn { .. }
        ));
    }

    #[test]
    fn file_helper_without_inline_mode_rejects_inline_reference() {
        let mut helpers = HelperRegistry::new();
        helpers.register(
            "fileonly",
            HelperCommand {
                program: "cat".into(),
                args: vec!["{}".into()],
                accepts_inline: false,
            },
        );

        let resolver = SecretResolver::new("fileonly:blob").with_helpers(helpers);
        assert!(matches!(
            resolver.resolve().unwrap_err(),
            CredentialError::HelperNotInline { .. }
        ));
    }
}
